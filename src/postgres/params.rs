use std::error::Error;

use tokio_postgres::types::{IsNull, ToSql, Type, WrongType};
use tokio_util::bytes;

use crate::parameter::Parameter;
use crate::types::DbValue;

/// Owned values for a parameter list, in order. Absent values become `NULL`.
#[derive(Debug)]
pub struct Params {
    values: Vec<DbValue>,
}

impl Params {
    #[must_use]
    pub fn from_parameters<'a>(parameters: impl IntoIterator<Item = &'a Parameter>) -> Self {
        let values = parameters
            .into_iter()
            .map(|p| p.value.clone().unwrap_or(DbValue::Null))
            .collect();
        Self { values }
    }

    /// Borrowed view suitable for `tokio_postgres` calls.
    #[must_use]
    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn narrowing_error(value: i64, ty: &Type) -> Box<dyn Error + Sync + Send> {
    format!("integer {value} does not fit in {ty}").into()
}

impl ToSql for DbValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            DbValue::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)
                    .map_err(|_| narrowing_error(*i, ty))?
                    .to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)
                    .map_err(|_| narrowing_error(*i, ty))?
                    .to_sql(ty, out),
                _ => (*i).to_sql(ty, out),
            },
            #[allow(clippy::cast_possible_truncation)]
            DbValue::Float(f) if *ty == Type::FLOAT4 => (*f as f32).to_sql(ty, out),
            DbValue::Float(f) => (*f).to_sql(ty, out),
            DbValue::Text(s) => s.to_sql(ty, out),
            DbValue::Bool(b) => (*b).to_sql(ty, out),
            DbValue::Timestamp(dt) if *ty == Type::DATE => dt.date().to_sql(ty, out),
            DbValue::Timestamp(dt) => dt.to_sql(ty, out),
            DbValue::Null => Ok(IsNull::Yes),
            DbValue::JSON(jsval) => jsval.to_sql(ty, out),
            DbValue::Blob(bytes) => bytes.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::DATE
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    /// Null binds to any parameter type; other values are checked against
    /// [`accepts`](ToSql::accepts).
    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        if matches!(self, DbValue::Null) {
            return Ok(IsNull::Yes);
        }
        if !<Self as ToSql>::accepts(ty) {
            return Err(Box::new(WrongType::new::<Self>(ty.clone())));
        }
        self.to_sql(ty, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_narrow_to_the_column_width() {
        let mut out = bytes::BytesMut::new();
        DbValue::Int(7).to_sql(&Type::INT4, &mut out).unwrap();
        assert_eq!(out.len(), 4);

        let mut out = bytes::BytesMut::new();
        assert!(DbValue::Int(70_000).to_sql(&Type::INT2, &mut out).is_err());
    }

    #[test]
    fn null_binds_to_types_values_cannot() {
        for ty in [Type::NUMERIC, Type::UUID, Type::INTERVAL, Type::INT4_ARRAY] {
            let mut out = bytes::BytesMut::new();
            assert!(matches!(
                DbValue::Null.to_sql_checked(&ty, &mut out),
                Ok(IsNull::Yes)
            ));
            assert!(out.is_empty());
        }

        let mut out = bytes::BytesMut::new();
        assert!(DbValue::Int(1).to_sql_checked(&Type::UUID, &mut out).is_err());
    }

    #[test]
    fn timestamps_bound_to_dates_use_the_date_encoding() {
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 2, 29)
            .and_then(|d| d.and_hms_opt(13, 45, 0))
            .unwrap();
        let mut out = bytes::BytesMut::new();
        DbValue::Timestamp(dt)
            .to_sql_checked(&Type::DATE, &mut out)
            .unwrap();
        assert_eq!(out.len(), 4);

        let mut expected = bytes::BytesMut::new();
        dt.date().to_sql(&Type::DATE, &mut expected).unwrap();
        assert_eq!(out, expected);

        let mut out = bytes::BytesMut::new();
        DbValue::Timestamp(dt)
            .to_sql_checked(&Type::TIMESTAMP, &mut out)
            .unwrap();
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn absent_values_become_null() {
        let params = Params::from_parameters(&[Parameter::new("a", None)]);
        assert_eq!(params.len(), 1);
        let mut out = bytes::BytesMut::new();
        assert!(matches!(
            params.as_refs()[0].to_sql_checked(&Type::TEXT, &mut out),
            Ok(IsNull::Yes)
        ));
    }
}
