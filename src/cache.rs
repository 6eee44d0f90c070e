//! Stored-procedure parameter shapes, discovered once per
//! `(connection string, procedure)` and handed out as owned copies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::command::CommandType;
use crate::error::{Result, SqlCommandError};
use crate::parameter::{Parameter, ParameterDirection};
use crate::provider::{DbConnection, NativeCommand, Provider};
use crate::types::DbValue;

const RETURN_VALUE_SUFFIX: &str = ":include ReturnValue Parameter";

/// Process-lifetime cache of stored-procedure parameter shapes.
///
/// Construct one per application and share it through an `Arc`. Entries are
/// never evicted or invalidated: a procedure whose signature changes after the
/// first discovery keeps its old shape until the cache is dropped.
///
/// Concurrent misses on the same key may both run discovery; the second
/// insert overwrites the first with an identical shape.
#[derive(Debug, Default)]
pub struct ParameterCache {
    entries: Mutex<HashMap<String, Arc<[Parameter]>>>,
}

impl ParameterCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a command text under a connection string.
    #[must_use]
    pub fn cache_key(connection_string: &str, command_text: &str) -> String {
        format!("{connection_string}:{command_text}")
    }

    /// Command text used for a procedure; the with/without return value variants are
    /// separate entries.
    #[must_use]
    pub fn procedure_key(procedure: &str, include_return_value: bool) -> String {
        if include_return_value {
            format!("{procedure}{RETURN_VALUE_SUFFIX}")
        } else {
            procedure.to_owned()
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<[Parameter]>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            // entries are replaced whole, a panic elsewhere cannot leave one half-written
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Store a parameter set.
    ///
    /// # Errors
    /// Returns `SqlCommandError::ArgumentError` if `command_text` is empty.
    pub fn cache_parameter_set(
        &self,
        connection_string: &str,
        command_text: &str,
        parameters: Vec<Parameter>,
    ) -> Result<()> {
        if command_text.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "command text is required to cache a parameter set".into(),
            ));
        }
        let key = Self::cache_key(connection_string, command_text);
        self.lock().insert(key, parameters.into());
        Ok(())
    }

    /// An owned copy of a cached parameter set, if present.
    ///
    /// # Errors
    /// Returns `SqlCommandError::ArgumentError` if either argument is empty.
    pub fn cached_parameter_set(
        &self,
        connection_string: &str,
        command_text: &str,
    ) -> Result<Option<Vec<Parameter>>> {
        if connection_string.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "connection string is required".into(),
            ));
        }
        if command_text.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "command text is required".into(),
            ));
        }
        let key = Self::cache_key(connection_string, command_text);
        let entry = self.lock().get(&key).cloned();
        Ok(entry.map(|shared| shared.to_vec()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Parameter shapes for `procedure`, discovered through a clone of `conn` on a
    /// miss. The caller's connection is never opened, closed or otherwise touched.
    ///
    /// # Errors
    /// Returns `SqlCommandError::ArgumentError` for an empty procedure name,
    /// `SqlCommandError::Unsupported` if `conn` cannot be cloned, or any error
    /// raised while deriving the parameters.
    pub async fn get_parameter_set(
        &self,
        provider: &dyn Provider,
        conn: &mut dyn DbConnection,
        procedure: &str,
        include_return_value: bool,
    ) -> Result<Vec<Parameter>> {
        if procedure.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "stored procedure name is required".into(),
            ));
        }
        let connection_string = conn.connection_string().to_owned();
        let command_text = Self::procedure_key(procedure, include_return_value);
        if let Some(cached) = self.cached_parameter_set(&connection_string, &command_text)? {
            tracing::debug!(procedure, "parameter cache hit");
            return Ok(cached);
        }

        let mut discovery_conn = conn.try_clone().ok_or_else(|| {
            SqlCommandError::Unsupported(format!(
                "can't discover parameters for '{procedure}': the connection does not support cloning"
            ))
        })?;
        self.discover_and_store(
            provider,
            discovery_conn.as_mut(),
            &connection_string,
            procedure,
            include_return_value,
        )
        .await
    }

    /// Like [`get_parameter_set`](Self::get_parameter_set) but discovers over a new
    /// connection created by `provider`.
    ///
    /// # Errors
    /// Same as [`get_parameter_set`](Self::get_parameter_set), minus the clone requirement.
    pub async fn get_provider_parameter_set(
        &self,
        provider: &dyn Provider,
        procedure: &str,
        include_return_value: bool,
    ) -> Result<Vec<Parameter>> {
        if procedure.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "stored procedure name is required".into(),
            ));
        }
        let mut conn = provider.create_connection()?;
        let connection_string = conn.connection_string().to_owned();
        let command_text = Self::procedure_key(procedure, include_return_value);
        if let Some(cached) = self.cached_parameter_set(&connection_string, &command_text)? {
            tracing::debug!(procedure, "parameter cache hit");
            return Ok(cached);
        }
        self.discover_and_store(
            provider,
            conn.as_mut(),
            &connection_string,
            procedure,
            include_return_value,
        )
        .await
    }

    async fn discover_and_store(
        &self,
        provider: &dyn Provider,
        conn: &mut dyn DbConnection,
        connection_string: &str,
        procedure: &str,
        include_return_value: bool,
    ) -> Result<Vec<Parameter>> {
        tracing::debug!(procedure, "parameter cache miss, deriving parameters");
        let discovered = discover(provider, conn, procedure, include_return_value).await?;
        let command_text = Self::procedure_key(procedure, include_return_value);
        let copy = discovered.clone();
        self.cache_parameter_set(connection_string, &command_text, discovered)?;
        Ok(copy)
    }
}

async fn discover(
    provider: &dyn Provider,
    conn: &mut dyn DbConnection,
    procedure: &str,
    include_return_value: bool,
) -> Result<Vec<Parameter>> {
    let mut command = NativeCommand::new(CommandType::StoredProcedure, procedure);

    conn.open().await?;
    let derived = provider.derive_parameters(conn, &mut command).await;
    let closed = conn.close().await;
    derived?;
    closed?;

    let mut parameters = command.parameters;
    if !include_return_value {
        parameters.retain(|p| p.direction != ParameterDirection::ReturnValue);
    }
    for parameter in &mut parameters {
        parameter.value = Some(DbValue::Null);
    }
    Ok(parameters)
}
