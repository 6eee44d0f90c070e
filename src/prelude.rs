//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::binder::ProcedureArg;
pub use crate::cache::ParameterCache;
pub use crate::command::{Command, CommandBatch, CommandType};
pub use crate::config::{ConfigError, ProviderLookup, ProviderSettings, ProvidersConfig};
pub use crate::error::{ErrorKind, SqlCommandError};
pub use crate::executor::{BatchOutcome, CommandExecutor, ProcedureResult};
pub use crate::factory::ProviderRegistry;
pub use crate::parameter::{Parameter, ParameterDirection};
pub use crate::provider::{
    ConnectionState, DataAdapter, DbConnection, NativeCommand, Provider, Transaction,
    next_connection_id,
};
pub use crate::table::{DataRow, DataTable};
pub use crate::types::{BackendKind, DbValue};

#[cfg(feature = "postgres")]
pub use crate::postgres::PostgresProvider;
#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteProvider;
