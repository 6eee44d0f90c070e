//! Provider-agnostic execution of relational commands.
//!
//! A [`Provider`](provider::Provider) abstracts one backend (SQLite and
//! PostgreSQL ship with the crate). On top of it, [`CommandExecutor`] binds
//! application values to parameters, runs single commands and batches inside a
//! transaction, and calls stored procedures whose parameter shapes are
//! discovered once and kept in a shared [`ParameterCache`].

pub mod binder;
pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod factory;
pub mod parameter;
pub mod prelude;
pub mod provider;
pub mod table;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::ParameterCache;
pub use error::{ErrorKind, SqlCommandError};
pub use executor::{BatchOutcome, CommandExecutor, ProcedureResult};
pub use factory::ProviderRegistry;
