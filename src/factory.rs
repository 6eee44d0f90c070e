use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConfigError, ProviderLookup, ProviderSettings};
use crate::error::{Result, SqlCommandError};
use crate::provider::Provider;

type Constructor = Arc<dyn Fn(&str) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Maps backend identifiers to provider constructors and resolves aliases.
///
/// ```rust,no_run
/// use sql_command::prelude::*;
///
/// # fn demo() -> Result<(), SqlCommandError> {
/// let config = ProvidersConfig::from_path("providers.json")
///     .map_err(|e| SqlCommandError::ArgumentError(e.to_string()))?;
/// let registry = ProviderRegistry::with_builtin_backends().with_lookup(config);
/// let provider = registry.create_provider("main")?;
/// # Ok(()) }
/// ```
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    constructors: HashMap<String, Constructor>,
    lookup: Option<Arc<dyn ProviderLookup + Send + Sync>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut backends: Vec<_> = self.constructors.keys().collect();
        backends.sort();
        f.debug_struct("ProviderRegistry")
            .field("backends", &backends)
            .field("has_lookup", &self.lookup.is_some())
            .finish()
    }
}

impl ProviderRegistry {
    /// An empty registry with no lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend compiled into this build.
    #[must_use]
    pub fn with_builtin_backends() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "sqlite")]
        registry.register(crate::types::BackendKind::Sqlite.identifier(), |conn_str| {
            Ok(Arc::new(crate::sqlite::SqliteProvider::new(conn_str)?) as Arc<dyn Provider>)
        });
        #[cfg(feature = "postgres")]
        registry.register(crate::types::BackendKind::Postgres.identifier(), |conn_str| {
            Ok(Arc::new(crate::postgres::PostgresProvider::new(conn_str)?) as Arc<dyn Provider>)
        });
        registry
    }

    /// Register (or replace) the constructor for `backend`.
    pub fn register<F>(&mut self, backend: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&str) -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(backend.into(), Arc::new(constructor));
        self
    }

    #[must_use]
    pub fn with_lookup(mut self, lookup: impl ProviderLookup + Send + Sync + 'static) -> Self {
        self.lookup = Some(Arc::new(lookup));
        self
    }

    /// Whether `backend` has a registered constructor.
    #[must_use]
    pub fn supports(&self, backend: &str) -> bool {
        self.constructors.contains_key(backend)
    }

    /// Resolve `alias` through the lookup and construct its provider.
    ///
    /// # Errors
    /// Returns `SqlCommandError::ConfigError` when there is no lookup, the alias
    /// is unknown, its settings are incomplete, the backend isn't registered, or
    /// the constructor fails. The cause is kept as the error's source.
    pub fn create_provider(&self, alias: &str) -> Result<Arc<dyn Provider>> {
        let message = format!("error loading the '{alias}' provider");
        let lookup = self
            .lookup
            .as_ref()
            .ok_or_else(|| SqlCommandError::config(message.clone(), ConfigError::MissingSection))?;
        let settings = lookup.lookup(alias).ok_or_else(|| {
            SqlCommandError::config(message.clone(), ConfigError::AliasNotFound(alias.to_owned()))
        })?;
        self.construct(&settings, message)
    }

    /// Construct a provider from explicit settings.
    ///
    /// # Errors
    /// Same as [`create_provider`](Self::create_provider) minus the alias lookup.
    pub fn create_provider_from_settings(
        &self,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn Provider>> {
        let message = format!("error loading the '{}' provider", settings.backend_type);
        self.construct(settings, message)
    }

    fn construct(&self, settings: &ProviderSettings, message: String) -> Result<Arc<dyn Provider>> {
        settings
            .validate()
            .map_err(|e| SqlCommandError::config(message.clone(), e))?;
        let constructor = self.constructors.get(&settings.backend_type).ok_or_else(|| {
            SqlCommandError::config(
                message.clone(),
                ConfigError::UnknownBackend(settings.backend_type.clone()),
            )
        })?;
        let provider = constructor(&settings.connection_string).map_err(|e| {
            SqlCommandError::config(message, ConfigError::Construction(Box::new(e)))
        })?;
        tracing::debug!(backend = %settings.backend_type, "provider created");
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvidersConfig;
    use crate::test_utils::RecordingProvider;

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register("recording", |conn_str| {
            if conn_str == "broken" {
                return Err(SqlCommandError::ArgumentError("bad connection string".into()));
            }
            Ok(Arc::new(RecordingProvider::new(conn_str)) as Arc<dyn Provider>)
        });
        registry.with_lookup(
            ProvidersConfig::default()
                .with_provider("main", ProviderSettings::new("recording", "mock://main"))
                .with_provider("broken", ProviderSettings::new("recording", "broken"))
                .with_provider("odd", ProviderSettings::new("oracle", "x"))
                .with_provider("partial", ProviderSettings::new("recording", "")),
        )
    }

    fn failure(result: Result<Arc<dyn Provider>>) -> SqlCommandError {
        match result {
            Ok(provider) => panic!("expected an error, got {}", provider.backend_name()),
            Err(err) => err,
        }
    }

    fn source(err: &SqlCommandError) -> &ConfigError {
        match err {
            SqlCommandError::ConfigError { source, .. } => source,
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn resolves_alias_to_provider() {
        let provider = registry().create_provider("main").unwrap();
        assert_eq!(provider.backend_name(), "recording");
        assert_eq!(provider.connection_string(), "mock://main");
    }

    #[test]
    fn unknown_alias_wraps_not_found() {
        let err = failure(registry().create_provider("UnknownAlias"));
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert!(matches!(source(&err), ConfigError::AliasNotFound(a) if a == "UnknownAlias"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn every_failure_is_a_configuration_error() {
        let registry = registry();
        assert!(matches!(
            source(&failure(registry.create_provider("odd"))),
            ConfigError::UnknownBackend(b) if b == "oracle"
        ));
        assert!(matches!(
            source(&failure(registry.create_provider("partial"))),
            ConfigError::MissingAttribute("connectionString")
        ));
        assert!(matches!(
            source(&failure(registry.create_provider("broken"))),
            ConfigError::Construction(inner) if matches!(**inner, SqlCommandError::ArgumentError(_))
        ));
        assert!(matches!(
            source(&failure(ProviderRegistry::new().create_provider("main"))),
            ConfigError::MissingSection
        ));
    }

    #[test]
    fn settings_bypass_the_lookup() {
        let err = failure(
            ProviderRegistry::new()
                .create_provider_from_settings(&ProviderSettings::new("recording", "x")),
        );
        assert!(matches!(source(&err), ConfigError::UnknownBackend(_)));

        let provider = registry()
            .create_provider_from_settings(&ProviderSettings::new("recording", "mock://direct"))
            .unwrap();
        assert_eq!(provider.connection_string(), "mock://direct");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn builtin_backends_are_registered() {
        let registry = ProviderRegistry::with_builtin_backends();
        assert!(registry.supports("sqlite"));
        assert_eq!(registry.supports("postgres"), cfg!(feature = "postgres"));
    }
}
