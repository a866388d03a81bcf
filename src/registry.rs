//! Wires configuration, persistence, the courier and the strategies together.
//!
//! Handlers receive the registry as `Extension<Arc<Registry>>`.

use anyhow::{Context, Result};
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    config::Config,
    continuity::ContinuityManager,
    courier::{Courier, LogCourier},
    csrf::CsrfManager,
    password::{BreachClient, Hasher, HibpClient, PasswordValidator},
    persistence::{MemoryPersister, Persister},
    schema::{IdentitySchemas, SchemaLoader},
    session::SessionManager,
    strategy::{
        self,
        oidc::{build_providers, Provider},
        Strategy,
    },
};

pub struct Registry {
    config: Config,
    persister: Arc<dyn Persister>,
    courier: Arc<dyn Courier>,
    schemas: IdentitySchemas,
    loader: SchemaLoader,
    hasher: Hasher,
    password_validator: PasswordValidator,
    sessions: SessionManager,
    csrf: CsrfManager,
    continuity: ContinuityManager,
    strategies: Vec<Arc<dyn Strategy>>,
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("base_url", &self.config.base_url())
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.id()).collect::<Vec<_>>(),
            )
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Registry {
    #[must_use]
    pub fn builder(config: Config) -> RegistryBuilder {
        RegistryBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn persister(&self) -> &dyn Persister {
        self.persister.as_ref()
    }

    #[must_use]
    pub fn courier(&self) -> &dyn Courier {
        self.courier.as_ref()
    }

    #[must_use]
    pub fn schemas(&self) -> &IdentitySchemas {
        &self.schemas
    }

    #[must_use]
    pub fn loader(&self) -> &SchemaLoader {
        &self.loader
    }

    #[must_use]
    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    #[must_use]
    pub fn password_validator(&self) -> &PasswordValidator {
        &self.password_validator
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfManager {
        &self.csrf
    }

    #[must_use]
    pub fn continuity(&self) -> &ContinuityManager {
        &self.continuity
    }

    #[must_use]
    pub fn strategies(&self) -> &[Arc<dyn Strategy>] {
        &self.strategies
    }

    #[must_use]
    pub fn strategy(&self, id: &str) -> Option<&dyn Strategy> {
        self.strategies
            .iter()
            .find(|strategy| strategy.id() == id)
            .map(AsRef::as_ref)
    }

    #[must_use]
    pub fn provider(&self, id: &str) -> Option<&dyn Provider> {
        self.providers.get(id).map(AsRef::as_ref)
    }

    /// Provider ids in a stable order.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

pub struct RegistryBuilder {
    config: Config,
    persister: Option<Arc<dyn Persister>>,
    courier: Option<Arc<dyn Courier>>,
    breach_client: Option<Arc<dyn BreachClient>>,
    loader: Option<SchemaLoader>,
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            persister: None,
            courier: None,
            breach_client: None,
            loader: None,
            providers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = Some(persister);
        self
    }

    #[must_use]
    pub fn with_courier(mut self, courier: Arc<dyn Courier>) -> Self {
        self.courier = Some(courier);
        self
    }

    #[must_use]
    pub fn with_breach_client(mut self, client: Arc<dyn BreachClient>) -> Self {
        self.breach_client = Some(client);
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: SchemaLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Register a provider in addition to the configured ones.
    #[must_use]
    pub fn with_provider(mut self, id: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(id.into(), provider);
        self
    }

    /// # Errors
    /// Returns an error when a collaborator cannot be constructed.
    pub fn build(self) -> Result<Registry> {
        let config = self.config;
        let secure = config.secure_cookies();

        let breach_client: Arc<dyn BreachClient> = match self.breach_client {
            Some(client) => client,
            None => Arc::new(HibpClient::new(
                &config.password_policy().api_url,
                config.password_policy().timeout,
            )?),
        };
        let loader = match self.loader {
            Some(loader) => loader,
            None => SchemaLoader::new()?,
        };

        let mut providers = build_providers(config.oidc_providers())
            .context("Failed to configure OIDC providers")?;
        providers.extend(self.providers);

        Ok(Registry {
            persister: self
                .persister
                .unwrap_or_else(|| Arc::new(MemoryPersister::new())),
            courier: self.courier.unwrap_or_else(|| Arc::new(LogCourier)),
            schemas: IdentitySchemas::new(config.identity_schema_url()),
            loader,
            hasher: Hasher::new(config.hashing())?,
            password_validator: PasswordValidator::new(
                config.password_policy().clone(),
                breach_client,
            ),
            sessions: SessionManager::new(
                config.session_cookie_name(),
                secure,
                config.session_lifespan(),
            ),
            csrf: CsrfManager::new(secure),
            continuity: ContinuityManager::new(secure, config.continuity_lifespan()),
            strategies: strategy::builtin(),
            providers,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBreachClient;

    #[test]
    fn builds_defaults() -> anyhow::Result<()> {
        let registry = Registry::builder(Config::new("https://id.example.test/"))
            .with_breach_client(Arc::new(FakeBreachClient::default()))
            .build()?;
        assert_eq!(registry.config().base_url(), "https://id.example.test");
        assert!(registry.strategy("password").is_some());
        assert!(registry.strategy("profile").is_some());
        assert!(registry.strategy("unknown").is_none());
        assert!(registry.provider_ids().is_empty());
        assert_eq!(registry.schemas().default_schema()?.id, "default");
        Ok(())
    }
}
