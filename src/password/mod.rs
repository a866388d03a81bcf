//! Password hashing and the password policy validator.
//!
//! A password must satisfy three checks: a minimum length in code points, enough
//! distance from the account identifier, and absence from known breaches. The
//! breach check uses the k-anonymity range API; responses are cached per full
//! SHA-1 hash for the lifetime of the process.

pub mod breach;
pub mod hash;
pub mod similarity;

use sha1::{Digest, Sha1};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub use breach::{BreachClient, HibpClient};
pub use hash::{HashConfig, Hasher};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    pub min_length: usize,
    pub max_breaches: u64,
    pub ignore_network_errors: bool,
    pub api_url: String,
    pub timeout: Duration,
    pub min_identifier_distance: usize,
    pub max_identifier_substring: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_length: 6,
            max_breaches: 0,
            ignore_network_errors: true,
            api_url: breach::DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(5),
            min_identifier_distance: 5,
            max_identifier_substring: 3,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("it is shorter than {0} characters")]
    TooShort(usize),
    #[error("it is too similar to the user identifier")]
    TooSimilar,
    #[error("it has appeared in data breaches and must no longer be used")]
    Breached,
    #[error("the password breach service could not be reached")]
    Unavailable,
}

impl From<PolicyError> for Error {
    fn from(err: PolicyError) -> Self {
        Self::PasswordPolicy(err.to_string())
    }
}

pub struct PasswordValidator {
    config: PolicyConfig,
    client: Arc<dyn BreachClient>,
    hashes: RwLock<HashMap<String, u64>>,
}

impl std::fmt::Debug for PasswordValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PasswordValidator {
    #[must_use]
    pub fn new(config: PolicyConfig, client: Arc<dyn BreachClient>) -> Self {
        Self {
            config,
            client,
            hashes: RwLock::new(HashMap::new()),
        }
    }

    /// Run every check against `password` for the account known by `identifier`.
    ///
    /// # Errors
    /// Returns the first failed check.
    pub async fn validate(&self, identifier: &str, password: &str) -> Result<(), PolicyError> {
        if password.chars().count() < self.config.min_length {
            return Err(PolicyError::TooShort(self.config.min_length));
        }
        self.check_similarity(identifier, password)?;
        self.check_breaches(password).await
    }

    fn check_similarity(&self, identifier: &str, password: &str) -> Result<(), PolicyError> {
        if identifier.is_empty() {
            return Ok(());
        }
        let distance = similarity::levenshtein(identifier, password);
        let common = similarity::longest_common_substring(identifier, password);
        if distance < self.config.min_identifier_distance
            || common > self.config.max_identifier_substring
        {
            return Err(PolicyError::TooSimilar);
        }
        Ok(())
    }

    async fn check_breaches(&self, password: &str) -> Result<(), PolicyError> {
        let hash = hex::encode_upper(Sha1::digest(password.as_bytes()));
        let count = match self.cached(&hash).await {
            Some(count) => count,
            None => match self.fetch(&hash).await {
                Ok(count) => count,
                Err(err) if self.config.ignore_network_errors => {
                    warn!("Skipping password breach check: {err:#}");
                    return Ok(());
                }
                Err(err) => {
                    warn!("Password breach check failed: {err:#}");
                    return Err(PolicyError::Unavailable);
                }
            },
        };
        if count > self.config.max_breaches {
            return Err(PolicyError::Breached);
        }
        Ok(())
    }

    async fn cached(&self, hash: &str) -> Option<u64> {
        self.hashes.read().await.get(hash).copied()
    }

    async fn fetch(&self, hash: &str) -> anyhow::Result<u64> {
        let prefix = &hash[..5];
        let body = self.client.range(prefix).await?;
        let rows = breach::parse_range(prefix, &body);
        debug!(prefix, rows = rows.len(), "Fetched breach range");

        let mut hashes = self.hashes.write().await;
        hashes.extend(rows);
        let count = hashes.get(hash).copied().unwrap_or(0);
        hashes.insert(hash.to_string(), count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBreachClient;

    fn validator(client: Arc<FakeBreachClient>, config: PolicyConfig) -> PasswordValidator {
        PasswordValidator::new(config, client)
    }

    #[tokio::test]
    async fn rejects_short_passwords() {
        let client = Arc::new(FakeBreachClient::default());
        let validator = validator(client.clone(), PolicyConfig::default());
        assert_eq!(
            validator.validate("", "äöü12").await,
            Err(PolicyError::TooShort(6))
        );
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn rejects_passwords_similar_to_identifier() {
        let validator = validator(
            Arc::new(FakeBreachClient::default()),
            PolicyConfig::default(),
        );
        assert_eq!(
            validator.validate("alice@example.com", "alice@example").await,
            Err(PolicyError::TooSimilar)
        );
        assert_eq!(
            validator.validate("alice", "xxalicexx99").await,
            Err(PolicyError::TooSimilar)
        );
        assert!(validator
            .validate("alice@example.com", "corr3ct-horse-batt3ry")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn breached_password_fails_and_is_cached() {
        let client = Arc::new(FakeBreachClient::default());
        let validator = validator(client.clone(), PolicyConfig::default());

        let err = validator.validate("", "password").await;
        assert_eq!(err, Err(PolicyError::Breached));
        assert!(Error::from(PolicyError::Breached)
            .to_string()
            .contains("data breaches"));

        assert!(validator.validate("", "password").await.is_err());
        assert_eq!(client.calls(), 1);

        // Same prefix batch is already cached, unrelated hashes trigger a fetch.
        assert!(validator.validate("", "corr3ct-horse-batt3ry").await.is_ok());
        assert_eq!(client.calls(), 2);
        assert!(validator.validate("", "corr3ct-horse-batt3ry").await.is_ok());
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn threshold_is_configurable() {
        let config = PolicyConfig {
            max_breaches: u64::MAX,
            ..PolicyConfig::default()
        };
        let validator = validator(Arc::new(FakeBreachClient::default()), config);
        assert!(validator.validate("", "password").await.is_ok());
    }

    #[tokio::test]
    async fn network_errors_follow_policy() {
        let lenient = validator(
            Arc::new(FakeBreachClient::failing()),
            PolicyConfig::default(),
        );
        assert!(lenient.validate("", "password").await.is_ok());

        let strict = validator(
            Arc::new(FakeBreachClient::failing()),
            PolicyConfig {
                ignore_network_errors: false,
                ..PolicyConfig::default()
            },
        );
        assert_eq!(
            strict.validate("", "corr3ct-horse-batt3ry").await,
            Err(PolicyError::Unavailable)
        );
        // Length is still enforced in lenient mode.
        assert!(lenient.validate("", "abc").await.is_err());
    }
}
