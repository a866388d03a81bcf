use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use super::{generic::GenericProvider, github::GitHubProvider, ProviderError};

/// Upper bound for the code exchange and every follow-up call to the provider.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Generic,
    Github,
}

fn secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

/// One entry of `--oidc-providers`.
#[derive(Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub provider: ProviderKind,
    pub client_id: String,
    #[serde(deserialize_with = "secret")]
    pub client_secret: SecretString,
    /// Issuer for discovery; required by the generic provider.
    #[serde(default)]
    pub issuer_url: Option<String>,
    /// Overrides for the authorization and token endpoints.
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    /// GitHub REST API base URL.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Claims schema whose `ory.sh/kratos` mappings copy claims into traits.
    #[serde(default)]
    pub mapper_url: Option<String>,
    #[serde(default)]
    pub scope: Vec<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("issuer_url", &self.issuer_url)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    /// Parse the JSON array given to `--oidc-providers`.
    ///
    /// # Errors
    /// Returns an error for malformed JSON or duplicate ids.
    pub fn parse_list(raw: &str) -> anyhow::Result<Vec<Self>> {
        let providers: Vec<Self> = serde_json::from_str(raw)?;
        let mut seen = Vec::new();
        for provider in &providers {
            if seen.contains(&provider.id.as_str()) {
                anyhow::bail!("duplicate OIDC provider id {}", provider.id);
            }
            seen.push(provider.id.as_str());
        }
        Ok(providers)
    }
}

/// Normalized claims; everything besides `iss` and `sub` is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl Claims {
    /// # Errors
    /// Returns `Claims` when `sub` is missing.
    pub fn from_map(claims: Map<String, Value>) -> Result<Self, ProviderError> {
        let claims: Self = serde_json::from_value(Value::Object(claims))
            .map_err(|err| ProviderError::Claims(err.to_string()))?;
        if claims.sub.is_empty() {
            return Err(ProviderError::Claims("the subject is empty".to_string()));
        }
        Ok(claims)
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn config(&self) -> &ProviderConfig;

    /// Where to send the user agent to authenticate.
    async fn auth_code_url(&self, state: &str, redirect_uri: &str) -> Result<String, ProviderError>;

    /// Exchange `code` and return the verified claims.
    async fn claims(&self, code: &str, redirect_uri: &str) -> Result<Claims, ProviderError>;
}

/// Build the providers declared in the configuration, keyed by id.
///
/// # Errors
/// Returns an error when a provider is misconfigured.
pub fn build_providers(
    configs: &[ProviderConfig],
) -> anyhow::Result<HashMap<String, Arc<dyn Provider>>> {
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    for config in configs {
        let provider: Arc<dyn Provider> = match config.provider {
            ProviderKind::Generic => Arc::new(GenericProvider::new(config.clone())?),
            ProviderKind::Github => Arc::new(GitHubProvider::new(config.clone())?),
        };
        providers.insert(config.id.clone(), provider);
    }
    Ok(providers)
}

/// Scopes always requested besides the configured ones.
pub(crate) fn scopes(base: &[&str], extra: &[String]) -> String {
    let mut scopes: Vec<&str> = base.to_vec();
    for scope in extra {
        if !scopes.contains(&scope.as_str()) {
            scopes.push(scope);
        }
    }
    scopes.join(" ")
}
