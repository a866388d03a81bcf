//! Any OpenID Connect provider supporting discovery and RS256 signed `id_token`s.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use url::Url;

use super::{
    jwks::{verify_id_token, Jwks},
    provider::{scopes, Claims, Provider, ProviderConfig, EXCHANGE_TIMEOUT},
    ProviderError,
};
use crate::APP_USER_AGENT;

#[derive(Debug, Clone, Deserialize)]
struct Discovery {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

pub struct GenericProvider {
    config: ProviderConfig,
    client: Client,
    discovery: OnceCell<Discovery>,
}

impl GenericProvider {
    /// # Errors
    /// Returns an error when `issuer_url` is missing or the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        if config.issuer_url.is_none() {
            anyhow::bail!("OIDC provider {} needs an issuer_url", config.id);
        }
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(EXCHANGE_TIMEOUT)
            .build()?;
        Ok(Self {
            config,
            client,
            discovery: OnceCell::new(),
        })
    }

    fn issuer(&self) -> &str {
        self.config
            .issuer_url
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/')
    }

    async fn discovery(&self) -> Result<&Discovery, ProviderError> {
        self.discovery
            .get_or_try_init(|| async {
                let url = format!("{}/.well-known/openid-configuration", self.issuer());
                debug!("Fetching OIDC discovery document from {url}");
                let mut discovery: Discovery = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|err| ProviderError::Exchange(format!("discovery failed: {err}")))?
                    .json()
                    .await
                    .map_err(|err| ProviderError::Exchange(format!("discovery failed: {err}")))?;
                if let Some(auth_url) = &self.config.auth_url {
                    discovery.authorization_endpoint.clone_from(auth_url);
                }
                if let Some(token_url) = &self.config.token_url {
                    discovery.token_endpoint.clone_from(token_url);
                }
                Ok(discovery)
            })
            .await
    }

    async fn jwks(&self, uri: &str) -> Result<Jwks, ProviderError> {
        self.client
            .get(uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| ProviderError::Exchange(format!("unable to fetch JWKS: {err}")))?
            .json()
            .await
            .map_err(|err| ProviderError::Exchange(format!("unable to decode JWKS: {err}")))
    }
}

#[async_trait]
impl Provider for GenericProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn auth_code_url(
        &self,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String, ProviderError> {
        let discovery = self.discovery().await?;
        let mut url = Url::parse(&discovery.authorization_endpoint)
            .map_err(|err| {
                ProviderError::Exchange(format!("invalid authorization endpoint: {err}"))
            })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes(&["openid"], &self.config.scope))
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);
        Ok(url.to_string())
    }

    #[instrument(skip(self, code), fields(provider = %self.config.id))]
    async fn claims(&self, code: &str, redirect_uri: &str) -> Result<Claims, ProviderError> {
        let discovery = self.discovery().await?;
        let response: TokenResponse = self
            .client
            .post(&discovery.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| ProviderError::Exchange(err.to_string()))?
            .json()
            .await
            .map_err(|err| ProviderError::Exchange(err.to_string()))?;

        let id_token = response.id_token.ok_or(ProviderError::IdTokenMissing)?;
        let jwks = self.jwks(&discovery.jwks_uri).await?;
        let claims = verify_id_token(
            &id_token,
            &jwks,
            &discovery.issuer,
            &self.config.client_id,
            Utc::now().timestamp(),
        )?;
        Claims::from_map(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::oidc::provider::ProviderKind;
    use secrecy::SecretString;

    fn config(issuer: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            id: "example".to_string(),
            provider: ProviderKind::Generic,
            client_id: "keygate".to_string(),
            client_secret: SecretString::from("secret".to_string()),
            issuer_url: issuer.map(str::to_string),
            auth_url: None,
            token_url: None,
            api_url: None,
            mapper_url: None,
            scope: vec!["email".to_string()],
        }
    }

    #[test]
    fn requires_issuer() {
        assert!(GenericProvider::new(config(None)).is_err());
    }

    #[tokio::test]
    async fn builds_auth_url_from_cached_discovery() -> anyhow::Result<()> {
        let provider = GenericProvider::new(config(Some("https://accounts.example.test/")))?;
        assert_eq!(provider.issuer(), "https://accounts.example.test");
        provider
            .discovery
            .set(Discovery {
                issuer: "https://accounts.example.test".to_string(),
                authorization_endpoint: "https://accounts.example.test/authorize".to_string(),
                token_endpoint: "https://accounts.example.test/token".to_string(),
                jwks_uri: "https://accounts.example.test/jwks".to_string(),
            })
            .map_err(|err| anyhow::anyhow!("{err}"))?;

        let url = Url::parse(
            &provider
                .auth_code_url("xyz", "https://id.example.test/callback/example")
                .await?,
        )?;
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("state".to_string(), "xyz".to_string())));
        assert!(pairs.contains(&("scope".to_string(), "openid email".to_string())));
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        Ok(())
    }
}
