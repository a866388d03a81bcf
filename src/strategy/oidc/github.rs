//! GitHub OAuth2. GitHub issues no `id_token`, so claims come from the REST API.

use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use super::{
    provider::{scopes, Claims, Provider, ProviderConfig, EXCHANGE_TIMEOUT},
    ProviderError,
};
use crate::APP_USER_AGENT;

const AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const API_URL: &str = "https://api.github.com";
const EMAIL_SCOPE: &str = "user:email";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: u64,
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserEmail {
    email: String,
    primary: bool,
    verified: bool,
}

pub struct GitHubProvider {
    config: ProviderConfig,
    client: Client,
}

impl GitHubProvider {
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(EXCHANGE_TIMEOUT)
            .build()?;
        Ok(Self { config, client })
    }

    fn api_url(&self) -> &str {
        self.config
            .api_url
            .as_deref()
            .unwrap_or(API_URL)
            .trim_end_matches('/')
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<T, ProviderError> {
        self.client
            .get(format!("{}{path}", self.api_url()))
            .header(header::ACCEPT, "application/vnd.github+json")
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| ProviderError::Exchange(err.to_string()))?
            .json()
            .await
            .map_err(|err| ProviderError::Exchange(err.to_string()))
    }
}

/// Every configured scope must have been granted.
fn ensure_scopes(requested: &[String], granted: &str) -> Result<(), ProviderError> {
    let granted: Vec<&str> = granted.split(',').map(str::trim).collect();
    match requested
        .iter()
        .find(|scope| !granted.contains(&scope.as_str()))
    {
        Some(missing) => Err(ProviderError::ScopeMissing(missing.clone())),
        None => Ok(()),
    }
}

fn user_claims(user: User, email: Option<String>) -> Claims {
    Claims {
        iss: TOKEN_URL.to_string(),
        sub: user.id.to_string(),
        email_verified: email.as_ref().map(|_| true),
        email: email.or(user.email),
        name: user.name,
        nickname: Some(user.login.clone()),
        preferred_username: Some(user.login),
        picture: user.avatar_url,
        website: user.html_url,
        ..Claims::default()
    }
}

#[async_trait]
impl Provider for GitHubProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn auth_code_url(
        &self,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String, ProviderError> {
        let mut url = Url::parse(self.config.auth_url.as_deref().unwrap_or(AUTH_URL))
            .map_err(|err| ProviderError::Exchange(format!("invalid authorization url: {err}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("scope", &scopes(&[], &self.config.scope))
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);
        Ok(url.to_string())
    }

    #[instrument(skip(self, code), fields(provider = %self.config.id))]
    async fn claims(&self, code: &str, redirect_uri: &str) -> Result<Claims, ProviderError> {
        let token: TokenResponse = self
            .client
            .post(self.config.token_url.as_deref().unwrap_or(TOKEN_URL))
            .header(header::ACCEPT, "application/json")
            .form(&[
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

        let Some(access_token) = token.access_token else {
            return Err(ProviderError::Exchange(
                token
                    .error_description
                    .unwrap_or_else(|| "no access token returned".to_string()),
            ));
        };
        ensure_scopes(&self.config.scope, &token.scope)?;

        let user: User = self.get("/user", &access_token).await?;
        let email = if token.scope.split(',').any(|s| s.trim() == EMAIL_SCOPE) {
            let emails: Vec<UserEmail> = self.get("/user/emails", &access_token).await?;
            emails
                .into_iter()
                .find(|e| e.primary && e.verified)
                .map(|e| e.email)
        } else {
            None
        };
        Ok(user_claims(user, email))
    }
}
