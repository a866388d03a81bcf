//! Sign in and sign up with an external OpenID Connect or OAuth2 provider.
//!
//! `GET /self-service/methods/oidc/auth/:provider/:flow` stores a random
//! `state` plus the flow id in the `oidc_session` cookie and sends the user
//! agent to the provider. The callback compares the cookie with the returned
//! `state` before the provider is contacted again, exchanges the code and
//! either logs in the identity linked to `provider:subject` or registers a new
//! one. A registration for a known subject continues as login and vice versa.

mod callback;
pub mod generic;
pub mod github;
pub mod jwks;
pub mod mapper;
pub mod provider;
pub mod state;

use async_trait::async_trait;
use thiserror::Error;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    flow::{Flow, MethodConfig, ProviderLink},
    form::{Field, FieldType, HtmlForm},
    registry::Registry,
    strategy::{PopulateContext, Strategy},
    Error,
};

pub use provider::{build_providers, Claims, Provider, ProviderConfig, ProviderKind};

pub const ID: &str = "oidc";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("the provider did not return an id_token")]
    IdTokenMissing,
    #[error("the provider did not grant the required scope {0}")]
    ScopeMissing(String),
    #[error("the id_token was issued by {actual}, expected {expected}")]
    IssuerMismatch { expected: String, actual: String },
    #[error("the state parameter does not match this browser")]
    StateMismatch,
    #[error("the authorization code could not be exchanged: {0}")]
    Exchange(String),
    #[error("unknown provider {0}")]
    UnknownProvider(String),
    #[error("the id_token is invalid: {0}")]
    IdToken(String),
    #[error("the provider returned unusable claims: {0}")]
    Claims(String),
}

impl ProviderError {
    /// Text shown on the flow form.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::IdTokenMissing => {
                "Authentication failed because no id_token was returned. Please accept the \"openid\" permission and try again.".to_string()
            }
            Self::ScopeMissing(scope) => format!(
                "Authentication failed because the provider did not grant the \"{scope}\" permission. Please accept it and try again."
            ),
            Self::IssuerMismatch { .. } => {
                "Authentication failed because the token was issued by an unexpected provider.".to_string()
            }
            Self::StateMismatch => {
                "Authentication failed because the request could not be matched to this browser. Please try again.".to_string()
            }
            Self::UnknownProvider(provider) => {
                format!("The sign in provider \"{provider}\" is not available.")
            }
            Self::Exchange(_) | Self::IdToken(_) | Self::Claims(_) => {
                "Authentication with the provider failed. Please try again.".to_string()
            }
        }
    }
}

/// Form action submitting the provider choice for `flow`.
fn form_action(registry: &Registry, flow: &Flow) -> String {
    registry
        .config()
        .public_url(&format!("/self-service/methods/oidc/auth/{}", flow.id))
}

/// Link starting the round trip with `provider` for `flow`.
#[must_use]
pub fn auth_url(registry: &Registry, provider: &str, flow_id: uuid::Uuid) -> String {
    registry
        .config()
        .public_url(&format!("/self-service/methods/oidc/auth/{provider}/{flow_id}"))
}

/// Only browser flows can follow provider redirects.
fn populate(registry: &Registry, flow: &mut Flow) {
    let ids = registry.provider_ids();
    if !flow.flow_type.is_browser() || ids.is_empty() {
        return;
    }
    let mut form = HtmlForm::new(form_action(registry, flow));
    form.set_field(Field::new("provider", FieldType::Text).required());
    let providers = ids
        .into_iter()
        .map(|provider| ProviderLink {
            provider: provider.to_string(),
            url: auth_url(registry, provider, flow.id),
        })
        .collect();
    flow.set_method(
        ID,
        MethodConfig {
            form,
            providers: Some(providers),
        },
    );
}

pub struct OidcStrategy;

#[async_trait]
impl Strategy for OidcStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    async fn populate_login(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        _ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        populate(registry, flow);
        Ok(())
    }

    async fn populate_registration(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        _ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        populate(registry, flow);
        Ok(())
    }

    fn routes(&self) -> OpenApiRouter {
        OpenApiRouter::new()
            .routes(routes!(callback::auth))
            .routes(routes!(callback::auth_form))
            .routes(routes!(callback::callback))
    }
}
