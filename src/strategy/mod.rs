//! Authentication strategies.
//!
//! A strategy contributes a method to flows (`populate_*`) and completes them
//! (`submit_*`). Every strategy registers its own submit endpoints through
//! [`Strategy::routes`]; the shared plumbing in [`crate::selfservice::submit`]
//! loads the flow, checks kind, expiry and ownership, and routes failures to the
//! flow error handler.

pub mod link;
pub mod oidc;
pub mod password;
pub mod profile;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{header::CONTENT_TYPE, HeaderMap},
    response::Response,
};
use serde_json::Value;
use std::sync::Arc;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    flow::{Flow, FlowKind},
    form::decoder,
    identity::Identity,
    registry::Registry,
    schema::{CompiledSchema, SchemaPath},
    session::Session,
    Error,
};

/// What a strategy may know while it populates a new flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct PopulateContext<'a> {
    /// The identity behind the request session (settings and refresh logins).
    pub subject: Option<&'a Identity>,
    /// Whether that session authenticated recently enough for protected changes.
    pub privileged: bool,
}

/// A submitted request as strategies see it.
#[derive(Debug, Clone)]
pub struct Submission {
    pub headers: HeaderMap,
    pub body: Bytes,
    pub session: Option<Session>,
}

impl Submission {
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    /// # Errors
    /// Returns `BadRequest` when the body cannot be decoded.
    pub fn decode(&self, paths: Option<&[SchemaPath]>) -> Result<Value, Error> {
        decoder::decode(self.content_type(), &self.body, paths)
    }

    /// # Errors
    /// Returns `BadRequest` or `SchemaValidation`.
    pub fn decode_validated(&self, schema: &CompiledSchema) -> Result<Value, Error> {
        decoder::decode_validated(self.content_type(), &self.body, schema)
    }
}

fn unsupported(strategy: &str, kind: FlowKind) -> Error {
    Error::BadRequest(format!(
        "the {strategy} method does not support {kind} flows"
    ))
}

#[async_trait]
pub trait Strategy: Send + Sync {
    /// The key of this strategy's method in `flow.methods`.
    fn id(&self) -> &'static str;

    async fn populate_login(
        &self,
        _registry: &Registry,
        _flow: &mut Flow,
        _ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn populate_registration(
        &self,
        _registry: &Registry,
        _flow: &mut Flow,
        _ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn populate_settings(
        &self,
        _registry: &Registry,
        _flow: &mut Flow,
        _ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn populate_recovery(
        &self,
        _registry: &Registry,
        _flow: &mut Flow,
        _ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn submit_login(
        &self,
        _registry: &Registry,
        _flow: &mut Flow,
        _submission: &Submission,
    ) -> Result<Response, Error> {
        Err(unsupported(self.id(), FlowKind::Login))
    }

    async fn submit_registration(
        &self,
        _registry: &Registry,
        _flow: &mut Flow,
        _submission: &Submission,
    ) -> Result<Response, Error> {
        Err(unsupported(self.id(), FlowKind::Registration))
    }

    async fn submit_settings(
        &self,
        _registry: &Registry,
        _flow: &mut Flow,
        _submission: &Submission,
    ) -> Result<Response, Error> {
        Err(unsupported(self.id(), FlowKind::Settings))
    }

    async fn submit_recovery(
        &self,
        _registry: &Registry,
        _flow: &mut Flow,
        _submission: &Submission,
    ) -> Result<Response, Error> {
        Err(unsupported(self.id(), FlowKind::Recovery))
    }

    /// Endpoints owned by this strategy, documented in the OpenAPI document.
    fn routes(&self) -> OpenApiRouter;
}

/// Every built-in strategy, in the order their methods appear on flows.
#[must_use]
pub fn builtin() -> Vec<Arc<dyn Strategy>> {
    vec![
        Arc::new(password::PasswordStrategy),
        Arc::new(oidc::OidcStrategy),
        Arc::new(profile::ProfileStrategy),
        Arc::new(link::LinkStrategy),
    ]
}

/// Populate every strategy's method for a new flow of `kind`.
///
/// # Errors
/// Returns the first strategy error.
pub async fn populate(
    registry: &Registry,
    kind: FlowKind,
    flow: &mut Flow,
    ctx: &PopulateContext<'_>,
) -> Result<(), Error> {
    for strategy in registry.strategies() {
        match kind {
            FlowKind::Login => strategy.populate_login(registry, flow, ctx).await?,
            FlowKind::Registration => {
                strategy.populate_registration(registry, flow, ctx).await?;
            }
            FlowKind::Settings => strategy.populate_settings(registry, flow, ctx).await?,
            FlowKind::Recovery => strategy.populate_recovery(registry, flow, ctx).await?,
        }
    }
    Ok(())
}

/// Hand a submission to `strategy` according to the flow kind.
///
/// # Errors
/// Returns whatever the strategy returns.
pub async fn dispatch(
    strategy: &dyn Strategy,
    registry: &Registry,
    kind: FlowKind,
    flow: &mut Flow,
    submission: &Submission,
) -> Result<Response, Error> {
    match kind {
        FlowKind::Login => strategy.submit_login(registry, flow, submission).await,
        FlowKind::Registration => {
            strategy
                .submit_registration(registry, flow, submission)
                .await
        }
        FlowKind::Settings => strategy.submit_settings(registry, flow, submission).await,
        FlowKind::Recovery => strategy.submit_recovery(registry, flow, submission).await,
    }
}
