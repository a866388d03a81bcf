//! Identifier and password.
//!
//! Login looks credentials up by identifier and compares the Argon2 hash.
//! A miss and a mismatch produce the same error. Registration derives the
//! identifiers from the traits marked as password identifiers in the identity
//! schema. A password change needs a privileged session; browsers without one
//! are sent through a refreshed login and resume the change afterwards.

mod login;
mod registration;
mod settings;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::HeaderMap,
    response::Response,
};
use std::sync::Arc;
use utoipa_axum::{router::OpenApiRouter, routes};
use uuid::Uuid;

use crate::{
    flow::{Flow, FlowKind, MethodConfig},
    form::{Field, FieldType, FieldValue, HtmlForm, PASSWORD_FIELD},
    registry::Registry,
    selfservice::submit::{submit, FlowQuery},
    strategy::{PopulateContext, Strategy, Submission},
    Error,
};

pub const ID: &str = "password";

/// Hash on the blocking pool.
async fn hash_password(registry: &Registry, password: String) -> Result<String, Error> {
    let hasher = registry.hasher().clone();
    let hashed = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(anyhow::Error::from)??;
    Ok(hashed)
}

async fn verify_password(
    registry: &Registry,
    password: String,
    hashed: String,
) -> Result<bool, Error> {
    let hasher = registry.hasher().clone();
    Ok(
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hashed))
            .await
            .map_err(anyhow::Error::from)?,
    )
}

fn action(registry: &Registry, kind: FlowKind, flow_id: Uuid) -> String {
    registry.config().public_url(&format!(
        "/self-service/{kind}/methods/password?flow={flow_id}"
    ))
}

fn password_field() -> Field {
    Field::new(PASSWORD_FIELD, FieldType::Password).required()
}

pub struct PasswordStrategy;

#[async_trait]
impl Strategy for PasswordStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    async fn populate_login(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        let mut form = HtmlForm::new(action(registry, FlowKind::Login, flow.id));
        let mut identifier = Field::new("identifier", FieldType::Text).required();
        if flow.forced {
            if let Some(first) = ctx.subject.and_then(|subject| subject.first_identifier()) {
                identifier = identifier.with_value(FieldValue::Text(first.to_string()));
            }
        }
        form.set_field(identifier);
        form.set_field(password_field());
        flow.set_method(ID, MethodConfig::new(form));
        Ok(())
    }

    async fn populate_registration(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        _ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        let schema = registry.schemas().default_schema()?;
        let paths = registry.loader().compile(&schema.url).await?.paths();
        let mut form = HtmlForm::from_schema_paths(
            action(registry, FlowKind::Registration, flow.id),
            &paths,
            "traits",
        );
        form.set_field(password_field());
        form.sort_by_schema(&paths, "traits");
        flow.set_method(ID, MethodConfig::new(form));
        Ok(())
    }

    async fn populate_settings(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        if ctx.subject.is_none() {
            return Ok(());
        }
        let mut form = HtmlForm::new(action(registry, FlowKind::Settings, flow.id));
        form.set_field(password_field());
        flow.set_method(ID, MethodConfig::new(form));
        Ok(())
    }

    async fn submit_login(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        submission: &Submission,
    ) -> Result<Response, Error> {
        login::login(registry, flow, submission).await
    }

    async fn submit_registration(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        submission: &Submission,
    ) -> Result<Response, Error> {
        registration::register(registry, flow, submission).await
    }

    async fn submit_settings(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        submission: &Submission,
    ) -> Result<Response, Error> {
        settings::change_password(registry, flow, submission).await
    }

    fn routes(&self) -> OpenApiRouter {
        OpenApiRouter::new()
            .routes(routes!(login_submit))
            .routes(routes!(registration_submit))
            .routes(routes!(settings_submit))
            .routes(routes!(settings::resume))
    }
}

#[utoipa::path(
    post,
    path = "/self-service/login/methods/password",
    params(FlowQuery),
    request_body(content = String, description = "`identifier`, `password` and, for browsers, `csrf_token` as JSON or form data"),
    responses(
        (status = 200, description = "Logged in (API flows)", body = crate::hook::FlowCompletion),
        (status = 302, description = "Redirect to the return URL or back to the UI (browser flows)"),
        (status = 400, description = "The flow with form errors", body = crate::flow::Flow),
        (status = 410, description = "The flow expired", body = crate::ErrorResponse),
    ),
    tag = "login"
)]
pub async fn login_submit(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<FlowQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    submit(&registry, FlowKind::Login, ID, query.flow, headers, body).await
}

#[utoipa::path(
    post,
    path = "/self-service/registration/methods/password",
    params(FlowQuery),
    request_body(content = String, description = "`traits`, `password` and, for browsers, `csrf_token` as JSON or form data"),
    responses(
        (status = 200, description = "Registered (API flows)", body = crate::hook::FlowCompletion),
        (status = 302, description = "Redirect to the return URL or back to the UI (browser flows)"),
        (status = 400, description = "The flow with form errors", body = crate::flow::Flow),
        (status = 410, description = "The flow expired", body = crate::ErrorResponse),
    ),
    tag = "registration"
)]
pub async fn registration_submit(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<FlowQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    submit(&registry, FlowKind::Registration, ID, query.flow, headers, body).await
}

#[utoipa::path(
    post,
    path = "/self-service/settings/methods/password",
    params(FlowQuery),
    request_body(content = String, description = "`password` and, for browsers, `csrf_token` as JSON or form data"),
    responses(
        (status = 200, description = "Password changed (API flows)", body = crate::flow::Flow),
        (status = 302, description = "Back to the settings UI, or to a refreshed login first"),
        (status = 400, description = "The flow with form errors", body = crate::flow::Flow),
        (status = 403, description = "A privileged session is required", body = crate::ErrorResponse),
    ),
    tag = "settings"
)]
pub async fn settings_submit(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<FlowQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    submit(&registry, FlowKind::Settings, ID, query.flow, headers, body).await
}
