//! Trait updates from the settings flow.
//!
//! Traits that serve as identifiers or addresses are protected: changing one
//! needs a privileged session, and fields marked `disableIdentifiers` render
//! read-only until the session is privileged.

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::HeaderMap,
    response::Response,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    flow::{Flow, FlowKind, MethodConfig},
    form::HtmlForm,
    hook::post_settings,
    identity::{validate_identity, Identity},
    registry::Registry,
    schema::SchemaPath,
    selfservice::submit::{require_session, submit, FlowQuery},
    strategy::{PopulateContext, Strategy, Submission},
    Error,
};

pub const ID: &str = "profile";

fn action(registry: &Registry, flow: &Flow) -> String {
    registry.config().public_url(&format!(
        "/self-service/settings/methods/profile?flow={}",
        flow.id
    ))
}

/// The value at dotted `path` inside `traits`.
fn trait_value<'a>(traits: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(traits, |value, segment| value.get(segment))
}

async fn trait_paths(registry: &Registry, identity: &Identity) -> Result<Vec<SchemaPath>, Error> {
    let schema = registry.schemas().get_by_id(&identity.schema_id)?;
    Ok(registry.loader().compile(&schema.url).await?.paths())
}

fn profile_form(
    registry: &Registry,
    flow: &Flow,
    paths: &[SchemaPath],
    identity: &Identity,
    privileged: bool,
) -> HtmlForm {
    let mut form = HtmlForm::from_schema_paths(action(registry, flow), paths, "traits");
    form.set_values_from_json(&json!({ "traits": identity.traits }), &[]);
    if !privileged {
        for path in paths.iter().filter(|path| path.extension.disable_identifiers) {
            if let Some(field) = form.field_mut(&format!("traits.{}", path.name)) {
                field.disabled = true;
            }
        }
    }
    form.sort_by_schema(paths, "traits");
    form
}

pub struct ProfileStrategy;

#[async_trait]
impl Strategy for ProfileStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    async fn populate_settings(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        let Some(subject) = ctx.subject else {
            return Ok(());
        };
        let paths = trait_paths(registry, subject).await?;
        let form = profile_form(registry, flow, &paths, subject, ctx.privileged);
        flow.set_method(ID, MethodConfig::new(form));
        Ok(())
    }

    #[instrument(skip_all, fields(flow_id = %flow.id))]
    async fn submit_settings(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        submission: &Submission,
    ) -> Result<Response, Error> {
        let session = require_session(submission.session.as_ref())?;
        let mut identity = registry
            .persister()
            .get_identity_confidential(session.identity_id)
            .await?;
        let schema = registry.schemas().get_by_id(&identity.schema_id)?;
        let payload_schema = registry
            .loader()
            .compile_value(
                "profile-settings",
                json!({
                    "type": "object",
                    "required": ["traits"],
                    "properties": {
                        "csrf_token": { "type": "string" },
                        "traits": { "$ref": schema.url }
                    }
                }),
            )
            .await?;
        let payload = submission.decode_validated(&payload_schema)?;
        registry
            .csrf()
            .validate(flow.flow_type, &submission.headers, &payload)?;

        let traits = payload.get("traits").cloned().unwrap_or_else(|| json!({}));
        let paths = trait_paths(registry, &identity).await?;
        let privileged = session.is_privileged(registry.config().privileged_session_max_age());
        let touches_protected = paths
            .iter()
            .filter(|path| path.extension.is_protected() || path.extension.disable_identifiers)
            .any(|path| {
                trait_value(&traits, &path.name) != trait_value(&identity.traits, &path.name)
            });
        if touches_protected && !privileged {
            return Err(Error::NeedsPrivilegedSession);
        }

        identity.traits = traits;
        validate_identity(registry.loader(), registry.schemas(), &mut identity).await?;
        registry.persister().update_identity(&identity).await?;
        info!("Updated the traits of identity {}", identity.id);

        let mut form = profile_form(registry, flow, &paths, &identity, privileged);
        if flow.flow_type.is_browser() {
            form.set_csrf(&registry.csrf().token_for(&submission.headers)?.token);
        }
        flow.set_method(ID, MethodConfig::new(form));
        flow.active = Some(ID.to_string());
        post_settings(registry, flow, &identity, session).await
    }

    fn routes(&self) -> OpenApiRouter {
        OpenApiRouter::new().routes(routes!(profile_submit))
    }
}

#[utoipa::path(
    post,
    path = "/self-service/settings/methods/profile",
    params(FlowQuery),
    request_body(content = String, description = "`traits` and, for browsers, `csrf_token` as JSON or form data"),
    responses(
        (status = 200, description = "Traits updated (API flows)", body = crate::flow::Flow),
        (status = 302, description = "Back to the settings UI"),
        (status = 400, description = "The flow with form errors", body = crate::flow::Flow),
        (status = 403, description = "A privileged session is required", body = crate::ErrorResponse),
    ),
    tag = "settings"
)]
pub async fn profile_submit(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<FlowQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    submit(&registry, FlowKind::Settings, ID, query.flow, headers, body).await
}
