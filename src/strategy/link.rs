//! Account recovery and address verification by emailed link.
//!
//! Submitting an address always ends in the same `email_sent` state. Known
//! recovery addresses receive a single-use link, unknown ones a notice that
//! someone tried to recover an account there. Only SHA-256 digests of the
//! link tokens are stored.

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};
use uuid::Uuid;

use crate::{
    courier::EmailMessage,
    flow::{Flow, FlowKind, FlowState, FlowType, MethodConfig},
    form::{Field, FieldType, FieldValue, HtmlForm, Message},
    hook::post_recovery,
    identity::AddressType,
    persistence::RecoveryToken,
    registry::Registry,
    selfservice::{
        errorx, flow_ui_url,
        init::{new_flow, FlowSeed},
        json, redirect,
        submit::{submit, FlowQuery},
        with_query,
    },
    strategy::{PopulateContext, Strategy, Submission},
    token::{generate_link_token, hash_token},
    Error,
};

pub const ID: &str = "link";
pub const RECOVERY_PATH: &str = "/self-service/recovery/methods/link";
pub const VERIFICATION_PATH: &str = "/self-service/verification/methods/link";

const EMAIL_FIELD: &str = "email";

#[derive(Debug, Deserialize, IntoParams)]
pub struct TokenQuery {
    /// The token from the emailed link.
    pub token: Option<String>,
}

fn recovery_form(registry: &Registry, flow: &Flow) -> HtmlForm {
    let mut form = HtmlForm::new(with_query(
        &registry.config().public_url(RECOVERY_PATH),
        "flow",
        &flow.id.to_string(),
    ));
    form.set_field(Field::new(EMAIL_FIELD, FieldType::Email).required());
    form
}

fn recovery_schema() -> Value {
    json!({
        "type": "object",
        "required": [EMAIL_FIELD],
        "properties": {
            "email": { "type": "string", "format": "email" },
            "csrf_token": { "type": "string" }
        }
    })
}

pub struct LinkStrategy;

#[async_trait]
impl Strategy for LinkStrategy {
    fn id(&self) -> &'static str {
        ID
    }

    async fn populate_recovery(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        _ctx: &PopulateContext<'_>,
    ) -> Result<(), Error> {
        let form = recovery_form(registry, flow);
        flow.set_method(ID, MethodConfig::new(form));
        Ok(())
    }

    #[instrument(skip_all, fields(flow_id = %flow.id))]
    async fn submit_recovery(
        &self,
        registry: &Registry,
        flow: &mut Flow,
        submission: &Submission,
    ) -> Result<Response, Error> {
        let schema = registry
            .loader()
            .compile_value("link-recovery", recovery_schema())
            .await?;
        let payload = submission.decode_validated(&schema)?;
        registry
            .csrf()
            .validate(flow.flow_type, &submission.headers, &payload)?;
        if submission.session.is_some() {
            return Err(Error::AlreadyAuthenticated);
        }
        let email = payload
            .get(EMAIL_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        send_recovery_email(registry, flow, &email).await?;

        flow.state = Some(FlowState::EmailSent);
        flow.active = Some(ID.to_string());
        let mut form = recovery_form(registry, flow);
        form.set_value(EMAIL_FIELD, FieldValue::Text(email));
        form.add_message(Message::recovery_email_sent(), "");
        flow.set_method(ID, MethodConfig::new(form));
        if flow.flow_type.is_browser() {
            let csrf = registry.csrf().token_for(&submission.headers)?;
            flow.set_csrf(&csrf.token);
        }
        match registry.persister().update_flow(flow).await {
            Err(Error::StaleRevision) => return Err(Error::FlowCompleted),
            other => other?,
        }

        if flow.flow_type.is_browser() {
            Ok(redirect(
                &flow_ui_url(registry, FlowKind::Recovery, flow.id),
                &[],
            ))
        } else {
            Ok(json(StatusCode::OK, flow, &[]))
        }
    }

    fn routes(&self) -> OpenApiRouter {
        OpenApiRouter::new()
            .routes(routes!(recovery_submit))
            .routes(routes!(recovery_redeem))
            .routes(routes!(verification_redeem))
    }
}

/// Email a recovery link for a known address, a notice otherwise.
async fn send_recovery_email(registry: &Registry, flow: &Flow, email: &str) -> Result<(), Error> {
    let address = match registry
        .persister()
        .find_recovery_address_by_value(AddressType::Email, email)
        .await
    {
        Ok(address) => address,
        Err(Error::NotFound) => {
            debug!("No recovery address matches the submitted email");
            return registry
                .courier()
                .send(EmailMessage::recovery_invalid(email))
                .await;
        }
        Err(err) => return Err(err),
    };

    let token = generate_link_token();
    registry
        .persister()
        .create_recovery_token(&RecoveryToken {
            id: Uuid::new_v4(),
            token_hash: hash_token(&token),
            recovery_address_id: address.id,
            identity_id: address.identity_id,
            flow_id: flow.id,
            created_at: Utc::now(),
            expires_at: flow.expires_at,
        })
        .await?;
    let link = with_query(
        &registry.config().public_url(RECOVERY_PATH),
        "token",
        &token,
    );
    let minutes = (flow.expires_at - Utc::now()).num_minutes().max(1);
    info!(identity_id = %address.identity_id, "Sending a recovery link");
    registry
        .courier()
        .send(EmailMessage::recovery_valid(&address.value, &link, minutes))
        .await
}

/// Start over with a fresh browser recovery flow explaining why.
async fn restart(registry: &Registry, headers: &HeaderMap) -> Result<Response, Error> {
    let created = new_flow(
        registry,
        FlowKind::Recovery,
        FlowType::Browser,
        headers,
        registry
            .config()
            .public_url("/self-service/recovery/browser"),
        FlowSeed {
            messages: vec![Message::recovery_token_invalid()],
            ..FlowSeed::default()
        },
    )
    .await?;
    Ok(redirect(
        &flow_ui_url(registry, FlowKind::Recovery, created.flow.id),
        &created.cookies,
    ))
}

async fn redeem(registry: &Registry, headers: &HeaderMap, token: &str) -> Result<Response, Error> {
    let used = match registry
        .persister()
        .use_recovery_token(&hash_token(token))
        .await
    {
        Ok(used) => used,
        Err(Error::NotFound) => {
            debug!("Unknown, used or expired recovery token");
            return restart(registry, headers).await;
        }
        Err(err) => return Err(err),
    };
    let mut flow = match registry
        .persister()
        .get_flow(FlowKind::Recovery, used.flow_id)
        .await
    {
        Ok(flow) => flow,
        Err(Error::FlowNotFound | Error::NotFound) => return restart(registry, headers).await,
        Err(err) => return Err(err),
    };
    if flow.ensure_submittable(FlowKind::Recovery).is_err() {
        debug!("Recovery flow {} can no longer be completed", flow.id);
        return restart(registry, headers).await;
    }
    let identity = registry.persister().get_identity(used.identity_id).await?;
    info!(identity_id = %identity.id, "Recovered account through flow {}", flow.id);
    post_recovery(registry, headers, &mut flow, identity).await
}

#[utoipa::path(
    post,
    path = "/self-service/recovery/methods/link",
    params(FlowQuery),
    request_body(content = String, description = "`email` and, for browsers, `csrf_token` as JSON or form data"),
    responses(
        (status = 200, description = "The flow in state email_sent (API flows)", body = crate::flow::Flow),
        (status = 302, description = "Back to the recovery UI"),
        (status = 400, description = "The flow with form errors", body = crate::flow::Flow),
        (status = 410, description = "The flow expired", body = crate::ErrorResponse),
    ),
    tag = "recovery"
)]
pub async fn recovery_submit(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<FlowQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    submit(&registry, FlowKind::Recovery, ID, query.flow, headers, body).await
}

#[utoipa::path(
    get,
    path = "/self-service/recovery/methods/link",
    params(TokenQuery),
    responses(
        (status = 302, description = "To a privileged settings flow, or to a fresh recovery flow when the link is invalid"),
    ),
    tag = "recovery"
)]
pub async fn recovery_redeem(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    let result = match query.token.as_deref().filter(|token| !token.is_empty()) {
        Some(token) => redeem(&registry, &headers, token).await,
        None => restart(&registry, &headers).await,
    };
    match result {
        Ok(response) => response,
        Err(err) => errorx::forward(&registry, &headers, true, err).await,
    }
}

async fn verify(registry: &Registry, token: &str) -> Result<Response, Error> {
    let used = registry
        .persister()
        .use_verification_token(&hash_token(token))
        .await
        .map_err(|err| match err {
            Error::NotFound => Error::BadRequest(
                "the verification link is invalid or has already been used".to_string(),
            ),
            other => other,
        })?;
    if used.expires_at < Utc::now() {
        return Err(Error::BadRequest(
            "the verification link has expired".to_string(),
        ));
    }
    registry
        .persister()
        .verify_address(used.verifiable_address_id)
        .await?;
    info!("Verified address {}", used.verifiable_address_id);
    Ok(redirect(&registry.config().ui().verification, &[]))
}

#[utoipa::path(
    get,
    path = "/self-service/verification/methods/link",
    params(TokenQuery),
    responses(
        (status = 302, description = "To the verification UI, or to the error UI when the link is invalid"),
    ),
    tag = "verification"
)]
pub async fn verification_redeem(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = query.token.filter(|token| !token.is_empty()) else {
        let err = Error::BadRequest("the token query parameter is missing".to_string());
        return errorx::forward(&registry, &headers, true, err).await;
    };
    match verify(&registry, &token).await {
        Ok(response) => response,
        Err(err) => {
            warn!("Verification failed: {err}");
            errorx::forward(&registry, &headers, true, err).await
        }
    }
}
