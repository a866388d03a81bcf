//! Re-entry after a failed submit.
//!
//! Form errors are rendered into the same flow, which is sent back to the UI
//! (browser) or returned with `400` (API). Expired flows and CSRF failures
//! start over with a fresh flow. Everything else leaves the flow and goes to
//! the error UI.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{
    errorx, flow_ui_url,
    init::{new_flow, FlowSeed},
    json, redirect,
};
use crate::{
    flow::{Flow, FlowKind},
    form::Message,
    identity::Identity,
    registry::Registry,
    Error,
};

/// Turn a failed submit of `method` into a response.
#[instrument(skip_all, fields(flow_id = %flow.id, method = method, error = %err))]
pub async fn handle(
    registry: &Registry,
    headers: &HeaderMap,
    mut flow: Flow,
    method: &str,
    err: Error,
    payload: &Value,
) -> Response {
    let browser = flow.flow_type.is_browser();
    match try_handle(registry, headers, &mut flow, method, err, payload).await {
        Ok(response) => response,
        Err(err) => errorx::forward(registry, headers, browser, err).await,
    }
}

async fn try_handle(
    registry: &Registry,
    headers: &HeaderMap,
    flow: &mut Flow,
    method: &str,
    err: Error,
    payload: &Value,
) -> Result<Response, Error> {
    let kind = flow.kind()?;
    let browser = flow.flow_type.is_browser();
    match err {
        Error::FlowExpired { .. } => {
            retry(registry, headers, flow, Message::flow_expired(kind.as_str()), err).await
        }
        Error::CsrfTokenInvalid if browser => {
            retry(registry, headers, flow, Message::csrf_retry(), err).await
        }
        Error::RecoveryTokenInvalid => {
            retry(registry, headers, flow, Message::recovery_token_invalid(), err).await
        }
        Error::AlreadyAuthenticated if browser => {
            Ok(redirect(registry.config().default_return_url(), &[]))
        }
        Error::NeedsPrivilegedSession => {
            if let Some(form) = flow.form_mut(method) {
                form.reset();
                form.set_values_from_json(payload, &[]);
                form.add_message(Message::privileged_session_required(), "");
            }
            flow.messages = vec![Message::privileged_session_required()];
            flow.active = Some(method.to_string());
            let cookies = refresh_csrf(registry, headers, flow)?;
            registry.persister().update_flow(flow).await?;
            if browser {
                Ok(redirect(&flow_ui_url(registry, kind, flow.id), &cookies))
            } else {
                let body = err
                    .to_response_body()
                    .with_detail("use_flow_id", json!(flow.id));
                Ok((err.status(), Json(body)).into_response())
            }
        }
        err if err.is_form_error() => {
            let Some(form) = flow.form_mut(method) else {
                return Err(err);
            };
            form.reset();
            form.set_values_from_json(payload, &[]);
            form.parse_error(err)?;
            flow.active = Some(method.to_string());
            let cookies = refresh_csrf(registry, headers, flow)?;
            match registry.persister().update_flow(flow).await {
                Err(Error::StaleRevision) => return Err(Error::FlowCompleted),
                other => other?,
            }
            debug!("Rendered form error into {kind} flow {}", flow.id);
            if browser {
                Ok(redirect(&flow_ui_url(registry, kind, flow.id), &cookies))
            } else {
                Ok(json(StatusCode::BAD_REQUEST, &*flow, &cookies))
            }
        }
        other => Err(other),
    }
}

/// Put the CSRF field back after a reset. Returns the cookie to set, if any.
fn refresh_csrf(
    registry: &Registry,
    headers: &HeaderMap,
    flow: &mut Flow,
) -> Result<Vec<HeaderValue>, Error> {
    if !flow.flow_type.is_browser() {
        return Ok(Vec::new());
    }
    let csrf = registry.csrf().token_for(headers)?;
    flow.set_csrf(&csrf.token);
    Ok(csrf.set_cookie.into_iter().collect())
}

/// Replace `old` with a fresh flow of the same kind carrying `message`.
async fn retry(
    registry: &Registry,
    headers: &HeaderMap,
    old: &Flow,
    message: Message,
    cause: Error,
) -> Result<Response, Error> {
    let kind = old.kind()?;
    let subject = retry_subject(registry, headers, old, kind).await?;
    let privileged = match &subject {
        Some((_, privileged)) => *privileged,
        None => false,
    };
    let created = new_flow(
        registry,
        kind,
        old.flow_type,
        headers,
        old.request_url.clone(),
        FlowSeed {
            return_to: old.return_to.clone(),
            forced: old.forced && subject.is_some(),
            subject: subject.as_ref().map(|(identity, _)| identity),
            privileged,
            messages: vec![message],
        },
    )
    .await?;

    if old.flow_type.is_browser() {
        return Ok(redirect(
            &flow_ui_url(registry, kind, created.flow.id),
            &created.cookies,
        ));
    }
    let body = cause
        .to_response_body()
        .with_detail("use_flow_id", json!(created.flow.id));
    Ok((cause.status(), Json(body)).into_response())
}

/// Settings flows and forced logins are rebuilt for the identity behind the session.
async fn retry_subject(
    registry: &Registry,
    headers: &HeaderMap,
    old: &Flow,
    kind: FlowKind,
) -> Result<Option<(Identity, bool)>, Error> {
    let needs_subject = kind == FlowKind::Settings || (kind == FlowKind::Login && old.forced);
    if !needs_subject {
        return Ok(None);
    }
    let persister = registry.persister();
    let Some(session) = registry.sessions().fetch(persister, headers).await? else {
        return if kind == FlowKind::Settings {
            Err(Error::NoActiveSession)
        } else {
            Ok(None)
        };
    };
    let identity = persister.get_identity_confidential(session.identity_id).await?;
    let privileged = session.is_privileged(registry.config().privileged_session_max_age());
    Ok(Some((identity, privileged)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        flow::FlowType,
        strategy::{populate, PopulateContext},
        test_support::registry,
    };
    use axum::{body::to_bytes, http::header::LOCATION};
    use chrono::{Duration, Utc};

    async fn login_flow(registry: &Registry, flow_type: FlowType) -> anyhow::Result<Flow> {
        let mut flow = Flow::new(
            FlowKind::Login,
            flow_type,
            Duration::minutes(10),
            registry.config().public_url("/self-service/login/api"),
        );
        populate(registry, FlowKind::Login, &mut flow, &PopulateContext::default()).await?;
        registry.persister().create_flow(&flow).await?;
        Ok(flow)
    }

    #[tokio::test]
    async fn api_form_errors_come_back_in_the_flow() -> anyhow::Result<()> {
        let registry = registry().await?;
        let flow = login_flow(&registry, FlowType::Api).await?;
        let response = handle(
            &registry,
            &HeaderMap::new(),
            flow.clone(),
            "password",
            Error::InvalidCredentials,
            &json!({"identifier": "foo@bar.com", "password": "secret"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
        let config = &body["methods"]["password"]["config"];
        assert_eq!(config["messages"][0]["id"], 4_000_006);
        let identifier = config["fields"]
            .as_array()
            .and_then(|fields| fields.iter().find(|field| field["name"] == "identifier"))
            .ok_or_else(|| anyhow::anyhow!("missing identifier field"))?;
        assert_eq!(identifier["value"], "foo@bar.com");
        let password = config["fields"]
            .as_array()
            .and_then(|fields| fields.iter().find(|field| field["name"] == "password"))
            .ok_or_else(|| anyhow::anyhow!("missing password field"))?;
        assert!(password.get("value").is_none());

        let stored = registry.persister().get_flow(FlowKind::Login, flow.id).await?;
        assert_eq!(stored.active.as_deref(), Some("password"));
        Ok(())
    }

    #[tokio::test]
    async fn expired_browser_flows_restart() -> anyhow::Result<()> {
        let registry = registry().await?;
        let mut flow = login_flow(&registry, FlowType::Browser).await?;
        flow.expires_at = Utc::now() - Duration::seconds(1);
        let response = handle(
            &registry,
            &HeaderMap::new(),
            flow.clone(),
            "password",
            Error::FlowExpired {
                expired_at: flow.expires_at,
            },
            &Value::Null,
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response
            .headers()
            .get(LOCATION)
            .ok_or_else(|| anyhow::anyhow!("missing location"))?
            .to_str()?;
        assert!(location.starts_with(registry.config().ui_url(FlowKind::Login)));
        assert!(!location.contains(&flow.id.to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn expired_api_flows_point_at_the_replacement() -> anyhow::Result<()> {
        let registry = registry().await?;
        let flow = login_flow(&registry, FlowType::Api).await?;
        let response = handle(
            &registry,
            &HeaderMap::new(),
            flow.clone(),
            "password",
            Error::FlowExpired {
                expired_at: flow.expires_at,
            },
            &Value::Null,
        )
        .await;
        assert_eq!(response.status(), StatusCode::GONE);
        let body: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
        let replacement = body["error"]["details"]["use_flow_id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing use_flow_id"))?
            .parse()?;
        let fresh = registry.persister().get_flow(FlowKind::Login, replacement).await?;
        assert_eq!(fresh.messages.len(), 1);
        Ok(())
    }
}
