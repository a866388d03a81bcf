//! Password changes.
//!
//! Browsers without a privileged session park the hashed password in a
//! continuity container, re-authenticate through a refresh login and land on
//! [`resume`], which applies the parked change exactly once.

use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{hash_password, ID};
use crate::{
    flow::{Flow, FlowKind},
    hook::post_settings,
    identity::{validate_identity, Credentials, CredentialsType, Identity},
    registry::Registry,
    selfservice::{
        append_cookies, error_handler, errorx, redirect,
        submit::{require_session, FlowQuery},
        with_query,
    },
    session::Session,
    strategy::Submission,
    Error,
};

/// One container name per settings flow.
fn continuity_name(flow_id: Uuid) -> String {
    format!("settings.password.{flow_id}")
}

#[derive(Debug, Serialize, Deserialize)]
struct PausedChange {
    flow_id: Uuid,
    hashed_password: String,
}

fn settings_schema() -> Value {
    json!({
        "type": "object",
        "required": ["password"],
        "properties": {
            "password": { "type": "string", "minLength": 1 },
            "csrf_token": { "type": "string" }
        }
    })
}

fn resume_path(flow_id: Uuid) -> String {
    format!("/self-service/settings/methods/password?flow={flow_id}")
}

#[instrument(skip_all, fields(flow_id = %flow.id))]
pub(super) async fn change_password(
    registry: &Registry,
    flow: &mut Flow,
    submission: &Submission,
) -> Result<Response, Error> {
    let schema = registry
        .loader()
        .compile_value("password-settings", settings_schema())
        .await?;
    let payload = submission.decode_validated(&schema)?;
    registry
        .csrf()
        .validate(flow.flow_type, &submission.headers, &payload)?;
    let session = require_session(submission.session.as_ref())?;

    let identity = registry
        .persister()
        .get_identity_confidential(session.identity_id)
        .await?;
    let password = payload
        .get("password")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    registry
        .password_validator()
        .validate(identity.first_identifier().unwrap_or_default(), &password)
        .await?;
    let hashed_password = hash_password(registry, password).await?;

    if session.is_privileged(registry.config().privileged_session_max_age()) {
        return apply(
            registry,
            &submission.headers,
            flow,
            identity,
            hashed_password,
            session,
        )
        .await;
    }
    if !flow.flow_type.is_browser() {
        return Err(Error::NeedsPrivilegedSession);
    }

    let cookie = registry
        .continuity()
        .pause(
            registry.persister(),
            &continuity_name(flow.id),
            Some(identity.id),
            serde_json::to_value(PausedChange {
                flow_id: flow.id,
                hashed_password,
            })
            .map_err(anyhow::Error::from)?,
        )
        .await?;
    let config = registry.config();
    let login = with_query(
        &with_query(
            &config.public_url("/self-service/login/browser"),
            "refresh",
            "true",
        ),
        "return_to",
        &config.public_url(&resume_path(flow.id)),
    );
    info!("Password change of identity {} waits for a refreshed login", identity.id);
    Ok(redirect(&login, &[cookie]))
}

async fn apply(
    registry: &Registry,
    headers: &HeaderMap,
    flow: &mut Flow,
    mut identity: Identity,
    hashed_password: String,
    session: &Session,
) -> Result<Response, Error> {
    let identifiers = identity
        .get_credentials(CredentialsType::Password)
        .map(|credentials| credentials.identifiers.clone())
        .unwrap_or_default();
    identity.set_credentials(Credentials::new(
        CredentialsType::Password,
        identifiers,
        json!({ "hashed_password": hashed_password }),
    ));
    validate_identity(registry.loader(), registry.schemas(), &mut identity).await?;
    registry.persister().update_identity(&identity).await?;
    info!("Changed the password of identity {}", identity.id);

    flow.active = Some(ID.to_string());
    if let Some(form) = flow.form_mut(ID) {
        form.reset();
    }
    if flow.flow_type.is_browser() {
        let csrf = registry.csrf().token_for(headers)?;
        flow.set_csrf(&csrf.token);
    }
    post_settings(registry, flow, &identity, session).await
}

#[utoipa::path(
    get,
    path = "/self-service/settings/methods/password",
    params(FlowQuery),
    responses(
        (status = 302, description = "Back to the settings UI with the change applied"),
    ),
    tag = "settings"
)]
pub async fn resume(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<FlowQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(flow_id) = query.flow else {
        let err = Error::BadRequest("the flow query parameter is missing".to_string());
        return errorx::forward(&registry, &headers, true, err).await;
    };
    let mut flow = match registry
        .persister()
        .get_flow(FlowKind::Settings, flow_id)
        .await
    {
        Ok(flow) => flow,
        Err(err) => return errorx::forward(&registry, &headers, true, err).await,
    };
    match resume_change(&registry, &headers, &mut flow).await {
        Ok(mut response) => {
            match registry.continuity().clear_cookie() {
                Ok(clear) => append_cookies(&mut response, &[clear]),
                Err(err) => warn!("Failed to clear the continuity cookie: {err}"),
            }
            response
        }
        Err(err) => error_handler::handle(&registry, &headers, flow, ID, err, &Value::Null).await,
    }
}

async fn resume_change(
    registry: &Registry,
    headers: &HeaderMap,
    flow: &mut Flow,
) -> Result<Response, Error> {
    let session = registry
        .sessions()
        .require(registry.persister(), headers)
        .await?;
    flow.ensure_owner(session.identity_id)?;
    flow.ensure_submittable(FlowKind::Settings)?;
    if !session.is_privileged(registry.config().privileged_session_max_age()) {
        return Err(Error::NeedsPrivilegedSession);
    }
    let identity = registry
        .persister()
        .get_identity_confidential(session.identity_id)
        .await?;

    let paused = registry
        .continuity()
        .resume(
            registry.persister(),
            headers,
            &continuity_name(flow.id),
            Some(session.identity_id),
        )
        .await?;
    let paused: PausedChange = serde_json::from_value(paused).map_err(anyhow::Error::from)?;
    if paused.flow_id != flow.id {
        return Err(Error::NotFound);
    }
    apply(
        registry,
        headers,
        flow,
        identity,
        paused.hashed_password,
        &session,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        continuity::CONTINUITY_COOKIE_NAME,
        flow::FlowType,
        strategy::{password::PasswordStrategy, PopulateContext, Strategy},
        test_support::Harness,
    };
    use axum::{
        body::Bytes,
        http::{
            header::{CONTENT_TYPE, COOKIE},
            HeaderValue, StatusCode,
        },
    };
    use chrono::Duration;

    const OLD_PASSWORD: &str = "the original passphrase";
    const NEW_PASSWORD: &str = "a brand new passphrase 42";

    fn submission(session: &Session, password: &str) -> anyhow::Result<Submission> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Submission {
            headers,
            body: Bytes::from(serde_json::to_vec(&json!({ "password": password }))?),
            session: Some(session.clone()),
        })
    }

    async fn settings_flow(
        harness: &Harness,
        identity: &Identity,
        flow_type: FlowType,
    ) -> anyhow::Result<Flow> {
        let mut flow = Flow::new(FlowKind::Settings, flow_type, Duration::minutes(10), "/");
        flow.identity_id = Some(identity.id);
        let ctx = PopulateContext {
            subject: Some(identity),
            privileged: false,
        };
        PasswordStrategy
            .populate_settings(&harness.registry, &mut flow, &ctx)
            .await?;
        harness.registry.persister().create_flow(&flow).await?;
        Ok(flow)
    }

    async fn password_matches(
        harness: &Harness,
        identity: &Identity,
        password: &str,
    ) -> anyhow::Result<bool> {
        let stored = harness
            .registry
            .persister()
            .get_identity_confidential(identity.id)
            .await?;
        let hashed = stored
            .get_credentials(CredentialsType::Password)
            .and_then(|credentials| credentials.config.get("hashed_password"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(harness.registry.hasher().verify(password, &hashed))
    }

    /// Headers carrying the session token and the continuity cookie set by a pause.
    fn resume_headers(token: &str, continuity: &HeaderValue) -> anyhow::Result<HeaderMap> {
        let pair = continuity
            .to_str()?
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string();
        assert!(pair.starts_with(CONTINUITY_COOKIE_NAME));
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("keygate_session={token}; {pair}"))?,
        );
        Ok(headers)
    }

    async fn park(
        harness: &Harness,
        identity: &Identity,
        flow: &Flow,
    ) -> anyhow::Result<HeaderValue> {
        let hashed_password = harness.registry.hasher().hash(NEW_PASSWORD)?;
        Ok(harness
            .registry
            .continuity()
            .pause(
                harness.registry.persister(),
                &continuity_name(flow.id),
                Some(identity.id),
                serde_json::to_value(PausedChange {
                    flow_id: flow.id,
                    hashed_password,
                })?,
            )
            .await?)
    }

    #[tokio::test]
    async fn privileged_sessions_change_the_password() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let identity = harness
            .create_password_identity("change@example.com", OLD_PASSWORD)
            .await?;
        let issued = harness.issue_session(&identity).await?;
        let mut flow = settings_flow(&harness, &identity, FlowType::Api).await?;

        let response = change_password(
            &harness.registry,
            &mut flow,
            &submission(&issued.session, NEW_PASSWORD)?,
        )
        .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(flow.active.as_deref(), Some(ID));
        assert!(password_matches(&harness, &identity, NEW_PASSWORD).await?);
        assert!(!password_matches(&harness, &identity, OLD_PASSWORD).await?);

        let (_, credentials) = harness
            .registry
            .persister()
            .find_by_credentials_identifier(CredentialsType::Password, "change@example.com")
            .await?;
        assert_eq!(credentials.identifiers, vec!["change@example.com".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn api_flows_require_a_privileged_session() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let identity = harness
            .create_password_identity("stale@example.com", OLD_PASSWORD)
            .await?;
        let issued = harness.issue_stale_session(&identity).await?;
        let mut flow = settings_flow(&harness, &identity, FlowType::Api).await?;

        let result = change_password(
            &harness.registry,
            &mut flow,
            &submission(&issued.session, NEW_PASSWORD)?,
        )
        .await;
        let Err(err) = result else {
            anyhow::bail!("an unprivileged API change must be refused");
        };
        assert!(matches!(err, Error::NeedsPrivilegedSession));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(password_matches(&harness, &identity, OLD_PASSWORD).await?);
        Ok(())
    }

    #[tokio::test]
    async fn resume_keeps_the_change_until_a_privileged_owner_returns() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let identity = harness
            .create_password_identity("owner@example.com", OLD_PASSWORD)
            .await?;
        let stranger = harness
            .create_password_identity("stranger@example.com", OLD_PASSWORD)
            .await?;
        let mut flow = settings_flow(&harness, &identity, FlowType::Browser).await?;
        let mut other_flow = settings_flow(&harness, &identity, FlowType::Browser).await?;
        let continuity = park(&harness, &identity, &flow).await?;

        let foreign = harness.issue_session(&stranger).await?;
        let headers = resume_headers(&foreign.token, &continuity)?;
        assert!(matches!(
            resume_change(&harness.registry, &headers, &mut flow).await,
            Err(Error::FlowOwnership)
        ));

        let stale = harness.issue_stale_session(&identity).await?;
        let headers = resume_headers(&stale.token, &continuity)?;
        assert!(matches!(
            resume_change(&harness.registry, &headers, &mut flow).await,
            Err(Error::NeedsPrivilegedSession)
        ));

        let fresh = harness.issue_session(&identity).await?;
        let headers = resume_headers(&fresh.token, &continuity)?;
        assert!(matches!(
            resume_change(&harness.registry, &headers, &mut other_flow).await,
            Err(Error::NotFound)
        ));
        assert!(password_matches(&harness, &identity, OLD_PASSWORD).await?);

        let response = resume_change(&harness.registry, &headers, &mut flow).await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(password_matches(&harness, &identity, NEW_PASSWORD).await?);
        assert!(!password_matches(&harness, &identity, OLD_PASSWORD).await?);

        assert!(matches!(
            resume_change(&harness.registry, &headers, &mut flow).await,
            Err(Error::NotFound)
        ));
        Ok(())
    }
}
