//! Runs the configured hook chains around flow completion.
//!
//! A hook either continues the chain or aborts it with its own response (the
//! redirect hook). Any error stops the chain and reaches the flow error handler.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Hook;
use crate::{
    courier::EmailMessage,
    flow::{Flow, FlowKind, FlowState, FlowType},
    form::Message,
    identity::Identity,
    persistence::VerificationToken,
    registry::Registry,
    selfservice::{
        flow_ui_url,
        init::{new_flow, FlowSeed},
        json, redirect, with_query,
    },
    session::{IssuedSession, Session},
    strategy::link::VERIFICATION_PATH,
    token::{generate_link_token, hash_token},
    Error,
};

pub enum HookOutcome {
    Continue,
    /// The hook produced the response; stop here.
    Abort(Response),
}

/// Returned to API clients when a login or registration completes.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FlowCompletion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub identity: Identity,
}

struct HookContext<'a> {
    registry: &'a Registry,
    flow_type: FlowType,
    identity: &'a Identity,
    /// Session to keep when other sessions are revoked.
    current_session: Option<Uuid>,
    issued: Option<IssuedSession>,
    cookies: Vec<HeaderValue>,
}

impl<'a> HookContext<'a> {
    fn new(registry: &'a Registry, flow_type: FlowType, identity: &'a Identity) -> Self {
        Self {
            registry,
            flow_type,
            identity,
            current_session: None,
            issued: None,
            cookies: Vec::new(),
        }
    }

    fn keep_session(&self) -> Option<Uuid> {
        self.issued
            .as_ref()
            .map(|issued| issued.session.id)
            .or(self.current_session)
    }

    async fn issue_session(&mut self) -> Result<(), Error> {
        let sessions = self.registry.sessions();
        let issued = sessions
            .issue(self.registry.persister(), self.identity.id)
            .await?;
        if self.flow_type.is_browser() {
            self.cookies.push(sessions.cookie(&issued.token)?);
        }
        info!(identity_id = %self.identity.id, "Issued session {}", issued.session.id);
        self.issued = Some(issued);
        Ok(())
    }

    async fn send_verification(&self) -> Result<(), Error> {
        let config = self.registry.config();
        for address in self
            .identity
            .verifiable_addresses
            .iter()
            .filter(|address| !address.verified)
        {
            let token = generate_link_token();
            let now = Utc::now();
            self.registry
                .persister()
                .create_verification_token(&VerificationToken {
                    id: Uuid::new_v4(),
                    token_hash: hash_token(&token),
                    verifiable_address_id: address.id,
                    created_at: now,
                    expires_at: now + config.verification_lifespan(),
                })
                .await?;
            let link = with_query(&config.public_url(VERIFICATION_PATH), "token", &token);
            self.registry
                .courier()
                .send(EmailMessage::verification_valid(&address.value, &link))
                .await?;
        }
        Ok(())
    }

    async fn run(&mut self, hooks: &[Hook]) -> Result<HookOutcome, Error> {
        for hook in hooks {
            debug!("Running hook {hook}");
            match hook {
                Hook::Session => {
                    if self.issued.is_none() {
                        self.issue_session().await?;
                    }
                }
                Hook::Verify => self.send_verification().await?,
                Hook::RevokeActiveSessions => {
                    let revoked = self
                        .registry
                        .persister()
                        .revoke_sessions(self.identity.id, self.keep_session())
                        .await?;
                    info!(identity_id = %self.identity.id, "Revoked {revoked} sessions");
                }
                Hook::Redirect(url) => {
                    if !self.flow_type.is_browser() {
                        continue;
                    }
                    if self.registry.config().is_allowed_return_url(url) {
                        return Ok(HookOutcome::Abort(redirect(url, &self.cookies)));
                    }
                    warn!("Skipping redirect hook to {url}: not an allowed return URL");
                }
            }
        }
        Ok(HookOutcome::Continue)
    }

    fn completion(self, flow: &Flow) -> Response {
        if flow.flow_type.is_browser() {
            let target = flow
                .return_to
                .clone()
                .unwrap_or_else(|| self.registry.config().default_return_url().to_string());
            return redirect(&target, &self.cookies);
        }
        let (session, session_token) = match self.issued {
            Some(issued) => (Some(issued.session), Some(issued.token)),
            None => (None, None),
        };
        json(
            StatusCode::OK,
            &FlowCompletion {
                session,
                session_token,
                identity: self.identity.without_credentials(),
            },
            &self.cookies,
        )
    }
}

/// Persist the completed flow; a lost compare-and-swap means another request finished it.
async fn complete(registry: &Registry, flow: &mut Flow) -> Result<(), Error> {
    flow.completed = true;
    match registry.persister().update_flow(flow).await {
        Err(Error::StaleRevision) => Err(Error::FlowCompleted),
        other => other,
    }
}

/// Run the `before` chain of `kind`. Only redirects apply before a flow exists.
#[must_use]
pub fn run_pre_hooks(registry: &Registry, kind: FlowKind, flow_type: FlowType) -> HookOutcome {
    for hook in &registry.config().hooks().chain(kind).before {
        match hook {
            Hook::Redirect(url) if flow_type.is_browser() => {
                if registry.config().is_allowed_return_url(url) {
                    return HookOutcome::Abort(redirect(url, &[]));
                }
                warn!("Skipping redirect hook to {url}: not an allowed return URL");
            }
            Hook::Redirect(_) => {}
            other => warn!("Hook {other} can not run before a {kind} flow"),
        }
    }
    HookOutcome::Continue
}

/// Complete a login flow for `identity`.
///
/// # Errors
/// Returns `FlowCompleted` when a concurrent submit won, or any hook error.
#[instrument(skip_all, fields(flow_id = %flow.id, identity_id = %identity.id))]
pub async fn post_login(
    registry: &Registry,
    flow: &mut Flow,
    identity: Identity,
    current: Option<&Session>,
) -> Result<Response, Error> {
    complete(registry, flow).await?;
    let mut ctx = HookContext::new(registry, flow.flow_type, &identity);
    ctx.current_session = current.map(|session| session.id);
    if let HookOutcome::Abort(response) = ctx
        .run(&registry.config().hooks().chain(FlowKind::Login).after)
        .await?
    {
        return Ok(response);
    }
    Ok(ctx.completion(flow))
}

/// Create `identity`, then complete the registration flow.
///
/// # Errors
/// Returns `DuplicateIdentifier` when an identifier is taken, `FlowCompleted`
/// when a concurrent submit won, or any hook error.
#[instrument(skip_all, fields(flow_id = %flow.id, identity_id = %identity.id))]
pub async fn post_registration(
    registry: &Registry,
    flow: &mut Flow,
    identity: Identity,
) -> Result<Response, Error> {
    registry.persister().create_identity(&identity).await?;
    info!("Created identity {}", identity.id);
    complete(registry, flow).await?;
    let mut ctx = HookContext::new(registry, flow.flow_type, &identity);
    if let HookOutcome::Abort(response) = ctx
        .run(&registry.config().hooks().chain(FlowKind::Registration).after)
        .await?
    {
        return Ok(response);
    }
    Ok(ctx.completion(flow))
}

/// Record a successful settings update. Settings flows stay open for further changes.
///
/// # Errors
/// Returns `FlowCompleted` when a concurrent submit won, or any hook error.
#[instrument(skip_all, fields(flow_id = %flow.id, identity_id = %identity.id))]
pub async fn post_settings(
    registry: &Registry,
    flow: &mut Flow,
    identity: &Identity,
    current: &Session,
) -> Result<Response, Error> {
    flow.state = Some(FlowState::Success);
    flow.messages = vec![Message::settings_saved()];
    match registry.persister().update_flow(flow).await {
        Err(Error::StaleRevision) => return Err(Error::FlowCompleted),
        other => other?,
    }
    let mut ctx = HookContext::new(registry, flow.flow_type, identity);
    ctx.current_session = Some(current.id);
    if let HookOutcome::Abort(response) = ctx
        .run(&registry.config().hooks().chain(FlowKind::Settings).after)
        .await?
    {
        return Ok(response);
    }
    if flow.flow_type.is_browser() {
        Ok(redirect(
            &flow_ui_url(registry, FlowKind::Settings, flow.id),
            &ctx.cookies,
        ))
    } else {
        Ok(json(StatusCode::OK, flow, &ctx.cookies))
    }
}

/// Finish a recovery: log the identity in and hand it a privileged settings flow.
///
/// # Errors
/// Returns `FlowCompleted` when the flow was already used, or any hook error.
#[instrument(skip_all, fields(flow_id = %flow.id, identity_id = %identity.id))]
pub async fn post_recovery(
    registry: &Registry,
    headers: &HeaderMap,
    flow: &mut Flow,
    identity: Identity,
) -> Result<Response, Error> {
    flow.state = Some(FlowState::PassedChallenge);
    flow.recovered_identity_id = Some(identity.id);
    complete(registry, flow).await?;

    let mut ctx = HookContext::new(registry, FlowType::Browser, &identity);
    ctx.issue_session().await?;
    if let HookOutcome::Abort(response) = ctx
        .run(&registry.config().hooks().chain(FlowKind::Recovery).after)
        .await?
    {
        return Ok(response);
    }

    let minutes = registry.config().privileged_session_max_age().num_minutes();
    let settings = new_flow(
        registry,
        FlowKind::Settings,
        FlowType::Browser,
        headers,
        registry.config().public_url("/self-service/settings/browser"),
        FlowSeed {
            subject: Some(&identity),
            privileged: true,
            messages: vec![Message::recovery_succeeded(minutes)],
            ..FlowSeed::default()
        },
    )
    .await?;

    let mut cookies = ctx.cookies;
    cookies.extend(settings.cookies);
    Ok(redirect(
        &flow_ui_url(registry, FlowKind::Settings, settings.flow.id),
        &cookies,
    ))
}
