//! Creating and fetching flows.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, instrument};
use utoipa::IntoParams;
use uuid::Uuid;

use super::{checked_return_to, errorx, flow_ui_url, json, redirect, with_query};
use crate::{
    flow::{Flow, FlowKind, FlowType},
    form::Message,
    hook::{run_pre_hooks, HookOutcome},
    identity::Identity,
    registry::Registry,
    strategy::{populate, PopulateContext},
    Error,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct InitQuery {
    /// Where to send the browser once the flow completes.
    pub return_to: Option<String>,
    /// Login only: re-authenticate although a session exists.
    pub refresh: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct FetchQuery {
    /// The flow id.
    pub id: Option<Uuid>,
}

/// Everything a new flow inherits from the request that creates it.
#[derive(Debug, Default)]
pub struct FlowSeed<'a> {
    pub return_to: Option<String>,
    pub forced: bool,
    pub subject: Option<&'a Identity>,
    pub privileged: bool,
    pub messages: Vec<Message>,
}

/// A persisted flow plus the cookies the response has to set.
#[derive(Debug)]
pub struct NewFlow {
    pub flow: Flow,
    pub cookies: Vec<HeaderValue>,
}

/// Create a flow, let every strategy populate its method and persist it.
///
/// # Errors
/// Returns strategy, CSRF or persistence errors.
#[instrument(skip(registry, headers, request_url, seed))]
pub async fn new_flow(
    registry: &Registry,
    kind: FlowKind,
    flow_type: FlowType,
    headers: &HeaderMap,
    request_url: String,
    seed: FlowSeed<'_>,
) -> Result<NewFlow, Error> {
    let mut flow = Flow::new(kind, flow_type, registry.config().lifespan(kind), request_url);
    flow.forced = seed.forced;
    flow.return_to = seed.return_to;
    flow.messages = seed.messages;
    if kind == FlowKind::Settings {
        flow.identity_id = seed.subject.map(|identity| identity.id);
    }

    let ctx = PopulateContext {
        subject: seed.subject,
        privileged: seed.privileged,
    };
    populate(registry, kind, &mut flow, &ctx).await?;

    let mut cookies = Vec::new();
    if flow_type.is_browser() {
        let csrf = registry.csrf().token_for(headers)?;
        flow.set_csrf(&csrf.token);
        cookies.extend(csrf.set_cookie);
    }

    registry.persister().create_flow(&flow).await?;
    debug!("Created {kind} flow {}", flow.id);
    Ok(NewFlow { flow, cookies })
}

/// `GET /self-service/<kind>/browser` and `/api`.
pub async fn initialize(
    registry: &Registry,
    kind: FlowKind,
    flow_type: FlowType,
    headers: &HeaderMap,
    uri: &Uri,
    query: InitQuery,
) -> Response {
    match try_initialize(registry, kind, flow_type, headers, uri, query).await {
        Ok(response) => response,
        Err(Error::AlreadyAuthenticated) if flow_type.is_browser() => {
            redirect(registry.config().default_return_url(), &[])
        }
        Err(Error::NoActiveSession) if flow_type.is_browser() => {
            let login = with_query(
                &registry.config().public_url("/self-service/login/browser"),
                "return_to",
                &registry.config().public_url(&uri.to_string()),
            );
            redirect(&login, &[])
        }
        Err(err) => errorx::forward(registry, headers, flow_type.is_browser(), err).await,
    }
}

async fn try_initialize(
    registry: &Registry,
    kind: FlowKind,
    flow_type: FlowType,
    headers: &HeaderMap,
    uri: &Uri,
    query: InitQuery,
) -> Result<Response, Error> {
    if let HookOutcome::Abort(response) = run_pre_hooks(registry, kind, flow_type) {
        return Ok(response);
    }

    let persister = registry.persister();
    let session = registry.sessions().fetch(persister, headers).await?;
    let refresh = kind == FlowKind::Login && query.refresh.unwrap_or(false);
    let return_to = checked_return_to(registry, query.return_to.as_deref())?;

    let subject = match (kind, &session) {
        (FlowKind::Settings, None) => return Err(Error::NoActiveSession),
        (FlowKind::Settings, Some(session)) => {
            Some(persister.get_identity(session.identity_id).await?)
        }
        (FlowKind::Login, Some(session)) if refresh => {
            Some(persister.get_identity_confidential(session.identity_id).await?)
        }
        (_, Some(_)) => return Err(Error::AlreadyAuthenticated),
        (_, None) => None,
    };
    let privileged = session.as_ref().is_some_and(|session| {
        session.is_privileged(registry.config().privileged_session_max_age())
    });
    let forced = refresh && subject.is_some();

    let created = new_flow(
        registry,
        kind,
        flow_type,
        headers,
        registry.config().public_url(&uri.to_string()),
        FlowSeed {
            return_to,
            forced,
            subject: subject.as_ref(),
            privileged,
            messages: if forced {
                vec![Message::refresh_login()]
            } else {
                Vec::new()
            },
        },
    )
    .await?;

    if flow_type.is_browser() {
        Ok(redirect(
            &flow_ui_url(registry, kind, created.flow.id),
            &created.cookies,
        ))
    } else {
        Ok(json(StatusCode::OK, &created.flow, &created.cookies))
    }
}

/// `GET /self-service/<kind>/flows?id=`. Settings flows are only shown to their owner.
pub async fn fetch(
    registry: &Registry,
    kind: FlowKind,
    headers: &HeaderMap,
    query: FetchQuery,
) -> Response {
    match try_fetch(registry, kind, headers, query).await {
        Ok(flow) => json(StatusCode::OK, &flow, &[]),
        Err(err) => err.into_response(),
    }
}

async fn try_fetch(
    registry: &Registry,
    kind: FlowKind,
    headers: &HeaderMap,
    query: FetchQuery,
) -> Result<Flow, Error> {
    let id = query
        .id
        .ok_or_else(|| Error::BadRequest("the id query parameter is missing".to_string()))?;
    let flow = registry.persister().get_flow(kind, id).await?;
    if kind == FlowKind::Settings {
        let session = registry
            .sessions()
            .require(registry.persister(), headers)
            .await?;
        flow.ensure_owner(session.identity_id)?;
    }
    flow.valid()?;
    Ok(flow)
}
