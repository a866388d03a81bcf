use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::IntoParams;
use uuid::Uuid;

use super::{
    auth_url,
    mapper::map_claims,
    state::{AuthState, CALLBACK_PATH},
    Claims, Provider, ProviderError, ID,
};
use crate::{
    flow::{Flow, FlowKind, FlowType},
    hook::{post_login, post_registration},
    identity::{
        oidc_identifier, validate_identity, Credentials, CredentialsType, Identity, OidcConfig,
    },
    registry::Registry,
    selfservice::{
        append_cookies, error_handler, errorx,
        init::{new_flow, FlowSeed},
        redirect,
    },
    session::Session,
    strategy::Submission,
    Error,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn redirect_uri(registry: &Registry, provider: &str) -> String {
    registry
        .config()
        .public_url(&format!("{CALLBACK_PATH}/{provider}"))
}

/// Login flows take precedence; a registration flow with the same id cannot exist.
async fn load_flow(registry: &Registry, id: Uuid) -> Result<Flow, Error> {
    match registry.persister().get_flow(FlowKind::Login, id).await {
        Err(Error::FlowNotFound | Error::NotFound) => {
            registry
                .persister()
                .get_flow(FlowKind::Registration, id)
                .await
        }
        other => other,
    }
}

fn lookup_provider<'a>(registry: &'a Registry, id: &str) -> Result<&'a dyn Provider, Error> {
    registry
        .provider(id)
        .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()).into())
}

/// Send the user agent to `provider_id`, remembering `flow` in the state cookie.
async fn start(
    registry: &Registry,
    flow: &Flow,
    provider_id: &str,
    session: Option<&Session>,
) -> Result<Response, Error> {
    let kind = flow.kind()?;
    flow.ensure_submittable(kind)?;
    if flow.method(ID).is_none() {
        return Err(Error::BadRequest(
            "sign in with a provider is not available for this flow".to_string(),
        ));
    }
    if session.is_some() && !flow.forced {
        return Err(Error::AlreadyAuthenticated);
    }
    let provider = lookup_provider(registry, provider_id)?;
    let auth = AuthState::new(flow.id, kind)?;
    let url = provider
        .auth_code_url(&auth.state, &redirect_uri(registry, provider_id))
        .await?;
    debug!("Redirecting {kind} flow {} to provider {provider_id}", flow.id);
    Ok(redirect(&url, &[auth.cookie(registry.config().secure_cookies())?]))
}

async fn start_or_handle(
    registry: &Registry,
    headers: &HeaderMap,
    flow_id: Uuid,
    provider_id: &str,
    payload: &Value,
    csrf: bool,
) -> Response {
    let flow = match load_flow(registry, flow_id).await {
        Ok(flow) => flow,
        Err(err) => return errorx::forward(registry, headers, true, err).await,
    };
    let session = match registry.sessions().fetch(registry.persister(), headers).await {
        Ok(session) => session,
        Err(err) => return errorx::forward(registry, headers, true, err).await,
    };
    let result = if csrf {
        match registry.csrf().validate(flow.flow_type, headers, payload) {
            Ok(()) => start(registry, &flow, provider_id, session.as_ref()).await,
            Err(err) => Err(err),
        }
    } else {
        start(registry, &flow, provider_id, session.as_ref()).await
    };
    match result {
        Ok(response) => response,
        Err(err) => error_handler::handle(registry, headers, flow, ID, err, payload).await,
    }
}

#[utoipa::path(
    get,
    path = "/self-service/methods/oidc/auth/{provider}/{flow}",
    params(
        ("provider" = String, Path, description = "Provider id"),
        ("flow" = Uuid, Path, description = "Login or registration flow id"),
    ),
    responses(
        (status = 302, description = "Redirect to the provider"),
    ),
    tag = "oidc"
)]
pub async fn auth(
    registry: Extension<Arc<Registry>>,
    Path((provider_id, flow_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Response {
    start_or_handle(&registry, &headers, flow_id, &provider_id, &Value::Null, false).await
}

#[utoipa::path(
    post,
    path = "/self-service/methods/oidc/auth/{flow}",
    params(("flow" = Uuid, Path, description = "Login or registration flow id")),
    request_body(content = String, content_type = "application/x-www-form-urlencoded", description = "`provider` and `csrf_token`"),
    responses(
        (status = 302, description = "Redirect to the provider"),
    ),
    tag = "oidc"
)]
pub async fn auth_form(
    registry: Extension<Arc<Registry>>,
    Path(flow_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let submission = Submission {
        headers,
        body,
        session: None,
    };
    let payload = match submission.decode(None) {
        Ok(payload) => payload,
        Err(err) => return errorx::forward(&registry, &submission.headers, true, err).await,
    };
    let provider_id = payload
        .get("provider")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    debug!("Provider {provider_id} chosen for flow {flow_id}");
    start_or_handle(&registry, &submission.headers, flow_id, &provider_id, &payload, true).await
}

#[utoipa::path(
    get,
    path = "/self-service/methods/oidc/callback/{provider}",
    params(
        ("provider" = String, Path, description = "Provider id"),
        CallbackQuery,
    ),
    responses(
        (status = 302, description = "Flow completed or sent back to the UI"),
        (status = 400, description = "State mismatch", body = crate::ErrorResponse),
    ),
    tag = "oidc"
)]
#[instrument(skip_all, fields(provider = %provider_id))]
pub async fn callback(
    registry: Extension<Arc<Registry>>,
    Path(provider_id): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let secure = registry.config().secure_cookies();
    let auth = match (AuthState::from_headers(&headers), query.state.as_deref()) {
        (Some(auth), Some(state)) if auth.matches(state) => auth,
        _ => return Error::Provider(ProviderError::StateMismatch).into_response(),
    };

    let mut response = match registry.persister().get_flow(auth.kind, auth.flow_id).await {
        Ok(mut flow) => match complete(&registry, &headers, &mut flow, &provider_id, &query).await {
            Ok(response) => response,
            Err(err) => {
                error_handler::handle(&registry, &headers, flow, ID, err, &Value::Null).await
            }
        },
        Err(err) => errorx::forward(&registry, &headers, true, err).await,
    };
    if let Ok(clear) = AuthState::clear(secure) {
        append_cookies(&mut response, &[clear]);
    }
    response
}

async fn complete(
    registry: &Registry,
    headers: &HeaderMap,
    flow: &mut Flow,
    provider_id: &str,
    query: &CallbackQuery,
) -> Result<Response, Error> {
    let kind = flow.kind()?;
    flow.ensure_submittable(kind)?;
    if let Some(error) = &query.error {
        return Err(ProviderError::Exchange(
            query.error_description.clone().unwrap_or_else(|| error.clone()),
        )
        .into());
    }
    let code = query
        .code
        .as_deref()
        .ok_or_else(|| ProviderError::Exchange("no authorization code was returned".to_string()))?;
    let provider = lookup_provider(registry, provider_id)?;
    let claims = provider
        .claims(code, &redirect_uri(registry, provider_id))
        .await?;
    let session = registry.sessions().fetch(registry.persister(), headers).await?;

    let identifier = oidc_identifier(provider_id, &claims.sub);
    let existing = match registry
        .persister()
        .find_by_credentials_identifier(CredentialsType::Oidc, &identifier)
        .await
    {
        Ok((identity, credentials)) => Some((identity, credentials)),
        Err(Error::NotFound) => None,
        Err(err) => return Err(err),
    };

    flow.active = Some(ID.to_string());
    match (kind, existing) {
        (FlowKind::Login, Some((identity, credentials))) => {
            let config: OidcConfig = serde_json::from_value(credentials.config)
                .map_err(|_| Error::InvalidCredentials)?;
            let linked = config
                .providers
                .iter()
                .any(|link| link.provider == provider_id && link.subject == claims.sub);
            if !linked {
                return Err(Error::InvalidCredentials);
            }
            if let Some(current) = &session {
                if flow.forced && current.identity_id != identity.id {
                    return Err(Error::InvalidCredentials);
                }
            }
            info!("Identity {} signed in with {provider_id}", identity.id);
            post_login(registry, flow, identity, session.as_ref()).await
        }
        (FlowKind::Registration, Some(_)) => {
            crossover(registry, headers, flow, FlowKind::Login, provider_id).await
        }
        (FlowKind::Login, None) => {
            crossover(registry, headers, flow, FlowKind::Registration, provider_id).await
        }
        (FlowKind::Registration, None) => {
            register(registry, flow, provider, provider_id, &claims, identifier).await
        }
        (other, _) => Err(Error::BadRequest(format!(
            "sign in with a provider does not support {other} flows"
        ))),
    }
}

/// Continue with a fresh flow of `kind` and restart the provider round trip for it.
async fn crossover(
    registry: &Registry,
    headers: &HeaderMap,
    flow: &Flow,
    kind: FlowKind,
    provider_id: &str,
) -> Result<Response, Error> {
    let created = new_flow(
        registry,
        kind,
        FlowType::Browser,
        headers,
        registry
            .config()
            .public_url(&format!("/self-service/{kind}/browser")),
        FlowSeed {
            return_to: flow.return_to.clone(),
            ..FlowSeed::default()
        },
    )
    .await?;
    info!(
        "Continuing {} flow {} as {kind} flow {}",
        flow.kind()?,
        flow.id,
        created.flow.id
    );
    Ok(redirect(
        &auth_url(registry, provider_id, created.flow.id),
        &created.cookies,
    ))
}

async fn register(
    registry: &Registry,
    flow: &mut Flow,
    provider: &dyn Provider,
    provider_id: &str,
    claims: &Claims,
    identifier: String,
) -> Result<Response, Error> {
    let traits = map_claims(
        registry.loader(),
        provider_id,
        provider.config().mapper_url.as_deref(),
        claims,
    )
    .await?;
    let mut identity =
        Identity::new(registry.schemas().default_schema()?.id.clone()).with_traits(traits);
    identity.set_credentials(Credentials::new(
        CredentialsType::Oidc,
        vec![identifier],
        json!({ "providers": [{ "provider": provider_id, "subject": claims.sub }] }),
    ));
    validate_identity(registry.loader(), registry.schemas(), &mut identity).await?;
    info!("Registering identity {} via {provider_id}", identity.id);
    post_registration(registry, flow, identity).await
}
