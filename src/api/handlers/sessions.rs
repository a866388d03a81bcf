use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    registry::Registry,
    selfservice::redirect,
    session::SessionResponse,
    token::hash_token,
    Error,
};

#[utoipa::path(
    get,
    path = "/sessions/whoami",
    responses(
        (status = 200, description = "The active session and its identity", body = SessionResponse),
        (status = 401, description = "No active session", body = crate::ErrorResponse),
    ),
    tag = "sessions"
)]
/// Resolve the session carried by the cookie, a bearer token or `X-Session-Token`.
pub async fn whoami(registry: Extension<Arc<Registry>>, headers: HeaderMap) -> Response {
    match current(&registry, &headers).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn current(registry: &Registry, headers: &HeaderMap) -> Result<SessionResponse, Error> {
    let session = registry
        .sessions()
        .require(registry.persister(), headers)
        .await?;
    let identity = match registry.persister().get_identity(session.identity_id).await {
        Ok(identity) => identity,
        // A session outliving its identity is not a session.
        Err(Error::NotFound) => return Err(Error::NoActiveSession),
        Err(err) => return Err(err),
    };
    Ok(SessionResponse {
        session,
        identity,
        session_token: None,
    })
}

#[utoipa::path(
    get,
    path = "/self-service/logout/browser",
    responses(
        (status = 302, description = "Session revoked, redirect to the default return URL"),
    ),
    tag = "sessions"
)]
/// End the browser session and clear its cookie.
pub async fn logout_browser(registry: Extension<Arc<Registry>>, headers: HeaderMap) -> Response {
    let sessions = registry.sessions();
    if let Some(token) = sessions.token_from_headers(&headers) {
        match registry.persister().delete_session(&hash_token(&token)).await {
            Ok(()) => info!("Session logged out"),
            Err(Error::NotFound) => debug!("Logout without a known session"),
            Err(err) => return err.into_response(),
        }
    }
    let cookies = match sessions.clear_cookie() {
        Ok(cookie) => vec![cookie],
        Err(err) => return err.into_response(),
    };
    redirect(registry.config().default_return_url(), &cookies)
}

#[cfg(test)]
mod tests {
    use crate::test_support::{body_json, location, Harness, Jar};
    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn whoami_accepts_bearer_tokens() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let identity = harness
            .create_password_identity("who@example.com", "an unguessable phrase")
            .await?;
        let issued = harness.issue_session(&identity).await?;

        let response = harness
            .router()
            .oneshot(
                Jar::default()
                    .request("GET", "/sessions/whoami")
                    .header(AUTHORIZATION, format!("Bearer {}", issued.token))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await?;
        assert_eq!(body["identity"]["id"], identity.id.to_string());
        assert_eq!(body["identity"]["traits"]["email"], "who@example.com");
        assert!(body["identity"].get("credentials").is_none());
        assert_eq!(body["active"], true);

        let response = harness
            .router()
            .oneshot(Jar::default().request("GET", "/sessions/whoami").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn logout_revokes_the_cookie_session() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let identity = harness
            .create_password_identity("bye@example.com", "an unguessable phrase")
            .await?;
        let issued = harness.issue_session(&identity).await?;
        let cookie = harness.registry.sessions().cookie(&issued.token)?;
        let mut jar = Jar::default();
        let mut seed = axum::response::Response::new(Body::empty());
        seed.headers_mut().append(axum::http::header::SET_COOKIE, cookie);
        jar.store(&seed);

        let response = harness
            .router()
            .oneshot(jar.request("GET", "/self-service/logout/browser").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response)?, harness.registry.config().default_return_url());

        let response = harness
            .router()
            .oneshot(jar.request("GET", "/sessions/whoami").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
