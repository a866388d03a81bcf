//! Init and fetch endpoints of the four flow kinds.
//!
//! Browser inits answer with a redirect to the UI, API inits with the flow JSON.
//! The submit endpoints belong to the strategies.

use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, Uri},
    response::Response,
};
use std::sync::Arc;

use crate::{
    flow::{FlowKind, FlowType},
    registry::Registry,
    selfservice::init::{fetch, initialize, FetchQuery, InitQuery},
};

#[utoipa::path(
    get,
    path = "/self-service/login/browser",
    params(InitQuery),
    responses(
        (status = 302, description = "Redirect to the login UI carrying the new flow id"),
    ),
    tag = "login"
)]
pub async fn login_browser(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<InitQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    initialize(&registry, FlowKind::Login, FlowType::Browser, &headers, &uri, query).await
}

#[utoipa::path(
    get,
    path = "/self-service/login/api",
    params(InitQuery),
    responses(
        (status = 200, description = "A new login flow", body = crate::flow::Flow),
        (status = 400, description = "A session is already active", body = crate::ErrorResponse),
    ),
    tag = "login"
)]
pub async fn login_api(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<InitQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    initialize(&registry, FlowKind::Login, FlowType::Api, &headers, &uri, query).await
}

#[utoipa::path(
    get,
    path = "/self-service/login/flows",
    params(FetchQuery),
    responses(
        (status = 200, description = "The login flow", body = crate::flow::Flow),
        (status = 404, description = "Unknown flow", body = crate::ErrorResponse),
        (status = 410, description = "The flow expired", body = crate::ErrorResponse),
    ),
    tag = "login"
)]
pub async fn login_flow(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
) -> Response {
    fetch(&registry, FlowKind::Login, &headers, query).await
}

#[utoipa::path(
    get,
    path = "/self-service/registration/browser",
    params(InitQuery),
    responses(
        (status = 302, description = "Redirect to the registration UI carrying the new flow id"),
    ),
    tag = "registration"
)]
pub async fn registration_browser(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<InitQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    initialize(
        &registry,
        FlowKind::Registration,
        FlowType::Browser,
        &headers,
        &uri,
        query,
    )
    .await
}

#[utoipa::path(
    get,
    path = "/self-service/registration/api",
    params(InitQuery),
    responses(
        (status = 200, description = "A new registration flow", body = crate::flow::Flow),
        (status = 400, description = "A session is already active", body = crate::ErrorResponse),
    ),
    tag = "registration"
)]
pub async fn registration_api(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<InitQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    initialize(
        &registry,
        FlowKind::Registration,
        FlowType::Api,
        &headers,
        &uri,
        query,
    )
    .await
}

#[utoipa::path(
    get,
    path = "/self-service/registration/flows",
    params(FetchQuery),
    responses(
        (status = 200, description = "The registration flow", body = crate::flow::Flow),
        (status = 404, description = "Unknown flow", body = crate::ErrorResponse),
        (status = 410, description = "The flow expired", body = crate::ErrorResponse),
    ),
    tag = "registration"
)]
pub async fn registration_flow(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
) -> Response {
    fetch(&registry, FlowKind::Registration, &headers, query).await
}

#[utoipa::path(
    get,
    path = "/self-service/settings/browser",
    params(InitQuery),
    responses(
        (status = 302, description = "Redirect to the settings UI, or to login without a session"),
    ),
    tag = "settings"
)]
pub async fn settings_browser(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<InitQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    initialize(&registry, FlowKind::Settings, FlowType::Browser, &headers, &uri, query).await
}

#[utoipa::path(
    get,
    path = "/self-service/settings/api",
    params(InitQuery),
    responses(
        (status = 200, description = "A new settings flow", body = crate::flow::Flow),
        (status = 401, description = "No active session", body = crate::ErrorResponse),
    ),
    tag = "settings"
)]
pub async fn settings_api(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<InitQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    initialize(&registry, FlowKind::Settings, FlowType::Api, &headers, &uri, query).await
}

#[utoipa::path(
    get,
    path = "/self-service/settings/flows",
    params(FetchQuery),
    responses(
        (status = 200, description = "The settings flow", body = crate::flow::Flow),
        (status = 401, description = "No active session", body = crate::ErrorResponse),
        (status = 403, description = "The flow belongs to another identity", body = crate::ErrorResponse),
        (status = 404, description = "Unknown flow", body = crate::ErrorResponse),
    ),
    tag = "settings"
)]
pub async fn settings_flow(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
) -> Response {
    fetch(&registry, FlowKind::Settings, &headers, query).await
}

#[utoipa::path(
    get,
    path = "/self-service/recovery/browser",
    params(InitQuery),
    responses(
        (status = 302, description = "Redirect to the recovery UI carrying the new flow id"),
    ),
    tag = "recovery"
)]
pub async fn recovery_browser(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<InitQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    initialize(&registry, FlowKind::Recovery, FlowType::Browser, &headers, &uri, query).await
}

#[utoipa::path(
    get,
    path = "/self-service/recovery/api",
    params(InitQuery),
    responses(
        (status = 200, description = "A new recovery flow", body = crate::flow::Flow),
        (status = 400, description = "A session is already active", body = crate::ErrorResponse),
    ),
    tag = "recovery"
)]
pub async fn recovery_api(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<InitQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    initialize(&registry, FlowKind::Recovery, FlowType::Api, &headers, &uri, query).await
}

#[utoipa::path(
    get,
    path = "/self-service/recovery/flows",
    params(FetchQuery),
    responses(
        (status = 200, description = "The recovery flow", body = crate::flow::Flow),
        (status = 404, description = "Unknown flow", body = crate::ErrorResponse),
        (status = 410, description = "The flow expired", body = crate::ErrorResponse),
    ),
    tag = "recovery"
)]
pub async fn recovery_flow(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
) -> Response {
    fetch(&registry, FlowKind::Recovery, &headers, query).await
}

#[cfg(test)]
mod tests {
    use crate::test_support::{body_json, location, query_param, Harness, Jar};
    use axum::{body::Body, http::StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn browser_init_redirects_to_the_ui_and_sets_csrf() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let mut jar = Jar::default();
        let response = harness
            .router()
            .oneshot(jar.request("GET", "/self-service/login/browser").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        jar.store(&response);
        let target = location(&response)?;
        assert!(target.starts_with(harness.registry.config().ui().login.as_str()));
        let csrf = jar
            .get(crate::csrf::CSRF_COOKIE_NAME)
            .ok_or_else(|| anyhow::anyhow!("no csrf cookie"))?
            .to_string();

        let id = query_param(&target, "flow")?;
        let response = harness
            .router()
            .oneshot(
                jar.request("GET", &format!("/self-service/login/flows?id={id}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let flow = body_json(response).await?;
        assert_eq!(flow["type"], "browser");
        let fields = flow["methods"]["password"]["config"]["fields"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let token = fields
            .iter()
            .find(|field| field["name"] == "csrf_token")
            .map(|field| field["value"].clone());
        assert_eq!(token, Some(serde_json::Value::from(csrf)));
        Ok(())
    }

    #[tokio::test]
    async fn api_init_returns_the_flow() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let response = harness
            .router()
            .oneshot(
                Jar::default()
                    .request("GET", "/self-service/registration/api")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let flow = body_json(response).await?;
        assert_eq!(flow["type"], "api");
        let names: Vec<String> = flow["methods"]["password"]["config"]["fields"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|field| field["name"].as_str().map(str::to_string))
            .collect();
        assert!(names.contains(&"traits.email".to_string()));
        assert!(names.contains(&"password".to_string()));
        assert!(!names.contains(&"csrf_token".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_flows_are_not_found() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let response = harness
            .router()
            .oneshot(
                Jar::default()
                    .request(
                        "GET",
                        &format!("/self-service/recovery/flows?id={}", uuid::Uuid::new_v4()),
                    )
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn settings_without_session_sends_browsers_to_login() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let response = harness
            .router()
            .oneshot(
                Jar::default()
                    .request("GET", "/self-service/settings/browser")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response)?.contains("/self-service/login/browser?return_to="));

        let response = harness
            .router()
            .oneshot(
                Jar::default()
                    .request("GET", "/self-service/settings/api")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
