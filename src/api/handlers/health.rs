//! Probe endpoints.
//!
//! - `/health/alive`: process liveness only
//! - `/health/ready`: persister-aware readiness with a JSON status body

use crate::{registry::Registry, GIT_COMMIT_HASH};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, warn};
use utoipa::ToSchema;

const READY_PING_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path = "/health/alive",
    responses(
        (status = 200, description = "Process is alive")
    ),
    tag = "health",
)]
/// Report process liveness without checking the persister.
pub async fn alive() -> impl IntoResponse {
    StatusCode::OK
}

#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "The persister is reachable", body = Health),
        (status = 503, description = "The persister is not reachable", body = Health)
    ),
    tag = "health",
)]
/// Report readiness based on persister connectivity.
pub async fn ready(registry: Extension<Arc<Registry>>) -> impl IntoResponse {
    let healthy = match timeout(
        Duration::from_secs(READY_PING_TIMEOUT_SECONDS),
        registry.persister().ping(),
    )
    .await
    {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("Persister ping failed: {err}");
            false
        }
        Err(_) => {
            warn!("Persister ping timed out");
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if healthy { "ok" } else { "error" }.to_string(),
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .unwrap_or_else(|err| {
            debug!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        });

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, headers, Json(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{body_json, Harness};
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn alive_is_always_ok() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let response = harness
            .router()
            .oneshot(Request::builder().uri("/health/alive").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn ready_reports_the_persister() -> anyhow::Result<()> {
        let harness = Harness::new().await?;
        let response = harness
            .router()
            .oneshot(Request::builder().uri("/health/ready").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let x_app = response
            .headers()
            .get("X-App")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(x_app.starts_with(&format!(
            "{}:{}:",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )));
        let body = body_json(response).await?;
        assert_eq!(body["database"], "ok");
        assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
        Ok(())
    }
}
