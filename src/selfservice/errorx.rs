//! Errors that cannot be shown inside a flow.
//!
//! Browsers are redirected to the error UI with the id of a stored error
//! container; API clients get the JSON error body directly.

use std::{sync::Arc, time::Duration};

use axum::{
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::time::interval;
use tracing::{error, info, warn};

use super::{redirect, with_query};
use crate::{cookie::read_cookie, csrf::CSRF_COOKIE_NAME, registry::Registry, Error};

/// Answer `err` outside of a flow.
pub async fn forward(
    registry: &Registry,
    headers: &HeaderMap,
    browser: bool,
    err: Error,
) -> Response {
    if !browser {
        return err.into_response();
    }
    if let Error::Internal(inner) = &err {
        error!("Internal error: {inner:#}");
    }
    let csrf = read_cookie(headers, CSRF_COOKIE_NAME).unwrap_or_default();
    let body = err.to_response_body();
    match registry
        .persister()
        .add_error(&csrf, json!([body.error]))
        .await
    {
        Ok(id) => redirect(
            &with_query(&registry.config().ui().error, "error", &id.to_string()),
            &[],
        ),
        Err(store_err) => {
            warn!("Failed to store error for the error UI: {store_err}");
            err.into_response()
        }
    }
}

/// Periodically delete stored errors older than the configured retention.
pub fn spawn_janitor(registry: Arc<Registry>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            match registry
                .persister()
                .clear_errors(registry.config().error_retention(), false)
                .await
            {
                Ok(0) => {}
                Ok(removed) => info!("Removed {removed} stored errors"),
                Err(err) => warn!("Failed to clear stored errors: {err}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::registry;
    use axum::http::{header::LOCATION, StatusCode};

    #[tokio::test]
    async fn browser_errors_are_stored_and_redirected() -> anyhow::Result<()> {
        let registry = registry().await?;
        let response = forward(&registry, &HeaderMap::new(), true, Error::FlowNotFound).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response
            .headers()
            .get(LOCATION)
            .ok_or_else(|| anyhow::anyhow!("missing location"))?
            .to_str()?
            .to_string();
        let id = location
            .split("error=")
            .nth(1)
            .ok_or_else(|| anyhow::anyhow!("missing error id"))?
            .parse()?;
        let stored = registry.persister().read_error(id).await?;
        assert_eq!(stored.errors[0]["code"], 404);
        Ok(())
    }

    #[tokio::test]
    async fn api_errors_are_returned_inline() -> anyhow::Result<()> {
        let registry = registry().await?;
        let response = forward(&registry, &HeaderMap::new(), false, Error::FlowNotFound).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }
}
