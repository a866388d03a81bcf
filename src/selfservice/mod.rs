//! Flow handlers shared by every flow kind: init, fetch, submit and error re-entry.

pub mod error_handler;
pub mod errorx;
pub mod init;
pub mod submit;

use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE, LOCATION, SET_COOKIE},
        HeaderMap, HeaderName, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use url::Url;
use uuid::Uuid;

use crate::{flow::FlowKind, registry::Registry, Error};

/// Append `key=value` to `url`, keeping any existing query.
#[must_use]
pub fn with_query(url: &str, key: &str, value: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair(key, value);
            parsed.to_string()
        }
        Err(_) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}{key}={value}")
        }
    }
}

/// The UI URL rendering the flow.
#[must_use]
pub fn flow_ui_url(registry: &Registry, kind: FlowKind, flow_id: Uuid) -> String {
    with_query(
        registry.config().ui_url(kind),
        "flow",
        &flow_id.to_string(),
    )
}

/// A `302 Found` to `location` carrying `cookies`.
#[must_use]
pub fn redirect(location: &str, cookies: &[HeaderValue]) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(LOCATION, value);
        }
        Err(err) => {
            error!("Invalid redirect location {location}: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    append_cookies(&mut response, cookies);
    response
}

#[must_use]
pub fn json<T: Serialize>(status: StatusCode, body: &T, cookies: &[HeaderValue]) -> Response {
    let mut response = (status, Json(body)).into_response();
    append_cookies(&mut response, cookies);
    response
}

pub fn append_cookies(response: &mut Response, cookies: &[HeaderValue]) {
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie.clone());
    }
}

/// Guess whether an error without a flow should be answered for a browser.
#[must_use]
pub fn is_browser_request(headers: &HeaderMap) -> bool {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase()
    };
    if header(CONTENT_TYPE).starts_with("application/json") {
        return false;
    }
    header(ACCEPT).contains("text/html")
        || header(CONTENT_TYPE).starts_with("application/x-www-form-urlencoded")
}

/// Validate a requested `return_to` against the configured allow list.
///
/// # Errors
/// Returns `BadRequest` for URLs outside the allow list.
pub fn checked_return_to(
    registry: &Registry,
    return_to: Option<&str>,
) -> Result<Option<String>, Error> {
    match return_to.map(str::trim).filter(|url| !url.is_empty()) {
        None => Ok(None),
        Some(url) if registry.config().is_allowed_return_url(url) => Ok(Some(url.to_string())),
        Some(url) => Err(Error::BadRequest(format!(
            "the requested return_to URL {url} is not allowed"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_query_parameters() {
        assert_eq!(
            with_query("https://ui.test/login", "flow", "abc"),
            "https://ui.test/login?flow=abc"
        );
        assert_eq!(
            with_query("https://ui.test/login?theme=dark", "flow", "abc"),
            "https://ui.test/login?theme=dark&flow=abc"
        );
        assert_eq!(with_query("/login", "flow", "abc"), "/login?flow=abc");
    }

    #[test]
    fn redirect_sets_location_and_cookies() {
        let response = redirect(
            "https://ui.test/login",
            &[HeaderValue::from_static("a=b"), HeaderValue::from_static("c=d")],
        );
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION),
            Some(&HeaderValue::from_static("https://ui.test/login"))
        );
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn guesses_browser_requests() {
        let mut headers = HeaderMap::new();
        assert!(!is_browser_request(&headers));
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,*/*"));
        assert!(is_browser_request(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_browser_request(&headers));
    }
}
