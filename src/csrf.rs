//! Double-submit CSRF protection for browser flows.

use axum::http::{HeaderMap, HeaderValue};
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::{
    cookie::{read_cookie, CookieSpec},
    flow::FlowType,
    form::CSRF_FIELD,
    token::generate_opaque_token,
    Error,
};

pub const CSRF_COOKIE_NAME: &str = "keygate_csrf";
const CSRF_COOKIE_MAX_AGE: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct CsrfManager {
    secure: bool,
}

/// The token for this request and, when freshly minted, the cookie that carries it.
#[derive(Debug, Clone)]
pub struct CsrfToken {
    pub token: String,
    pub set_cookie: Option<HeaderValue>,
}

impl CsrfManager {
    #[must_use]
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    fn spec(&self) -> CookieSpec<'static> {
        CookieSpec::new(CSRF_COOKIE_NAME, self.secure)
    }

    /// Reuse the request's CSRF cookie or mint a new token.
    ///
    /// # Errors
    /// Returns an error if a new token cannot be generated.
    pub fn token_for(&self, headers: &HeaderMap) -> Result<CsrfToken, Error> {
        if let Some(token) = read_cookie(headers, CSRF_COOKIE_NAME) {
            return Ok(CsrfToken {
                token,
                set_cookie: None,
            });
        }
        let token = generate_opaque_token()?;
        let set_cookie = Some(self.spec().set(&token, CSRF_COOKIE_MAX_AGE)?);
        Ok(CsrfToken { token, set_cookie })
    }

    /// Compare the submitted `csrf_token` with the cookie. API flows are exempt.
    ///
    /// # Errors
    /// Returns `CsrfTokenInvalid` on a missing or mismatching token.
    pub fn validate(
        &self,
        flow_type: FlowType,
        headers: &HeaderMap,
        payload: &Value,
    ) -> Result<(), Error> {
        if !flow_type.is_browser() {
            return Ok(());
        }
        let submitted = payload.get(CSRF_FIELD).and_then(Value::as_str);
        let expected = read_cookie(headers, CSRF_COOKIE_NAME);
        match (submitted, expected) {
            (Some(submitted), Some(expected))
                if bool::from(submitted.as_bytes().ct_eq(expected.as_bytes())) =>
            {
                Ok(())
            }
            _ => Err(Error::CsrfTokenInvalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;
    use serde_json::json;

    #[test]
    fn mints_once_then_reuses_cookie() -> anyhow::Result<()> {
        let manager = CsrfManager::new(true);
        let minted = manager.token_for(&HeaderMap::new())?;
        let cookie = minted
            .set_cookie
            .ok_or_else(|| anyhow::anyhow!("expected a cookie"))?;
        assert!(cookie.to_str()?.starts_with("keygate_csrf="));
        assert!(cookie.to_str()?.ends_with("; Secure"));

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{CSRF_COOKIE_NAME}={}", minted.token))?,
        );
        let reused = manager.token_for(&headers)?;
        assert_eq!(reused.token, minted.token);
        assert!(reused.set_cookie.is_none());
        Ok(())
    }

    #[test]
    fn validates_browser_submissions_only() -> anyhow::Result<()> {
        let manager = CsrfManager::new(false);
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("keygate_csrf=abc"));

        assert!(manager
            .validate(FlowType::Browser, &headers, &json!({ "csrf_token": "abc" }))
            .is_ok());
        assert!(matches!(
            manager.validate(FlowType::Browser, &headers, &json!({ "csrf_token": "abd" })),
            Err(Error::CsrfTokenInvalid)
        ));
        assert!(matches!(
            manager.validate(FlowType::Browser, &headers, &json!({ "csrf_token": "abcd" })),
            Err(Error::CsrfTokenInvalid)
        ));
        assert!(matches!(
            manager.validate(FlowType::Browser, &headers, &json!({ "csrf_token": "" })),
            Err(Error::CsrfTokenInvalid)
        ));
        assert!(matches!(
            manager.validate(FlowType::Browser, &HeaderMap::new(), &json!({ "csrf_token": "abc" })),
            Err(Error::CsrfTokenInvalid)
        ));
        assert!(manager
            .validate(FlowType::Api, &HeaderMap::new(), &json!({}))
            .is_ok());
        Ok(())
    }
}
