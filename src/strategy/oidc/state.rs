//! The `oidc_session` cookie binding a provider round trip to one user agent.

use axum::http::{HeaderMap, HeaderValue};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{
    cookie::{read_cookie, CookieSpec},
    flow::FlowKind,
    token::generate_opaque_token,
    Error,
};

pub const STATE_COOKIE_NAME: &str = "oidc_session";
pub const CALLBACK_PATH: &str = "/self-service/methods/oidc/callback";
const STATE_COOKIE_MAX_AGE: i64 = 600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub state: String,
    pub flow_id: Uuid,
    pub kind: FlowKind,
}

impl AuthState {
    /// # Errors
    /// Returns an error if no random state can be generated.
    pub fn new(flow_id: Uuid, kind: FlowKind) -> Result<Self, Error> {
        Ok(Self {
            state: generate_opaque_token()?,
            flow_id,
            kind,
        })
    }

    fn spec(secure: bool) -> CookieSpec<'static> {
        CookieSpec::new(STATE_COOKIE_NAME, secure).with_path(CALLBACK_PATH)
    }

    /// # Errors
    /// Returns an internal error if the state cannot be encoded.
    pub fn cookie(&self, secure: bool) -> Result<HeaderValue, Error> {
        let json = serde_json::to_vec(self).map_err(anyhow::Error::from)?;
        Self::spec(secure).set(&URL_SAFE_NO_PAD.encode(json), STATE_COOKIE_MAX_AGE)
    }

    /// The state carried by the request, if it decodes.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let raw = read_cookie(headers, STATE_COOKIE_NAME)?;
        let bytes = URL_SAFE_NO_PAD.decode(raw.as_bytes()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// # Errors
    /// Returns an internal error if the cookie cannot be built.
    pub fn clear(secure: bool) -> Result<HeaderValue, Error> {
        Self::spec(secure).clear()
    }

    #[must_use]
    pub fn matches(&self, state: &str) -> bool {
        self.state.as_bytes().ct_eq(state.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    #[test]
    fn survives_the_cookie_round_trip() -> anyhow::Result<()> {
        let auth = AuthState::new(Uuid::new_v4(), FlowKind::Registration)?;
        let cookie = auth.cookie(true)?;
        let cookie = cookie.to_str()?;
        assert!(cookie.contains("Path=/self-service/methods/oidc/callback"));

        let pair = cookie
            .split(';')
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty cookie"))?;
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(pair)?);
        let decoded =
            AuthState::from_headers(&headers).ok_or_else(|| anyhow::anyhow!("state lost"))?;
        assert_eq!(decoded, auth);
        assert!(decoded.matches(&auth.state));
        assert!(!decoded.matches("forged"));
        assert!(!decoded.matches(&format!("{}x", auth.state)));
        assert!(!decoded.matches(""));
        Ok(())
    }

    #[test]
    fn garbage_cookies_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("oidc_session=%%%"));
        assert!(AuthState::from_headers(&headers).is_none());
    }
}
