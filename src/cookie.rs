//! Hand-built `Set-Cookie` values and `Cookie` header lookup.

use axum::http::{header::COOKIE, HeaderMap, HeaderValue};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSpec<'a> {
    pub name: &'a str,
    pub path: &'a str,
    pub secure: bool,
    pub http_only: bool,
}

impl<'a> CookieSpec<'a> {
    #[must_use]
    pub fn new(name: &'a str, secure: bool) -> Self {
        Self {
            name,
            path: "/",
            secure,
            http_only: true,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: &'a str) -> Self {
        self.path = path;
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// # Errors
    /// Returns an internal error if `value` is not a valid header value.
    pub fn set(&self, value: &str, max_age_seconds: i64) -> Result<HeaderValue, Error> {
        let mut cookie = format!(
            "{}={value}; Path={}; SameSite=Lax; Max-Age={max_age_seconds}",
            self.name, self.path
        );
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
            .map_err(|err| Error::Internal(anyhow::anyhow!("invalid cookie value: {err}")))
    }

    /// # Errors
    /// Returns an internal error if the cookie name is not a valid header value.
    pub fn clear(&self) -> Result<HeaderValue, Error> {
        self.set("", 0)
    }
}

/// Read cookie `name` from every `Cookie` header of the request.
#[must_use]
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
