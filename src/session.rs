//! Sessions: opaque tokens handed to the user agent, SHA-256 digests at rest.

use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    cookie::{read_cookie, CookieSpec},
    identity::Identity,
    persistence::Persister,
    token::{generate_opaque_token, hash_token},
    Error,
};

pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: Uuid,
    #[serde(skip)]
    pub token_hash: String,
    pub identity_id: Uuid,
    pub active: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub authenticated_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active && self.expires_at > Utc::now()
    }

    /// Authenticated recently enough to change credentials.
    #[must_use]
    pub fn is_privileged(&self, max_age: Duration) -> bool {
        self.authenticated_at + max_age > Utc::now()
    }
}

/// A freshly created session and the raw token, which is never stored.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: Session,
    pub token: String,
}

/// The body of `GET /sessions/whoami`, also returned when API flows issue a session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: Session,
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionManager {
    cookie_name: String,
    secure: bool,
    lifespan: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(cookie_name: impl Into<String>, secure: bool, lifespan: Duration) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            secure,
            lifespan,
        }
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn cookie_spec(&self) -> CookieSpec<'_> {
        CookieSpec::new(&self.cookie_name, self.secure)
    }

    /// Persist a new session for `identity_id`.
    ///
    /// # Errors
    /// Returns an error if the token cannot be generated or stored.
    pub async fn issue(
        &self,
        persister: &dyn Persister,
        identity_id: Uuid,
    ) -> Result<IssuedSession, Error> {
        let token = generate_opaque_token()?;
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            token_hash: hash_token(&token),
            identity_id,
            active: true,
            issued_at: now,
            expires_at: now + self.lifespan,
            authenticated_at: now,
        };
        persister.create_session(&session).await?;
        Ok(IssuedSession { session, token })
    }

    /// # Errors
    /// Returns an internal error if the token is not a valid header value.
    pub fn cookie(&self, token: &str) -> Result<HeaderValue, Error> {
        self.cookie_spec().set(token, self.lifespan.num_seconds())
    }

    /// # Errors
    /// Returns an internal error if the cookie name is not a valid header value.
    pub fn clear_cookie(&self) -> Result<HeaderValue, Error> {
        self.cookie_spec().clear()
    }

    /// The session token from a bearer header, the session token header or the session cookie.
    #[must_use]
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        bearer_token(headers)
            .or_else(|| {
                headers
                    .get(SESSION_TOKEN_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
            .or_else(|| read_cookie(headers, &self.cookie_name))
    }

    /// The active session of the request, if any.
    ///
    /// # Errors
    /// Returns an error only when the persister fails.
    pub async fn fetch(
        &self,
        persister: &dyn Persister,
        headers: &HeaderMap,
    ) -> Result<Option<Session>, Error> {
        let Some(token) = self.token_from_headers(headers) else {
            return Ok(None);
        };
        match persister.get_session(&hash_token(&token)).await {
            Ok(session) if session.is_active() => Ok(Some(session)),
            Ok(_) | Err(Error::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// # Errors
    /// Returns `NoActiveSession` when the request carries no active session.
    pub async fn require(
        &self,
        persister: &dyn Persister,
        headers: &HeaderMap,
    ) -> Result<Session, Error> {
        self.fetch(persister, headers)
            .await?
            .ok_or(Error::NoActiveSession)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
