//! Pauses a flow across a re-authentication detour and resumes it afterwards.
//!
//! The paused state lives server side in a container; the user agent only
//! carries the container id in a cookie. Resuming takes the container
//! atomically, so every pause resumes at most once. A container presented for
//! the wrong name or identity is put back untouched.

use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    cookie::{read_cookie, CookieSpec},
    persistence::Persister,
    Error,
};

pub const CONTINUITY_COOKIE_NAME: &str = "keygate_continuity";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityContainer {
    pub id: Uuid,
    pub name: String,
    pub identity_id: Option<Uuid>,
    pub payload: Value,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ContinuityManager {
    secure: bool,
    lifespan: Duration,
}

impl ContinuityManager {
    #[must_use]
    pub fn new(secure: bool, lifespan: Duration) -> Self {
        Self { secure, lifespan }
    }

    fn spec(&self) -> CookieSpec<'static> {
        CookieSpec::new(CONTINUITY_COOKIE_NAME, self.secure)
    }

    /// Store `payload` under `name` and return the cookie pointing at it.
    ///
    /// # Errors
    /// Returns an error if the container cannot be stored.
    pub async fn pause(
        &self,
        persister: &dyn Persister,
        name: &str,
        identity_id: Option<Uuid>,
        payload: Value,
    ) -> Result<HeaderValue, Error> {
        let container = ContinuityContainer {
            id: Uuid::new_v4(),
            name: name.to_string(),
            identity_id,
            payload,
            expires_at: Utc::now() + self.lifespan,
        };
        persister.save_continuity(&container).await?;
        self.spec()
            .set(&container.id.to_string(), self.lifespan.num_seconds())
    }

    /// Take the container referenced by the request cookie.
    ///
    /// # Errors
    /// Returns `NotFound` when there is no container, it expired, or it belongs to
    /// another name or identity. Containers of another name or identity stay
    /// resumable.
    pub async fn resume(
        &self,
        persister: &dyn Persister,
        headers: &HeaderMap,
        name: &str,
        identity_id: Option<Uuid>,
    ) -> Result<Value, Error> {
        let id = read_cookie(headers, CONTINUITY_COOKIE_NAME)
            .and_then(|value| Uuid::parse_str(&value).ok())
            .ok_or(Error::NotFound)?;
        let container = persister.take_continuity(id).await?;
        if container.expires_at < Utc::now() {
            return Err(Error::NotFound);
        }
        if container.name != name || container.identity_id != identity_id {
            persister.save_continuity(&container).await?;
            return Err(Error::NotFound);
        }
        Ok(container.payload)
    }

    /// # Errors
    /// Returns an internal error if the cookie cannot be built.
    pub fn clear_cookie(&self) -> Result<HeaderValue, Error> {
        self.spec().clear()
    }
}
