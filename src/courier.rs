//! Outbound email.
//!
//! The core only knows templates by name; rendering and delivery belong to the
//! `Courier` implementation. `LogCourier` is the local development default and
//! `MemoryCourier` keeps an outbox that tests can inspect.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::info;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// A recovery link for a known address.
    RecoveryValid,
    /// "Someone tried to recover an account at this address."
    RecoveryInvalid,
    VerificationValid,
}

impl Template {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecoveryValid => "recovery_valid",
            Self::RecoveryInvalid => "recovery_invalid",
            Self::VerificationValid => "verification_valid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub template: Template,
    pub data: Value,
}

impl EmailMessage {
    #[must_use]
    pub fn recovery_valid(to: &str, link: &str, ttl_minutes: i64) -> Self {
        Self {
            to: to.to_string(),
            template: Template::RecoveryValid,
            data: json!({ "to": to, "recovery_url": link, "ttl_minutes": ttl_minutes }),
        }
    }

    #[must_use]
    pub fn recovery_invalid(to: &str) -> Self {
        Self {
            to: to.to_string(),
            template: Template::RecoveryInvalid,
            data: json!({ "to": to }),
        }
    }

    #[must_use]
    pub fn verification_valid(to: &str, link: &str) -> Self {
        Self {
            to: to.to_string(),
            template: Template::VerificationValid,
            data: json!({ "to": to, "verification_url": link }),
        }
    }

    /// The first link carried by the message, if any.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.data
            .get("recovery_url")
            .or_else(|| self.data.get("verification_url"))
            .and_then(Value::as_str)
    }
}

#[async_trait]
pub trait Courier: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), Error>;
}

#[derive(Debug, Clone, Default)]
pub struct LogCourier;

#[async_trait]
impl Courier for LogCourier {
    async fn send(&self, message: EmailMessage) -> Result<(), Error> {
        info!(
            to = %message.to,
            template = message.template.as_str(),
            data = %message.data,
            "courier send stub"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCourier {
    outbox: Mutex<Vec<EmailMessage>>,
}

impl MemoryCourier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<EmailMessage> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn last_to(&self, to: &str) -> Option<EmailMessage> {
        self.messages()
            .into_iter()
            .rev()
            .find(|message| message.to == to)
    }
}

#[async_trait]
impl Courier for MemoryCourier {
    async fn send(&self, message: EmailMessage) -> Result<(), Error> {
        self.outbox
            .lock()
            .map_err(|_| Error::Internal(anyhow::anyhow!("courier outbox lock poisoned")))?
            .push(message);
        Ok(())
    }
}
