//! User facing messages attached to forms, fields and flows.
//!
//! Ids are stable so UIs can translate them; the text is the English default.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: u32,
    pub text: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub context: Option<Value>,
}

impl Message {
    fn new(id: u32, message_type: MessageType, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            message_type,
            context: None,
        }
    }

    #[must_use]
    fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn validation(text: impl Into<String>) -> Self {
        Self::new(4_000_001, MessageType::Error, text)
    }

    pub fn missing_property(property: &str) -> Self {
        Self::new(
            4_000_002,
            MessageType::Error,
            format!("Property {property} is missing."),
        )
        .with_context(json!({ "property": property }))
    }

    pub fn password_policy(reason: &str) -> Self {
        Self::new(
            4_000_005,
            MessageType::Error,
            format!("The password can not be used because {reason}."),
        )
        .with_context(json!({ "reason": reason }))
    }

    pub fn invalid_credentials() -> Self {
        Self::new(
            4_000_006,
            MessageType::Error,
            "The provided credentials are invalid, check for spelling mistakes in your password or username, email address, or phone number.",
        )
    }

    pub fn duplicate_identifier() -> Self {
        Self::new(
            4_000_007,
            MessageType::Error,
            "An account with the same identifier (email, phone, username, ...) exists already.",
        )
    }

    pub fn bad_request(reason: &str) -> Self {
        Self::new(
            4_000_008,
            MessageType::Error,
            format!("The request could not be processed: {reason}."),
        )
        .with_context(json!({ "reason": reason }))
    }

    pub fn csrf_retry() -> Self {
        Self::new(
            4_000_010,
            MessageType::Error,
            "The request was rejected to protect you from Cross-Site-Request-Forgery, please retry.",
        )
    }

    pub fn provider(text: impl Into<String>) -> Self {
        Self::new(4_000_011, MessageType::Error, text)
    }

    pub fn flow_expired(kind: &str) -> Self {
        Self::new(
            4_010_001,
            MessageType::Error,
            format!("The {kind} flow expired, please retry."),
        )
    }

    pub fn privileged_session_required() -> Self {
        Self::new(
            4_050_001,
            MessageType::Error,
            "Please sign in again to confirm this change.",
        )
    }

    pub fn recovery_token_invalid() -> Self {
        Self::new(
            4_060_004,
            MessageType::Error,
            "The recovery link is invalid or has already been used, please retry the flow.",
        )
    }

    pub fn refresh_login() -> Self {
        Self::new(
            1_010_003,
            MessageType::Info,
            "Please confirm this action by verifying that it is you.",
        )
    }

    pub fn settings_saved() -> Self {
        Self::new(1_050_001, MessageType::Info, "Your changes have been saved!")
    }

    pub fn recovery_email_sent() -> Self {
        Self::new(
            1_060_002,
            MessageType::Info,
            "An email containing a recovery link has been sent to the email address you provided.",
        )
    }

    pub fn recovery_succeeded(minutes: i64) -> Self {
        Self::new(
            1_060_001,
            MessageType::Info,
            format!(
                "You successfully recovered your account. Please change your password or set up an alternative login method (e.g. social sign in) within the next {minutes} minutes."
            ),
        )
        .with_context(json!({ "privileged_session_expires_in_minutes": minutes }))
    }
}
