//! The flow envelope shared by login, registration, settings and recovery.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    form::{message::Message, HtmlForm},
    Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Login,
    Registration,
    Settings,
    Recovery,
}

impl FlowKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Registration => "registration",
            Self::Settings => "settings",
            Self::Recovery => "recovery",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "login" => Ok(Self::Login),
            "registration" => Ok(Self::Registration),
            "settings" => Ok(Self::Settings),
            "recovery" => Ok(Self::Recovery),
            other => Err(format!("unknown flow kind {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Browser,
    Api,
}

impl FlowType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Api => "api",
        }
    }

    #[must_use]
    pub fn is_browser(self) -> bool {
        self == Self::Browser
    }
}

impl FromStr for FlowType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "browser" => Ok(Self::Browser),
            "api" => Ok(Self::Api),
            other => Err(format!("unknown flow type {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    ChooseMethod,
    EmailSent,
    PassedChallenge,
    ShowForm,
    Success,
}

impl FlowState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChooseMethod => "choose_method",
            Self::EmailSent => "email_sent",
            Self::PassedChallenge => "passed_challenge",
            Self::ShowForm => "show_form",
            Self::Success => "success",
        }
    }
}

impl FromStr for FlowState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "choose_method" => Ok(Self::ChooseMethod),
            "email_sent" => Ok(Self::EmailSent),
            "passed_challenge" => Ok(Self::PassedChallenge),
            "show_form" => Ok(Self::ShowForm),
            "success" => Ok(Self::Success),
            other => Err(format!("unknown flow state {other}")),
        }
    }
}

/// A link offered by the OIDC method for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderLink {
    pub provider: String,
    pub url: String,
}

/// The form a strategy contributes plus its strategy specific extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MethodConfig {
    #[serde(flatten)]
    pub form: HtmlForm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderLink>>,
}

impl MethodConfig {
    #[must_use]
    pub fn new(form: HtmlForm) -> Self {
        Self {
            form,
            providers: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FlowMethod {
    pub method: String,
    pub config: MethodConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Flow {
    pub id: Uuid,
    #[serde(skip)]
    pub kind: Option<FlowKind>,
    #[serde(rename = "type")]
    pub flow_type: FlowType,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub request_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
    pub methods: BTreeMap<String, FlowMethod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<FlowState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_identity_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
    /// Incremented by every successful update.
    #[serde(skip)]
    pub revision: i64,
    #[serde(skip)]
    pub completed: bool,
}

impl Flow {
    #[must_use]
    pub fn new(
        kind: FlowKind,
        flow_type: FlowType,
        lifespan: Duration,
        request_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let state = match kind {
            FlowKind::Recovery => Some(FlowState::ChooseMethod),
            FlowKind::Settings => Some(FlowState::ShowForm),
            FlowKind::Login | FlowKind::Registration => None,
        };
        Self {
            id: Uuid::new_v4(),
            kind: Some(kind),
            flow_type,
            issued_at: now,
            expires_at: now + lifespan,
            request_url: request_url.into(),
            active: None,
            methods: BTreeMap::new(),
            messages: Vec::new(),
            forced: false,
            identity_id: None,
            state,
            recovered_identity_id: None,
            return_to: None,
            revision: 0,
            completed: false,
        }
    }

    /// # Errors
    /// Returns an internal error if the kind was never assigned.
    pub fn kind(&self) -> Result<FlowKind, Error> {
        self.kind
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("flow {} has no kind", self.id)))
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// A flow may only advance while it has not expired.
    ///
    /// # Errors
    /// Returns `FlowExpired`.
    pub fn valid(&self) -> Result<(), Error> {
        if self.is_expired() {
            return Err(Error::FlowExpired {
                expired_at: self.expires_at,
            });
        }
        Ok(())
    }

    /// # Errors
    /// Returns `FlowNotFound` when the flow belongs to another kind.
    pub fn ensure_kind(&self, kind: FlowKind) -> Result<(), Error> {
        if self.kind == Some(kind) {
            Ok(())
        } else {
            Err(Error::FlowNotFound)
        }
    }

    /// # Errors
    /// Returns `FlowOwnership` unless `identity_id` created this flow.
    pub fn ensure_owner(&self, identity_id: Uuid) -> Result<(), Error> {
        if self.identity_id == Some(identity_id) {
            Ok(())
        } else {
            Err(Error::FlowOwnership)
        }
    }

    /// Everything a submit needs: right kind, not expired, not already completed.
    ///
    /// # Errors
    /// Returns the first failed check.
    pub fn ensure_submittable(&self, kind: FlowKind) -> Result<(), Error> {
        self.ensure_kind(kind)?;
        self.valid()?;
        if self.completed {
            return Err(Error::FlowCompleted);
        }
        Ok(())
    }

    pub fn set_method(&mut self, method: &str, config: MethodConfig) {
        self.methods.insert(
            method.to_string(),
            FlowMethod {
                method: method.to_string(),
                config,
            },
        );
    }

    #[must_use]
    pub fn method(&self, method: &str) -> Option<&FlowMethod> {
        self.methods.get(method)
    }

    pub fn form_mut(&mut self, method: &str) -> Option<&mut HtmlForm> {
        self.methods
            .get_mut(method)
            .map(|method| &mut method.config.form)
    }

    /// Refresh the CSRF field of every browser form.
    pub fn set_csrf(&mut self, token: &str) {
        if !self.flow_type.is_browser() {
            return;
        }
        for method in self.methods.values_mut() {
            method.config.form.set_csrf(token);
        }
    }
}
