//! Identities, their credentials and the addresses recovery and verification use.

pub mod validation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

pub use validation::validate_identity;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsType {
    Password,
    Oidc,
    RecoveryToken,
}

impl CredentialsType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Oidc => "oidc",
            Self::RecoveryToken => "recovery_token",
        }
    }
}

impl fmt::Display for CredentialsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialsType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "password" => Ok(Self::Password),
            "oidc" => Ok(Self::Oidc),
            "recovery_token" => Ok(Self::RecoveryToken),
            other => Err(format!("unknown credentials type {other}")),
        }
    }
}

/// Credentials of one type; `config` is only interpreted by the owning strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "type")]
    pub kind: CredentialsType,
    pub identifiers: Vec<String>,
    pub config: Value,
}

impl Credentials {
    #[must_use]
    pub fn new(kind: CredentialsType, identifiers: Vec<String>, config: Value) -> Self {
        Self {
            kind,
            identifiers,
            config,
        }
    }
}

/// `config` of password credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordConfig {
    pub hashed_password: String,
}

/// `config` of OIDC credentials, one entry per linked provider account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcConfig {
    pub providers: Vec<OidcLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcLink {
    pub provider: String,
    pub subject: String,
}

impl OidcLink {
    /// The identifier indexing this link.
    #[must_use]
    pub fn identifier(&self) -> String {
        oidc_identifier(&self.provider, &self.subject)
    }
}

#[must_use]
pub fn oidc_identifier(provider: &str, subject: &str) -> String {
    format!("{provider}:{subject}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Email,
}

impl AddressType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
        }
    }
}

impl FromStr for AddressType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "email" => Ok(Self::Email),
            other => Err(format!("unsupported address type {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecoveryAddress {
    pub id: Uuid,
    #[serde(skip)]
    pub identity_id: Uuid,
    pub via: AddressType,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VerifiableAddress {
    pub id: Uuid,
    #[serde(skip)]
    pub identity_id: Uuid,
    pub via: AddressType,
    pub value: String,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub status: VerificationStatus,
}

/// An identity. Credentials never leave the process through serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub id: Uuid,
    pub schema_id: String,
    #[schema(value_type = Object)]
    pub traits: Value,
    #[serde(skip)]
    pub credentials: BTreeMap<CredentialsType, Credentials>,
    pub recovery_addresses: Vec<RecoveryAddress>,
    pub verifiable_addresses: Vec<VerifiableAddress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    #[must_use]
    pub fn new(schema_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            schema_id: schema_id.into(),
            traits: Value::Object(serde_json::Map::new()),
            credentials: BTreeMap::new(),
            recovery_addresses: Vec::new(),
            verifiable_addresses: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_traits(mut self, traits: Value) -> Self {
        self.traits = traits;
        self
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials.insert(credentials.kind, credentials);
    }

    #[must_use]
    pub fn get_credentials(&self, kind: CredentialsType) -> Option<&Credentials> {
        self.credentials.get(&kind)
    }

    /// Decode the strategy specific config of `kind`.
    #[must_use]
    pub fn credentials_config<T: serde::de::DeserializeOwned>(
        &self,
        kind: CredentialsType,
    ) -> Option<T> {
        self.get_credentials(kind)
            .and_then(|credentials| serde_json::from_value(credentials.config.clone()).ok())
    }

    /// A copy without credentials, suitable for read-only pools.
    #[must_use]
    pub fn without_credentials(&self) -> Self {
        Self {
            credentials: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// The first password identifier, used to prefill re-authentication forms.
    #[must_use]
    pub fn first_identifier(&self) -> Option<&str> {
        self.get_credentials(CredentialsType::Password)
            .and_then(|credentials| credentials.identifiers.first())
            .map(String::as_str)
    }
}
