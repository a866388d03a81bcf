//! Persistence ports and their in-memory and Postgres implementations.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    continuity::ContinuityContainer,
    flow::{Flow, FlowKind},
    identity::{AddressType, Credentials, CredentialsType, Identity, RecoveryAddress},
    session::Session,
    Error,
};

pub use memory::MemoryPersister;
pub use sql::SqlPersister;

/// A single-use recovery token. Only the SHA-256 digest of the emailed token is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryToken {
    pub id: Uuid,
    pub token_hash: String,
    pub recovery_address_id: Uuid,
    pub identity_id: Uuid,
    pub flow_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A single-use token confirming control over a verifiable address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationToken {
    pub id: Uuid,
    pub token_hash: String,
    pub verifiable_address_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A stored error shown by the error UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorContainer {
    pub id: Uuid,
    #[schema(value_type = Object)]
    pub errors: Value,
    #[serde(skip)]
    pub csrf_token: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait FlowPersister: Send + Sync {
    async fn create_flow(&self, flow: &Flow) -> Result<(), Error>;

    /// # Errors
    /// `FlowNotFound` when no flow of `kind` has this id.
    async fn get_flow(&self, kind: FlowKind, id: Uuid) -> Result<Flow, Error>;

    /// Compare-and-swap on `flow.revision`; bumps the revision on success.
    ///
    /// # Errors
    /// `StaleRevision` when another update won.
    async fn update_flow(&self, flow: &mut Flow) -> Result<(), Error>;

    async fn force_expire_flow(&self, id: Uuid) -> Result<(), Error>;
}

#[async_trait]
pub trait IdentityPool: Send + Sync {
    /// The identity and its credentials of `kind` indexed by `identifier` (lowercased).
    async fn find_by_credentials_identifier(
        &self,
        kind: CredentialsType,
        identifier: &str,
    ) -> Result<(Identity, Credentials), Error>;

    /// An identity without credentials.
    async fn get_identity(&self, id: Uuid) -> Result<Identity, Error>;

    async fn find_recovery_address_by_value(
        &self,
        via: AddressType,
        value: &str,
    ) -> Result<RecoveryAddress, Error>;
}

#[async_trait]
pub trait PrivilegedIdentityPool: IdentityPool {
    /// # Errors
    /// `DuplicateIdentifier` when any (type, identifier) pair is already taken.
    async fn create_identity(&self, identity: &Identity) -> Result<(), Error>;

    /// Replace traits, credentials and addresses.
    ///
    /// # Errors
    /// `DuplicateIdentifier` when an identifier now collides with another identity.
    async fn update_identity(&self, identity: &Identity) -> Result<(), Error>;

    async fn get_identity_confidential(&self, id: Uuid) -> Result<Identity, Error>;

    /// Mark a verifiable address as verified.
    async fn verify_address(&self, address_id: Uuid) -> Result<(), Error>;
}

#[async_trait]
pub trait RecoveryTokenPersister: Send + Sync {
    async fn create_recovery_token(&self, token: &RecoveryToken) -> Result<(), Error>;

    /// Fetch and delete atomically.
    ///
    /// # Errors
    /// `NotFound` when the token is unknown, used or expired.
    async fn use_recovery_token(&self, token_hash: &str) -> Result<RecoveryToken, Error>;
}

#[async_trait]
pub trait VerificationTokenPersister: Send + Sync {
    async fn create_verification_token(&self, token: &VerificationToken) -> Result<(), Error>;

    async fn use_verification_token(&self, token_hash: &str) -> Result<VerificationToken, Error>;
}

#[async_trait]
pub trait ErrorPersister: Send + Sync {
    async fn add_error(&self, csrf_token: &str, errors: Value) -> Result<Uuid, Error>;

    /// Read an error and mark it seen.
    async fn read_error(&self, id: Uuid) -> Result<ErrorContainer, Error>;

    /// Delete seen errors older than `older_than`; with `force`, unseen ones too.
    async fn clear_errors(&self, older_than: Duration, force: bool) -> Result<u64, Error>;
}

#[async_trait]
pub trait SessionPersister: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<(), Error>;

    async fn get_session(&self, token_hash: &str) -> Result<Session, Error>;

    async fn delete_session(&self, token_hash: &str) -> Result<(), Error>;

    /// Deactivate every session of `identity_id` except `keep`; returns how many.
    async fn revoke_sessions(&self, identity_id: Uuid, keep: Option<Uuid>) -> Result<u64, Error>;
}

#[async_trait]
pub trait ContinuityPersister: Send + Sync {
    async fn save_continuity(&self, container: &ContinuityContainer) -> Result<(), Error>;

    /// Fetch and delete atomically.
    async fn take_continuity(&self, id: Uuid) -> Result<ContinuityContainer, Error>;
}

#[async_trait]
pub trait Persister:
    FlowPersister
    + PrivilegedIdentityPool
    + RecoveryTokenPersister
    + VerificationTokenPersister
    + ErrorPersister
    + SessionPersister
    + ContinuityPersister
{
    async fn ping(&self) -> Result<(), Error>;
}

/// Every (type, lowercased identifier) pair of an identity, deduplicated.
pub(crate) fn identifier_keys(identity: &Identity) -> Vec<(CredentialsType, String)> {
    let mut keys = Vec::new();
    for credentials in identity.credentials.values() {
        for identifier in &credentials.identifiers {
            let key = (credentials.kind, identifier.to_lowercase());
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}
