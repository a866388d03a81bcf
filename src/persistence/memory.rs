//! In-process persister used for development and tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    identifier_keys, ContinuityPersister, ErrorContainer, ErrorPersister, FlowPersister,
    IdentityPool, Persister, PrivilegedIdentityPool, RecoveryToken, RecoveryTokenPersister,
    SessionPersister, VerificationToken, VerificationTokenPersister,
};
use crate::{
    continuity::ContinuityContainer,
    flow::{Flow, FlowKind},
    identity::{AddressType, Credentials, CredentialsType, Identity, RecoveryAddress},
    session::Session,
    Error,
};

/// How long expired flows stay readable so submissions can still report the expiry.
const EXPIRED_FLOW_RETENTION_SECS: i64 = 3600;

#[derive(Debug, Default)]
struct State {
    flows: HashMap<Uuid, Flow>,
    identities: HashMap<Uuid, Identity>,
    identifiers: HashMap<(CredentialsType, String), Uuid>,
    recovery_tokens: HashMap<String, RecoveryToken>,
    verification_tokens: HashMap<String, VerificationToken>,
    errors: HashMap<Uuid, ErrorContainer>,
    sessions: HashMap<String, Session>,
    continuity: HashMap<Uuid, ContinuityContainer>,
}

impl State {
    fn index(&mut self, identity: &Identity) -> Result<(), Error> {
        let keys = identifier_keys(identity);
        if keys.iter().any(|key| {
            self.identifiers
                .get(key)
                .is_some_and(|owner| *owner != identity.id)
        }) {
            return Err(Error::DuplicateIdentifier);
        }
        self.identifiers.retain(|_, owner| *owner != identity.id);
        for key in keys {
            self.identifiers.insert(key, identity.id);
        }
        Ok(())
    }

    /// Drop everything past its expiry. Runs on every insert of an expiring record.
    fn sweep(&mut self) {
        let now = Utc::now();
        let retention = Duration::seconds(EXPIRED_FLOW_RETENTION_SECS);
        self.flows.retain(|_, flow| flow.expires_at + retention > now);
        self.sessions.retain(|_, session| session.expires_at > now);
        self.recovery_tokens.retain(|_, token| token.expires_at > now);
        self.verification_tokens.retain(|_, token| token.expires_at > now);
        self.continuity.retain(|_, container| container.expires_at > now);
    }
}

/// All state sits behind one lock, so every operation is atomic.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    state: RwLock<State>,
}

impl MemoryPersister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowPersister for MemoryPersister {
    async fn create_flow(&self, flow: &Flow) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state.sweep();
        state.flows.insert(flow.id, flow.clone());
        Ok(())
    }

    async fn get_flow(&self, kind: FlowKind, id: Uuid) -> Result<Flow, Error> {
        self.state
            .read()
            .await
            .flows
            .get(&id)
            .filter(|flow| flow.kind == Some(kind))
            .cloned()
            .ok_or(Error::FlowNotFound)
    }

    async fn update_flow(&self, flow: &mut Flow) -> Result<(), Error> {
        let mut state = self.state.write().await;
        let stored = state.flows.get_mut(&flow.id).ok_or(Error::FlowNotFound)?;
        if stored.revision != flow.revision {
            return Err(Error::StaleRevision);
        }
        flow.revision += 1;
        *stored = flow.clone();
        Ok(())
    }

    async fn force_expire_flow(&self, id: Uuid) -> Result<(), Error> {
        let mut state = self.state.write().await;
        let flow = state.flows.get_mut(&id).ok_or(Error::FlowNotFound)?;
        flow.expires_at = Utc::now() - Duration::seconds(1);
        flow.revision += 1;
        Ok(())
    }
}

#[async_trait]
impl IdentityPool for MemoryPersister {
    async fn find_by_credentials_identifier(
        &self,
        kind: CredentialsType,
        identifier: &str,
    ) -> Result<(Identity, Credentials), Error> {
        let state = self.state.read().await;
        let id = state
            .identifiers
            .get(&(kind, identifier.to_lowercase()))
            .ok_or(Error::NotFound)?;
        let identity = state.identities.get(id).ok_or(Error::NotFound)?;
        let credentials = identity
            .get_credentials(kind)
            .cloned()
            .ok_or(Error::NotFound)?;
        Ok((identity.clone(), credentials))
    }

    async fn get_identity(&self, id: Uuid) -> Result<Identity, Error> {
        self.state
            .read()
            .await
            .identities
            .get(&id)
            .map(Identity::without_credentials)
            .ok_or(Error::NotFound)
    }

    async fn find_recovery_address_by_value(
        &self,
        via: AddressType,
        value: &str,
    ) -> Result<RecoveryAddress, Error> {
        let value = value.trim().to_lowercase();
        self.state
            .read()
            .await
            .identities
            .values()
            .flat_map(|identity| identity.recovery_addresses.iter())
            .find(|address| address.via == via && address.value == value)
            .cloned()
            .ok_or(Error::NotFound)
    }
}

#[async_trait]
impl PrivilegedIdentityPool for MemoryPersister {
    async fn create_identity(&self, identity: &Identity) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if state.identities.contains_key(&identity.id) {
            return Err(Error::DuplicateIdentifier);
        }
        state.index(identity)?;
        state.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn update_identity(&self, identity: &Identity) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if !state.identities.contains_key(&identity.id) {
            return Err(Error::NotFound);
        }
        state.index(identity)?;
        let mut updated = identity.clone();
        updated.updated_at = Utc::now();
        state.identities.insert(identity.id, updated);
        Ok(())
    }

    async fn get_identity_confidential(&self, id: Uuid) -> Result<Identity, Error> {
        self.state
            .read()
            .await
            .identities
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn verify_address(&self, address_id: Uuid) -> Result<(), Error> {
        let mut state = self.state.write().await;
        let address = state
            .identities
            .values_mut()
            .flat_map(|identity| identity.verifiable_addresses.iter_mut())
            .find(|address| address.id == address_id)
            .ok_or(Error::NotFound)?;
        address.verified = true;
        address.verified_at = Some(Utc::now());
        address.status = crate::identity::VerificationStatus::Completed;
        Ok(())
    }
}

#[async_trait]
impl RecoveryTokenPersister for MemoryPersister {
    async fn create_recovery_token(&self, token: &RecoveryToken) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state.sweep();
        state.recovery_tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn use_recovery_token(&self, token_hash: &str) -> Result<RecoveryToken, Error> {
        self.state
            .write()
            .await
            .recovery_tokens
            .remove(token_hash)
            .filter(|token| token.expires_at > Utc::now())
            .ok_or(Error::NotFound)
    }
}

#[async_trait]
impl VerificationTokenPersister for MemoryPersister {
    async fn create_verification_token(&self, token: &VerificationToken) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state.sweep();
        state.verification_tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn use_verification_token(&self, token_hash: &str) -> Result<VerificationToken, Error> {
        self.state
            .write()
            .await
            .verification_tokens
            .remove(token_hash)
            .filter(|token| token.expires_at > Utc::now())
            .ok_or(Error::NotFound)
    }
}

#[async_trait]
impl ErrorPersister for MemoryPersister {
    async fn add_error(&self, csrf_token: &str, errors: Value) -> Result<Uuid, Error> {
        let container = ErrorContainer {
            id: Uuid::new_v4(),
            errors,
            csrf_token: csrf_token.to_string(),
            created_at: Utc::now(),
            seen_at: None,
        };
        let id = container.id;
        self.state.write().await.errors.insert(id, container);
        Ok(id)
    }

    async fn read_error(&self, id: Uuid) -> Result<ErrorContainer, Error> {
        let mut state = self.state.write().await;
        let container = state.errors.get_mut(&id).ok_or(Error::NotFound)?;
        container.seen_at = Some(Utc::now());
        Ok(container.clone())
    }

    async fn clear_errors(&self, older_than: Duration, force: bool) -> Result<u64, Error> {
        let cutoff = Utc::now() - older_than;
        let mut state = self.state.write().await;
        let before = state.errors.len();
        state.errors.retain(|_, container| {
            let eligible = force || container.seen_at.is_some();
            container.created_at > cutoff || !eligible
        });
        Ok(u64::try_from(before - state.errors.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl SessionPersister for MemoryPersister {
    async fn create_session(&self, session: &Session) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state.sweep();
        state.sessions.insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, token_hash: &str) -> Result<Session, Error> {
        self.state
            .read()
            .await
            .sessions
            .get(token_hash)
            .filter(|session| session.expires_at > Utc::now())
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn delete_session(&self, token_hash: &str) -> Result<(), Error> {
        self.state.write().await.sessions.remove(token_hash);
        Ok(())
    }

    async fn revoke_sessions(&self, identity_id: Uuid, keep: Option<Uuid>) -> Result<u64, Error> {
        let mut state = self.state.write().await;
        let mut revoked = 0;
        for session in state.sessions.values_mut() {
            if session.identity_id == identity_id && session.active && Some(session.id) != keep {
                session.active = false;
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl ContinuityPersister for MemoryPersister {
    async fn save_continuity(&self, container: &ContinuityContainer) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state.sweep();
        state.continuity.insert(container.id, container.clone());
        Ok(())
    }

    async fn take_continuity(&self, id: Uuid) -> Result<ContinuityContainer, Error> {
        self.state
            .write()
            .await
            .continuity
            .remove(&id)
            .ok_or(Error::NotFound)
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }
}
