//! Postgres persister.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{postgres::PgRow, types::Json, PgPool, Postgres, Row, Transaction};
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

use super::{
    identifier_keys, ContinuityPersister, ErrorContainer, ErrorPersister, FlowPersister,
    IdentityPool, Persister, PrivilegedIdentityPool, RecoveryToken, RecoveryTokenPersister,
    SessionPersister, VerificationToken, VerificationTokenPersister,
};
use crate::{
    continuity::ContinuityContainer,
    flow::{Flow, FlowKind},
    identity::{
        AddressType, Credentials, CredentialsType, Identity, RecoveryAddress, VerifiableAddress,
        VerificationStatus,
    },
    session::Session,
    Error,
};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

fn db_span(operation: &'static str) -> Span {
    info_span!("db.query", db.system = "postgresql", db.operation = operation)
}

/// Returns `true` when `err` is a database unique-violation (SQLSTATE `23505`).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn duplicate_or(err: sqlx::Error) -> Error {
    if is_unique_violation(&err) {
        Error::DuplicateIdentifier
    } else {
        Error::from(err)
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T, Error> {
    value
        .parse::<T>()
        .map_err(|err| Error::Internal(anyhow::anyhow!(err)))
}

#[derive(Debug, Clone)]
pub struct SqlPersister {
    pool: PgPool,
}

impl SqlPersister {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create missing tables.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be applied.
    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(db_span("MIGRATE"))
            .await?;
        Ok(())
    }

    async fn load_identity(&self, id: Uuid, confidential: bool) -> Result<Identity, Error> {
        let row = sqlx::query(
            "SELECT id, schema_id, traits, created_at, updated_at FROM identities WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .instrument(db_span("SELECT"))
        .await?
        .ok_or(Error::NotFound)?;

        let mut identity = Identity {
            id: row.try_get("id")?,
            schema_id: row.try_get("schema_id")?,
            traits: row.try_get::<Value, _>("traits")?,
            credentials: std::collections::BTreeMap::new(),
            recovery_addresses: Vec::new(),
            verifiable_addresses: Vec::new(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        };

        identity.recovery_addresses = sqlx::query(
            "SELECT id, identity_id, via, value FROM identity_recovery_addresses WHERE identity_id = $1 ORDER BY value",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .instrument(db_span("SELECT"))
        .await?
        .iter()
        .map(recovery_address_from_row)
        .collect::<Result<_, _>>()?;

        identity.verifiable_addresses = sqlx::query(
            "SELECT id, identity_id, via, value, verified, verified_at, status FROM identity_verifiable_addresses WHERE identity_id = $1 ORDER BY value",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .instrument(db_span("SELECT"))
        .await?
        .iter()
        .map(verifiable_address_from_row)
        .collect::<Result<_, _>>()?;

        if confidential {
            let rows = sqlx::query(
                "SELECT kind, config FROM identity_credentials WHERE identity_id = $1",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;
            for row in rows {
                let kind: CredentialsType = parse_column(&row.try_get::<String, _>("kind")?)?;
                let identifiers: Vec<String> = sqlx::query_scalar(
                    "SELECT identifier FROM identity_credential_identifiers WHERE identity_id = $1 AND kind = $2 ORDER BY identifier",
                )
                .bind(id)
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .instrument(db_span("SELECT"))
                .await?;
                identity.set_credentials(Credentials::new(
                    kind,
                    identifiers,
                    row.try_get::<Value, _>("config")?,
                ));
            }
        }
        Ok(identity)
    }

    async fn write_identity_children(
        tx: &mut Transaction<'_, Postgres>,
        identity: &Identity,
    ) -> Result<(), Error> {
        for table in [
            "identity_credentials",
            "identity_credential_identifiers",
            "identity_recovery_addresses",
            "identity_verifiable_addresses",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE identity_id = $1"))
                .bind(identity.id)
                .execute(&mut **tx)
                .instrument(db_span("DELETE"))
                .await?;
        }

        for credentials in identity.credentials.values() {
            sqlx::query(
                "INSERT INTO identity_credentials (identity_id, kind, config) VALUES ($1, $2, $3)",
            )
            .bind(identity.id)
            .bind(credentials.kind.as_str())
            .bind(Json(&credentials.config))
            .execute(&mut **tx)
            .instrument(db_span("INSERT"))
            .await?;
        }

        for (kind, identifier) in identifier_keys(identity) {
            sqlx::query(
                "INSERT INTO identity_credential_identifiers (kind, identifier, identity_id) VALUES ($1, $2, $3)",
            )
            .bind(kind.as_str())
            .bind(identifier)
            .bind(identity.id)
            .execute(&mut **tx)
            .instrument(db_span("INSERT"))
            .await
            .map_err(duplicate_or)?;
        }

        for address in &identity.recovery_addresses {
            sqlx::query(
                "INSERT INTO identity_recovery_addresses (id, identity_id, via, value) VALUES ($1, $2, $3, $4)",
            )
            .bind(address.id)
            .bind(identity.id)
            .bind(address.via.as_str())
            .bind(&address.value)
            .execute(&mut **tx)
            .instrument(db_span("INSERT"))
            .await
            .map_err(duplicate_or)?;
        }

        for address in &identity.verifiable_addresses {
            sqlx::query(
                "INSERT INTO identity_verifiable_addresses (id, identity_id, via, value, verified, verified_at, status) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(address.id)
            .bind(identity.id)
            .bind(address.via.as_str())
            .bind(&address.value)
            .bind(address.verified)
            .bind(address.verified_at)
            .bind(verification_status(address.status))
            .execute(&mut **tx)
            .instrument(db_span("INSERT"))
            .await
            .map_err(duplicate_or)?;
        }
        Ok(())
    }
}

fn verification_status(status: VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Pending => "pending",
        VerificationStatus::Completed => "completed",
    }
}

fn recovery_address_from_row(row: &PgRow) -> Result<RecoveryAddress, Error> {
    Ok(RecoveryAddress {
        id: row.try_get("id")?,
        identity_id: row.try_get("identity_id")?,
        via: parse_column::<AddressType>(&row.try_get::<String, _>("via")?)?,
        value: row.try_get("value")?,
    })
}

fn verifiable_address_from_row(row: &PgRow) -> Result<VerifiableAddress, Error> {
    let status = match row.try_get::<String, _>("status")?.as_str() {
        "completed" => VerificationStatus::Completed,
        _ => VerificationStatus::Pending,
    };
    Ok(VerifiableAddress {
        id: row.try_get("id")?,
        identity_id: row.try_get("identity_id")?,
        via: parse_column::<AddressType>(&row.try_get::<String, _>("via")?)?,
        value: row.try_get("value")?,
        verified: row.try_get("verified")?,
        verified_at: row.try_get("verified_at")?,
        status,
    })
}

fn flow_from_row(row: &PgRow) -> Result<Flow, Error> {
    let Json(mut flow) = row.try_get::<Json<Flow>, _>("body")?;
    flow.kind = Some(parse_column::<FlowKind>(&row.try_get::<String, _>("kind")?)?);
    flow.expires_at = row.try_get("expires_at")?;
    flow.revision = row.try_get("revision")?;
    flow.completed = row.try_get("completed")?;
    Ok(flow)
}

fn session_from_row(row: &PgRow) -> Result<Session, Error> {
    Ok(Session {
        id: row.try_get("id")?,
        token_hash: row.try_get("token_hash")?,
        identity_id: row.try_get("identity_id")?,
        active: row.try_get("active")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        authenticated_at: row.try_get("authenticated_at")?,
    })
}

#[async_trait]
impl FlowPersister for SqlPersister {
    async fn create_flow(&self, flow: &Flow) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO selfservice_flows (id, kind, flow_type, body, expires_at, revision, completed) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(flow.id)
        .bind(flow.kind()?.as_str())
        .bind(flow.flow_type.as_str())
        .bind(Json(flow))
        .bind(flow.expires_at)
        .bind(flow.revision)
        .bind(flow.completed)
        .execute(&self.pool)
        .instrument(db_span("INSERT"))
        .await?;
        Ok(())
    }

    async fn get_flow(&self, kind: FlowKind, id: Uuid) -> Result<Flow, Error> {
        let row = sqlx::query(
            "SELECT kind, body, expires_at, revision, completed FROM selfservice_flows WHERE id = $1 AND kind = $2",
        )
        .bind(id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .instrument(db_span("SELECT"))
        .await?
        .ok_or(Error::FlowNotFound)?;
        flow_from_row(&row)
    }

    async fn update_flow(&self, flow: &mut Flow) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE selfservice_flows SET body = $2, expires_at = $3, completed = $4, revision = revision + 1 WHERE id = $1 AND revision = $5",
        )
        .bind(flow.id)
        .bind(Json(&*flow))
        .bind(flow.expires_at)
        .bind(flow.completed)
        .bind(flow.revision)
        .execute(&self.pool)
        .instrument(db_span("UPDATE"))
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT revision FROM selfservice_flows WHERE id = $1")
                    .bind(flow.id)
                    .fetch_optional(&self.pool)
                    .instrument(db_span("SELECT"))
                    .await?;
            return Err(match exists {
                Some(_) => Error::StaleRevision,
                None => Error::FlowNotFound,
            });
        }
        flow.revision += 1;
        Ok(())
    }

    async fn force_expire_flow(&self, id: Uuid) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE selfservice_flows SET expires_at = NOW() - INTERVAL '1 second', revision = revision + 1 WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .instrument(db_span("UPDATE"))
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::FlowNotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityPool for SqlPersister {
    async fn find_by_credentials_identifier(
        &self,
        kind: CredentialsType,
        identifier: &str,
    ) -> Result<(Identity, Credentials), Error> {
        let identity_id: Uuid = sqlx::query_scalar(
            "SELECT identity_id FROM identity_credential_identifiers WHERE kind = $1 AND identifier = $2",
        )
        .bind(kind.as_str())
        .bind(identifier.to_lowercase())
        .fetch_optional(&self.pool)
        .instrument(db_span("SELECT"))
        .await?
        .ok_or(Error::NotFound)?;

        let identity = self.load_identity(identity_id, true).await?;
        let credentials = identity
            .get_credentials(kind)
            .cloned()
            .ok_or(Error::NotFound)?;
        Ok((identity, credentials))
    }

    async fn get_identity(&self, id: Uuid) -> Result<Identity, Error> {
        self.load_identity(id, false).await
    }

    async fn find_recovery_address_by_value(
        &self,
        via: AddressType,
        value: &str,
    ) -> Result<RecoveryAddress, Error> {
        let row = sqlx::query(
            "SELECT id, identity_id, via, value FROM identity_recovery_addresses WHERE via = $1 AND value = $2",
        )
        .bind(via.as_str())
        .bind(value.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .instrument(db_span("SELECT"))
        .await?
        .ok_or(Error::NotFound)?;
        recovery_address_from_row(&row)
    }
}

#[async_trait]
impl PrivilegedIdentityPool for SqlPersister {
    async fn create_identity(&self, identity: &Identity) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO identities (id, schema_id, traits, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(identity.id)
        .bind(&identity.schema_id)
        .bind(Json(&identity.traits))
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .execute(&mut *tx)
        .instrument(db_span("INSERT"))
        .await
        .map_err(duplicate_or)?;
        Self::write_identity_children(&mut tx, identity).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_identity(&self, identity: &Identity) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE identities SET schema_id = $2, traits = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(identity.id)
        .bind(&identity.schema_id)
        .bind(Json(&identity.traits))
        .execute(&mut *tx)
        .instrument(db_span("UPDATE"))
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Self::write_identity_children(&mut tx, identity).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_identity_confidential(&self, id: Uuid) -> Result<Identity, Error> {
        self.load_identity(id, true).await
    }

    async fn verify_address(&self, address_id: Uuid) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE identity_verifiable_addresses SET verified = TRUE, verified_at = NOW(), status = 'completed' WHERE id = $1",
        )
        .bind(address_id)
        .execute(&self.pool)
        .instrument(db_span("UPDATE"))
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl RecoveryTokenPersister for SqlPersister {
    async fn create_recovery_token(&self, token: &RecoveryToken) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO recovery_tokens (id, token_hash, recovery_address_id, identity_id, flow_id, created_at, expires_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(token.id)
        .bind(&token.token_hash)
        .bind(token.recovery_address_id)
        .bind(token.identity_id)
        .bind(token.flow_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .instrument(db_span("INSERT"))
        .await?;
        Ok(())
    }

    async fn use_recovery_token(&self, token_hash: &str) -> Result<RecoveryToken, Error> {
        let row = sqlx::query(
            "DELETE FROM recovery_tokens WHERE token_hash = $1 RETURNING id, token_hash, recovery_address_id, identity_id, flow_id, created_at, expires_at",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .instrument(db_span("DELETE"))
        .await?
        .ok_or(Error::NotFound)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        if expires_at < Utc::now() {
            return Err(Error::NotFound);
        }
        Ok(RecoveryToken {
            id: row.try_get("id")?,
            token_hash: row.try_get("token_hash")?,
            recovery_address_id: row.try_get("recovery_address_id")?,
            identity_id: row.try_get("identity_id")?,
            flow_id: row.try_get("flow_id")?,
            created_at: row.try_get("created_at")?,
            expires_at,
        })
    }
}

#[async_trait]
impl VerificationTokenPersister for SqlPersister {
    async fn create_verification_token(&self, token: &VerificationToken) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO verification_tokens (id, token_hash, verifiable_address_id, created_at, expires_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(token.id)
        .bind(&token.token_hash)
        .bind(token.verifiable_address_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .instrument(db_span("INSERT"))
        .await?;
        Ok(())
    }

    async fn use_verification_token(&self, token_hash: &str) -> Result<VerificationToken, Error> {
        let row = sqlx::query(
            "DELETE FROM verification_tokens WHERE token_hash = $1 RETURNING id, token_hash, verifiable_address_id, created_at, expires_at",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .instrument(db_span("DELETE"))
        .await?
        .ok_or(Error::NotFound)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        if expires_at < Utc::now() {
            return Err(Error::NotFound);
        }
        Ok(VerificationToken {
            id: row.try_get("id")?,
            token_hash: row.try_get("token_hash")?,
            verifiable_address_id: row.try_get("verifiable_address_id")?,
            created_at: row.try_get("created_at")?,
            expires_at,
        })
    }
}

#[async_trait]
impl ErrorPersister for SqlPersister {
    async fn add_error(&self, csrf_token: &str, errors: Value) -> Result<Uuid, Error> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO selfservice_errors (id, errors, csrf_token) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(Json(errors))
            .bind(csrf_token)
            .execute(&self.pool)
            .instrument(db_span("INSERT"))
            .await?;
        Ok(id)
    }

    async fn read_error(&self, id: Uuid) -> Result<ErrorContainer, Error> {
        let row = sqlx::query(
            "UPDATE selfservice_errors SET seen_at = NOW() WHERE id = $1 RETURNING id, errors, csrf_token, created_at, seen_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .instrument(db_span("UPDATE"))
        .await?
        .ok_or(Error::NotFound)?;
        Ok(ErrorContainer {
            id: row.try_get("id")?,
            errors: row.try_get::<Value, _>("errors")?,
            csrf_token: row.try_get("csrf_token")?,
            created_at: row.try_get("created_at")?,
            seen_at: row.try_get("seen_at")?,
        })
    }

    async fn clear_errors(&self, older_than: Duration, force: bool) -> Result<u64, Error> {
        let cutoff = Utc::now() - older_than;
        let result = sqlx::query(
            "DELETE FROM selfservice_errors WHERE created_at <= $1 AND ($2 OR seen_at IS NOT NULL)",
        )
        .bind(cutoff)
        .bind(force)
        .execute(&self.pool)
        .instrument(db_span("DELETE"))
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionPersister for SqlPersister {
    async fn create_session(&self, session: &Session) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO sessions (id, token_hash, identity_id, active, issued_at, expires_at, authenticated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session.id)
        .bind(&session.token_hash)
        .bind(session.identity_id)
        .bind(session.active)
        .bind(session.issued_at)
        .bind(session.expires_at)
        .bind(session.authenticated_at)
        .execute(&self.pool)
        .instrument(db_span("INSERT"))
        .await?;
        Ok(())
    }

    async fn get_session(&self, token_hash: &str) -> Result<Session, Error> {
        let row = sqlx::query(
            "SELECT id, token_hash, identity_id, active, issued_at, expires_at, authenticated_at FROM sessions WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .instrument(db_span("SELECT"))
        .await?
        .ok_or(Error::NotFound)?;
        session_from_row(&row)
    }

    async fn delete_session(&self, token_hash: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE"))
            .await?;
        Ok(())
    }

    async fn revoke_sessions(&self, identity_id: Uuid, keep: Option<Uuid>) -> Result<u64, Error> {
        let result = sqlx::query(
            "UPDATE sessions SET active = FALSE WHERE identity_id = $1 AND active AND ($2::uuid IS NULL OR id <> $2)",
        )
        .bind(identity_id)
        .bind(keep)
        .execute(&self.pool)
        .instrument(db_span("UPDATE"))
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ContinuityPersister for SqlPersister {
    async fn save_continuity(&self, container: &ContinuityContainer) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO continuity_containers (id, name, identity_id, payload, expires_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(container.id)
        .bind(&container.name)
        .bind(container.identity_id)
        .bind(Json(&container.payload))
        .bind(container.expires_at)
        .execute(&self.pool)
        .instrument(db_span("INSERT"))
        .await?;
        Ok(())
    }

    async fn take_continuity(&self, id: Uuid) -> Result<ContinuityContainer, Error> {
        let row = sqlx::query(
            "DELETE FROM continuity_containers WHERE id = $1 RETURNING id, name, identity_id, payload, expires_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .instrument(db_span("DELETE"))
        .await?
        .ok_or(Error::NotFound)?;
        Ok(ContinuityContainer {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            identity_id: row.try_get("identity_id")?,
            payload: row.try_get::<Value, _>("payload")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl Persister for SqlPersister {
    async fn ping(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::{borrow::Cow, error::Error as StdError, fmt};

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violations_become_duplicate_identifiers() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(matches!(duplicate_or(err), Error::DuplicateIdentifier));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(matches!(duplicate_or(err), Error::Internal(_)));
        assert!(matches!(
            duplicate_or(sqlx::Error::RowNotFound),
            Error::NotFound
        ));
    }

    #[test]
    fn schema_creates_every_table() {
        for table in [
            "selfservice_flows",
            "identities",
            "identity_credentials",
            "identity_credential_identifiers",
            "identity_recovery_addresses",
            "identity_verifiable_addresses",
            "recovery_tokens",
            "verification_tokens",
            "selfservice_errors",
            "sessions",
            "continuity_containers",
        ] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} ")),
                "{table} missing"
            );
        }
    }
}
