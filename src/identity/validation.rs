//! Validates identity traits and derives identifiers and addresses from them.

use serde_json::Value;
use uuid::Uuid;

use super::{
    AddressType, CredentialsType, Identity, RecoveryAddress, VerifiableAddress, VerificationStatus,
};
use crate::{
    schema::{
        ExtensionConfig, ExtensionRunner, IdentitySchemas, SchemaLoader, ValidationError,
        ValidationErrors,
    },
    Error,
};

/// Collects everything the `ory.sh/kratos` annotations declare while traits are validated.
#[derive(Debug, Default)]
pub(crate) struct IdentityExtension {
    pub identifiers: Vec<String>,
    pub recovery: Vec<(AddressType, String)>,
    pub verification: Vec<(AddressType, String)>,
}

fn push_unique<T: PartialEq>(target: &mut Vec<T>, value: T) {
    if !target.contains(&value) {
        target.push(value);
    }
}

fn address_type(via: &str) -> Result<AddressType, String> {
    via.parse::<AddressType>()
}

impl ExtensionRunner for IdentityExtension {
    fn run(
        &mut self,
        config: &ExtensionConfig,
        instance: &Value,
        _pointer: &str,
    ) -> Result<(), String> {
        let Some(text) = instance.as_str() else {
            return Ok(());
        };
        let normalized = text.trim().to_lowercase();

        if config.is_password_identifier() {
            if normalized.is_empty() {
                return Err("identifier must not be empty".to_string());
            }
            push_unique(&mut self.identifiers, normalized.clone());
        }
        if let Some(recovery) = &config.recovery {
            push_unique(&mut self.recovery, (address_type(&recovery.via)?, normalized.clone()));
        }
        if let Some(verification) = &config.verification {
            push_unique(
                &mut self.verification,
                (address_type(&verification.via)?, normalized),
            );
        }
        Ok(())
    }
}

/// Validate `identity.traits` against its schema and sync identifiers and addresses.
///
/// # Errors
/// Returns `SchemaValidation` with pointers below `/traits`, or `NotFound` for an unknown
/// schema id.
pub async fn validate_identity(
    loader: &SchemaLoader,
    schemas: &IdentitySchemas,
    identity: &mut Identity,
) -> Result<(), Error> {
    let schema = schemas.get_by_id(&identity.schema_id)?;
    let compiled = loader.compile(&schema.url).await?;

    let mut extension = IdentityExtension::default();
    compiled
        .validate_with(&identity.traits, &mut extension)
        .map_err(|errors| Error::SchemaValidation(errors.prefixed("/traits")))?;

    if let Some(credentials) = identity.credentials.get_mut(&CredentialsType::Password) {
        if extension.identifiers.is_empty() {
            return Err(Error::SchemaValidation(ValidationErrors::from(
                ValidationError::new(
                    "/traits",
                    "could not find any login identifiers, did you forget to set them?",
                ),
            )));
        }
        credentials.identifiers.clone_from(&extension.identifiers);
    }

    sync_recovery(identity, &extension.recovery);
    sync_verification(identity, &extension.verification);
    Ok(())
}

fn sync_recovery(identity: &mut Identity, wanted: &[(AddressType, String)]) {
    let existing = std::mem::take(&mut identity.recovery_addresses);
    identity.recovery_addresses = wanted
        .iter()
        .map(|(via, value)| {
            existing
                .iter()
                .find(|address| address.via == *via && address.value == *value)
                .cloned()
                .unwrap_or_else(|| RecoveryAddress {
                    id: Uuid::new_v4(),
                    identity_id: identity.id,
                    via: *via,
                    value: value.clone(),
                })
        })
        .collect();
}

fn sync_verification(identity: &mut Identity, wanted: &[(AddressType, String)]) {
    let existing = std::mem::take(&mut identity.verifiable_addresses);
    identity.verifiable_addresses = wanted
        .iter()
        .map(|(via, value)| {
            existing
                .iter()
                .find(|address| address.via == *via && address.value == *value)
                .cloned()
                .unwrap_or_else(|| VerifiableAddress {
                    id: Uuid::new_v4(),
                    identity_id: identity.id,
                    via: *via,
                    value: value.clone(),
                    verified: false,
                    verified_at: None,
                    status: VerificationStatus::Pending,
                })
        })
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Credentials;
    use serde_json::json;

    const SCHEMA_URL: &str = "https://schemas.test/identity.json";

    async fn fixtures() -> anyhow::Result<(SchemaLoader, IdentitySchemas)> {
        let loader = SchemaLoader::new()?;
        loader
            .register(
                SCHEMA_URL,
                json!({
                    "type": "object",
                    "properties": {
                        "email": {
                            "type": "string",
                            "format": "email",
                            "ory.sh/kratos": {
                                "credentials": { "password": { "identifier": true } },
                                "recovery": { "via": "email" },
                                "verification": { "via": "email" }
                            }
                        },
                        "username": {
                            "type": "string",
                            "ory.sh/kratos": { "credentials": { "password": { "identifier": true } } }
                        }
                    },
                    "required": ["email"]
                }),
            )
            .await;
        Ok((loader, IdentitySchemas::new(SCHEMA_URL)))
    }

    fn with_password(traits: Value) -> Identity {
        let mut identity = Identity::new(IdentitySchemas::DEFAULT_ID).with_traits(traits);
        identity.set_credentials(Credentials::new(
            CredentialsType::Password,
            Vec::new(),
            json!({ "hashed_password": "x" }),
        ));
        identity
    }

    #[tokio::test]
    async fn collects_lowercased_unique_identifiers() -> anyhow::Result<()> {
        let (loader, schemas) = fixtures().await?;
        let mut identity =
            with_password(json!({ "email": "Ada@Example.com", "username": "ada@example.com" }));
        validate_identity(&loader, &schemas, &mut identity).await?;

        let identifiers = identity
            .get_credentials(CredentialsType::Password)
            .map(|c| c.identifiers.clone())
            .unwrap_or_default();
        assert_eq!(identifiers, vec!["ada@example.com".to_string()]);
        assert_eq!(identity.recovery_addresses.len(), 1);
        assert_eq!(identity.recovery_addresses[0].value, "ada@example.com");
        assert_eq!(identity.recovery_addresses[0].identity_id, identity.id);
        assert_eq!(identity.verifiable_addresses.len(), 1);
        assert!(!identity.verifiable_addresses[0].verified);
        Ok(())
    }

    #[tokio::test]
    async fn keeps_existing_address_records() -> anyhow::Result<()> {
        let (loader, schemas) = fixtures().await?;
        let mut identity = with_password(json!({ "email": "a@b.co" }));
        validate_identity(&loader, &schemas, &mut identity).await?;
        let address_id = identity.recovery_addresses[0].id;
        identity.verifiable_addresses[0].verified = true;

        validate_identity(&loader, &schemas, &mut identity).await?;
        assert_eq!(identity.recovery_addresses[0].id, address_id);
        assert!(identity.verifiable_addresses[0].verified);

        identity.traits = json!({ "email": "c@d.co" });
        validate_identity(&loader, &schemas, &mut identity).await?;
        assert_ne!(identity.recovery_addresses[0].id, address_id);
        assert!(!identity.verifiable_addresses[0].verified);
        Ok(())
    }

    #[tokio::test]
    async fn trait_errors_point_below_traits() -> anyhow::Result<()> {
        let (loader, schemas) = fixtures().await?;
        let mut identity = with_password(json!({ "email": "not-an-email" }));
        let Err(Error::SchemaValidation(errors)) =
            validate_identity(&loader, &schemas, &mut identity).await
        else {
            anyhow::bail!("expected a schema validation error");
        };
        assert!(errors.iter().any(|err| err.pointer == "/traits/email"));

        let mut identity = with_password(json!({}));
        let Err(Error::SchemaValidation(errors)) =
            validate_identity(&loader, &schemas, &mut identity).await
        else {
            anyhow::bail!("expected a schema validation error");
        };
        assert!(errors.iter().all(|err| err.pointer.starts_with("/traits")));
        Ok(())
    }
}
