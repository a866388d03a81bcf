//! Copies provider claims into identity traits.
//!
//! A claims schema annotates claims with `ory.sh/kratos` mappings naming the
//! dotted trait path the claim is written to. Providers without a configured
//! schema use [`default_claims_schema`], which maps a verified `email` to
//! `traits.email`.

use serde_json::{json, Map, Value};

use super::provider::Claims;
use crate::{
    schema::{ExtensionConfig, ExtensionRunner, SchemaLoader},
    Error,
};

#[derive(Debug, Default)]
struct TraitMapper {
    traits: Map<String, Value>,
}

impl TraitMapper {
    fn insert(&mut self, path: &str, value: Value) -> Result<(), String> {
        let mut segments = path.split('.').filter(|segment| !segment.is_empty()).peekable();
        let mut target = &mut self.traits;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                target.insert(segment.to_string(), value);
                return Ok(());
            }
            let next = target
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            target = next
                .as_object_mut()
                .ok_or_else(|| format!("trait {segment} is not an object"))?;
        }
        Err("the mapping path is empty".to_string())
    }
}

impl ExtensionRunner for TraitMapper {
    fn run(
        &mut self,
        config: &ExtensionConfig,
        instance: &Value,
        _pointer: &str,
    ) -> Result<(), String> {
        let Some(mappings) = &config.mappings else {
            return Ok(());
        };
        for mapping in &mappings.identity.traits {
            self.insert(&mapping.path, instance.clone())?;
        }
        Ok(())
    }
}

/// The schema used when a provider configures no mapper.
#[must_use]
pub fn default_claims_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "email": {
                "type": "string",
                "ory.sh/kratos": {
                    "mappings": { "identity": { "traits": [{ "path": "email" }] } }
                }
            }
        },
        "required": ["sub"]
    })
}

/// Validate `claims` against the provider's claims schema and collect the mapped traits.
///
/// Unverified email addresses are dropped before mapping.
///
/// # Errors
/// Returns `SchemaValidation` when the claims violate the schema.
pub async fn map_claims(
    loader: &SchemaLoader,
    provider_id: &str,
    mapper_url: Option<&str>,
    claims: &Claims,
) -> Result<Value, Error> {
    let schema = match mapper_url {
        Some(url) => loader.compile(url).await?,
        None => {
            loader
                .compile_value(&format!("oidc-{provider_id}"), default_claims_schema())
                .await?
        }
    };
    let mut instance = serde_json::to_value(claims).map_err(anyhow::Error::from)?;
    if claims.email_verified == Some(false) {
        if let Some(object) = instance.as_object_mut() {
            object.remove("email");
        }
    }
    let mut mapper = TraitMapper::default();
    schema
        .validate_with(&instance, &mut mapper)
        .map_err(Error::SchemaValidation)?;
    Ok(Value::Object(mapper.traits))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(email_verified: Option<bool>) -> Claims {
        Claims {
            iss: "https://issuer.test".to_string(),
            sub: "1234".to_string(),
            email: Some("Jane@Example.com".to_string()),
            email_verified,
            name: Some("Jane".to_string()),
            ..Claims::default()
        }
    }

    #[tokio::test]
    async fn default_mapping_copies_email() -> anyhow::Result<()> {
        let loader = SchemaLoader::new()?;
        let traits = map_claims(&loader, "fake", None, &claims(Some(true))).await?;
        assert_eq!(traits, json!({ "email": "Jane@Example.com" }));

        let traits = map_claims(&loader, "fake", None, &claims(Some(false))).await?;
        assert_eq!(traits, json!({}));
        Ok(())
    }

    #[tokio::test]
    async fn custom_mappings_write_nested_paths() -> anyhow::Result<()> {
        let loader = SchemaLoader::new()?;
        loader
            .register(
                "https://schemas.test/github.json",
                json!({
                    "type": "object",
                    "properties": {
                        "name": {
                            "type": "string",
                            "ory.sh/kratos": {
                                "mappings": { "identity": { "traits": [{ "path": "name.first" }] } }
                            }
                        },
                        "email": {
                            "type": "string",
                            "ory.sh/kratos": {
                                "mappings": { "identity": { "traits": [{ "path": "email" }] } }
                            }
                        }
                    }
                }),
            )
            .await;
        let traits = map_claims(
            &loader,
            "github",
            Some("https://schemas.test/github.json"),
            &claims(None),
        )
        .await?;
        assert_eq!(
            traits,
            json!({ "name": { "first": "Jane" }, "email": "Jane@Example.com" })
        );
        Ok(())
    }

    #[test]
    fn rejects_paths_through_scalars() {
        let mut mapper = TraitMapper::default();
        assert!(mapper.insert("email", json!("a@b.co")).is_ok());
        assert!(mapper.insert("email.primary", json!("a@b.co")).is_err());
        assert!(mapper.insert("", json!(1)).is_err());
    }
}
