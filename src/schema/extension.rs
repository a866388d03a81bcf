use serde::Deserialize;
use serde_json::Value;

/// Schema keyword carrying identity specific annotations.
pub const EXTENSION_KEY: &str = "ory.sh/kratos";

/// Parsed content of the `ory.sh/kratos` keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExtensionConfig {
    #[serde(default)]
    pub credentials: CredentialsExtension,
    #[serde(default)]
    pub recovery: Option<AddressExtension>,
    #[serde(default)]
    pub verification: Option<AddressExtension>,
    /// Renders the field read-only on profile forms.
    #[serde(default, rename = "disableIdentifiers")]
    pub disable_identifiers: bool,
    #[serde(default)]
    pub mappings: Option<MappingsExtension>,
}

impl ExtensionConfig {
    #[must_use]
    pub fn is_password_identifier(&self) -> bool {
        self.credentials.password.identifier
    }

    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.is_password_identifier() || self.recovery.is_some() || self.verification.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CredentialsExtension {
    #[serde(default)]
    pub password: PasswordExtension,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PasswordExtension {
    #[serde(default)]
    pub identifier: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressExtension {
    pub via: String,
}

/// Claim to trait mappings used by OIDC provider schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MappingsExtension {
    #[serde(default)]
    pub identity: IdentityMappings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IdentityMappings {
    #[serde(default)]
    pub traits: Vec<TraitMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TraitMapping {
    /// Dotted path inside the identity traits.
    pub path: String,
}

/// Observer invoked for every instance location whose schema carries the extension.
pub trait ExtensionRunner {
    /// Inspect `instance` found at `pointer`.
    ///
    /// # Errors
    /// Returns a message that is recorded as a validation error at `pointer`.
    fn run(&mut self, config: &ExtensionConfig, instance: &Value, pointer: &str)
        -> Result<(), String>;
}
