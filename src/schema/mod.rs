//! JSON schema loading, validation and property path enumeration.
//!
//! Schemas are referenced by URL (`file://`, `http(s)://` or `base64://`).
//! [`SchemaLoader::compile`] fetches the root document and every external
//! `$ref` target up front so validation itself never performs I/O.

pub mod extension;
pub mod paths;
pub mod validator;

use anyhow::{anyhow, Context};
use base64::Engine;
use serde_json::Value;
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::Error;

pub use extension::{ExtensionConfig, ExtensionRunner, EXTENSION_KEY};
pub use paths::{PathKind, SchemaPath};

const INLINE_PREFIX: &str = "inline://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    Required { missing: Vec<String> },
    Constraint,
}

/// A single validation failure located by a JSON pointer (`/traits/email`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub pointer: String,
    pub message: String,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            message: message.into(),
            kind: ValidationErrorKind::Constraint,
        }
    }

    pub fn required(pointer: impl Into<String>, missing: Vec<String>) -> Self {
        let message = format!(
            "missing properties: {}",
            missing
                .iter()
                .map(|name| format!("\"{name}\""))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            pointer: pointer.into(),
            message,
            kind: ValidationErrorKind::Required { missing },
        }
    }

    /// Prefix the pointer, used when a sub-document was validated on its own.
    #[must_use]
    pub fn prefixed(mut self, prefix: &str) -> Self {
        self.pointer = format!("{prefix}{}", self.pointer);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn prefixed(self, prefix: &str) -> Self {
        Self(self.0.into_iter().map(|err| err.prefixed(prefix)).collect())
    }
}

impl From<Vec<ValidationError>> for ValidationErrors {
    fn from(errors: Vec<ValidationError>) -> Self {
        Self(errors)
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self(vec![error])
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl std::error::Error for ValidationErrors {}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .0
            .iter()
            .map(|err| {
                if err.pointer.is_empty() {
                    err.message.clone()
                } else {
                    format!("{}: {}", err.pointer, err.message)
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "the request contains invalid data: {rendered}")
    }
}

/// A root schema plus every document its `$ref`s point to.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    root_url: String,
    documents: HashMap<String, Arc<Value>>,
}

impl CompiledSchema {
    #[must_use]
    pub fn root(&self) -> &Value {
        self.documents
            .get(&self.root_url)
            .map_or(&Value::Null, |doc| doc.as_ref())
    }

    #[must_use]
    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    /// Resolve a `$ref` relative to the document identified by `base`.
    ///
    /// Returns the URL of the document the target lives in and the target itself.
    pub(crate) fn resolve(&self, base: &str, reference: &str) -> Option<(String, &Value)> {
        let (document, fragment) = split_reference(reference);
        let document_url = if document.is_empty() {
            base.to_string()
        } else {
            absolute_url(base, document)?
        };
        let root = self.documents.get(&document_url)?;
        let target = if fragment.is_empty() {
            root.as_ref()
        } else {
            root.pointer(fragment)?
        };
        Some((document_url, target))
    }

    /// Validate an instance.
    ///
    /// # Errors
    /// Returns every violation found, each located by a JSON pointer.
    pub fn validate(&self, instance: &Value) -> Result<(), ValidationErrors> {
        validator::Validator::new(self, None).run(instance)
    }

    /// Validate an instance, reporting every `ory.sh/kratos` extension occurrence to `runner`.
    ///
    /// # Errors
    /// Returns every violation found, including the ones raised by the runner.
    pub fn validate_with(
        &self,
        instance: &Value,
        runner: &mut dyn ExtensionRunner,
    ) -> Result<(), ValidationErrors> {
        validator::Validator::new(self, Some(runner)).run(instance)
    }

    /// Leaf property paths in the order the schema declares them.
    #[must_use]
    pub fn paths(&self) -> Vec<SchemaPath> {
        paths::list_paths(self)
    }
}

fn split_reference(reference: &str) -> (&str, &str) {
    match reference.split_once('#') {
        Some((document, fragment)) => (document, fragment),
        None => (reference, ""),
    }
}

fn absolute_url(base: &str, reference: &str) -> Option<String> {
    if reference.contains("://") {
        return Some(reference.to_string());
    }
    Url::parse(base)
        .and_then(|base| base.join(reference))
        .map(String::from)
        .ok()
}

/// Fetches schema documents and keeps them in a process-wide cache.
#[derive(Debug)]
pub struct SchemaLoader {
    client: reqwest::Client,
    cache: RwLock<HashMap<String, Arc<Value>>>,
}

impl SchemaLoader {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build schema HTTP client")?;
        Ok(Self {
            client,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Make a document available under `url` without fetching it.
    pub async fn register(&self, url: &str, document: Value) {
        let (document_url, _) = split_reference(url);
        self.cache
            .write()
            .await
            .insert(document_url.to_string(), Arc::new(document));
    }

    /// Load a document, serving repeated requests from the cache.
    ///
    /// # Errors
    /// Returns an error if the URL scheme is unsupported or the document is not valid JSON.
    pub async fn fetch(&self, url: &str) -> Result<Arc<Value>, Error> {
        let (document_url, _) = split_reference(url);
        if let Some(document) = self.cache.read().await.get(document_url) {
            return Ok(document.clone());
        }

        debug!("Loading JSON schema from {document_url}");
        let document = Arc::new(
            self.load(document_url)
                .await
                .with_context(|| format!("failed to load JSON schema {document_url}"))?,
        );
        self.cache
            .write()
            .await
            .insert(document_url.to_string(), document.clone());
        Ok(document)
    }

    async fn load(&self, url: &str) -> anyhow::Result<Value> {
        if let Some(path) = url.strip_prefix("file://") {
            let raw = tokio::fs::read_to_string(path).await?;
            return Ok(serde_json::from_str(&raw)?);
        }
        if let Some(encoded) = url.strip_prefix("base64://") {
            let raw = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(encoded))
                .map_err(|err| anyhow!("invalid base64 schema: {err}"))?;
            return Ok(serde_json::from_slice(&raw)?);
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            let document = self
                .client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;
            return Ok(document);
        }
        Err(anyhow!("unsupported schema URL scheme: {url}"))
    }

    /// Load `url` and every document reachable through external `$ref`s.
    ///
    /// # Errors
    /// Returns an error if any referenced document cannot be loaded.
    pub async fn compile(&self, url: &str) -> Result<CompiledSchema, Error> {
        let (root_url, _) = split_reference(url);
        let root = self.fetch(root_url).await?;
        self.compile_documents(root_url.to_string(), root).await
    }

    /// Compile a schema held in memory; external `$ref`s are still fetched.
    ///
    /// # Errors
    /// Returns an error if any referenced document cannot be loaded.
    pub async fn compile_value(&self, name: &str, schema: Value) -> Result<CompiledSchema, Error> {
        self.compile_documents(format!("{INLINE_PREFIX}{name}"), Arc::new(schema))
            .await
    }

    async fn compile_documents(
        &self,
        root_url: String,
        root: Arc<Value>,
    ) -> Result<CompiledSchema, Error> {
        let mut documents = HashMap::new();
        let mut pending = VecDeque::new();
        pending.push_back((root_url.clone(), root));

        while let Some((document_url, document)) = pending.pop_front() {
            let mut references = Vec::new();
            collect_references(&document, &mut references);
            documents.insert(document_url.clone(), document);

            for reference in references {
                let (target, _) = split_reference(&reference);
                if target.is_empty() {
                    continue;
                }
                let Some(target_url) = absolute_url(&document_url, target) else {
                    return Err(Error::Internal(anyhow!(
                        "unresolvable schema reference {reference} in {document_url}"
                    )));
                };
                if documents.contains_key(&target_url)
                    || pending.iter().any(|(url, _)| url == &target_url)
                {
                    continue;
                }
                let loaded = self.fetch(&target_url).await?;
                pending.push_back((target_url, loaded));
            }
        }

        Ok(CompiledSchema {
            root_url,
            documents,
        })
    }
}

fn collect_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "$ref" {
                    if let Some(reference) = child.as_str() {
                        out.push(reference.to_string());
                    }
                } else {
                    collect_references(child, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_references(item, out)),
        _ => {}
    }
}

/// A trait schema known by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySchema {
    pub id: String,
    pub url: String,
}

/// The set of identity trait schemas, one of which is the default for new identities.
#[derive(Debug, Clone)]
pub struct IdentitySchemas {
    default_id: String,
    schemas: Vec<IdentitySchema>,
}

impl IdentitySchemas {
    pub const DEFAULT_ID: &'static str = "default";

    #[must_use]
    pub fn new(default_url: impl Into<String>) -> Self {
        Self {
            default_id: Self::DEFAULT_ID.to_string(),
            schemas: vec![IdentitySchema {
                id: Self::DEFAULT_ID.to_string(),
                url: default_url.into(),
            }],
        }
    }

    #[must_use]
    pub fn with_schema(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        self.schemas.retain(|schema| schema.id != id);
        self.schemas.push(IdentitySchema {
            id,
            url: url.into(),
        });
        self
    }

    /// # Errors
    /// Returns `NotFound` when no schema is registered under `id`.
    pub fn get_by_id(&self, id: &str) -> Result<&IdentitySchema, Error> {
        self.schemas
            .iter()
            .find(|schema| schema.id == id)
            .ok_or(Error::NotFound)
    }

    /// # Errors
    /// Returns `NotFound` if the default schema was removed.
    pub fn default_schema(&self) -> Result<&IdentitySchema, Error> {
        self.get_by_id(&self.default_id)
    }
}
