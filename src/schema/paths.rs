use serde_json::{Map, Value};

use super::{
    extension::{ExtensionConfig, EXTENSION_KEY},
    CompiledSchema,
};

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Unknown,
}

impl PathKind {
    fn from_schema(keywords: &Map<String, Value>) -> Self {
        let declared = match keywords.get("type") {
            Some(Value::String(name)) => Some(name.as_str()),
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .find(|name| *name != "null"),
            _ => None,
        };
        match declared {
            Some("string") => Self::String,
            Some("number") => Self::Number,
            Some("integer") => Self::Integer,
            Some("boolean") => Self::Boolean,
            Some("array") => Self::Array,
            Some("object") => Self::Object,
            _ => Self::Unknown,
        }
    }
}

/// A leaf property of a schema, named by its dotted path.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaPath {
    pub name: String,
    pub kind: PathKind,
    pub format: Option<String>,
    pub required: bool,
    pub extension: ExtensionConfig,
}

pub(crate) fn list_paths(schema: &CompiledSchema) -> Vec<SchemaPath> {
    let mut out = Vec::new();
    walk(
        schema,
        schema.root(),
        schema.root_url(),
        "",
        false,
        0,
        &mut out,
    );
    out
}

fn walk(
    compiled: &CompiledSchema,
    schema: &Value,
    base: &str,
    name: &str,
    required: bool,
    depth: usize,
    out: &mut Vec<SchemaPath>,
) {
    if depth > MAX_DEPTH {
        return;
    }
    let Some(keywords) = schema.as_object() else {
        return;
    };

    if let Some(reference) = keywords.get("$ref").and_then(Value::as_str) {
        if let Some((target_base, target)) = compiled.resolve(base, reference) {
            walk(compiled, target, &target_base, name, required, depth + 1, out);
        }
        return;
    }

    let properties = keywords.get("properties").and_then(Value::as_object);
    let composed = keywords.get("allOf").and_then(Value::as_array);
    let kind = PathKind::from_schema(keywords);

    if properties.is_none() && composed.is_none() {
        if !name.is_empty() && kind != PathKind::Object {
            push(out, name, kind, keywords, required);
        }
        return;
    }

    if let Some(properties) = properties {
        let required_names: Vec<&str> = keywords
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        for (property, sub) in properties {
            let child = if name.is_empty() {
                property.clone()
            } else {
                format!("{name}.{property}")
            };
            let child_required = required_names.contains(&property.as_str());
            walk(compiled, sub, base, &child, child_required, depth + 1, out);
        }
    }

    if let Some(composed) = composed {
        for sub in composed {
            walk(compiled, sub, base, name, required, depth + 1, out);
        }
    }
}

fn push(
    out: &mut Vec<SchemaPath>,
    name: &str,
    kind: PathKind,
    keywords: &Map<String, Value>,
    required: bool,
) {
    let extension = keywords
        .get(EXTENSION_KEY)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default();
    let format = keywords
        .get("format")
        .and_then(Value::as_str)
        .map(str::to_string);

    match out.iter_mut().find(|path| path.name == name) {
        Some(existing) => {
            existing.required |= required;
            if existing.kind == PathKind::Unknown {
                existing.kind = kind;
            }
        }
        None => out.push(SchemaPath {
            name: name.to_string(),
            kind,
            format,
            required,
            extension,
        }),
    }
}

/// Find the declared kind of a dotted path.
#[must_use]
pub fn kind_of(paths: &[SchemaPath], name: &str) -> Option<PathKind> {
    paths
        .iter()
        .find(|path| path.name == name)
        .map(|path| path.kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaLoader;
    use serde_json::json;

    #[tokio::test]
    async fn lists_leaves_in_declaration_order() -> anyhow::Result<()> {
        let loader = SchemaLoader::new()?;
        loader
            .register(
                "https://schemas.test/identity.json",
                json!({
                    "type": "object",
                    "properties": {
                        "email": {
                            "type": "string",
                            "format": "email",
                            "ory.sh/kratos": { "credentials": { "password": { "identifier": true } } }
                        },
                        "name": {
                            "type": "object",
                            "properties": {
                                "last": { "type": "string" },
                                "first": { "type": "string" }
                            }
                        },
                        "age": { "type": "integer" },
                        "newsletter": { "type": "boolean" }
                    },
                    "required": ["email"]
                }),
            )
            .await;
        let compiled = loader
            .compile_value(
                "payload",
                json!({
                    "type": "object",
                    "properties": {
                        "password": { "type": "string" },
                        "traits": { "$ref": "https://schemas.test/identity.json" }
                    },
                    "required": ["password", "traits"]
                }),
            )
            .await?;

        let paths = compiled.paths();
        let names: Vec<&str> = paths.iter().map(|path| path.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "password",
                "traits.email",
                "traits.name.last",
                "traits.name.first",
                "traits.age",
                "traits.newsletter"
            ]
        );
        assert!(paths[0].required);
        assert!(paths[1].required);
        assert!(paths[1].extension.is_password_identifier());
        assert_eq!(paths[1].format.as_deref(), Some("email"));
        assert!(!paths[2].required);
        assert_eq!(kind_of(&paths, "traits.age"), Some(PathKind::Integer));
        assert_eq!(kind_of(&paths, "traits.newsletter"), Some(PathKind::Boolean));
        assert_eq!(kind_of(&paths, "traits.missing"), None);
        Ok(())
    }
}
