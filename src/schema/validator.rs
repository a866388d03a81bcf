//! Draft-7 style validation over the keyword subset identity schemas use.

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::{
    extension::{ExtensionConfig, ExtensionRunner, EXTENSION_KEY},
    CompiledSchema, ValidationError, ValidationErrors,
};

const MAX_DEPTH: usize = 64;

pub(crate) struct Validator<'a> {
    schema: &'a CompiledSchema,
    runner: Option<&'a mut dyn ExtensionRunner>,
    errors: Vec<ValidationError>,
}

impl<'a> Validator<'a> {
    pub(crate) fn new(
        schema: &'a CompiledSchema,
        runner: Option<&'a mut dyn ExtensionRunner>,
    ) -> Self {
        Self {
            schema,
            runner,
            errors: Vec::new(),
        }
    }

    pub(crate) fn run(mut self, instance: &Value) -> Result<(), ValidationErrors> {
        let compiled = self.schema;
        self.check(compiled.root(), compiled.root_url(), instance, "", 0);
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors::from(self.errors))
        }
    }

    fn error(&mut self, pointer: &str, message: impl Into<String>) {
        self.errors.push(ValidationError::new(pointer, message));
    }

    fn check(&mut self, schema: &Value, base: &str, instance: &Value, pointer: &str, depth: usize) {
        if depth > MAX_DEPTH {
            self.error(pointer, "schema nesting is too deep");
            return;
        }

        let keywords = match schema {
            Value::Bool(true) => return,
            Value::Bool(false) => {
                self.error(pointer, "not allowed");
                return;
            }
            Value::Object(keywords) => keywords,
            _ => return,
        };

        if let Some(reference) = keywords.get("$ref").and_then(Value::as_str) {
            let compiled = self.schema;
            match compiled.resolve(base, reference) {
                Some((target_base, target)) => {
                    self.check(target, &target_base, instance, pointer, depth + 1);
                }
                None => self.error(pointer, format!("unresolvable reference {reference}")),
            }
        }

        if let Some(extension) = keywords.get(EXTENSION_KEY) {
            self.run_extension(extension, instance, pointer);
        }

        if let Some(expected) = keywords.get("type") {
            if !matches_type(expected, instance) {
                self.error(
                    pointer,
                    format!(
                        "expected {}, but got {}",
                        describe_type(expected),
                        type_name(instance)
                    ),
                );
                return;
            }
        }

        if let Some(allowed) = keywords.get("enum").and_then(Value::as_array) {
            if !allowed.iter().any(|candidate| candidate == instance) {
                let rendered = allowed
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                self.error(pointer, format!("value must be one of {rendered}"));
            }
        }

        if let Some(constant) = keywords.get("const") {
            if constant != instance {
                self.error(pointer, format!("value must be {constant}"));
            }
        }

        match instance {
            Value::String(text) => self.check_string(keywords, text, pointer),
            Value::Number(_) => self.check_number(keywords, instance, pointer),
            Value::Object(object) => self.check_object(keywords, base, object, pointer, depth),
            Value::Array(items) => self.check_array(keywords, base, items, pointer, depth),
            _ => {}
        }

        if let Some(all_of) = keywords.get("allOf").and_then(Value::as_array) {
            for sub in all_of {
                self.check(sub, base, instance, pointer, depth + 1);
            }
        }

        if let Some(any_of) = keywords.get("anyOf").and_then(Value::as_array) {
            let matched = self.first_match(any_of, base, instance, pointer, depth);
            match matched {
                Some(sub) => self.check(sub, base, instance, pointer, depth + 1),
                None => self.error(pointer, "value does not match any of the allowed schemas"),
            }
        }

        if let Some(one_of) = keywords.get("oneOf").and_then(Value::as_array) {
            let matches: Vec<&Value> = one_of
                .iter()
                .filter(|sub| self.is_valid(sub, base, instance, pointer, depth))
                .collect();
            match matches.as_slice() {
                [sub] => self.check(sub, base, instance, pointer, depth + 1),
                [] => self.error(pointer, "value does not match any of the allowed schemas"),
                _ => self.error(pointer, "value matches more than one of the allowed schemas"),
            }
        }
    }

    fn run_extension(&mut self, extension: &Value, instance: &Value, pointer: &str) {
        let Some(runner) = self.runner.as_mut() else {
            return;
        };
        let config = match serde_json::from_value::<ExtensionConfig>(extension.clone()) {
            Ok(config) => config,
            Err(err) => {
                debug!("Ignoring malformed {EXTENSION_KEY} extension at {pointer}: {err}");
                return;
            }
        };
        if let Err(message) = runner.run(&config, instance, pointer) {
            self.error(pointer, message);
        }
    }

    /// Evaluate a sub-schema without recording errors or running the extension.
    fn is_valid(
        &mut self,
        schema: &Value,
        base: &str,
        instance: &Value,
        pointer: &str,
        depth: usize,
    ) -> bool {
        let runner = self.runner.take();
        let saved = std::mem::take(&mut self.errors);
        self.check(schema, base, instance, pointer, depth + 1);
        let valid = self.errors.is_empty();
        self.errors = saved;
        self.runner = runner;
        valid
    }

    fn first_match<'v>(
        &mut self,
        candidates: &'v [Value],
        base: &str,
        instance: &Value,
        pointer: &str,
        depth: usize,
    ) -> Option<&'v Value> {
        candidates
            .iter()
            .find(|sub| self.is_valid(sub, base, instance, pointer, depth))
    }

    fn check_string(&mut self, keywords: &Map<String, Value>, text: &str, pointer: &str) {
        let length = text.chars().count() as u64;
        if let Some(min) = keywords.get("minLength").and_then(Value::as_u64) {
            if length < min {
                self.error(pointer, format!("length must be >= {min}, but got {length}"));
            }
        }
        if let Some(max) = keywords.get("maxLength").and_then(Value::as_u64) {
            if length > max {
                self.error(pointer, format!("length must be <= {max}, but got {length}"));
            }
        }
        if let Some(pattern) = keywords.get("pattern").and_then(Value::as_str) {
            match Regex::new(pattern) {
                Ok(regex) if regex.is_match(text) => {}
                Ok(_) => self.error(pointer, format!("does not match pattern \"{pattern}\"")),
                Err(err) => self.error(pointer, format!("invalid pattern \"{pattern}\": {err}")),
            }
        }
        if let Some(format) = keywords.get("format").and_then(Value::as_str) {
            if !matches_format(format, text) {
                self.error(pointer, format!("\"{text}\" is not valid \"{format}\""));
            }
        }
    }

    fn check_number(&mut self, keywords: &Map<String, Value>, instance: &Value, pointer: &str) {
        let Some(value) = instance.as_f64() else {
            return;
        };
        if let Some(min) = keywords.get("minimum").and_then(Value::as_f64) {
            if value < min {
                self.error(pointer, format!("must be >= {min} but found {instance}"));
            }
        }
        if let Some(max) = keywords.get("maximum").and_then(Value::as_f64) {
            if value > max {
                self.error(pointer, format!("must be <= {max} but found {instance}"));
            }
        }
        if let Some(min) = keywords.get("exclusiveMinimum").and_then(Value::as_f64) {
            if value <= min {
                self.error(pointer, format!("must be > {min} but found {instance}"));
            }
        }
        if let Some(max) = keywords.get("exclusiveMaximum").and_then(Value::as_f64) {
            if value >= max {
                self.error(pointer, format!("must be < {max} but found {instance}"));
            }
        }
    }

    fn check_object(
        &mut self,
        keywords: &Map<String, Value>,
        base: &str,
        object: &Map<String, Value>,
        pointer: &str,
        depth: usize,
    ) {
        if let Some(required) = keywords.get("required").and_then(Value::as_array) {
            let missing: Vec<String> = required
                .iter()
                .filter_map(Value::as_str)
                .filter(|name| !object.contains_key(*name))
                .map(str::to_string)
                .collect();
            if !missing.is_empty() {
                self.errors.push(ValidationError::required(pointer, missing));
            }
        }

        let properties = keywords.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (name, sub) in properties {
                if let Some(child) = object.get(name) {
                    let child_pointer = format!("{pointer}/{}", escape_pointer(name));
                    self.check(sub, base, child, &child_pointer, depth + 1);
                }
            }
        }

        if let Some(additional) = keywords.get("additionalProperties") {
            let extras = object
                .iter()
                .filter(|(name, _)| properties.map_or(true, |props| !props.contains_key(*name)));
            for (name, child) in extras {
                let child_pointer = format!("{pointer}/{}", escape_pointer(name));
                match additional {
                    Value::Bool(false) => {
                        self.error(
                            pointer,
                            format!("additionalProperties \"{name}\" not allowed"),
                        );
                    }
                    Value::Object(_) => {
                        self.check(additional, base, child, &child_pointer, depth + 1);
                    }
                    _ => {}
                }
            }
        }
    }

    fn check_array(
        &mut self,
        keywords: &Map<String, Value>,
        base: &str,
        items: &[Value],
        pointer: &str,
        depth: usize,
    ) {
        let count = items.len() as u64;
        if let Some(min) = keywords.get("minItems").and_then(Value::as_u64) {
            if count < min {
                self.error(
                    pointer,
                    format!("minimum {min} items allowed, but found {count} items"),
                );
            }
        }
        if let Some(max) = keywords.get("maxItems").and_then(Value::as_u64) {
            if count > max {
                self.error(
                    pointer,
                    format!("maximum {max} items allowed, but found {count} items"),
                );
            }
        }
        if let Some(item_schema) = keywords.get("items") {
            for (index, item) in items.iter().enumerate() {
                let child_pointer = format!("{pointer}/{index}");
                self.check(item_schema, base, item, &child_pointer, depth + 1);
            }
        }
    }
}

fn matches_type(expected: &Value, instance: &Value) -> bool {
    match expected {
        Value::String(name) => matches_type_name(name, instance),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| matches_type_name(name, instance)),
        _ => true,
    }
}

fn matches_type_name(name: &str, instance: &Value) -> bool {
    match name {
        "null" => instance.is_null(),
        "boolean" => instance.is_boolean(),
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "number" => instance.is_number(),
        "integer" => {
            instance.is_i64()
                || instance.is_u64()
                || instance.as_f64().is_some_and(|value| value.fract() == 0.0)
        }
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

pub(crate) fn type_name(instance: &Value) -> &'static str {
    match instance {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(number) if number.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_format(format: &str, text: &str) -> bool {
    match format {
        "email" => Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
            .is_ok_and(|regex| regex.is_match(text)),
        "uri" => Url::parse(text).is_ok(),
        "date-time" => chrono::DateTime::parse_from_rfc3339(text).is_ok(),
        _ => true,
    }
}

pub(crate) fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaLoader, ValidationErrorKind};
    use serde_json::json;

    async fn compile(schema: Value) -> anyhow::Result<CompiledSchema> {
        Ok(SchemaLoader::new()?.compile_value("test", schema).await?)
    }

    fn pointers(result: Result<(), ValidationErrors>) -> Vec<String> {
        result
            .err()
            .map(|errors| errors.iter().map(|err| err.pointer.clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn reports_type_and_format_errors_with_pointers() -> anyhow::Result<()> {
        let schema = compile(json!({
            "type": "object",
            "properties": {
                "email": { "type": "string", "format": "email" },
                "age": { "type": "integer", "minimum": 18 }
            }
        }))
        .await?;

        assert!(schema.validate(&json!({ "email": "a@b.co", "age": 30 })).is_ok());
        assert_eq!(
            pointers(schema.validate(&json!({ "email": "nope", "age": "old" }))),
            vec!["/email".to_string(), "/age".to_string()]
        );
        assert_eq!(pointers(schema.validate(&json!({ "age": 3 }))), vec!["/age".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn required_lists_every_missing_property() -> anyhow::Result<()> {
        let schema = compile(json!({
            "type": "object",
            "required": ["password", "traits"],
            "properties": { "password": { "type": "string", "minLength": 1 } }
        }))
        .await?;

        let errors = schema.validate(&json!({})).err().unwrap_or_default();
        let kinds: Vec<_> = errors.iter().map(|err| err.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![ValidationErrorKind::Required {
                missing: vec!["password".to_string(), "traits".to_string()]
            }]
        );

        let errors = schema
            .validate(&json!({ "password": "", "traits": {} }))
            .err()
            .unwrap_or_default();
        assert_eq!(errors.len(), 1);
        assert!(errors.iter().all(|err| err.message == "length must be >= 1, but got 0"));
        Ok(())
    }

    #[tokio::test]
    async fn follows_local_definitions() -> anyhow::Result<()> {
        let schema = compile(json!({
            "definitions": {
                "name": { "type": "string", "pattern": "^[a-z]+$" }
            },
            "type": "object",
            "properties": { "first": { "$ref": "#/definitions/name" } },
            "additionalProperties": false
        }))
        .await?;

        assert!(schema.validate(&json!({ "first": "alice" })).is_ok());
        assert_eq!(
            pointers(schema.validate(&json!({ "first": "Alice" }))),
            vec!["/first".to_string()]
        );
        assert_eq!(
            pointers(schema.validate(&json!({ "first": "alice", "other": 1 }))),
            vec![String::new()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn any_of_accepts_one_branch() -> anyhow::Result<()> {
        let schema = compile(json!({
            "anyOf": [{ "type": "string" }, { "type": "integer" }]
        }))
        .await?;
        assert!(schema.validate(&json!("x")).is_ok());
        assert!(schema.validate(&json!(3)).is_ok());
        assert!(schema.validate(&json!(true)).is_err());
        Ok(())
    }

    struct Recorder(Vec<(String, Value)>);

    impl ExtensionRunner for Recorder {
        fn run(
            &mut self,
            config: &ExtensionConfig,
            instance: &Value,
            pointer: &str,
        ) -> Result<(), String> {
            if config.is_password_identifier() {
                self.0.push((pointer.to_string(), instance.clone()));
            }
            if instance == &json!("forbidden") {
                return Err("value is reserved".to_string());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn extension_runner_sees_annotated_locations() -> anyhow::Result<()> {
        let schema = compile(json!({
            "type": "object",
            "properties": {
                "email": {
                    "type": "string",
                    "ory.sh/kratos": { "credentials": { "password": { "identifier": true } } }
                },
                "nick": { "type": "string" }
            }
        }))
        .await?;

        let mut recorder = Recorder(Vec::new());
        schema.validate_with(&json!({ "email": "a@b.co", "nick": "x" }), &mut recorder)?;
        assert_eq!(recorder.0, vec![("/email".to_string(), json!("a@b.co"))]);

        let result = schema.validate_with(&json!({ "email": "forbidden" }), &mut recorder);
        assert_eq!(pointers(result), vec!["/email".to_string()]);
        Ok(())
    }

    #[test]
    fn escapes_pointer_segments() {
        assert_eq!(escape_pointer("a/b~c"), "a~1b~0c");
    }
}
