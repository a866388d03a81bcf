//! HTML form model rendered by the UI for every flow method.
//!
//! Forms are derived from JSON schemas, re-populated with submitted values
//! after an error, and carry per-field and form-level messages.

pub mod decoder;
pub mod message;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    schema::{PathKind, SchemaPath, ValidationErrorKind, ValidationErrors},
    Error,
};

pub use message::{Message, MessageType};

pub const CSRF_FIELD: &str = "csrf_token";
pub const PASSWORD_FIELD: &str = "password";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Checkbox,
    Email,
    Hidden,
    Password,
}

impl FieldType {
    #[must_use]
    pub fn from_path(path: &SchemaPath) -> Self {
        match path.kind {
            PathKind::Number | PathKind::Integer => Self::Number,
            PathKind::Boolean => Self::Checkbox,
            PathKind::String if path.format.as_deref() == Some("email") => Self::Email,
            _ => Self::Text,
        }
    }
}

/// Scalar value of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Convert a submitted JSON value into the representation `field_type` renders.
    #[must_use]
    pub fn coerce(field_type: FieldType, value: &Value) -> Self {
        match (field_type, value) {
            (_, Value::Null) => Self::Null,
            (FieldType::Checkbox, Value::Bool(flag)) => Self::Bool(*flag),
            (FieldType::Checkbox, Value::String(text)) => {
                Self::Bool(text.eq_ignore_ascii_case("true"))
            }
            (FieldType::Number, Value::Number(number)) => number
                .as_i64()
                .map(Self::Int)
                .or_else(|| number.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            (FieldType::Number, Value::String(text)) => text
                .parse::<i64>()
                .map(Self::Int)
                .or_else(|_| text.parse::<f64>().map(Self::Float))
                .unwrap_or_else(|_| Self::Text(text.clone())),
            (_, Value::String(text)) => Self::Text(text.clone()),
            (_, other) => Self::from_json(other),
        }
    }

    /// Natural representation of a JSON value without a declared field type.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => number
                .as_i64()
                .map(Self::Int)
                .or_else(|| number.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Value::String(text) => Self::Text(text.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    fn field_type(&self) -> FieldType {
        match self {
            Self::Bool(_) => FieldType::Checkbox,
            Self::Int(_) | Self::Float(_) => FieldType::Number,
            Self::Null | Self::Text(_) => FieldType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            value: None,
            required: false,
            disabled: false,
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: FieldValue) -> Self {
        self.value = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HtmlForm {
    pub action: String,
    pub method: String,
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

impl HtmlForm {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            method: "POST".to_string(),
            fields: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Build a form with one field per schema leaf, names prefixed with `prefix`.
    pub fn from_schema_paths(
        action: impl Into<String>,
        paths: &[SchemaPath],
        prefix: &str,
    ) -> Self {
        let mut form = Self::new(action);
        for path in paths {
            let mut field = Field::new(prefixed(prefix, &path.name), FieldType::from_path(path));
            field.required = path.required;
            form.set_field(field);
        }
        form
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|field| field.name == name)
    }

    /// Insert `field`, replacing any existing field with the same name in place.
    pub fn set_field(&mut self, field: Field) {
        match self.field_mut(&field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Set a field's value; the last write wins. Unknown names add a field.
    pub fn set_value(&mut self, name: &str, value: FieldValue) {
        match self.field_mut(name) {
            Some(field) => field.value = Some(value),
            None => {
                let field_type = value.field_type();
                self.fields.push(Field::new(name, field_type).with_value(value));
            }
        }
    }

    /// Add or refresh the hidden CSRF field.
    pub fn set_csrf(&mut self, token: &str) {
        self.set_field(
            Field::new(CSRF_FIELD, FieldType::Hidden)
                .required()
                .with_value(FieldValue::Text(token.to_string())),
        );
    }

    /// Clear values and messages everywhere.
    pub fn reset(&mut self) {
        self.messages.clear();
        for field in &mut self.fields {
            field.value = None;
            field.messages.clear();
        }
    }

    /// Attach a message to a field, or to the form when `field` is empty or unknown.
    pub fn add_message(&mut self, message: Message, field: &str) {
        match self.field_mut(field) {
            Some(target) if !field.is_empty() => target.messages.push(message),
            _ => self.messages.push(message),
        }
    }

    /// Re-populate fields from a submitted payload.
    ///
    /// Passwords, the CSRF token and every key listed in `ignore` are never echoed.
    pub fn set_values_from_json(&mut self, payload: &Value, ignore: &[&str]) {
        let mut flat = Vec::new();
        flatten(payload, "", &mut flat);
        for (name, value) in flat {
            if name == PASSWORD_FIELD
                || name == CSRF_FIELD
                || name.ends_with(".password")
                || ignore.contains(&name.as_str())
            {
                continue;
            }
            let coerced = match self.field(&name) {
                Some(field) => FieldValue::coerce(field.field_type, &value),
                None => FieldValue::from_json(&value),
            };
            self.set_value(&name, coerced);
        }
    }

    /// Render a domain error into the form.
    ///
    /// # Errors
    /// Hands the error back when it cannot be presented as a form message.
    pub fn parse_error(&mut self, err: Error) -> Result<(), Error> {
        match err {
            Error::SchemaValidation(errors) => {
                self.add_validation_errors(&errors);
                Ok(())
            }
            Error::InvalidCredentials => {
                self.add_message(Message::invalid_credentials(), "");
                Ok(())
            }
            Error::DuplicateIdentifier => {
                self.add_message(Message::duplicate_identifier(), "");
                Ok(())
            }
            Error::PasswordPolicy(reason) => {
                self.add_message(Message::password_policy(&reason), PASSWORD_FIELD);
                Ok(())
            }
            Error::Provider(err) => {
                self.add_message(Message::provider(err.user_message()), "");
                Ok(())
            }
            Error::BadRequest(reason) => {
                self.add_message(Message::bad_request(&reason), "");
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Attach schema validation errors by pointer.
    pub fn add_validation_errors(&mut self, errors: &ValidationErrors) {
        for err in errors.iter() {
            let base = pointer_to_path(&err.pointer);
            match &err.kind {
                ValidationErrorKind::Required { missing } => {
                    for property in missing {
                        let name = prefixed(&base, property);
                        self.add_message(Message::missing_property(property), &name);
                    }
                }
                ValidationErrorKind::Constraint => {
                    self.add_message(Message::validation(err.message.clone()), &base);
                }
            }
        }
    }

    /// Order fields: CSRF token, `identifier`, schema properties in declaration order,
    /// `password`, then everything else in its current order.
    pub fn sort_by_schema(&mut self, paths: &[SchemaPath], prefix: &str) {
        let order: Vec<String> = paths
            .iter()
            .map(|path| prefixed(prefix, &path.name))
            .collect();
        let rank = |name: &str| -> usize {
            if name == CSRF_FIELD {
                return 0;
            }
            if name == "identifier" {
                return 1;
            }
            if let Some(position) = order.iter().position(|candidate| candidate == name) {
                return 2 + position;
            }
            if name == PASSWORD_FIELD {
                return 2 + order.len();
            }
            3 + order.len()
        };
        self.fields.sort_by_key(|field| rank(&field.name));
    }
}

fn prefixed(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// `#/traits/email` and `/traits/email` both become `traits.email`.
#[must_use]
pub fn pointer_to_path(pointer: &str) -> String {
    pointer
        .trim_start_matches('#')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect::<Vec<_>>()
        .join(".")
}

fn flatten(value: &Value, prefix: &str, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(child, &prefixed(prefix, key), out);
            }
        }
        other if !prefix.is_empty() => out.push((prefix.to_string(), other.clone())),
        _ => {}
    }
}
