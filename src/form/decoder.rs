//! Normalizes JSON and `application/x-www-form-urlencoded` bodies into one JSON payload.
//!
//! Form keys are dotted paths (`traits.name.first`). A value of `__object__`
//! creates an empty object unless nested keys already populated it. When the
//! payload schema declares a path's type the value is coerced to it; other
//! values are guessed (numbers, booleans, strings).

use serde_json::{Map, Number, Value};

use crate::{
    schema::{paths::kind_of, CompiledSchema, PathKind, SchemaPath},
    Error,
};

pub const OBJECT_SENTINEL: &str = "__object__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
}

impl BodyKind {
    /// # Errors
    /// Returns `BadRequest` for content types other than JSON and url-encoded forms.
    pub fn from_content_type(content_type: Option<&str>) -> Result<Self, Error> {
        let mime = content_type
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase());
        match mime.as_deref() {
            Some("application/json") => Ok(Self::Json),
            Some("application/x-www-form-urlencoded") | None => Ok(Self::Form),
            Some(other) => Err(Error::BadRequest(format!(
                "unsupported content type {other}"
            ))),
        }
    }
}

/// Decode a request body into canonical JSON, coercing form values by `paths` when given.
///
/// # Errors
/// Returns `BadRequest` for malformed JSON, invalid URL escapes or unparseable declared types.
pub fn decode(
    content_type: Option<&str>,
    body: &[u8],
    paths: Option<&[SchemaPath]>,
) -> Result<Value, Error> {
    match BodyKind::from_content_type(content_type)? {
        BodyKind::Json => decode_json(body),
        BodyKind::Form => decode_form(body, paths.unwrap_or_default()),
    }
}

/// Decode, then validate the payload against `schema`.
///
/// # Errors
/// Returns `BadRequest` on decoding failures and `SchemaValidation` on schema violations.
pub fn decode_validated(
    content_type: Option<&str>,
    body: &[u8],
    schema: &CompiledSchema,
) -> Result<Value, Error> {
    let paths = schema.paths();
    let payload = decode(content_type, body, Some(&paths))?;
    schema.validate(&payload).map_err(Error::SchemaValidation)?;
    Ok(payload)
}

/// # Errors
/// Returns `BadRequest` carrying the parser message for malformed JSON.
pub fn decode_json(body: &[u8]) -> Result<Value, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    let value: Value =
        serde_json::from_slice(body).map_err(|err| Error::BadRequest(err.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(Error::BadRequest("expected a JSON object".to_string()))
    }
}

/// # Errors
/// Returns `BadRequest` for invalid escapes, conflicting keys or unparseable declared types.
pub fn decode_form(body: &[u8], paths: &[SchemaPath]) -> Result<Value, Error> {
    let raw = std::str::from_utf8(body)
        .map_err(|_| Error::BadRequest("request body is not valid UTF-8".to_string()))?;

    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = unescape(key)?;
        let value = unescape(value)?;
        if key.is_empty() {
            continue;
        }
        match grouped.iter_mut().find(|(existing, _)| existing == &key) {
            Some((_, values)) => values.push(value),
            None => grouped.push((key, vec![value])),
        }
    }

    let mut root = Value::Object(Map::new());
    let mut sentinels = Vec::new();
    for (key, values) in grouped {
        let values: Vec<String> = values
            .into_iter()
            .filter(|value| {
                if value == OBJECT_SENTINEL {
                    sentinels.push(key.clone());
                    false
                } else {
                    true
                }
            })
            .collect();
        if values.is_empty() {
            continue;
        }
        let value = coerce(&key, &values, kind_of(paths, &key))?;
        insert(&mut root, &key, value)?;
    }

    for key in sentinels {
        if lookup(&root, &key).is_none() {
            insert(&mut root, &key, Value::Object(Map::new()))?;
        }
    }

    Ok(root)
}

/// Serialize a payload back into the form grammar `decode_form` accepts.
#[must_use]
pub fn encode_form(value: &Value) -> String {
    let mut pairs = Vec::new();
    encode_into(value, "", &mut pairs);
    pairs
        .into_iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                url::form_urlencoded::byte_serialize(key.as_bytes()).collect::<String>(),
                url::form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>()
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_into(value: &Value, prefix: &str, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) if map.is_empty() && !prefix.is_empty() => {
            out.push((prefix.to_string(), OBJECT_SENTINEL.to_string()));
        }
        Value::Object(map) => {
            for (key, child) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                encode_into(child, &name, out);
            }
        }
        Value::String(text) => out.push((prefix.to_string(), text.clone())),
        Value::Number(number) => out.push((prefix.to_string(), number.to_string())),
        Value::Bool(flag) => out.push((prefix.to_string(), flag.to_string())),
        Value::Null | Value::Array(_) => {}
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if text.is_empty() || text.trim() != text {
        return None;
    }
    let number: Number = serde_json::from_str(text).ok()?;
    Some(Value::Number(number))
}

fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn coerce(key: &str, values: &[String], kind: Option<PathKind>) -> Result<Value, Error> {
    let Some(last) = values.last() else {
        return Ok(Value::Null);
    };
    match kind {
        Some(PathKind::String) => Ok(Value::String(last.clone())),
        Some(PathKind::Number | PathKind::Integer) => parse_number(last.trim())
            .ok_or_else(|| Error::BadRequest(format!("cannot parse number for {key}"))),
        Some(PathKind::Boolean) => {
            let mut any = false;
            for value in values {
                match parse_bool(value) {
                    Some(flag) => any |= flag,
                    None => {
                        return Err(Error::BadRequest(format!("cannot parse boolean for {key}")))
                    }
                }
            }
            Ok(Value::Bool(any))
        }
        _ => Ok(parse_number(last)
            .or_else(|| parse_bool(last).map(Value::Bool))
            .unwrap_or_else(|| Value::String(last.clone()))),
    }
}

fn insert(root: &mut Value, key: &str, value: Value) -> Result<(), Error> {
    let segments: Vec<&str> = key.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };
    let mut current = root;
    for segment in parents {
        let Value::Object(map) = current else {
            return Err(conflict(key));
        };
        let next = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !next.is_object() {
            return Err(conflict(key));
        }
        current = next;
    }
    let Value::Object(map) = current else {
        return Err(conflict(key));
    };
    if map.get(*last).is_some_and(Value::is_object) && !value.is_object() {
        return Err(conflict(key));
    }
    map.insert((*last).to_string(), value);
    Ok(())
}

fn lookup<'v>(root: &'v Value, key: &str) -> Option<&'v Value> {
    key.split('.')
        .try_fold(root, |current, segment| current.get(segment))
}

fn conflict(key: &str) -> Error {
    Error::BadRequest(format!("key {key} conflicts with a nested key"))
}

fn unescape(input: &str) -> Result<String, Error> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => {
                out.push(b' ');
                index += 1;
            }
            b'%' => {
                let escape = bytes.get(index + 1..index + 3).and_then(|hex| {
                    std::str::from_utf8(hex)
                        .ok()
                        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                });
                let Some(byte) = escape else {
                    let end = (index + 3).min(bytes.len());
                    return Err(Error::BadRequest(format!(
                        "invalid URL escape \"{}\"",
                        String::from_utf8_lossy(&bytes[index..end])
                    )));
                };
                out.push(byte);
                index += 3;
            }
            other => {
                out.push(other);
                index += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| Error::BadRequest("invalid UTF-8 in URL escape".to_string()))
}
