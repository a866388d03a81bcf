//! RS256 `id_token` verification against a provider's JWKS.

use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;

use super::ProviderError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Find a key by `kid`; a set with a single key matches tokens without one.
    #[must_use]
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|key| key.kid.as_deref() == Some(kid)),
            None if self.keys.len() == 1 => self.keys.first(),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default)]
    pub n: String,
    #[serde(default)]
    pub e: String,
}

impl Jwk {
    /// # Errors
    /// Returns an error for non RSA keys or malformed modulus and exponent.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, ProviderError> {
        if self.kty != "RSA" {
            return Err(ProviderError::IdToken(format!(
                "unsupported key type {}",
                self.kty
            )));
        }
        let n = Base64UrlUnpadded::decode_vec(&self.n)
            .map_err(|_| ProviderError::IdToken("invalid key modulus".to_string()))?;
        let e = Base64UrlUnpadded::decode_vec(&self.e)
            .map_err(|_| ProviderError::IdToken("invalid key exponent".to_string()))?;
        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|err| ProviderError::IdToken(format!("invalid RSA key: {err}")))
    }
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(value) => value == audience,
            Self::Many(values) => values.iter().any(|value| value == audience),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Registered {
    iss: String,
    aud: Audience,
    exp: i64,
}

fn b64d_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, ProviderError> {
    let bytes = Base64UrlUnpadded::decode_vec(segment)
        .map_err(|_| ProviderError::IdToken("invalid base64url encoding".to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| ProviderError::IdToken(err.to_string()))
}

/// Verify the signature and the `iss`, `aud` and `exp` claims; return all claims.
///
/// # Errors
/// Returns `IssuerMismatch` for a foreign issuer and `IdToken` for everything else.
pub fn verify_id_token(
    token: &str,
    jwks: &Jwks,
    issuer: &str,
    audience: &str,
    now_unix_seconds: i64,
) -> Result<Map<String, Value>, ProviderError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProviderError::IdToken("malformed token".to_string()));
    };

    let header: Header = b64d_json(header_b64)?;
    if header.alg != "RS256" {
        return Err(ProviderError::IdToken(format!(
            "unsupported algorithm {}",
            header.alg
        )));
    }
    let jwk = jwks
        .find(header.kid.as_deref())
        .ok_or_else(|| ProviderError::IdToken("no matching signing key".to_string()))?;

    let verifying_key = VerifyingKey::<Sha256>::new(jwk.to_rsa_public_key()?);
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64)
        .map_err(|_| ProviderError::IdToken("invalid base64url encoding".to_string()))?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| ProviderError::IdToken("invalid signature".to_string()))?;
    verifying_key
        .verify(format!("{header_b64}.{claims_b64}").as_bytes(), &signature)
        .map_err(|_| ProviderError::IdToken("invalid signature".to_string()))?;

    let claims: Map<String, Value> = b64d_json(claims_b64)?;
    let registered: Registered = serde_json::from_value(Value::Object(claims.clone()))
        .map_err(|err| ProviderError::IdToken(err.to_string()))?;
    if registered.iss.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(ProviderError::IssuerMismatch {
            expected: issuer.to_string(),
            actual: registered.iss,
        });
    }
    if !registered.aud.contains(audience) {
        return Err(ProviderError::IdToken("invalid audience".to_string()));
    }
    if registered.exp <= now_unix_seconds {
        return Err(ProviderError::IdToken("token expired".to_string()));
    }
    Ok(claims)
}
