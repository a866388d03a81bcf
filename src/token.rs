//! Random token generation and hashing shared by sessions, CSRF, recovery and verification.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};

/// Length of recovery and verification link tokens.
///
/// 43 alphanumeric characters carry a little over 256 bits of entropy.
pub const LINK_TOKEN_LENGTH: usize = 43;

/// Create 32 random bytes encoded as unpadded base64url.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_opaque_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Create an alphanumeric token suitable for links sent by email.
#[must_use]
pub fn generate_link_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(LINK_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Hash a token so raw values never touch storage.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
