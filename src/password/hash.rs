//! Argon2id password hashing.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{PasswordHash, SaltString},
    Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version,
};
use rand::rngs::OsRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Hasher {
    params: Params,
}

impl Hasher {
    /// # Errors
    /// Returns an error if the Argon2 parameters are out of range.
    pub fn new(config: HashConfig) -> Result<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password into a PHC string.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash password"))?
            .to_string();
        Ok(hash)
    }

    /// Compare a password against a stored PHC string. Parameters come from the hash itself.
    #[must_use]
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        PasswordHash::new(stored).is_ok_and(|parsed| {
            self.argon2()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> HashConfig {
        HashConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn hash_and_verify_round_trip() -> Result<()> {
        let hasher = Hasher::new(fast())?;
        let hash = hasher.hash("corr3ct-horse-batt3ry")?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("corr3ct-horse-batt3ry", &hash));
        assert!(!hasher.verify("wrong", &hash));
        assert!(!hasher.verify("corr3ct-horse-batt3ry", "not-a-phc-string"));
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_params() {
        let config = HashConfig {
            memory_kib: 1,
            iterations: 0,
            parallelism: 0,
        };
        assert!(Hasher::new(config).is_err());
    }
}
