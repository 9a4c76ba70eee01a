use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::error;

use super::error::HashError;

/// Argon2id cost parameters (memory in KiB, iterations, lanes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    // OWASP recommended baseline for Argon2id: m=19 MiB, t=2, p=1
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// One-way salted password hashing. The salt travels inside the PHC string,
/// so nothing besides the digest needs to be stored.
#[derive(Debug, Clone)]
pub struct SecretHasher {
    params: Params,
}

impl SecretHasher {
    pub fn new(cost: HashCost) -> Result<Self, HashError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| HashError::InvalidParams(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, plain: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                HashError::Hashing(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Returns `Ok(false)` on a wrong password; errors only when `digest`
    /// itself cannot be parsed.
    pub fn verify(&self, plain: &str, digest: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(digest).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            HashError::MalformedDigest(e.to_string())
        })?;
        // The digest carries its own parameters, so older cost settings still verify.
        Ok(self
            .argon2()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }

    pub async fn hash_async(&self, plain: &str) -> Result<String, HashError> {
        let hasher = self.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&plain)).await?
    }

    pub async fn verify_async(&self, plain: &str, digest: &str) -> Result<bool, HashError> {
        let hasher = self.clone();
        let plain = plain.to_owned();
        let digest = digest.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&plain, &digest)).await?
    }
}

#[cfg(test)]
pub(crate) fn cheap_hasher() -> SecretHasher {
    SecretHasher::new(HashCost {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .expect("cheap params are valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = cheap_hasher();
        let password = "Secur3P@ssw0rd!";
        let hash = hasher.hash(password).expect("hashing should succeed");
        assert_ne!(hash, password);
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = cheap_hasher();
        let hash = hasher
            .hash("correct-horse-battery-staple")
            .expect("hashing should succeed");
        assert!(!hasher
            .verify("wrong-password", &hash)
            .expect("verify should not error"));
    }

    #[test]
    fn same_password_hashes_differently() {
        let hasher = cheap_hasher();
        let a = hasher.hash("longEnough1").unwrap();
        let b = hasher.hash("longEnough1").unwrap();
        assert_ne!(a, b);
        assert!(hasher.verify("longEnough1", &a).unwrap());
        assert!(hasher.verify("longEnough1", &b).unwrap());
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = cheap_hasher()
            .verify("anything", "not-a-valid-hash")
            .unwrap_err();
        assert!(matches!(err, HashError::MalformedDigest(_)));
    }

    #[test]
    fn default_cost_is_the_strong_baseline() {
        let cost = HashCost::default();
        assert!(cost.memory_kib >= 19456);
        assert!(cost.iterations >= 2);
        assert!(SecretHasher::new(cost).is_ok());
    }

    #[test]
    fn rejects_invalid_params() {
        let err = SecretHasher::new(HashCost {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        })
        .unwrap_err();
        assert!(matches!(err, HashError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn async_wrappers_match_sync_behaviour() {
        let hasher = cheap_hasher();
        let hash = hasher.hash_async("longEnough1").await.unwrap();
        assert!(hasher.verify_async("longEnough1", &hash).await.unwrap());
        assert!(!hasher.verify_async("wrong", &hash).await.unwrap());
    }
}
