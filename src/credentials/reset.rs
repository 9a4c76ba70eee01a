use std::fmt;

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};

const TOKEN_BYTES: usize = 32;

/// Plaintext reset token. Only ever handed to the caller for out-of-band
/// delivery; `Debug` is redacted so it cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ResetToken(String);

impl ResetToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ResetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResetToken([REDACTED])")
    }
}

/// A freshly minted reset: the token for the user, the digest and expiry for the store.
#[derive(Debug, Clone)]
pub struct IssuedReset {
    pub token: ResetToken,
    pub digest: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCheck {
    Valid,
    Missing,
    Expired,
    Mismatch,
}

#[derive(Debug, Clone)]
pub struct ResetTokenIssuer {
    ttl: Duration,
}

impl Default for ResetTokenIssuer {
    fn default() -> Self {
        Self::new(Duration::minutes(10))
    }
}

impl ResetTokenIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn issue(&self, now: OffsetDateTime) -> IssuedReset {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        let digest = Self::digest(&token);
        IssuedReset {
            token: ResetToken(token),
            digest,
            expires_at: now + self.ttl,
        }
    }

    /// Unsalted SHA-256, so the digest can be re-derived from a presented token.
    pub fn digest(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn check(
        &self,
        candidate: &str,
        stored_digest: Option<&str>,
        expires_at: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> ResetCheck {
        let (stored_digest, expires_at) = match (stored_digest, expires_at) {
            (Some(d), Some(e)) => (d, e),
            _ => return ResetCheck::Missing,
        };
        let candidate_digest = Self::digest(candidate);
        let matches: bool = candidate_digest
            .as_bytes()
            .ct_eq(stored_digest.as_bytes())
            .into();
        if !matches {
            return ResetCheck::Mismatch;
        }
        if now > expires_at {
            return ResetCheck::Expired;
        }
        ResetCheck::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-01-01 12:00 UTC);

    #[test]
    fn issued_token_has_256_bits_and_is_not_the_digest() {
        let issued = ResetTokenIssuer::default().issue(NOW);
        assert_eq!(issued.token.expose().len(), 64);
        assert!(issued.token.expose().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(issued.token.expose(), issued.digest);
        assert_eq!(issued.digest, ResetTokenIssuer::digest(issued.token.expose()));
        assert_eq!(issued.expires_at, NOW + Duration::minutes(10));
    }

    #[test]
    fn tokens_are_unique() {
        let issuer = ResetTokenIssuer::default();
        let a = issuer.issue(NOW);
        let b = issuer.issue(NOW);
        assert_ne!(a.token, b.token);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn debug_redacts_plaintext() {
        let issued = ResetTokenIssuer::default().issue(NOW);
        let rendered = format!("{:?}", issued);
        assert!(!rendered.contains(issued.token.expose()));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn check_covers_every_outcome() {
        let issuer = ResetTokenIssuer::default();
        let issued = issuer.issue(NOW);
        let token = issued.token.expose();
        let digest = Some(issued.digest.as_str());
        let exp = Some(issued.expires_at);

        assert_eq!(issuer.check(token, digest, exp, NOW), ResetCheck::Valid);
        assert_eq!(
            issuer.check(token, digest, exp, issued.expires_at),
            ResetCheck::Valid
        );
        assert_eq!(
            issuer.check(token, digest, exp, NOW + Duration::minutes(11)),
            ResetCheck::Expired
        );
        assert_eq!(issuer.check("nope", digest, exp, NOW), ResetCheck::Mismatch);
        assert_eq!(issuer.check(token, None, None, NOW), ResetCheck::Missing);
        assert_eq!(issuer.check(token, digest, None, NOW), ResetCheck::Missing);
    }
}
