use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::ValidationError;

/// Case-insensitive, email-shaped ownership key of a credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        lazy_static! {
            static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
        }
        let normalized = raw.trim().to_lowercase();
        if !EMAIL_RE.is_match(&normalized) {
            return Err(ValidationError::InvalidIdentity);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

/// Which columns a read returns. Secret fields require the explicit opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    Public,
    WithSecrets,
}

/// Hidden fields of a credential, loaded only with `Projection::WithSecrets`.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSecrets {
    pub password_digest: String,
    pub reset_digest: Option<String>,
}

impl fmt::Debug for CredentialSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSecrets")
            .field("password_digest", &"[REDACTED]")
            .field("reset_digest", &self.reset_digest.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// One credential per identity.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub identity: Identity,
    pub password_changed_at: Option<OffsetDateTime>,
    pub reset_expires_at: Option<OffsetDateTime>,
    pub active: bool,
    pub created_at: OffsetDateTime,
    #[serde(skip)]
    pub secrets: Option<CredentialSecrets>,
}

impl CredentialRecord {
    /// Drops secret fields unless the caller asked for them.
    pub fn project(mut self, projection: Projection) -> Self {
        if projection == Projection::Public {
            self.secrets = None;
        }
        self
    }

    #[cfg(test)]
    pub fn has_pending_reset(&self) -> bool {
        self.reset_expires_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CredentialRecord {
        CredentialRecord {
            id: Uuid::new_v4(),
            identity: Identity::parse("a@x.com").unwrap(),
            password_changed_at: None,
            reset_expires_at: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
            secrets: Some(CredentialSecrets {
                password_digest: "$argon2id$secret".into(),
                reset_digest: Some("deadbeef".into()),
            }),
        }
    }

    #[test]
    fn identity_is_case_insensitive_and_trimmed() {
        let a = Identity::parse("  A@X.com ").unwrap();
        let b = Identity::parse("a@x.COM").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "a@x.com");
    }

    #[test]
    fn identity_rejects_non_email() {
        assert_eq!(
            Identity::parse("not-an-email").unwrap_err(),
            ValidationError::InvalidIdentity
        );
        assert!(Identity::parse("").is_err());
    }

    #[test]
    fn public_projection_strips_secrets() {
        assert!(record().project(Projection::Public).secrets.is_none());
        assert!(record().project(Projection::WithSecrets).secrets.is_some());
    }

    #[test]
    fn serialization_never_includes_digests() {
        let json = serde_json::to_string(&record()).unwrap();
        assert!(json.contains("a@x.com"));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("deadbeef"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", record());
        assert!(!rendered.contains("argon2"));
        assert!(!rendered.contains("deadbeef"));
    }
}
