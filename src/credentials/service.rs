use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::{
    clock::Clock,
    error::{CredentialError, ValidationError},
    filter::ActiveFilter,
    hasher::SecretHasher,
    record::{CredentialRecord, Identity, Projection},
    reset::{IssuedReset, ResetCheck, ResetToken, ResetTokenIssuer},
    store::CredentialStore,
};

/// Lifecycle policy knobs.
#[derive(Debug, Clone)]
pub struct CredentialPolicy {
    pub min_password_len: usize,
    /// Subtracted from "now" when recording a password change, so a session
    /// token minted in the same instant is not flagged as stale.
    pub change_skew: Duration,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            min_password_len: 8,
            change_skew: Duration::seconds(1),
        }
    }
}

/// Orchestrates hashing, reset tokens and persistence for credentials.
#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn CredentialStore>,
    hasher: SecretHasher,
    issuer: ResetTokenIssuer,
    clock: Arc<dyn Clock>,
    policy: CredentialPolicy,
    dummy_digest: Arc<OnceCell<String>>,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: SecretHasher,
        issuer: ResetTokenIssuer,
        clock: Arc<dyn Clock>,
        policy: CredentialPolicy,
    ) -> Self {
        Self {
            store,
            hasher,
            issuer,
            clock,
            policy,
            dummy_digest: Arc::new(OnceCell::new()),
        }
    }

    fn validate_password(&self, plain: &str) -> Result<(), ValidationError> {
        if plain.is_empty() {
            return Err(ValidationError::EmptyPassword);
        }
        if plain.chars().count() < self.policy.min_password_len {
            return Err(ValidationError::PasswordTooShort(self.policy.min_password_len));
        }
        Ok(())
    }

    fn changed_at(&self) -> OffsetDateTime {
        self.clock.now() - self.policy.change_skew
    }

    /// Burns one verification so unknown identities cost as much as wrong passwords.
    async fn verify_against_dummy(&self, candidate: &str) -> Result<(), CredentialError> {
        let digest = self
            .dummy_digest
            .get_or_try_init(|| self.hasher.hash_async("credvault-timing-equalizer"))
            .await?;
        let _ = self.hasher.verify_async(candidate, digest).await?;
        Ok(())
    }

    #[instrument(skip(self, plain), fields(identity = %identity))]
    pub async fn register(
        &self,
        identity: &Identity,
        plain: &str,
    ) -> Result<CredentialRecord, CredentialError> {
        self.validate_password(plain)?;
        let digest = self.hasher.hash_async(plain).await?;
        let record = self.store.insert(identity, &digest, self.clock.now()).await?;
        info!(credential_id = %record.id, "credential registered");
        Ok(record)
    }

    /// Loads the public projection of an active credential.
    pub async fn find(&self, identity: &Identity) -> Result<CredentialRecord, CredentialError> {
        self.store
            .find_by_identity(identity, Projection::Public, ActiveFilter::ActiveOnly)
            .await?
            .ok_or(CredentialError::NotFound)
    }

    /// `Ok(false)` for unknown, inactive, or mismatching credentials alike.
    #[instrument(skip(self, candidate), fields(identity = %identity))]
    pub async fn verify_password(
        &self,
        identity: &Identity,
        candidate: &str,
    ) -> Result<bool, CredentialError> {
        let record = self
            .store
            .find_by_identity(identity, Projection::WithSecrets, ActiveFilter::ActiveOnly)
            .await?;
        let Some(secrets) = record.and_then(|r| r.secrets) else {
            self.verify_against_dummy(candidate).await?;
            debug!("verify against unknown identity");
            return Ok(false);
        };
        let ok = self
            .hasher
            .verify_async(candidate, &secrets.password_digest)
            .await?;
        Ok(ok)
    }

    /// True when a token issued at `issued_at` predates the last password change.
    pub async fn token_issued_before_change(
        &self,
        identity: &Identity,
        issued_at: OffsetDateTime,
    ) -> Result<bool, CredentialError> {
        let record = self.find(identity).await?;
        Ok(record
            .password_changed_at
            .map_or(false, |changed| issued_at < changed))
    }

    #[instrument(skip(self, current, new_plain), fields(identity = %identity))]
    pub async fn change_password(
        &self,
        identity: &Identity,
        current: &str,
        new_plain: &str,
    ) -> Result<CredentialRecord, CredentialError> {
        self.validate_password(new_plain)?;
        if !self.verify_password(identity, current).await? {
            warn!("change_password with wrong current password");
            return Err(CredentialError::NotFound);
        }
        let digest = self.hasher.hash_async(new_plain).await?;
        if !self
            .store
            .set_password(identity, &digest, self.changed_at())
            .await?
        {
            return Err(CredentialError::NotFound);
        }
        info!("password changed");
        self.find(identity).await
    }

    /// Mints a reset token for an active identity. The returned plaintext is
    /// the only copy; the store keeps its digest.
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn request_reset(&self, identity: &Identity) -> Result<IssuedReset, CredentialError> {
        self.find(identity).await?;
        let issued = self.issuer.issue(self.clock.now());
        if !self
            .store
            .set_reset(identity, &issued.digest, issued.expires_at)
            .await?
        {
            return Err(CredentialError::NotFound);
        }
        info!(expires_at = %issued.expires_at, "password reset issued");
        Ok(issued)
    }

    #[instrument(skip(self, token, new_plain))]
    pub async fn confirm_reset(
        &self,
        token: &ResetToken,
        new_plain: &str,
    ) -> Result<CredentialRecord, CredentialError> {
        self.validate_password(new_plain)?;
        let digest = ResetTokenIssuer::digest(token.expose());
        let record = self
            .store
            .find_by_reset_digest(&digest)
            .await?
            .ok_or(CredentialError::NotFound)?;
        let stored_digest = record.secrets.as_ref().and_then(|s| s.reset_digest.as_deref());
        match self.issuer.check(
            token.expose(),
            stored_digest,
            record.reset_expires_at,
            self.clock.now(),
        ) {
            ResetCheck::Valid => {}
            ResetCheck::Expired => {
                warn!(credential_id = %record.id, "expired reset token presented");
                return Err(CredentialError::Expired);
            }
            ResetCheck::Missing | ResetCheck::Mismatch => return Err(CredentialError::NotFound),
        }

        let password_digest = self.hasher.hash_async(new_plain).await?;
        // Re-checked at write time: a racing consumer or an expiry that passed
        // while hashing both turn into "no row matched".
        let now = self.clock.now();
        match self
            .store
            .consume_reset(&digest, now, &password_digest, now - self.policy.change_skew)
            .await?
        {
            Some(updated) => {
                info!(credential_id = %updated.id, "password reset completed");
                Ok(updated)
            }
            None if record.reset_expires_at.map_or(false, |exp| now > exp) => {
                Err(CredentialError::Expired)
            }
            None => Err(CredentialError::NotFound),
        }
    }

    /// Soft delete.
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn deactivate(&self, identity: &Identity) -> Result<(), CredentialError> {
        if !self
            .store
            .set_active(identity, false, ActiveFilter::ActiveOnly)
            .await?
        {
            return Err(CredentialError::NotFound);
        }
        info!("credential deactivated");
        Ok(())
    }

    /// Administrative reactivation; the only path that looks at inactive records.
    /// No HTTP route exposes it: admin tooling calls it directly.
    #[allow(dead_code)]
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn reactivate(&self, identity: &Identity) -> Result<(), CredentialError> {
        if !self
            .store
            .set_active(identity, true, ActiveFilter::IncludeInactive)
            .await?
        {
            return Err(CredentialError::NotFound);
        }
        info!("credential reactivated");
        Ok(())
    }

    pub async fn purge_expired_resets(&self) -> Result<u64, CredentialError> {
        let purged = self.store.purge_expired_resets(self.clock.now()).await?;
        if purged > 0 {
            debug!(purged, "expired reset tokens purged");
        }
        Ok(purged)
    }
}
