use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    error::StoreError,
    filter::ActiveFilter,
    record::{CredentialRecord, CredentialSecrets, Identity, Projection},
};

/// Durable credential storage. Each mutation is one atomic write, so a
/// cancelled caller leaves a record either untouched or fully updated.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert(
        &self,
        identity: &Identity,
        password_digest: &str,
        created_at: OffsetDateTime,
    ) -> Result<CredentialRecord, StoreError>;

    async fn find_by_identity(
        &self,
        identity: &Identity,
        projection: Projection,
        filter: ActiveFilter,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Active records only; returned with secrets.
    async fn find_by_reset_digest(
        &self,
        digest: &str,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Stores a new password digest and drops any outstanding reset.
    async fn set_password(
        &self,
        identity: &Identity,
        password_digest: &str,
        changed_at: OffsetDateTime,
    ) -> Result<bool, StoreError>;

    async fn set_reset(
        &self,
        identity: &Identity,
        reset_digest: &str,
        expires_at: OffsetDateTime,
    ) -> Result<bool, StoreError>;

    /// Spends `reset_digest` and installs the new password in one step.
    /// Returns `None` when the digest is unknown, expired at `now`, already
    /// spent, or belongs to an inactive record.
    async fn consume_reset(
        &self,
        reset_digest: &str,
        now: OffsetDateTime,
        password_digest: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    async fn set_active(
        &self,
        identity: &Identity,
        active: bool,
        filter: ActiveFilter,
    ) -> Result<bool, StoreError>;

    /// Clears reset fields whose expiry has passed. Returns the number of records touched.
    async fn purge_expired_resets(&self, now: OffsetDateTime) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
struct StoredCredential {
    id: Uuid,
    identity: Identity,
    password_digest: String,
    password_changed_at: Option<OffsetDateTime>,
    reset_digest: Option<String>,
    reset_expires_at: Option<OffsetDateTime>,
    active: bool,
    created_at: OffsetDateTime,
}

impl StoredCredential {
    fn to_record(&self, projection: Projection) -> CredentialRecord {
        CredentialRecord {
            id: self.id,
            identity: self.identity.clone(),
            password_changed_at: self.password_changed_at,
            reset_expires_at: self.reset_expires_at,
            active: self.active,
            created_at: self.created_at,
            secrets: Some(CredentialSecrets {
                password_digest: self.password_digest.clone(),
                reset_digest: self.reset_digest.clone(),
            }),
        }
        .project(projection)
    }
}

/// In-process store keyed by identity. Used when no database is configured
/// and by tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<Identity, StoredCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn insert(
        &self,
        identity: &Identity,
        password_digest: &str,
        created_at: OffsetDateTime,
    ) -> Result<CredentialRecord, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(identity) {
            return Err(StoreError::Conflict);
        }
        let stored = StoredCredential {
            id: Uuid::new_v4(),
            identity: identity.clone(),
            password_digest: password_digest.to_owned(),
            password_changed_at: None,
            reset_digest: None,
            reset_expires_at: None,
            active: true,
            created_at,
        };
        let record = stored.to_record(Projection::Public);
        records.insert(identity.clone(), stored);
        Ok(record)
    }

    async fn find_by_identity(
        &self,
        identity: &Identity,
        projection: Projection,
        filter: ActiveFilter,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(identity)
            .filter(|c| filter.admits(c.active))
            .map(|c| c.to_record(projection)))
    }

    async fn find_by_reset_digest(
        &self,
        digest: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|c| ActiveFilter::ActiveOnly.admits(c.active))
            .find(|c| c.reset_digest.as_deref() == Some(digest))
            .map(|c| c.to_record(Projection::WithSecrets)))
    }

    async fn set_password(
        &self,
        identity: &Identity,
        password_digest: &str,
        changed_at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(identity).filter(|c| c.active) {
            Some(c) => {
                c.password_digest = password_digest.to_owned();
                c.password_changed_at = Some(changed_at);
                c.reset_digest = None;
                c.reset_expires_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_reset(
        &self,
        identity: &Identity,
        reset_digest: &str,
        expires_at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(identity).filter(|c| c.active) {
            Some(c) => {
                c.reset_digest = Some(reset_digest.to_owned());
                c.reset_expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume_reset(
        &self,
        reset_digest: &str,
        now: OffsetDateTime,
        password_digest: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let mut records = self.records.write().await;
        let target = records.values_mut().find(|c| {
            c.active
                && c.reset_digest.as_deref() == Some(reset_digest)
                && c.reset_expires_at.map_or(false, |exp| exp >= now)
        });
        Ok(target.map(|c| {
            c.reset_digest = None;
            c.reset_expires_at = None;
            c.password_digest = password_digest.to_owned();
            c.password_changed_at = Some(changed_at);
            c.to_record(Projection::Public)
        }))
    }

    async fn set_active(
        &self,
        identity: &Identity,
        active: bool,
        filter: ActiveFilter,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(identity).filter(|c| filter.admits(c.active)) {
            Some(c) => {
                c.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge_expired_resets(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let mut purged = 0;
        for c in records.values_mut() {
            if c.reset_expires_at.map_or(false, |exp| exp < now) {
                c.reset_digest = None;
                c.reset_expires_at = None;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{macros::datetime, Duration};

    const NOW: OffsetDateTime = datetime!(2026-01-01 12:00 UTC);

    fn id(raw: &str) -> Identity {
        Identity::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn insert_rejects_duplicates_even_when_inactive() {
        let store = MemoryCredentialStore::new();
        store.insert(&id("a@x.com"), "d1", NOW).await.unwrap();
        store
            .set_active(&id("a@x.com"), false, ActiveFilter::ActiveOnly)
            .await
            .unwrap();
        let err = store.insert(&id("A@x.com"), "d2", NOW).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn reads_honour_projection_and_filter() {
        let store = MemoryCredentialStore::new();
        let inserted = store.insert(&id("a@x.com"), "d1", NOW).await.unwrap();
        assert!(inserted.secrets.is_none());
        assert!(inserted.password_changed_at.is_none());

        let public = store
            .find_by_identity(&id("a@x.com"), Projection::Public, ActiveFilter::ActiveOnly)
            .await
            .unwrap()
            .unwrap();
        assert!(public.secrets.is_none());

        let secret = store
            .find_by_identity(&id("a@x.com"), Projection::WithSecrets, ActiveFilter::ActiveOnly)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(secret.secrets.unwrap().password_digest, "d1");

        store
            .set_active(&id("a@x.com"), false, ActiveFilter::ActiveOnly)
            .await
            .unwrap();
        assert!(store
            .find_by_identity(&id("a@x.com"), Projection::Public, ActiveFilter::ActiveOnly)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_identity(&id("a@x.com"), Projection::Public, ActiveFilter::IncludeInactive)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn consume_reset_succeeds_once() {
        let store = MemoryCredentialStore::new();
        store.insert(&id("a@x.com"), "d1", NOW).await.unwrap();
        store
            .set_reset(&id("a@x.com"), "rd", NOW + Duration::minutes(10))
            .await
            .unwrap();

        let first = store.consume_reset("rd", NOW, "d2", NOW).await.unwrap();
        assert!(first.is_some());
        let second = store.consume_reset("rd", NOW, "d3", NOW).await.unwrap();
        assert!(second.is_none());

        let rec = store
            .find_by_identity(&id("a@x.com"), Projection::WithSecrets, ActiveFilter::ActiveOnly)
            .await
            .unwrap()
            .unwrap();
        let secrets = rec.secrets.unwrap();
        assert_eq!(secrets.password_digest, "d2");
        assert!(secrets.reset_digest.is_none());
        assert!(rec.reset_expires_at.is_none());
    }

    #[tokio::test]
    async fn consume_reset_refuses_expired_digest() {
        let store = MemoryCredentialStore::new();
        store.insert(&id("a@x.com"), "d1", NOW).await.unwrap();
        store
            .set_reset(&id("a@x.com"), "rd", NOW + Duration::minutes(10))
            .await
            .unwrap();
        let late = NOW + Duration::minutes(11);
        assert!(store.consume_reset("rd", late, "d2", late).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_password_clears_pending_reset() {
        let store = MemoryCredentialStore::new();
        store.insert(&id("a@x.com"), "d1", NOW).await.unwrap();
        store
            .set_reset(&id("a@x.com"), "rd", NOW + Duration::minutes(10))
            .await
            .unwrap();
        assert!(store.set_password(&id("a@x.com"), "d2", NOW).await.unwrap());
        assert!(store.find_by_reset_digest("rd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_only_touches_expired_resets() {
        let store = MemoryCredentialStore::new();
        store.insert(&id("a@x.com"), "d1", NOW).await.unwrap();
        store.insert(&id("b@x.com"), "d1", NOW).await.unwrap();
        store
            .set_reset(&id("a@x.com"), "old", NOW - Duration::minutes(1))
            .await
            .unwrap();
        store
            .set_reset(&id("b@x.com"), "new", NOW + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(store.purge_expired_resets(NOW).await.unwrap(), 1);
        assert!(store.find_by_reset_digest("old").await.unwrap().is_none());
        assert!(store.find_by_reset_digest("new").await.unwrap().is_some());
    }
}
