use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    error::StoreError,
    filter::ActiveFilter,
    record::{CredentialRecord, CredentialSecrets, Identity, Projection},
    store::CredentialStore,
};

const PUBLIC_COLUMNS: &str = "id, identity, NULL::text AS password_digest, password_changed_at, \
     NULL::text AS reset_digest, reset_expires_at, active, created_at";
const SECRET_COLUMNS: &str = "id, identity, password_digest, password_changed_at, \
     reset_digest, reset_expires_at, active, created_at";

/// Row shape shared by both projections; the public one selects NULL digests.
#[derive(Debug, FromRow)]
struct CredentialRow {
    id: Uuid,
    identity: String,
    password_digest: Option<String>,
    password_changed_at: Option<OffsetDateTime>,
    reset_digest: Option<String>,
    reset_expires_at: Option<OffsetDateTime>,
    active: bool,
    created_at: OffsetDateTime,
}

impl CredentialRow {
    fn into_record(self) -> Result<CredentialRecord, StoreError> {
        let identity = Identity::parse(&self.identity)
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?;
        let secrets = self.password_digest.map(|password_digest| CredentialSecrets {
            password_digest,
            reset_digest: self.reset_digest,
        });
        Ok(CredentialRecord {
            id: self.id,
            identity,
            password_changed_at: self.password_changed_at,
            reset_expires_at: self.reset_expires_at,
            active: self.active,
            created_at: self.created_at,
            secrets,
        })
    }
}

fn columns(projection: Projection) -> &'static str {
    match projection {
        Projection::Public => PUBLIC_COLUMNS,
        Projection::WithSecrets => SECRET_COLUMNS,
    }
}

fn map_insert_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        _ => StoreError::Database(e),
    }
}

#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn insert(
        &self,
        identity: &Identity,
        password_digest: &str,
        created_at: OffsetDateTime,
    ) -> Result<CredentialRecord, StoreError> {
        let sql = format!(
            "INSERT INTO credentials (id, identity, password_digest, created_at) \
             VALUES ($1, $2, $3, $4) RETURNING {PUBLIC_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(identity.as_str())
            .bind(password_digest)
            .bind(created_at)
            .fetch_one(&self.db)
            .await
            .map_err(map_insert_error)?;
        row.into_record()
    }

    async fn find_by_identity(
        &self,
        identity: &Identity,
        projection: Projection,
        filter: ActiveFilter,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM credentials WHERE lower(identity) = $1 AND ($2 OR active)",
            columns(projection)
        );
        let row = sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(identity.as_str())
            .bind(filter.include_inactive())
            .fetch_optional(&self.db)
            .await?;
        row.map(CredentialRow::into_record).transpose()
    }

    async fn find_by_reset_digest(
        &self,
        digest: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let sql = format!(
            "SELECT {SECRET_COLUMNS} FROM credentials WHERE reset_digest = $1 AND active"
        );
        let row = sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(digest)
            .fetch_optional(&self.db)
            .await?;
        row.map(CredentialRow::into_record).transpose()
    }

    async fn set_password(
        &self,
        identity: &Identity,
        password_digest: &str,
        changed_at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET password_digest = $2, password_changed_at = $3,
                reset_digest = NULL, reset_expires_at = NULL
            WHERE lower(identity) = $1 AND active
            "#,
        )
        .bind(identity.as_str())
        .bind(password_digest)
        .bind(changed_at)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_reset(
        &self,
        identity: &Identity,
        reset_digest: &str,
        expires_at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET reset_digest = $2, reset_expires_at = $3
            WHERE lower(identity) = $1 AND active
            "#,
        )
        .bind(identity.as_str())
        .bind(reset_digest)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn consume_reset(
        &self,
        reset_digest: &str,
        now: OffsetDateTime,
        password_digest: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        // Row lock on the UPDATE serializes racing consumers; the loser re-checks
        // the predicate after the winner nulls reset_digest and matches nothing.
        let sql = format!(
            "UPDATE credentials \
             SET reset_digest = NULL, reset_expires_at = NULL, \
                 password_digest = $3, password_changed_at = $4 \
             WHERE reset_digest = $1 AND reset_expires_at >= $2 AND active \
             RETURNING {PUBLIC_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(reset_digest)
            .bind(now)
            .bind(password_digest)
            .bind(changed_at)
            .fetch_optional(&self.db)
            .await?;
        row.map(CredentialRow::into_record).transpose()
    }

    async fn set_active(
        &self,
        identity: &Identity,
        active: bool,
        filter: ActiveFilter,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE credentials SET active = $2 WHERE lower(identity) = $1 AND ($3 OR active)",
        )
        .bind(identity.as_str())
        .bind(active)
        .bind(filter.include_inactive())
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired_resets(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET reset_digest = NULL, reset_expires_at = NULL
            WHERE reset_expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn public_projection_never_selects_digests() {
        assert!(columns(Projection::Public).contains("NULL::text AS password_digest"));
        assert!(columns(Projection::Public).contains("NULL::text AS reset_digest"));
        assert!(!columns(Projection::WithSecrets).contains("NULL"));
    }

    #[test]
    fn row_without_digest_has_no_secrets() {
        let row = CredentialRow {
            id: Uuid::new_v4(),
            identity: "A@x.com".into(),
            password_digest: None,
            password_changed_at: None,
            reset_digest: None,
            reset_expires_at: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        let record = row.into_record().unwrap();
        assert!(record.secrets.is_none());
        assert_eq!(record.identity.as_str(), "a@x.com");
    }

    /// Runs against a real database only when DATABASE_URL is set.
    async fn live_store() -> Option<PgCredentialStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let db = PgPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .expect("connect to DATABASE_URL");
        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .expect("run migrations");
        Some(PgCredentialStore::new(db))
    }

    fn fresh_identity() -> Identity {
        Identity::parse(&format!("pg-{}@example.com", Uuid::new_v4())).unwrap()
    }

    #[tokio::test]
    async fn consume_reset_has_one_winner_in_postgres() {
        let Some(store) = live_store().await else {
            return;
        };
        let now = OffsetDateTime::now_utc();
        let identity = fresh_identity();
        let digest = format!("{:064x}", Uuid::new_v4().as_u128());
        store.insert(&identity, "d1", now).await.unwrap();
        assert!(store
            .set_reset(&identity, &digest, now + time::Duration::minutes(10))
            .await
            .unwrap());

        let (a, b) = tokio::join!(
            store.consume_reset(&digest, now, "d2", now),
            store.consume_reset(&digest, now, "d3", now),
        );
        let wins = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(Option::is_some)
            .count();
        assert_eq!(wins, 1);

        let rec = store
            .find_by_identity(&identity, Projection::WithSecrets, ActiveFilter::ActiveOnly)
            .await
            .unwrap()
            .unwrap();
        let secrets = rec.secrets.unwrap();
        assert!(secrets.reset_digest.is_none());
        assert!(rec.reset_expires_at.is_none());
        assert!(secrets.password_digest == "d2" || secrets.password_digest == "d3");
    }

    #[tokio::test]
    async fn expired_digest_is_not_consumed_in_postgres() {
        let Some(store) = live_store().await else {
            return;
        };
        let now = OffsetDateTime::now_utc();
        let identity = fresh_identity();
        let digest = format!("{:064x}", Uuid::new_v4().as_u128());
        store.insert(&identity, "d1", now).await.unwrap();
        store
            .set_reset(&identity, &digest, now - time::Duration::minutes(1))
            .await
            .unwrap();
        assert!(store
            .consume_reset(&digest, now, "d2", now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn active_filter_applies_in_postgres() {
        let Some(store) = live_store().await else {
            return;
        };
        let now = OffsetDateTime::now_utc();
        let identity = fresh_identity();
        store.insert(&identity, "d1", now).await.unwrap();
        let upper = Identity::parse(&identity.as_str().to_uppercase()).unwrap();
        assert!(matches!(
            store.insert(&upper, "d2", now).await.unwrap_err(),
            StoreError::Conflict
        ));

        assert!(store
            .set_active(&identity, false, ActiveFilter::ActiveOnly)
            .await
            .unwrap());
        assert!(store
            .find_by_identity(&identity, Projection::Public, ActiveFilter::ActiveOnly)
            .await
            .unwrap()
            .is_none());
        let hidden = store
            .find_by_identity(&identity, Projection::Public, ActiveFilter::IncludeInactive)
            .await
            .unwrap()
            .unwrap();
        assert!(!hidden.active);
        assert!(hidden.secrets.is_none());
        assert!(!store.set_password(&identity, "d3", now).await.unwrap());
    }
}
