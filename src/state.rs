use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use time::Duration;

use crate::config::{AppConfig, StoreKind};
use crate::credentials::{
    Clock, CredentialPolicy, CredentialService, CredentialStore, HashCost,
    MemoryCredentialStore, PgCredentialStore, ResetTokenIssuer, SecretHasher, SystemClock,
};
use crate::delivery::{LogOnlyDelivery, ResetDelivery};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub credentials: CredentialService,
    pub delivery: Arc<dyn ResetDelivery>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn CredentialStore> = match config.store {
            StoreKind::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL is required for the postgres store")?;
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                Arc::new(PgCredentialStore::new(db))
            }
            StoreKind::Memory => {
                tracing::warn!("using in-memory credential store; data is lost on restart");
                Arc::new(MemoryCredentialStore::new())
            }
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let credentials = build_service(&config, store, clock.clone())?;
        let delivery = Arc::new(LogOnlyDelivery) as Arc<dyn ResetDelivery>;

        Ok(Self::from_parts(config, credentials, delivery, clock))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        credentials: CredentialService,
        delivery: Arc<dyn ResetDelivery>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            credentials,
            delivery,
            clock,
        }
    }
}

fn build_service(
    config: &AppConfig,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<CredentialService> {
    let c = &config.credentials;
    let hasher = SecretHasher::new(HashCost {
        memory_kib: c.argon2_memory_kib,
        iterations: c.argon2_iterations,
        parallelism: c.argon2_parallelism,
    })?;
    let issuer = ResetTokenIssuer::new(Duration::minutes(c.reset_ttl_minutes));
    let policy = CredentialPolicy {
        min_password_len: c.min_password_len,
        change_skew: Duration::seconds(c.change_skew_secs),
    };
    Ok(CredentialService::new(store, hasher, issuer, clock, policy))
}

#[cfg(test)]
impl AppState {
    /// In-memory state with cheap hashing and a hand-driven clock.
    pub fn fake(
        delivery: Arc<dyn ResetDelivery>,
        clock: Arc<crate::credentials::ManualClock>,
    ) -> Self {
        use crate::config::{CredentialConfig, JwtConfig};

        let config = Arc::new(AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            store: StoreKind::Memory,
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 60,
                refresh_ttl_minutes: 120,
            },
            credentials: CredentialConfig::default(),
        });
        let credentials = CredentialService::new(
            Arc::new(MemoryCredentialStore::new()),
            crate::credentials::cheap_hasher(),
            ResetTokenIssuer::default(),
            clock.clone(),
            CredentialPolicy::default(),
        );
        Self::from_parts(config, credentials, delivery, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialConfig, JwtConfig};

    #[test]
    fn build_service_rejects_bad_argon2_cost() {
        let config = AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            store: StoreKind::Memory,
            database_url: None,
            jwt: JwtConfig {
                secret: "s".into(),
                issuer: "i".into(),
                audience: "a".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            credentials: CredentialConfig {
                argon2_iterations: 0,
                ..CredentialConfig::default()
            },
        };
        let result = build_service(
            &config,
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(SystemClock),
        );
        assert!(result.is_err());
    }
}
