use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub reset_ttl_minutes: i64,
    pub change_skew_secs: i64,
    pub min_password_len: usize,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            reset_ttl_minutes: 10,
            change_skew_secs: 1,
            min_password_len: 8,
            argon2_memory_kib: 19456,
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub credentials: CredentialConfig,
}

const MAX_RESET_TTL_MINUTES: i64 = 24 * 60;
const MAX_CHANGE_SKEW_SECS: i64 = 60;
const MIN_ARGON2_MEMORY_KIB: u32 = 19456;
const MIN_ARGON2_ITERATIONS: u32 = 2;

/// Parses `raw` when present; a present but unparsable value is an error.
fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value {v:?} for {key}")),
        None => Ok(default),
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parse_or(key, std::env::var(key).ok(), default)
}

impl CredentialConfig {
    /// Rejects settings that would weaken hashing or break reset/skew semantics.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=MAX_RESET_TTL_MINUTES).contains(&self.reset_ttl_minutes) {
            anyhow::bail!(
                "RESET_TOKEN_TTL_MINUTES must be between 1 and {MAX_RESET_TTL_MINUTES}, got {}",
                self.reset_ttl_minutes
            );
        }
        if !(0..=MAX_CHANGE_SKEW_SECS).contains(&self.change_skew_secs) {
            anyhow::bail!(
                "PASSWORD_CHANGE_SKEW_SECS must be between 0 and {MAX_CHANGE_SKEW_SECS}, got {}",
                self.change_skew_secs
            );
        }
        if self.min_password_len < 8 {
            anyhow::bail!("MIN_PASSWORD_LEN must be at least 8, got {}", self.min_password_len);
        }
        if self.argon2_memory_kib < MIN_ARGON2_MEMORY_KIB {
            anyhow::bail!(
                "ARGON2_MEMORY_KIB must be at least {MIN_ARGON2_MEMORY_KIB}, got {}",
                self.argon2_memory_kib
            );
        }
        if self.argon2_iterations < MIN_ARGON2_ITERATIONS {
            anyhow::bail!(
                "ARGON2_ITERATIONS must be at least {MIN_ARGON2_ITERATIONS}, got {}",
                self.argon2_iterations
            );
        }
        if self.argon2_parallelism == 0 {
            anyhow::bail!("ARGON2_PARALLELISM must be at least 1");
        }
        Ok(())
    }
}

impl JwtConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ttl_minutes <= 0 || self.refresh_ttl_minutes <= 0 {
            anyhow::bail!("JWT_TTL_MINUTES and JWT_REFRESH_TTL_MINUTES must be positive");
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match std::env::var("STORE").as_deref() {
            Ok("memory") => StoreKind::Memory,
            Ok("postgres") | Err(_) => StoreKind::Postgres,
            Ok(other) => anyhow::bail!("unknown STORE {other:?}, expected postgres or memory"),
        };
        let database_url = match store {
            StoreKind::Postgres => Some(std::env::var("DATABASE_URL")?),
            StoreKind::Memory => std::env::var("DATABASE_URL").ok(),
        };
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "credvault".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "credvault-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60)?,
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14)?,
        };
        let defaults = CredentialConfig::default();
        let credentials = CredentialConfig {
            reset_ttl_minutes: env_or("RESET_TOKEN_TTL_MINUTES", defaults.reset_ttl_minutes)?,
            change_skew_secs: env_or("PASSWORD_CHANGE_SKEW_SECS", defaults.change_skew_secs)?,
            min_password_len: env_or("MIN_PASSWORD_LEN", defaults.min_password_len)?,
            argon2_memory_kib: env_or("ARGON2_MEMORY_KIB", defaults.argon2_memory_kib)?,
            argon2_iterations: env_or("ARGON2_ITERATIONS", defaults.argon2_iterations)?,
            argon2_parallelism: env_or("ARGON2_PARALLELISM", defaults.argon2_parallelism)?,
        };
        jwt.validate()?;
        credentials.validate()?;
        Ok(Self {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("APP_PORT", 8080)?,
            store,
            database_url,
            jwt,
            credentials,
        })
    }
}
