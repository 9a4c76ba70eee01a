use thiserror::Error;

/// Failures of the password hashing primitive.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),
    #[error("argon2 hashing failed: {0}")]
    Hashing(String),
    #[error("stored password digest is malformed: {0}")]
    MalformedDigest(String),
    #[error("hashing task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failures of the durable record store. These are infrastructure errors,
/// not domain outcomes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity already exists")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("email address not valid")]
    InvalidIdentity,
    #[error("password required")]
    EmptyPassword,
    #[error("password should be at least {0} characters long")]
    PasswordTooShort(usize),
}

/// Outcome of a lifecycle operation that did not succeed.
///
/// `NotFound` deliberately covers both "no such identity/token" and
/// "exists but inactive" so callers cannot enumerate accounts.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no matching active credential")]
    NotFound,
    #[error("reset token expired")]
    Expired,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Hashing(#[from] HashError),
}

impl CredentialError {
    /// True for infrastructure failures that callers should surface as
    /// internal errors rather than business outcomes.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            CredentialError::Hashing(_)
                | CredentialError::Store(StoreError::Database(_))
        )
    }
}
