//! Credential lifecycle: password storage, reset tokens, stale-session
//! detection and soft deletion.

mod clock;
mod error;
mod filter;
mod hasher;
mod pg;
mod record;
mod reset;
mod service;
mod store;

pub use clock::{Clock, SystemClock};
pub use error::{CredentialError, StoreError};
pub use hasher::{HashCost, SecretHasher};
pub use pg::PgCredentialStore;
pub use record::{CredentialRecord, Identity};
pub use reset::{ResetToken, ResetTokenIssuer};
pub use service::{CredentialPolicy, CredentialService};
pub use store::{CredentialStore, MemoryCredentialStore};

#[cfg(test)]
pub(crate) use clock::ManualClock;
#[cfg(test)]
pub(crate) use hasher::cheap_hasher;
