use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::info;

use crate::credentials::{Identity, ResetToken};

/// Out-of-band channel (mail, SMS, ...) that hands a reset token to its owner.
#[async_trait]
pub trait ResetDelivery: Send + Sync {
    async fn deliver(
        &self,
        identity: &Identity,
        token: &ResetToken,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()>;
}

/// Records that a reset was issued without ever writing the token itself.
#[derive(Debug, Clone, Default)]
pub struct LogOnlyDelivery;

#[async_trait]
impl ResetDelivery for LogOnlyDelivery {
    async fn deliver(
        &self,
        identity: &Identity,
        _token: &ResetToken,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        info!(identity = %identity, expires_at = %expires_at, "reset token ready for delivery");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Keeps delivered tokens so tests can play the user's mailbox.
    #[derive(Default)]
    pub(crate) struct CapturingDelivery {
        pub(crate) sent: Mutex<Vec<(Identity, ResetToken)>>,
    }

    #[async_trait]
    impl ResetDelivery for CapturingDelivery {
        async fn deliver(
            &self,
            identity: &Identity,
            token: &ResetToken,
            _expires_at: OffsetDateTime,
        ) -> anyhow::Result<()> {
            self.sent.lock().await.push((identity.clone(), token.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn log_only_delivery_accepts_tokens() {
        let identity = Identity::parse("a@x.com").unwrap();
        LogOnlyDelivery
            .deliver(&identity, &ResetToken::new("abc"), OffsetDateTime::now_utc())
            .await
            .unwrap();
    }
}
