//! Out-of-process notification path for guardians who are not connected

use crate::auth::principal::PrincipalId;
use crate::events::EventSummary;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Error)]
#[error("push notification failed: {0}")]
pub struct NotifyError(pub String);

/// One-way push delivery to a guardian's device
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(&self, guardian: PrincipalId, summary: &EventSummary) -> Result<(), NotifyError>;
}

/// Notifier that only records the push in the log
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl PushNotifier for TracingNotifier {
    async fn notify(&self, guardian: PrincipalId, summary: &EventSummary) -> Result<(), NotifyError> {
        info!(
            guardian_id = %guardian,
            owner_user_id = %summary.owner_user_id,
            class = %summary.class,
            "Push notification dispatched"
        );
        Ok(())
    }
}
