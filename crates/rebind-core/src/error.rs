use std::any::Any;

use crate::cell::SubscriptionId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Structural errors. These propagate to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no cell registered under key '{key}'")]
    NotFound { key: String },
    #[cfg(feature = "serde")]
    #[error("snapshot could not be encoded or decoded: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }
}

/// A subscriber-side failure. Recorded and reported, never propagated out of
/// a write.
#[derive(Debug, thiserror::Error)]
#[error("delivery to '{key}' failed: {reason}")]
pub struct DeliveryFailure {
    pub key: String,
    /// `None` when the failure belongs to the cycle rather than one subscriber.
    pub subscription: Option<SubscriptionId>,
    pub reason: FailureReason,
}

#[derive(Debug, thiserror::Error)]
pub enum FailureReason {
    #[error("subscriber panicked: {0}")]
    Panicked(String),
    #[error("subscriber returned an error: {0:#}")]
    Rejected(anyhow::Error),
    #[error("gave up after {cycles} notification cycles, dropped {dropped} queued write(s)")]
    CycleLimitExceeded { cycles: usize, dropped: usize },
}

impl FailureReason {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else {
            "Unknown panic".to_string()
        };
        FailureReason::Panicked(message)
    }

    pub fn is_cycle_limit(&self) -> bool {
        matches!(self, FailureReason::CycleLimitExceeded { .. })
    }
}
