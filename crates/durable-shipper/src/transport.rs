//! Remote delivery collaborator.

use crate::event::Event;
use async_trait::async_trait;
use tracing::level_filters::LevelFilter;

/// How the collector answered a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The batch was stored. The collector may ask for a different minimum level.
    Accepted { minimum_level: Option<LevelFilter> },
    /// The collector will never accept this batch.
    Rejected { code: String, message: String },
    /// Try the same batch again later.
    TransientFailure { code: String, message: String },
}

impl SendOutcome {
    /// Accepted without a level hint.
    pub fn accepted() -> Self {
        Self::Accepted {
            minimum_level: None,
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientFailure {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Sends one batch of events to the collector.
///
/// Implementations never retry internally; the delivery loop owns retries.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn send(&self, events: &[Event]) -> SendOutcome;
}
