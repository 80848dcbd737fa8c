use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::giveaway::models::{
    CompletionResult, FinishedGiveaway, Giveaway, RecoveredOrigin, UserId,
};

/// Receives lifecycle events for announcing them on the chat platform.
///
/// Calls are made after the state change has been applied, and implementations
/// must not block for long: slow work (network requests) belongs in a spawned
/// task. Returned errors are logged by the caller and never undo a transition.
pub trait NotificationSink: Send + Sync {
    fn on_created(&self, giveaway: &Giveaway) -> Result<()>;

    fn on_edited(&self, giveaway: &Giveaway) -> Result<()>;

    fn on_cancelled(&self, giveaway: &Giveaway, actor: UserId) -> Result<()>;

    fn on_completed(&self, result: &CompletionResult) -> Result<()>;

    fn on_rerolled(&self, finished: &FinishedGiveaway) -> Result<()>;
}

/// Checks whether the announcement target of a persisted giveaway still exists.
#[async_trait]
pub trait OriginResolver: Send + Sync {
    async fn resolve(&self, origin: &RecoveredOrigin) -> bool;
}

/// Only writes the events into the log. Used when no chat platform is wired in.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl NotificationSink for LoggingSink {
    fn on_created(&self, giveaway: &Giveaway) -> Result<()> {
        info!(
            "Giveaway {} created: '{}' ends at {}",
            giveaway.id(),
            giveaway.description(),
            giveaway.end_time()
        );
        Ok(())
    }

    fn on_edited(&self, giveaway: &Giveaway) -> Result<()> {
        info!(
            "Giveaway {} edited: '{}' ends at {}",
            giveaway.id(),
            giveaway.description(),
            giveaway.end_time()
        );
        Ok(())
    }

    fn on_cancelled(&self, giveaway: &Giveaway, actor: UserId) -> Result<()> {
        info!(
            "Giveaway {} cancelled by {} with {} participant(s)",
            giveaway.id(),
            actor,
            giveaway.participant_count()
        );
        Ok(())
    }

    fn on_completed(&self, result: &CompletionResult) -> Result<()> {
        match result.winner_id {
            Some(winner) => info!("Giveaway {} won by {}", result.id, winner),
            None => info!("Giveaway {} finished without participants", result.id),
        }
        Ok(())
    }

    fn on_rerolled(&self, finished: &FinishedGiveaway) -> Result<()> {
        if let Some(winner) = finished.winner_id() {
            info!("Giveaway {} rerolled, new winner is {}", finished.id(), winner);
        }
        Ok(())
    }
}

/// Treats every origin as reachable.
#[derive(Debug, Default)]
pub struct AcceptAllResolver;

#[async_trait]
impl OriginResolver for AcceptAllResolver {
    async fn resolve(&self, _origin: &RecoveredOrigin) -> bool {
        true
    }
}
