pub mod engine;
pub mod models;
pub mod notifications;
pub mod recovery;
pub mod scheduler;
pub mod storage;
pub mod strategies;

pub use crate::giveaway::engine::{GiveawayEngine, LoadSummary};
pub use crate::giveaway::models::{
    CompletionResult, FinishedGiveaway, Giveaway, GiveawayId, GiveawayStatus, Origin,
    RecoveredOrigin, ToggleOutcome, UserId,
};
pub use crate::giveaway::notifications::{NotificationSink, OriginResolver};
pub use crate::giveaway::recovery::{RecoveryReport, recover};
pub use crate::giveaway::scheduler::{Scheduler, SchedulerHandle};
pub use crate::giveaway::storage::{GiveawayStore, JsonFileStore, MemoryStore};
