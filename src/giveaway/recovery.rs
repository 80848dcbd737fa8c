use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::giveaway::engine::GiveawayEngine;
use crate::giveaway::models::{Giveaway, RecoveredOrigin};
use crate::giveaway::notifications::OriginResolver;

/// What happened to the persisted giveaways during startup.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct RecoveryReport {
    pub finished_loaded: usize,
    // Active giveaways put back for the scheduler.
    pub restored: usize,
    // Already expired on startup and completed right away.
    pub completed: usize,
    // Active records whose announcement target is gone.
    pub dropped: usize,
    // Active records already present in the finished table.
    pub already_finished: usize,
    // Malformed records in either table.
    pub skipped: usize,
}

/// Rebuilds the engine state from the store. Must run before the scheduler is
/// started.
///
/// Broken or unreachable records are left out one by one. A table that can't
/// be read at all fails the whole recovery before anything is written, so
/// the caller can refuse to start instead of overwriting it. Giveaways that
/// expired while the process was down are completed and announced
/// immediately.
pub async fn recover(
    engine: &GiveawayEngine,
    resolver: &dyn OriginResolver,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    let finished = engine.load_finished().map_err(|err| {
        error!("Can't load the finished giveaways: {}", err);
        err
    })?;
    // Without the finished table there is no telling which active records
    // were completed already.
    if let Some(backup) = finished.moved_aside {
        let message = format!(
            "The finished giveaways were unreadable and moved to {}, check the file before starting again.",
            backup.display()
        );
        error!("{}", message);
        return Err(Error::Storage(message));
    }
    report.finished_loaded = finished.loaded;
    report.skipped += finished.skipped;

    let loaded = engine.load_active_records().map_err(|err| {
        error!("Can't load the active giveaways: {}", err);
        err
    })?;
    report.skipped += loaded.skipped;

    for (id, record) in loaded.records {
        if engine.finished_giveaway(id).is_some() {
            warn!("Giveaway {} is already finished, dropping its active record", id);
            report.already_finished += 1;
            continue;
        }

        let recovered = RecoveredOrigin {
            giveaway_id: id,
            origin: record.origin.clone(),
        };
        if !resolver.resolve(&recovered).await {
            warn!(
                "The announcement of the giveaway {} (channel {}) is gone, dropping it",
                id, record.origin.channel_id
            );
            report.dropped += 1;
            continue;
        }

        if !engine.restore(Giveaway::from_record(id, record)) {
            warn!("Giveaway {} is listed twice, ignoring the duplicate", id);
            report.skipped += 1;
            continue;
        }

        let now = engine.now();
        match engine.complete_expired(id, now) {
            Some(result) => {
                info!("Giveaway {} expired while offline, completed on startup", id);
                engine.announce_completed(&[result]);
                report.completed += 1;
            }
            None => report.restored += 1,
        }
    }

    // Drops the records that weren't restored from the store as well.
    if let Err(err) = engine.persist_all() {
        error!("Can't store the recovered giveaways: {}", err);
    }

    info!(
        "Recovered {} active giveaway(s): {} completed on startup, {} dropped, {} skipped",
        report.restored, report.completed, report.dropped, report.skipped
    );
    Ok(report)
}
