use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::error::{Error, GiveawayError, Result};
use crate::giveaway::models::{
    ActiveRecord, CompletionResult, FinishedGiveaway, Giveaway, GiveawayId, Origin, ToggleOutcome,
    UserId,
};
use crate::giveaway::notifications::NotificationSink;
use crate::giveaway::storage::{GiveawayStore, LoadedTable};
use crate::giveaway::strategies::{UniformDrawStrategy, WinnerStrategy};

/// Outcome of loading a persisted table into the engine.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct LoadSummary {
    pub loaded: usize,
    // Records left out because they were malformed or inconsistent.
    pub skipped: usize,
    // Where the unreadable table went, if it couldn't be read at all.
    pub moved_aside: Option<PathBuf>,
}

/// Owns the active and finished giveaways and applies every lifecycle
/// transition to them.
///
/// All mutations of one giveaway id are serialized through a per-id lock, so
/// a membership toggle can't interleave with the completion of the same
/// giveaway. Different ids proceed independently. The engine is the only
/// writer of the store; a failed write is logged and the in-memory state stays
/// authoritative (see [`GiveawayEngine::persist_all`] for retrying).
pub struct GiveawayEngine {
    active: DashMap<GiveawayId, Giveaway>,
    finished: DashMap<GiveawayId, FinishedGiveaway>,
    locks: DashMap<GiveawayId, Arc<Mutex<()>>>,
    // Held for the whole sweep; a concurrent sweep gives up instead of waiting.
    sweep_lock: Mutex<()>,
    // Serializes snapshots and writes of both tables.
    persist_lock: Mutex<()>,
    // Set while the finished table in the store is behind the memory. The
    // active table isn't written in that state, otherwise a crash could lose
    // a completed giveaway entirely.
    finished_dirty: AtomicBool,
    store: Arc<dyn GiveawayStore>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    strategy: Box<dyn WinnerStrategy>,
}

impl GiveawayEngine {
    pub fn new(
        store: Arc<dyn GiveawayStore>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        GiveawayEngine {
            active: DashMap::new(),
            finished: DashMap::new(),
            locks: DashMap::new(),
            sweep_lock: Mutex::new(()),
            persist_lock: Mutex::new(()),
            finished_dirty: AtomicBool::new(false),
            store,
            clock,
            sink,
            strategy: Box::new(UniformDrawStrategy::new()),
        }
    }

    // Replaces the algorithm used for drawing winners.
    pub fn with_strategy(mut self, strategy: Box<dyn WinnerStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ---- Startup ----

    /// Loads the finished table into memory. Records that can't be trusted
    /// are skipped and counted.
    pub fn load_finished(&self) -> Result<LoadSummary> {
        let loaded = self.store.load_finished()?;
        let mut summary = LoadSummary {
            loaded: 0,
            skipped: loaded.skipped,
            moved_aside: loaded.moved_aside,
        };

        for (id, record) in loaded.records {
            match FinishedGiveaway::from_record(id, record) {
                Some(finished) => {
                    self.finished.insert(id, finished);
                    summary.loaded += 1;
                }
                None => {
                    warn!(
                        "Skipping the finished giveaway {}: its winner isn't among the participants",
                        id
                    );
                    summary.skipped += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Reads the persisted active table without touching the engine state.
    pub fn load_active_records(&self) -> Result<LoadedTable<ActiveRecord>> {
        self.store.load_active()
    }

    /// Puts a recovered giveaway back into the active table. Returns false if
    /// the id is already known in either table.
    pub fn restore(&self, giveaway: Giveaway) -> bool {
        let id = giveaway.id();
        self.with_lock(id, || {
            if self.finished.contains_key(&id) || self.active.contains_key(&id) {
                return false;
            }

            self.active.insert(id, giveaway);
            true
        })
    }

    // ---- Lifecycle operations ----

    #[instrument(skip(self, origin))]
    pub fn create(
        &self,
        id: GiveawayId,
        end_time: DateTime<Utc>,
        description: &str,
        origin: Origin,
    ) -> Result<Giveaway> {
        if end_time <= self.clock.now() {
            return Err(Error::from(GiveawayError::InvalidSchedule));
        }

        self.with_lock(id, || {
            if self.active.contains_key(&id) || self.finished.contains_key(&id) {
                return Err(Error::from(GiveawayError::AlreadyExists(id)));
            }

            let giveaway = Giveaway::new(id, end_time, description.trim(), origin);
            self.active.insert(id, giveaway.clone());
            self.persist_active();
            info!("Giveaway {} created, ends at {}", id, end_time);

            self.notify("created", id, self.sink.on_created(&giveaway));
            Ok(giveaway)
        })
    }

    /// Flips the membership of the user: joins when absent, leaves otherwise.
    #[instrument(skip(self))]
    pub fn toggle_participation(&self, id: GiveawayId, user_id: UserId) -> Result<ToggleOutcome> {
        if !self.active.contains_key(&id) {
            return Err(Error::from(GiveawayError::NotFound(id)));
        }

        self.with_lock(id, || {
            let outcome = match self.active.get_mut(&id) {
                Some(mut giveaway) => giveaway.toggle_participant(user_id),
                None => return Err(Error::from(GiveawayError::NotFound(id))),
            };

            self.persist_active();
            debug!("User {} {:?} the giveaway {}", user_id, outcome, id);
            Ok(outcome)
        })
    }

    #[instrument(skip(self))]
    pub fn cancel(&self, id: GiveawayId, actor: UserId) -> Result<()> {
        if !self.active.contains_key(&id) {
            return Err(Error::from(GiveawayError::NotFound(id)));
        }

        self.with_lock(id, || {
            let mut giveaway = match self.active.remove(&id) {
                Some((_, giveaway)) => giveaway,
                None => return Err(Error::from(GiveawayError::NotFound(id))),
            };
            giveaway.mark_cancelled();

            self.persist_active();
            info!("Giveaway {} cancelled by {}", id, actor);

            self.notify("cancelled", id, self.sink.on_cancelled(&giveaway, actor));
            Ok(())
        })
    }

    /// Changes the end time and/or the description of an active giveaway.
    /// A description that is blank after trimming counts as absent.
    #[instrument(skip(self))]
    pub fn edit(
        &self,
        id: GiveawayId,
        new_end_time: Option<DateTime<Utc>>,
        new_description: Option<&str>,
    ) -> Result<Giveaway> {
        if !self.active.contains_key(&id) {
            return Err(Error::from(GiveawayError::NotFound(id)));
        }

        let new_description = new_description
            .map(str::trim)
            .filter(|description| !description.is_empty());
        if new_end_time.is_none() && new_description.is_none() {
            return Err(Error::from(GiveawayError::NoChange));
        }

        if let Some(end_time) = new_end_time {
            if end_time <= self.clock.now() {
                return Err(Error::from(GiveawayError::InvalidSchedule));
            }
        }

        self.with_lock(id, || {
            let updated = match self.active.get_mut(&id) {
                Some(mut giveaway) => {
                    if let Some(end_time) = new_end_time {
                        giveaway.set_end_time(end_time);
                    }
                    if let Some(description) = new_description {
                        giveaway.set_description(description);
                    }
                    giveaway.clone()
                }
                None => return Err(Error::from(GiveawayError::NotFound(id))),
            };

            self.persist_active();
            info!("Giveaway {} edited, ends at {}", id, updated.end_time());

            self.notify("edited", id, self.sink.on_edited(&updated));
            Ok(updated)
        })
    }

    /// Completes every active giveaway whose end time is reached at `now`.
    ///
    /// Safe to call repeatedly: completed giveaways leave the active table and
    /// are not seen again. If another sweep is still running, this one returns
    /// nothing and leaves the work to it.
    #[instrument(skip(self))]
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<CompletionResult> {
        let _sweep_guard = match self.sweep_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("Another sweep is in progress, skipping");
                return Vec::new();
            }
        };

        let mut expired = self
            .active
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| (entry.value().end_time(), *entry.key()))
            .collect::<Vec<(DateTime<Utc>, GiveawayId)>>();
        expired.sort();

        expired
            .into_iter()
            .filter_map(|(_, id)| self.complete_expired(id, now))
            .collect()
    }

    /// Runs the completion transition for one giveaway if it has expired at
    /// `now`. Returns `None` when there is nothing to complete.
    pub fn complete_expired(&self, id: GiveawayId, now: DateTime<Utc>) -> Option<CompletionResult> {
        if !self.active.contains_key(&id) {
            return None;
        }

        self.with_lock(id, || -> Option<CompletionResult> {
            let giveaway = self.active.get(&id).map(|giveaway| giveaway.clone())?;
            if !giveaway.is_expired(now) {
                return None;
            }

            if self.finished.contains_key(&id) {
                warn!("Giveaway {} has already been finished, dropping the active entry", id);
                self.active.remove(&id);
                self.persist_active();
                return None;
            }

            let participants = giveaway.participants();
            let winner_id = self.draw(&participants);
            let finished = FinishedGiveaway::complete(&giveaway, winner_id, now);

            // The finished record has to reach the store before the active one
            // disappears from it.
            self.finished.insert(id, finished.clone());
            self.persist_finished();
            self.active.remove(&id);
            self.persist_active();

            match winner_id {
                Some(winner) => info!(
                    "Giveaway {} finished with {} participant(s), winner is {}",
                    id,
                    participants.len(),
                    winner
                ),
                None => info!("Giveaway {} finished without participants", id),
            }

            Some(CompletionResult::from(&finished))
        })
    }

    /// Draws a new winner of a finished giveaway from its frozen participants.
    #[instrument(skip(self))]
    pub fn reroll(&self, id: GiveawayId) -> Result<Option<UserId>> {
        if !self.finished.contains_key(&id) {
            return Err(Error::from(GiveawayError::NotFound(id)));
        }

        let now = self.clock.now();
        self.with_lock(id, || {
            let updated = {
                let mut finished = match self.finished.get_mut(&id) {
                    Some(finished) => finished,
                    None => return Err(Error::from(GiveawayError::NotFound(id))),
                };

                if !finished.is_reroll_window_open(now) {
                    return Err(Error::from(GiveawayError::WindowExpired));
                }

                if finished.participants().is_empty() {
                    return Err(Error::from(GiveawayError::NoParticipants));
                }

                let Some(winner) = self.draw(finished.participants()) else {
                    return Err(Error::from(GiveawayError::NoWinnerDrawn(id)));
                };
                finished.set_winner(winner);
                finished.clone()
            };

            self.persist_finished();
            info!("Giveaway {} rerolled, winner is {:?}", id, updated.winner_id());

            self.notify("rerolled", id, self.sink.on_rerolled(&updated));
            Ok(updated.winner_id())
        })
    }

    /// Hands completion results to the notification sink. Failures are logged.
    pub fn announce_completed(&self, results: &[CompletionResult]) {
        for result in results {
            self.notify("completed", result.id, self.sink.on_completed(result));
        }
    }

    // ---- Queries ----

    pub fn giveaway(&self, id: GiveawayId) -> Option<Giveaway> {
        self.active.get(&id).map(|giveaway| giveaway.clone())
    }

    pub fn finished_giveaway(&self, id: GiveawayId) -> Option<FinishedGiveaway> {
        self.finished.get(&id).map(|finished| finished.clone())
    }

    // Returns active giveaways, the closest to its end first.
    pub fn active_giveaways(&self) -> Vec<Giveaway> {
        let mut giveaways = self
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<Giveaway>>();
        giveaways.sort_by_key(|giveaway| (giveaway.end_time(), giveaway.id()));
        giveaways
    }

    pub fn participants(&self, id: GiveawayId) -> Result<Vec<UserId>> {
        match self.active.get(&id) {
            Some(giveaway) => Ok(giveaway.participants()),
            None => Err(Error::from(GiveawayError::NotFound(id))),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    // ---- Persistence ----

    /// Writes both tables, the finished one first. Meant for retrying after
    /// a logged write failure.
    pub fn persist_all(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_finished()?;
        self.write_active()
    }

    fn persist_active(&self) -> bool {
        let _guard = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.finished_dirty.load(Ordering::SeqCst) {
            if let Err(err) = self.write_finished() {
                error!(
                    "Can't store the finished giveaways, postponing the active table write: {}",
                    err
                );
                return false;
            }
        }

        match self.write_active() {
            Ok(()) => true,
            Err(err) => {
                error!("Can't store the active giveaways: {}", err);
                false
            }
        }
    }

    fn persist_finished(&self) -> bool {
        let _guard = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);

        match self.write_finished() {
            Ok(()) => true,
            Err(err) => {
                error!("Can't store the finished giveaways: {}", err);
                false
            }
        }
    }

    // Callers must hold `persist_lock`.
    fn write_active(&self) -> Result<()> {
        let records = self
            .active
            .iter()
            .map(|entry| (*entry.key(), entry.value().to_record()))
            .collect::<BTreeMap<_, _>>();
        self.store.save_active(&records)
    }

    // Callers must hold `persist_lock`.
    fn write_finished(&self) -> Result<()> {
        let records = self
            .finished
            .iter()
            .map(|entry| (*entry.key(), entry.value().to_record()))
            .collect::<BTreeMap<_, _>>();

        let result = self.store.save_finished(&records);
        self.finished_dirty.store(result.is_err(), Ordering::SeqCst);
        result
    }

    // Picks a winner with the strategy, ignoring picks outside of the snapshot.
    fn draw(&self, participants: &[UserId]) -> Option<UserId> {
        self.strategy
            .pick(participants)
            .filter(|winner| participants.contains(winner))
    }

    // Runs `operation` while holding the lock of the id. The lock entry only
    // outlives the call while the id has an active giveaway or other callers
    // still hold it.
    fn with_lock<T, F>(&self, id: GiveawayId, operation: F) -> T
    where
        F: FnOnce() -> T,
    {
        let lock = self.locks.entry(id).or_default().clone();
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            operation()
        };
        drop(lock);

        if !self.active.contains_key(&id) {
            self.locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        }
        result
    }

    fn notify(&self, event: &str, id: GiveawayId, result: Result<()>) {
        if let Err(err) = result {
            warn!("Can't announce that the giveaway {} was {}: {}", id, event, err);
        }
    }
}
