use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::giveaway::engine::GiveawayEngine;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically completes expired giveaways.
///
/// Each tick reads the engine's clock, runs one sweep on the blocking pool and
/// announces the results. The next tick waits for the current sweep, and ticks
/// missed meanwhile are dropped rather than queued.
pub struct Scheduler {
    engine: Arc<GiveawayEngine>,
    period: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<GiveawayEngine>) -> Self {
        Scheduler {
            engine,
            period: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Starts the sweep loop. Must be called after recovery has finished.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Giveaway scheduler started, sweeping every {:?}", self.period);

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.tick().await;
        }

        info!("Giveaway scheduler stopped");
    }

    async fn tick(&self) {
        let engine = self.engine.clone();
        let swept = tokio::task::spawn_blocking(move || {
            let now = engine.now();
            let results = engine.sweep(now);
            engine.announce_completed(&results);
            results.len()
        })
        .await;

        match swept {
            Ok(0) => {}
            Ok(count) => debug!("Sweep completed {} giveaway(s)", count),
            Err(err) => error!("The giveaway sweep has failed: {}", err),
        }
    }
}

/// Controls a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops accepting new ticks and waits for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join.await {
            error!("The giveaway scheduler terminated abnormally: {}", err);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
