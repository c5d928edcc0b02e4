//! Update Scheduler
//!
//! Drives the orchestrator from three sources:
//! - once at start (trigger "Launch"), independent of the timer
//! - a recurring timer with period `update_interval_minutes`
//! - on demand (manual update, preference changes)
//!
//! The scheduler holds no concurrency state of its own. Every fire is spawned
//! and overlapping fires are dropped by the orchestrator's update guard, so a
//! slow or failed update never stalls the timer.

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::updater::{Trigger, UpdateOrchestrator, UpdateOutcome};

/// Recurring timer plus on-demand triggers for one orchestrator.
pub struct Scheduler {
    orchestrator: Arc<UpdateOrchestrator>,
    /// Next scheduled run time
    next_run: Arc<RwLock<Option<DateTime<Local>>>>,
    /// Timer task handle (None while stopped)
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<UpdateOrchestrator>) -> Self {
        Self {
            orchestrator,
            next_run: Arc::new(RwLock::new(None)),
            handle: std::sync::Mutex::new(None),
        }
    }

    pub fn orchestrator(&self) -> &Arc<UpdateOrchestrator> {
        &self.orchestrator
    }

    /// Fires the launch update and starts the timer.
    pub fn start(&self, minutes: u32) {
        self.trigger(Trigger::Launch);
        self.start_timer(minutes);
    }

    /// Restarts the timer with a new period. The first tick comes a full
    /// period after the restart.
    pub fn restart(&self, minutes: u32) {
        self.stop();
        self.start_timer(minutes);
    }

    /// Spawns an out-of-band update.
    pub fn trigger(&self, trigger: Trigger) -> JoinHandle<UpdateOutcome> {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move { orchestrator.update(trigger).await })
    }

    /// Re-applies the cached wallpaper with the current style, then runs a
    /// settings update.
    pub fn trigger_restyle(&self) -> JoinHandle<UpdateOutcome> {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            orchestrator.reapply_current().await;
            orchestrator.update(Trigger::Settings).await
        })
    }

    /// Stops the timer task.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
        if let Ok(mut next_run) = self.next_run.try_write() {
            *next_run = None;
        }
    }

    /// Get the next scheduled run time
    pub async fn next_run(&self) -> Option<DateTime<Local>> {
        *self.next_run.read().await
    }

    /// Next run formatted for display, empty while the timer is stopped.
    pub async fn next_run_string(&self) -> String {
        match self.next_run().await {
            Some(dt) => dt.format("%a %b %d %H:%M").to_string(),
            None => String::new(),
        }
    }

    fn start_timer(&self, minutes: u32) {
        let minutes = minutes.max(1);
        let period = Duration::from_secs(u64::from(minutes) * 60);
        info!(minutes, "starting update timer");

        let orchestrator = Arc::clone(&self.orchestrator);
        let next_run = Arc::clone(&self.next_run);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                *next_run.write().await = Some(Local::now() + period);
                ticker.tick().await;

                debug!("update timer fired");
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move { orchestrator.update(Trigger::Scheduled).await });
            }
        });

        if let Ok(mut guard) = self.handle.lock() {
            *guard = Some(handle);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
