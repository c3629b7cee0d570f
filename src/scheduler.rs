//! Two independent periodic tasks: the ingestion scan and the sync cycle.
//!
//! Each task ticks on its own interval and bounds every cycle with a deadline.
//! A cycle that overruns is dropped; records it touched stay in their last
//! committed state and are picked up by the next cycle.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::error::{RagsyncError, Result};
use crate::pipeline::Pipeline;

/// Cadence and deadline of one periodic task.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub interval: Duration,
    pub deadline: Duration,
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    scan: Cadence,
    sync: Cadence,
}

/// Running tasks; dropping it without `shutdown` aborts them.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<Result<()>>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, scan: Cadence, sync: Cadence) -> Self {
        Self { pipeline, scan, sync }
    }

    pub fn from_config(pipeline: Arc<Pipeline>, config: &Config) -> Self {
        Self::new(
            pipeline,
            Cadence {
                interval: Duration::from_secs(config.source.scan_interval_secs),
                deadline: Duration::from_secs(config.source.scan_deadline_secs),
            },
            Cadence {
                interval: Duration::from_secs(config.remote.sync_interval_secs),
                deadline: Duration::from_secs(config.remote.sync_deadline_secs),
            },
        )
    }

    /// Spawn both tasks on the current runtime.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        let pipeline = Arc::clone(&self.pipeline);
        tasks.spawn(run_periodic("ingest", self.scan, rx.clone(), move || {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.ingest_now().await }
        }));

        let pipeline = Arc::clone(&self.pipeline);
        tasks.spawn(run_periodic("sync", self.sync, rx, move || {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.sync_now().await }
        }));

        log::info!(
            "scheduler: started (scan every {:?}, sync every {:?})",
            self.scan.interval,
            self.sync.interval
        );
        SchedulerHandle { shutdown, tasks }
    }
}

impl SchedulerHandle {
    /// Resolves when a task stops on its own, which only happens on a fatal error.
    pub async fn wait(&mut self) -> Result<()> {
        match self.tasks.join_next().await {
            Some(Ok(result)) => result,
            Some(Err(e)) => Err(RagsyncError::Cancelled(format!("scheduler task panicked: {}", e))),
            None => Ok(()),
        }
    }

    /// Signal both tasks to stop after their current cycle and wait for them.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = joined
                .map_err(|e| RagsyncError::Cancelled(format!("scheduler task panicked: {}", e)))
                .and_then(|r| r);
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        log::info!("scheduler: stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Tick until shutdown, running `cycle` under `cadence.deadline` each time.
///
/// Non-fatal cycle errors are logged and the task keeps ticking; a fatal error
/// ends the task and is returned.
async fn run_periodic<F, Fut, T>(
    name: &'static str,
    cadence: Cadence,
    mut shutdown: watch::Receiver<bool>,
    mut cycle: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    T: Debug,
{
    let mut ticker = tokio::time::interval(cadence.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match tokio::time::timeout(cadence.deadline, cycle()).await {
            Ok(Ok(report)) => log::debug!("scheduler: {} cycle done: {:?}", name, report),
            Ok(Err(e)) if e.is_fatal() => {
                log::error!("scheduler: {} task stopping on fatal error: {}", name, e);
                return Err(e);
            }
            Ok(Err(e)) => log::warn!("scheduler: {} cycle failed: {}", name, e),
            Err(_) => {
                let e = RagsyncError::Cancelled(format!(
                    "{} cycle exceeded its {:?} deadline",
                    name, cadence.deadline
                ));
                log::warn!("scheduler: {}", e);
            }
        }
    }

    log::debug!("scheduler: {} task stopped", name);
    Ok(())
}
