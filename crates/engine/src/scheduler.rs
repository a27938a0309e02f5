//! Background scheduler.
//!
//! Two independent timers drain the workflow queues: one moves DRAFT
//! documents to SUBMITTED, the other moves SUBMITTED documents to APPROVED.
//! Each tick pulls at most `batch_size` ids oldest-first and hands them to the
//! [`BatchProcessor`]. A non-empty tick with zero successes is reported as a
//! stall so a queue blocked by documents that can never advance is visible to
//! operators instead of being retried silently.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use docflow_storage::{DocumentStatus, DocumentStorage, StorageError};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::batch::{success_count, BatchOutcomes, BatchProcessor};
use crate::config::{TickPolicy, WorkerConfig};
use crate::error::Outcome;
use crate::transition::Transition;

/// Which queue a timer drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Submit,
    Approve,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Submit, Stage::Approve];

    /// Status of the documents this stage picks up.
    pub fn queue_status(self) -> DocumentStatus {
        self.transition().from_status()
    }

    pub fn transition(self) -> Transition {
        match self {
            Stage::Submit => Transition::Submit,
            Stage::Approve => Transition::Approve,
        }
    }

    /// Initiator recorded in the history of documents moved by this stage.
    pub fn initiator(self) -> &'static str {
        match self {
            Stage::Submit => "SUBMIT-WORKER",
            Stage::Approve => "APPROVE-WORKER",
        }
    }

    fn index(self) -> usize {
        match self {
            Stage::Submit => 0,
            Stage::Approve => 1,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Submit => "submit",
            Stage::Approve => "approve",
        })
    }
}

/// Summary of one non-empty tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub stage: Stage,
    pub processed: usize,
    pub succeeded: usize,
    /// Documents still waiting in the stage's queue after the batch.
    pub remaining: u64,
    pub elapsed: Duration,
    pub outcomes: BatchOutcomes,
    /// No item advanced and the failures are not explained by another tick
    /// of the same stage racing this one.
    pub stalled: bool,
    /// Stalled ticks in a row for this stage, including this one. Zero when
    /// the tick made progress.
    pub consecutive_stalls: u32,
}

impl TickReport {
    pub fn failed(&self) -> usize {
        self.processed - self.succeeded
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }
}

/// Whether a tick with these outcomes counts towards the stall streak.
///
/// Under [`TickPolicy::Overlap`] two ticks of one stage can read the same
/// oldest ids; the later one then loses every item as `CONFLICT` while the
/// queue is in fact draining. Such a tick is not a stall.
fn counts_as_stall(policy: TickPolicy, outcomes: &BatchOutcomes) -> bool {
    if outcomes.is_empty() || success_count(outcomes) > 0 {
        return false;
    }
    let lost_races_only = outcomes.values().all(|o| *o == Outcome::Conflict);
    !(policy == TickPolicy::Overlap && lost_races_only)
}

pub struct Scheduler<S: DocumentStorage> {
    batch: BatchProcessor<S>,
    config: WorkerConfig,
    stalls: [AtomicU32; 2],
}

impl<S: DocumentStorage> Scheduler<S> {
    pub fn new(batch: BatchProcessor<S>, config: WorkerConfig) -> Self {
        Self {
            batch,
            config,
            stalls: [AtomicU32::new(0), AtomicU32::new(0)],
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn delay(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Submit => self.config.submit_delay(),
            Stage::Approve => self.config.approve_delay(),
        }
    }

    /// Run one tick for `stage`. Returns `None` when the queue was empty.
    ///
    /// Only a failure to read the queue is returned as an error; per-item
    /// failures are part of the report.
    pub async fn tick(&self, stage: Stage) -> Result<Option<TickReport>, StorageError> {
        let started = Instant::now();
        let storage = self.batch.processor().storage();

        let ids = storage
            .list_ids_by_status(stage.queue_status(), self.config.batch_size)
            .await?;
        if ids.is_empty() {
            return Ok(None);
        }

        tracing::info!(
            stage = %stage,
            found = ids.len(),
            status = %stage.queue_status(),
            "picked up documents"
        );

        let outcomes = self
            .batch
            .run(stage.transition(), &ids, stage.initiator())
            .await;
        let remaining = storage.count_by_status(stage.queue_status()).await?;
        let succeeded = success_count(&outcomes);

        let stalled = counts_as_stall(self.config.tick_policy, &outcomes);
        let counter = &self.stalls[stage.index()];
        let consecutive_stalls = if stalled {
            counter.fetch_add(1, Ordering::SeqCst) + 1
        } else if succeeded > 0 {
            counter.store(0, Ordering::SeqCst);
            0
        } else {
            counter.load(Ordering::SeqCst)
        };

        let report = TickReport {
            stage,
            processed: outcomes.len(),
            succeeded,
            remaining,
            elapsed: started.elapsed(),
            outcomes,
            stalled,
            consecutive_stalls,
        };

        tracing::info!(
            stage = %stage,
            elapsed_ms = report.elapsed.as_millis() as u64,
            succeeded = report.succeeded,
            failed = report.failed(),
            remaining = report.remaining,
            "batch processed"
        );

        if report.is_stalled() {
            tracing::warn!(
                stage = %stage,
                consecutive_stalls,
                outcomes = ?report.outcomes,
                "entire batch failed; queue may be blocked by documents that cannot advance"
            );
        }

        Ok(Some(report))
    }

    /// Start both timers. They run until [`SchedulerHandle::shutdown`] is
    /// called or the handle is dropped.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = Stage::ALL
            .into_iter()
            .map(|stage| {
                let scheduler = Arc::clone(&self);
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { scheduler.run_timer(stage, shutdown).await })
            })
            .collect();

        tracing::info!(
            batch_size = self.config.batch_size,
            submit_delay_ms = self.config.submit_delay_ms,
            approve_delay_ms = self.config.approve_delay_ms,
            tick_policy = ?self.config.tick_policy,
            "scheduler started"
        );

        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }

    async fn run_timer(self: Arc<Self>, stage: Stage, mut shutdown: watch::Receiver<bool>) {
        // interval_at panics on a zero period.
        let delay = self.delay(stage).max(Duration::from_millis(1));
        match self.config.tick_policy {
            TickPolicy::Serialize => loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                self.run_tick(stage).await;
            },
            TickPolicy::Overlap => {
                let start = tokio::time::Instant::now() + delay;
                let mut interval = tokio::time::interval_at(start, delay);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut in_flight = JoinSet::new();
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = interval.tick() => {
                            let scheduler = Arc::clone(&self);
                            in_flight.spawn(async move { scheduler.run_tick(stage).await });
                        }
                        Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                    }
                }
                while in_flight.join_next().await.is_some() {}
            }
        }
        tracing::debug!(stage = %stage, "timer stopped");
    }

    async fn run_tick(&self, stage: Stage) {
        if let Err(e) = self.tick(stage).await {
            tracing::error!(stage = %stage, error = %e, "scheduler tick failed");
        }
    }
}

/// Owner of the running timers.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop both timers and wait for any tick in progress to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "scheduler task ended abnormally");
            }
        }
        tracing::info!("scheduler stopped");
    }
}
