//! Job Queue: accepts batches, fans units out to an executor and tracks
//! their lifecycle.
//!
//! Every unit is owned by one driver task that walks it through
//! `Queued → Processing → {Succeeded, Failed}`, retrying retryable errors with
//! exponential backoff. All transitions happen under one short-lived mutex and
//! are compare-and-set on (epoch, status), so a unit never has two attempts in
//! flight. A cache key maps to at most one non-terminal unit: re-submitting it
//! returns the existing unit instead of enqueuing a duplicate.
//!
//! Batch aggregates are computed from unit states on demand. Ledger writes and
//! progress callbacks run after the lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, ResultCache};
use crate::config::PipelineConfig;
use crate::errors::OptimizationError;
use crate::models::optimization::{OptimizationResult, UnitRequest};
use crate::worker::{BatchProgress, ProgressReporter, UnitExecutor};

pub mod handlers;
pub mod ledger;
pub mod types;

pub use self::ledger::{PgUnitLedger, UnitLedger};
pub use self::types::{
    BatchStatus, BatchSubmission, CancelOutcome, QueueError, QueueMetrics, RetryPolicy,
    UnitSnapshot, UnitStatus,
};
use self::types::{AttemptRecord, BatchRecord, UnitRecord};

#[derive(Default)]
struct QueueState {
    units: HashMap<Uuid, UnitRecord>,
    batches: HashMap<Uuid, BatchRecord>,
    /// Cache key → the one non-terminal unit computing it.
    in_flight: HashMap<CacheKey, Uuid>,
    cache_hits: u64,
    cache_misses: u64,
    processing_time: Duration,
    processed: u64,
}

/// What to publish about a unit once the lock is released.
#[derive(Default)]
struct Notice {
    ledger: Option<(Uuid, UnitSnapshot)>,
    progress: Vec<BatchProgress>,
}

impl QueueState {
    fn notice_for(&self, unit_id: Uuid, with_progress: bool) -> Notice {
        let Some(unit) = self.units.get(&unit_id) else {
            return Notice::default();
        };
        let ledger = unit.batches.first().map(|b| (*b, unit.snapshot()));
        let progress = if with_progress {
            unit.batches
                .iter()
                .filter_map(|b| self.progress_of(*b))
                .collect()
        } else {
            Vec::new()
        };
        Notice { ledger, progress }
    }

    fn progress_of(&self, batch_id: Uuid) -> Option<BatchProgress> {
        let batch = self.batches.get(&batch_id)?;
        let mut progress = BatchProgress {
            batch_id,
            completed: 0,
            total: batch.unit_ids.len(),
            succeeded: 0,
            failed: 0,
        };
        for status in batch
            .unit_ids
            .iter()
            .filter_map(|id| self.units.get(id).map(|u| u.status))
        {
            match status {
                UnitStatus::Succeeded => progress.succeeded += 1,
                UnitStatus::Failed => progress.failed += 1,
                UnitStatus::Queued | UnitStatus::Processing => {}
            }
        }
        progress.completed = progress.succeeded + progress.failed;
        Some(progress)
    }
}

fn release_in_flight(in_flight: &mut HashMap<CacheKey, Uuid>, key: &CacheKey, unit_id: Uuid) {
    if in_flight.get(key) == Some(&unit_id) {
        in_flight.remove(key);
    }
}

pub struct JobQueue {
    state: Mutex<QueueState>,
    cache: Arc<dyn ResultCache>,
    executor: Arc<dyn UnitExecutor>,
    ledger: Arc<dyn UnitLedger>,
    retry: RetryPolicy,
    /// Units waiting here are still `Queued`, hence still cancellable.
    dispatch: Arc<Semaphore>,
    progress: Option<ProgressReporter>,
}

impl JobQueue {
    pub fn new(
        cache: Arc<dyn ResultCache>,
        executor: Arc<dyn UnitExecutor>,
        ledger: Arc<dyn UnitLedger>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cache,
            executor,
            ledger,
            retry: RetryPolicy::from(config),
            dispatch: Arc::new(Semaphore::new(config.max_workers.max(1))),
            progress: None,
        }
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Submission and control
    // ────────────────────────────────────────────────────────────────────────

    /// Registers a batch and starts a driver for every new unit. Requests whose
    /// key is already in flight join the existing unit.
    pub fn submit_batch(
        self: &Arc<Self>,
        requests: Vec<UnitRequest>,
    ) -> Result<BatchSubmission, QueueError> {
        if requests.is_empty() {
            return Err(QueueError::EmptyBatch);
        }

        let batch_id = Uuid::new_v4();
        let mut unit_ids = Vec::with_capacity(requests.len());
        let mut fresh = Vec::new();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let mut seen: HashSet<CacheKey> = HashSet::new();

            for request in requests {
                let key = request.cache_key();
                if !seen.insert(key.clone()) {
                    continue;
                }
                if let Some(&existing) = state.in_flight.get(&key) {
                    if let Some(unit) = state.units.get_mut(&existing) {
                        unit.batches.push(batch_id);
                    }
                    debug!("{key} already in flight as unit {existing}; joining it");
                    unit_ids.push(existing);
                    continue;
                }
                let unit_id = Uuid::new_v4();
                state.in_flight.insert(key, unit_id);
                state
                    .units
                    .insert(unit_id, UnitRecord::new(unit_id, request, batch_id));
                unit_ids.push(unit_id);
                fresh.push(unit_id);
            }

            state.batches.insert(
                batch_id,
                BatchRecord {
                    unit_ids: unit_ids.clone(),
                    cancelled: false,
                },
            );
        }

        info!(
            "Batch {batch_id} submitted: {} units ({} new, {} joined in-flight)",
            unit_ids.len(),
            fresh.len(),
            unit_ids.len() - fresh.len()
        );

        for unit_id in fresh {
            tokio::spawn(Arc::clone(self).drive(unit_id, 0));
        }

        Ok(BatchSubmission { batch_id, unit_ids })
    }

    /// Marks the batch cancelled. Units still `Queued` whose every batch is
    /// cancelled fail with `Cancelled`; units already processing run on.
    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<CancelOutcome, QueueError> {
        let notices: Vec<Notice> = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let batch = state
                .batches
                .get_mut(&batch_id)
                .ok_or(QueueError::UnknownBatch(batch_id))?;
            batch.cancelled = true;
            let candidates = batch.unit_ids.clone();

            let mut cancelled = Vec::new();
            for unit_id in candidates {
                let Some(unit) = state.units.get(&unit_id) else {
                    continue;
                };
                let orphaned = unit
                    .batches
                    .iter()
                    .all(|b| state.batches.get(b).map_or(true, |b| b.cancelled));
                if unit.status != UnitStatus::Queued || !orphaned {
                    continue;
                }

                if let Some(unit) = state.units.get_mut(&unit_id) {
                    let now = Utc::now();
                    unit.status = UnitStatus::Failed;
                    unit.error = Some(OptimizationError::Cancelled);
                    unit.updated_at = now;
                    unit.completed_at = Some(now);
                    release_in_flight(&mut state.in_flight, &unit.key, unit_id);
                    cancelled.push(unit_id);
                }
            }

            cancelled
                .iter()
                .map(|id| state.notice_for(*id, true))
                .collect()
        };

        info!(
            "Batch {batch_id} cancelled; {} queued units will not run",
            notices.len()
        );
        let cancelled_units = notices.len();
        for notice in notices {
            self.publish(notice).await;
        }

        Ok(CancelOutcome {
            batch_id,
            cancelled_units,
        })
    }

    /// Puts a failed unit back in `Queued` with a fresh attempt budget. Its
    /// history is kept. When another unit already computes the same key, that
    /// unit's id is returned and nothing is re-queued.
    pub fn retry_unit(self: &Arc<Self>, unit_id: Uuid) -> Result<Uuid, QueueError> {
        let epoch = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let unit = state
                .units
                .get_mut(&unit_id)
                .ok_or(QueueError::UnknownUnit(unit_id))?;
            if unit.status != UnitStatus::Failed {
                return Err(QueueError::NotRetryable(unit_id, unit.status.as_str()));
            }
            if let Some(&other) = state.in_flight.get(&unit.key) {
                return Ok(other);
            }

            unit.status = UnitStatus::Queued;
            unit.attempt_count = 0;
            unit.result = None;
            unit.error = None;
            unit.cache_hit = false;
            unit.completed_at = None;
            unit.updated_at = Utc::now();
            unit.epoch += 1;
            state.in_flight.insert(unit.key.clone(), unit_id);
            unit.epoch
        };

        info!("Unit {unit_id} re-queued by explicit retry");
        tokio::spawn(Arc::clone(self).drive(unit_id, epoch));
        Ok(unit_id)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Queries (never block on unit work)
    // ────────────────────────────────────────────────────────────────────────

    pub fn get_unit_status(&self, unit_id: Uuid) -> Result<UnitSnapshot, QueueError> {
        self.lock()
            .units
            .get(&unit_id)
            .map(UnitRecord::snapshot)
            .ok_or(QueueError::UnknownUnit(unit_id))
    }

    pub fn get_batch_status(&self, batch_id: Uuid) -> Result<BatchStatus, QueueError> {
        let state = self.lock();
        let batch = state
            .batches
            .get(&batch_id)
            .ok_or(QueueError::UnknownBatch(batch_id))?;

        let results: Vec<UnitSnapshot> = batch
            .unit_ids
            .iter()
            .filter_map(|id| state.units.get(id).map(UnitRecord::snapshot))
            .collect();

        let count = |status: UnitStatus| results.iter().filter(|u| u.status == status).count();
        let succeeded = count(UnitStatus::Succeeded);
        let failed = count(UnitStatus::Failed);
        let total = batch.unit_ids.len();

        Ok(BatchStatus {
            batch_id,
            total,
            queued: count(UnitStatus::Queued),
            processing: count(UnitStatus::Processing),
            succeeded,
            failed,
            cached: results
                .iter()
                .filter(|u| u.cache_hit && u.status == UnitStatus::Succeeded)
                .count(),
            cancelled: batch.cancelled,
            complete: succeeded + failed == total,
            results,
        })
    }

    pub fn metrics(&self) -> QueueMetrics {
        let state = self.lock();
        let mut metrics = QueueMetrics {
            units: state.units.len(),
            in_flight: state.in_flight.len(),
            batches: state.batches.len(),
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
            mean_processing_ms: (state.processed > 0).then(|| {
                state.processing_time.as_secs_f64() * 1000.0 / state.processed as f64
            }),
            ..Default::default()
        };
        for unit in state.units.values() {
            match unit.status {
                UnitStatus::Queued => metrics.queued += 1,
                UnitStatus::Processing => metrics.processing += 1,
                UnitStatus::Succeeded => metrics.succeeded += 1,
                UnitStatus::Failed => metrics.failed += 1,
            }
        }
        metrics
    }

    /// Forgets batches whose units all finished before `older_than` ago.
    /// A unit shared with a surviving batch is kept. Returns units removed.
    pub fn prune_terminal(&self, older_than: Duration) -> usize {
        let now = Utc::now();
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return 0;
        };

        let mut guard = self.lock();
        let QueueState { units, batches, .. } = &mut *guard;

        let expired: Vec<Uuid> = batches
            .iter()
            .filter(|(_, batch)| {
                batch.unit_ids.iter().all(|id| {
                    units.get(id).map_or(true, |u| {
                        u.status.is_terminal() && u.completed_at.is_some_and(|t| t <= cutoff)
                    })
                })
            })
            .map(|(id, _)| *id)
            .collect();
        for batch_id in &expired {
            batches.remove(batch_id);
        }

        let before = units.len();
        units.retain(|_, unit| {
            unit.batches.retain(|b| batches.contains_key(b));
            !unit.batches.is_empty()
        });
        let removed = before - units.len();

        if removed > 0 || !expired.is_empty() {
            info!(
                "Pruned {} batches and {removed} terminal units",
                expired.len()
            );
        }
        removed
    }

    // ────────────────────────────────────────────────────────────────────────
    // Driver
    // ────────────────────────────────────────────────────────────────────────

    async fn drive(self: Arc<Self>, unit_id: Uuid, epoch: u64) {
        self.persist(unit_id).await;

        loop {
            let Ok(permit) = Arc::clone(&self.dispatch).acquire_owned().await else {
                self.finish(
                    unit_id,
                    epoch,
                    Err(OptimizationError::TransientBackend("dispatcher closed".into())),
                    false,
                    Duration::ZERO,
                )
                .await;
                return;
            };

            let Some((attempt, request)) = self.begin_attempt(unit_id, epoch) else {
                debug!("Unit {unit_id} is no longer dispatchable; driver exits");
                return;
            };
            self.persist(unit_id).await;
            let started = Instant::now();

            if let Some(hit) = self
                .cache
                .get(request.subject_id(), request.target_id(), request.version())
                .await
            {
                drop(permit);
                self.finish(unit_id, epoch, Ok(hit), true, started.elapsed())
                    .await;
                return;
            }
            if attempt == 1 {
                self.lock().cache_misses += 1;
            }

            let outcome = self.executor.execute(unit_id, attempt, &request).await;
            drop(permit);
            let elapsed = started.elapsed();

            match outcome {
                Ok(result) => {
                    // Cached before it is reported as succeeded.
                    self.cache
                        .set(
                            request.subject_id(),
                            request.target_id(),
                            &result,
                            request.version(),
                        )
                        .await;
                    self.finish(unit_id, epoch, Ok(result), false, elapsed).await;
                    return;
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Unit {unit_id} attempt {attempt}/{} failed ({err}); retrying in {}ms",
                        self.retry.max_attempts,
                        delay.as_millis()
                    );
                    if !self.note_failed_attempt(unit_id, epoch, attempt, err) {
                        return;
                    }
                    self.persist(unit_id).await;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.finish(unit_id, epoch, Err(err), false, elapsed).await;
                    return;
                }
            }
        }
    }

    /// CAS: only the driver holding the current epoch may move a non-terminal
    /// unit into `Processing`.
    fn begin_attempt(&self, unit_id: Uuid, epoch: u64) -> Option<(u32, UnitRequest)> {
        let mut state = self.lock();
        let unit = state.units.get_mut(&unit_id)?;
        if unit.epoch != epoch || unit.status.is_terminal() {
            return None;
        }
        unit.status = UnitStatus::Processing;
        unit.attempt_count += 1;
        unit.updated_at = Utc::now();
        debug!("Unit {unit_id} → processing (attempt {})", unit.attempt_count);
        Some((unit.attempt_count, unit.request.clone()))
    }

    fn note_failed_attempt(
        &self,
        unit_id: Uuid,
        epoch: u64,
        attempt: u32,
        err: OptimizationError,
    ) -> bool {
        let mut state = self.lock();
        let Some(unit) = state.units.get_mut(&unit_id) else {
            return false;
        };
        if unit.epoch != epoch {
            return false;
        }
        let now = Utc::now();
        unit.history.push(AttemptRecord {
            attempt,
            error: Some(err.clone()),
            finished_at: now,
        });
        unit.error = Some(err);
        unit.updated_at = now;
        true
    }

    async fn finish(
        &self,
        unit_id: Uuid,
        epoch: u64,
        outcome: Result<OptimizationResult, OptimizationError>,
        cache_hit: bool,
        elapsed: Duration,
    ) {
        let notice = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(unit) = state.units.get_mut(&unit_id) else {
                return;
            };
            if unit.epoch != epoch || unit.status.is_terminal() {
                return;
            }

            let now = Utc::now();
            match outcome {
                Ok(result) => {
                    unit.status = UnitStatus::Succeeded;
                    unit.result = Some(result);
                    unit.error = None;
                    debug!("Unit {unit_id} → succeeded (cache_hit={cache_hit})");
                }
                Err(err) => {
                    error!(
                        "Unit {unit_id} → failed [{}] after {} attempt(s): {err}",
                        err.code(),
                        unit.attempt_count
                    );
                    unit.status = UnitStatus::Failed;
                    unit.error = Some(err);
                }
            }
            unit.history.push(AttemptRecord {
                attempt: unit.attempt_count,
                error: unit.error.clone(),
                finished_at: now,
            });
            unit.cache_hit = cache_hit;
            unit.updated_at = now;
            unit.completed_at = Some(now);
            release_in_flight(&mut state.in_flight, &unit.key, unit_id);

            if cache_hit {
                state.cache_hits += 1;
            } else {
                state.processing_time += elapsed;
                state.processed += 1;
            }
            state.notice_for(unit_id, true)
        };

        self.publish(notice).await;
    }

    async fn persist(&self, unit_id: Uuid) {
        let notice = self.lock().notice_for(unit_id, false);
        self.publish(notice).await;
    }

    async fn publish(&self, notice: Notice) {
        if let Some((batch_id, snapshot)) = notice.ledger {
            if let Err(e) = self.ledger.record(batch_id, &snapshot).await {
                warn!("Ledger write for unit {} failed: {e}", snapshot.unit_id);
            }
        }
        if let Some(reporter) = &self.progress {
            for progress in notice.progress {
                reporter(progress);
            }
        }
    }
}
