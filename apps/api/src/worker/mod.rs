//! Worker Pool: runs one optimization unit to completion, isolated from its
//! siblings.
//!
//! Concurrency is bounded by a semaphore sized at construction; a caller past
//! the limit waits for a permit instead of spawning more work. Each unit runs
//! in its own task under a hard wall-clock limit, so a panic or a hang is
//! converted into that unit's error and never reaches the pool.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::errors::OptimizationError;
use crate::models::optimization::{OptimizationResult, UnitRequest};

pub mod optimizer;
pub mod scoring;

pub use self::optimizer::Optimizer;

pub type UnitOutcome = Result<OptimizationResult, OptimizationError>;

/// The work of one unit, without any scheduling concerns.
#[async_trait]
pub trait UnitRunner: Send + Sync + 'static {
    async fn run(&self, request: &UnitRequest) -> UnitOutcome;
}

/// Where the job queue sends a dispatched attempt: the in-process pool or a
/// remote broker. Callers cannot tell the two apart.
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    async fn execute(&self, unit_id: Uuid, attempt: u32, request: &UnitRequest) -> UnitOutcome;
}

/// Running totals for one batch, delivered after each of its units finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Observer only: it receives a snapshot and has no handle on queue state.
pub type ProgressReporter = Arc<dyn Fn(BatchProgress) + Send + Sync>;

pub struct WorkerPool {
    runner: Arc<dyn UnitRunner>,
    permits: Arc<Semaphore>,
    size: usize,
    unit_timeout: Duration,
}

impl WorkerPool {
    pub fn new(runner: Arc<dyn UnitRunner>, size: usize, unit_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            runner,
            permits: Arc::new(Semaphore::new(size)),
            size,
            unit_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Idle slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs one unit. Waits for a free slot when the pool is saturated.
    pub async fn run(&self, request: UnitRequest) -> UnitOutcome {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OptimizationError::TransientBackend("worker pool closed".into()))?;

        let runner = Arc::clone(&self.runner);
        let mut handle = tokio::spawn(async move { runner.run(&request).await });

        match tokio::time::timeout(self.unit_timeout, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                error!("Unit task panicked: {message}");
                Err(OptimizationError::Panicked(message))
            }
            Ok(Err(join_err)) => Err(OptimizationError::Panicked(join_err.to_string())),
            Err(_) => {
                handle.abort();
                warn!(
                    "Unit exceeded its {}ms limit; task aborted",
                    self.unit_timeout.as_millis()
                );
                Err(OptimizationError::Timeout {
                    secs: self.unit_timeout.as_secs(),
                })
            }
        }
    }
}

#[async_trait]
impl UnitExecutor for WorkerPool {
    async fn execute(&self, unit_id: Uuid, attempt: u32, request: &UnitRequest) -> UnitOutcome {
        debug!("Unit {unit_id} attempt {attempt} running in-process");
        self.run(request.clone()).await
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
