//! Redis-backed dispatch for running units in separate worker processes.
//!
//! The API side pushes a `UnitEnvelope` onto `tailor:units:pending` and blocks
//! on a per-attempt reply list. `tailor-api worker` moves envelopes into
//! `tailor:units:processing` with BRPOPLPUSH, runs them on its own
//! `WorkerPool`, pushes the `UnitReply` and only then drops the envelope from
//! the processing list. Envelopes left in processing by a crashed worker are
//! put back on pending when a worker starts, so delivery is at-least-once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::OptimizationError;
use crate::models::optimization::{OptimizationResult, UnitRequest};
use crate::worker::{UnitExecutor, UnitOutcome, WorkerPool};

pub const PENDING_KEY: &str = "tailor:units:pending";
pub const PROCESSING_KEY: &str = "tailor:units:processing";
const REPLY_TTL_SECS: u64 = 3600;
const POLL_SECS: u64 = 5;
/// Allowance for queueing and transport on top of the unit timeout.
const REPLY_SLACK: Duration = Duration::from_secs(30);
const INTAKE_RETRY_MIN: Duration = Duration::from_secs(1);
const INTAKE_RETRY_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitEnvelope {
    pub unit_id: Uuid,
    pub attempt: u32,
    pub request: UnitRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReply {
    pub unit_id: Uuid,
    pub attempt: u32,
    pub outcome: Result<OptimizationResult, OptimizationError>,
}

/// One list per attempt, so a late reply to an earlier attempt is never
/// mistaken for the current one.
pub fn reply_key(unit_id: Uuid, attempt: u32) -> String {
    format!("tailor:units:reply:{unit_id}:{attempt}")
}

// ────────────────────────────────────────────────────────────────────────────
// Producer side (API process)
// ────────────────────────────────────────────────────────────────────────────

pub struct BrokerExecutor {
    client: redis::Client,
    producer: ConnectionManager,
    unit_timeout: Duration,
    reply_wait: Duration,
}

impl BrokerExecutor {
    pub async fn connect(redis_url: &str, unit_timeout: Duration) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)?;
        let producer = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            producer,
            unit_timeout,
            reply_wait: unit_timeout + REPLY_SLACK,
        })
    }

    async fn round_trip(
        &self,
        unit_id: Uuid,
        attempt: u32,
        request: &UnitRequest,
    ) -> Result<Option<UnitReply>, BrokerError> {
        let envelope = serde_json::to_string(&UnitEnvelope {
            unit_id,
            attempt,
            request: request.clone(),
        })?;

        let mut producer = self.producer.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(PENDING_KEY)
            .arg(&envelope)
            .query_async(&mut producer)
            .await?;

        let raw = match self.await_reply(unit_id, attempt).await {
            Ok(Some(raw)) => raw,
            unanswered => {
                self.withdraw(unit_id, attempt, &envelope).await;
                return unanswered.map(|_| None);
            }
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn await_reply(
        &self,
        unit_id: Uuid,
        attempt: u32,
    ) -> Result<Option<String>, BrokerError> {
        // BLPOP holds its connection; the shared producer must stay free.
        let mut waiter = self.client.get_multiplexed_async_connection().await?;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(reply_key(unit_id, attempt))
            .arg(self.reply_wait.as_secs_f64())
            .query_async(&mut waiter)
            .await?;
        Ok(popped.map(|(_, raw)| raw))
    }

    /// Takes an unanswered envelope back off the pending list so the next
    /// attempt does not sit behind it. A worker that already claimed it still
    /// runs it; its reply lands on a key nobody waits for and expires.
    async fn withdraw(&self, unit_id: Uuid, attempt: u32, envelope: &str) {
        let mut producer = self.producer.clone();
        let removed: redis::RedisResult<i64> = redis::cmd("LREM")
            .arg(PENDING_KEY)
            .arg(1)
            .arg(envelope)
            .query_async(&mut producer)
            .await;
        match removed {
            Ok(0) => debug!("Unit {unit_id} attempt {attempt} was already claimed"),
            Ok(_) => debug!("Withdrew unclaimed envelope for unit {unit_id} attempt {attempt}"),
            Err(e) => warn!("Could not withdraw unit {unit_id} attempt {attempt}: {e}"),
        }
    }
}

#[async_trait]
impl UnitExecutor for BrokerExecutor {
    async fn execute(&self, unit_id: Uuid, attempt: u32, request: &UnitRequest) -> UnitOutcome {
        debug!("Unit {unit_id} attempt {attempt} dispatched to broker");
        match self.round_trip(unit_id, attempt, request).await {
            Ok(Some(reply)) => reply.outcome,
            Ok(None) => {
                warn!("No broker reply for unit {unit_id} attempt {attempt}");
                Err(OptimizationError::Timeout {
                    secs: self.unit_timeout.as_secs(),
                })
            }
            Err(e) => Err(OptimizationError::TransientBackend(format!("broker: {e}"))),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Consumer side (`tailor-api worker`)
// ────────────────────────────────────────────────────────────────────────────

/// Consumes envelopes until Ctrl-C, then waits for claimed units to finish.
/// Redis errors while claiming are retried; they never abort claimed work.
pub async fn run_worker(redis_url: &str, pool: Arc<WorkerPool>) -> Result<(), BrokerError> {
    let client = redis::Client::open(redis_url)?;
    let mut replies = ConnectionManager::new(client.clone()).await?;
    let intake = ConnectionManager::new(client).await?;

    let requeued = requeue_orphans(&mut replies).await?;
    if requeued > 0 {
        warn!("Re-queued {requeued} envelopes left in {PROCESSING_KEY}");
    }
    let slots = pool.size();
    info!("Broker worker consuming {PENDING_KEY} with {slots} slots");

    let shutdown = {
        let pool = Arc::clone(&pool);
        async move {
            let _ = tokio::signal::ctrl_c().await;
            info!(
                "Shutdown requested ({} of {} slots busy)",
                pool.size() - pool.available(),
                pool.size()
            );
        }
    };

    consume(
        move || {
            let mut conn = intake.clone();
            async move { claim_next(&mut conn).await }
        },
        slots,
        shutdown,
        move |raw| {
            let pool = Arc::clone(&pool);
            let mut conn = replies.clone();
            async move {
                if let Err(e) = handle_envelope(&pool, &mut conn, raw).await {
                    error!("Failed to deliver unit reply: {e}");
                }
            }
        },
    )
    .await;
    Ok(())
}

/// Claim loop. Never holds more than `slots` handlers at once, backs off on
/// claim errors and drains every running handler before returning.
async fn consume<C, CF, H, HF>(
    mut claim: C,
    slots: usize,
    shutdown: impl Future<Output = ()>,
    handle: H,
) where
    C: FnMut() -> CF,
    CF: Future<Output = Result<Option<String>, BrokerError>>,
    H: Fn(String) -> HF,
    HF: Future<Output = ()> + Send + 'static,
{
    tokio::pin!(shutdown);
    let slots = slots.max(1);
    let mut in_flight = JoinSet::new();
    let mut backoff = INTAKE_RETRY_MIN;

    loop {
        while in_flight.len() >= slots {
            if let Some(Err(e)) = in_flight.join_next().await {
                error!("Broker task failed: {e}");
            }
        }

        let claimed = tokio::select! {
            _ = &mut shutdown => break,
            claimed = claim() => claimed,
        };
        match claimed {
            Ok(Some(raw)) => {
                backoff = INTAKE_RETRY_MIN;
                in_flight.spawn(handle(raw));
            }
            Ok(None) => backoff = INTAKE_RETRY_MIN,
            Err(e) => {
                error!("Claiming from {PENDING_KEY} failed, retrying in {backoff:?}: {e}");
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(INTAKE_RETRY_MAX);
            }
        }
    }

    info!("Draining {} claimed units", in_flight.len());
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("Broker task failed: {e}");
        }
    }
}

async fn claim_next(conn: &mut ConnectionManager) -> Result<Option<String>, BrokerError> {
    let popped: Option<String> = redis::cmd("BRPOPLPUSH")
        .arg(PENDING_KEY)
        .arg(PROCESSING_KEY)
        .arg(POLL_SECS)
        .query_async(conn)
        .await?;
    Ok(popped)
}

async fn handle_envelope(
    pool: &WorkerPool,
    conn: &mut ConnectionManager,
    raw: String,
) -> Result<(), BrokerError> {
    let envelope: UnitEnvelope = match serde_json::from_str(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping malformed envelope: {e}");
            let _: i64 = redis::cmd("LREM")
                .arg(PROCESSING_KEY)
                .arg(1)
                .arg(&raw)
                .query_async(conn)
                .await?;
            return Ok(());
        }
    };

    let (unit_id, attempt) = (envelope.unit_id, envelope.attempt);
    debug!("Running unit {unit_id} attempt {attempt} from broker");
    let outcome = pool.run(envelope.request).await;
    if let Err(e) = &outcome {
        warn!("Unit {unit_id} attempt {attempt} failed in worker: {e}");
    }

    let key = reply_key(unit_id, attempt);
    let reply = serde_json::to_string(&UnitReply {
        unit_id,
        attempt,
        outcome,
    })?;

    let _: () = redis::pipe()
        .atomic()
        .cmd("LPUSH")
        .arg(&key)
        .arg(reply)
        .ignore()
        .cmd("EXPIRE")
        .arg(&key)
        .arg(REPLY_TTL_SECS)
        .ignore()
        .cmd("LREM")
        .arg(PROCESSING_KEY)
        .arg(1)
        .arg(&raw)
        .ignore()
        .query_async(conn)
        .await?;
    Ok(())
}

async fn requeue_orphans(conn: &mut ConnectionManager) -> Result<usize, BrokerError> {
    let mut moved = 0;
    loop {
        let item: Option<String> = redis::cmd("RPOPLPUSH")
            .arg(PROCESSING_KEY)
            .arg(PENDING_KEY)
            .query_async(&mut *conn)
            .await?;
        if item.is_none() {
            return Ok(moved);
        }
        moved += 1;
    }
}
