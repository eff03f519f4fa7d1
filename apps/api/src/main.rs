mod broker;
mod cache;
mod config;
mod db;
mod errors;
mod llm_client;
mod models;
mod profiles;
mod queue;
mod routes;
mod state;
mod suggestions;
mod worker;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::broker::BrokerExecutor;
use crate::cache::connect_cache;
use crate::config::{Config, DispatchMode};
use crate::db::{create_pool, ensure_schema};
use crate::llm_client::LlmClient;
use crate::profiles::PgProfileSource;
use crate::queue::{JobQueue, PgUnitLedger};
use crate::routes::build_router;
use crate::state::AppState;
use crate::suggestions::SuggestionEngine;
use crate::worker::scoring::KeywordMatchScorer;
use crate::worker::{BatchProgress, Optimizer, UnitExecutor, WorkerPool};

const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = Arc::new(build_worker_pool(&config)?);

    if std::env::args().nth(1).as_deref() == Some("worker") {
        info!("Starting Tailor broker worker v{}", env!("CARGO_PKG_VERSION"));
        broker::run_worker(&config.redis_url, pool).await?;
        return Ok(());
    }

    info!("Starting Tailor API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    ensure_schema(&db).await?;

    // Result cache: Redis when reachable, otherwise in-process
    let cache = connect_cache(&config.redis_url, config.pipeline.cache_ttl).await;

    let executor: Arc<dyn UnitExecutor> = match config.dispatch_mode {
        DispatchMode::Local => {
            info!("Dispatch: in-process pool with {} workers", pool.size());
            pool
        }
        DispatchMode::Broker => {
            info!("Dispatch: redis broker at {}", config.redis_url);
            Arc::new(
                BrokerExecutor::connect(&config.redis_url, config.pipeline.unit_timeout).await?,
            )
        }
    };

    let ledger = PgUnitLedger::new(db.clone());
    let abandoned = ledger.fail_abandoned().await?;
    if abandoned > 0 {
        warn!("Marked {abandoned} units left unfinished by a previous run as failed");
    }

    let queue = Arc::new(
        JobQueue::new(
            cache.clone(),
            executor,
            Arc::new(ledger),
            &config.pipeline,
        )
        .with_progress(Arc::new(|p: BatchProgress| {
            info!(
                "Batch {}: {}/{} done ({} ok, {} failed)",
                p.batch_id, p.completed, p.total, p.succeeded, p.failed
            );
        })),
    );

    spawn_pruner(Arc::clone(&queue), config.pipeline.unit_retention);

    let state = AppState {
        queue,
        cache,
        profiles: Arc::new(PgProfileSource::new(db)),
        engine: SuggestionEngine::new(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_worker_pool(config: &Config) -> Result<WorkerPool> {
    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let optimizer = Optimizer::new(
        Arc::new(llm),
        SuggestionEngine::new(),
        Arc::new(KeywordMatchScorer),
    );
    Ok(WorkerPool::new(
        Arc::new(optimizer),
        config.pipeline.max_workers,
        config.pipeline.unit_timeout,
    ))
}

/// Periodically forgets finished batches older than the retention window.
fn spawn_pruner(queue: Arc<JobQueue>, retention: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            queue.prune_terminal(retention);
        }
    });
}
