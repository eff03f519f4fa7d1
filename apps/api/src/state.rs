use std::sync::Arc;

use crate::cache::ResultCache;
use crate::profiles::ProfileSource;
use crate::queue::JobQueue;
use crate::suggestions::SuggestionEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    /// Same instance the queue reads and writes.
    pub cache: Arc<dyn ResultCache>,
    pub profiles: Arc<dyn ProfileSource>,
    pub engine: SuggestionEngine,
}
