use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::scrape::orchestrator::Orchestrator;
use crate::services::{
    credentials::CredentialService, encryption::EncryptionService, progress::ProgressPublisher,
    queue::JobQueue, rate_limit::RateGovernor,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<JobQueue>,
    pub progress: Arc<ProgressPublisher>,
    pub credentials: Arc<CredentialService>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Wire the full service graph from configuration and live
    /// connections. Used by the server, the worker, and the scheduler so
    /// all three share one construction path.
    pub fn new(
        db: PgPool,
        encryption: EncryptionService,
        queue: JobQueue,
        progress: ProgressPublisher,
        governor: RateGovernor,
        config: AppConfig,
    ) -> Self {
        let queue = Arc::new(queue);
        let progress = Arc::new(progress);
        let credentials = Arc::new(CredentialService::new(Arc::new(encryption)));
        let orchestrator = Arc::new(Orchestrator::new(
            db.clone(),
            Arc::new(governor),
            queue.clone(),
            progress.clone(),
            credentials.clone(),
            config,
        ));

        Self {
            db,
            queue,
            progress,
            credentials,
            orchestrator,
        }
    }
}
