use pixstash_core::CleanupSettings;
use pixstash_storage::{Storage, StorageResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Periodic removal of expired items.
#[derive(Clone)]
pub struct CleanupService {
    storage: Arc<dyn Storage>,
    interval: Duration,
}

impl CleanupService {
    pub fn new(storage: Arc<dyn Storage>, interval: Duration) -> Self {
        Self { storage, interval }
    }

    pub fn from_settings(storage: Arc<dyn Storage>, settings: &CleanupSettings) -> Self {
        Self::new(storage, Duration::from_secs(settings.interval_secs.max(1)))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the background cleanup task. The first sweep runs immediately.
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut cleanup_interval = interval(self.interval);
            cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                cleanup_interval.tick().await;

                tracing::info!("Starting scheduled cleanup of expired images");

                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "Cleanup task failed");
                }
            }
        })
    }

    /// Sweep once; returns how many items were removed.
    #[tracing::instrument(skip(self), fields(cleanup.backend = %self.storage.backend_type()))]
    pub async fn run_once(&self) -> StorageResult<usize> {
        let start = std::time::Instant::now();
        let deleted = self.storage.clean_expired().await?;

        tracing::info!(
            deleted,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Cleanup completed"
        );

        Ok(deleted)
    }
}
