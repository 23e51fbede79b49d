//! Periodic background retraining.
//!
//! The scheduler and on-demand callers share [`retrain_in_background`], so
//! both go through the model's training lock and never fit concurrently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::model::TrainOutcome;
use crate::service::HazardService;
use crate::AnalyticsError;

/// Runs [`HazardService::retrain`] on the blocking thread pool.
///
/// # Errors
///
/// Returns whatever [`HazardService::retrain`] returns, or
/// [`AnalyticsError::Task`] if the blocking task panicked.
pub async fn retrain_in_background(
    service: Arc<HazardService>,
) -> Result<TrainOutcome, AnalyticsError> {
    tokio::task::spawn_blocking(move || service.retrain()).await?
}

/// Spawns the periodic retraining loop.
#[derive(Debug, Clone, Copy)]
pub struct TrainingScheduler {
    period: Duration,
}

impl TrainingScheduler {
    /// Creates a scheduler that retrains every `period`.
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Creates a scheduler that retrains every `hours` hours.
    #[must_use]
    pub const fn every_hours(hours: u64) -> Self {
        Self::new(Duration::from_secs(hours * 60 * 60))
    }

    /// The retraining period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Starts the loop on the current tokio runtime.
    ///
    /// The first run happens one period after startup. Failures are logged
    /// and the loop keeps going. Dropping the returned handle stops the
    /// loop at its next wake-up.
    #[must_use]
    pub fn spawn(self, service: Arc<HazardService>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = self.period;

        let task = tokio::spawn(async move {
            log::info!("Retraining scheduler started (every {period:?})");

            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        log::info!("Scheduled retraining starting");
                        match retrain_in_background(service.clone()).await {
                            Ok(TrainOutcome::Trained { version, sample_count }) => {
                                log::info!(
                                    "Scheduled retraining produced model v{version} \
                                     ({sample_count} incidents)"
                                );
                            }
                            Ok(TrainOutcome::InsufficientData { available, required }) => {
                                log::info!(
                                    "Scheduled retraining skipped: {available} incidents \
                                     (need {required})"
                                );
                            }
                            Err(e) => log::error!("Scheduled retraining failed: {e}"),
                        }
                    }
                }
            }

            log::info!("Retraining scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running [`TrainingScheduler`] loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop to stop and waits for it to exit.
    ///
    /// A retraining run already in progress finishes first.
    pub async fn shutdown(self) {
        // The receiver is gone only if the loop already exited.
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            log::error!("Retraining scheduler task failed: {e}");
        }
    }
}
