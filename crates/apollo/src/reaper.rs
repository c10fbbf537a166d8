//! Expiry of idle sessions.

use std::sync::Arc;
use std::time::SystemTime;

use apollo_cron::CronJob;
use apollo_session::{Session, SessionFilter, Store};

use crate::{Core, DispatchError};

/// Purges sessions whose last activity is older than the configured
/// expiry.
///
/// A session hosted here is shut down like a logout, so a parked request
/// gets a farewell and the user's departure is announced. Sessions of
/// other processes (or of a process that died) only get their records and
/// queues retired.
pub struct Reaper<S: Store> {
    core: Arc<Core<S>>,
}

impl<S: Store> Reaper<S> {
    pub fn new(core: Arc<Core<S>>) -> Self {
        Self { core }
    }

    /// Runs one sweep as if the time were `now`. Returns how many sessions
    /// were purged.
    ///
    /// # Errors
    /// The sweep is skipped when the bus is not ready.
    pub async fn run_once_at(&self, now: SystemTime) -> Result<usize, DispatchError> {
        self.core.bus().ensure_ready()?;

        let Some(cutoff) = now.checked_sub(self.core.config().session_expiry) else {
            return Ok(0);
        };
        let expired = self
            .core
            .store()
            .find::<Session>(&SessionFilter::inactive_since(cutoff))
            .await?;

        for session in &expired {
            let token = &session.token;
            if !self.core.shutdown_transport(token, "Heartbeat timeout").await {
                self.core.retire_session(token, "Heartbeat timeout").await;
            }
        }

        if !expired.is_empty() {
            tracing::info!("Purged {} expired session(s)", expired.len());
        }
        Ok(expired.len())
    }
}

impl<S: Store> CronJob for Reaper<S> {
    fn name(&self) -> &str {
        "reaper"
    }

    async fn run(&self) {
        match self.run_once_at(SystemTime::now()).await {
            Ok(_) => {}
            Err(e) if e.is_unavailable() => {
                tracing::warn!(error = %e, "bus not ready, reaper run skipped");
            }
            Err(e) => tracing::error!(error = %e, "reaper run failed"),
        }
    }
}
