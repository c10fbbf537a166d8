//! Periodic job scheduler for Apollo.
//!
//! Runs maintenance jobs (the session reaper, mainly) at a fixed interval
//! with start-up jitter, missed-run handling, a duration budget and
//! pause/resume.
//!
//! # Integration
//!
//! [`spawn_cron`] runs a [`CronJob`] on its own task and returns a
//! [`CronHandle`] for pausing, resuming and stopping it. Callers with their
//! own loop can drive a [`CronScheduler`] directly:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = control_rx.recv() => { /* handle control */ }
//!         info = scheduler.wait_for_run() => {
//!             job.run().await;
//!             scheduler.record_run_end();
//!         }
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, info, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a run fires late enough to have missed whole intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissedRunPolicy {
    /// Run once now, then schedule the next run one interval from now.
    #[default]
    Skip,
    /// Run once now, then return to the original cadence, dropping the
    /// missed slots.
    Align,
}

#[derive(Debug, Clone)]
pub struct CronConfig {
    /// Time between runs.
    pub interval: Duration,
    pub policy: MissedRunPolicy,
    /// A warning is logged when a run takes longer than this fraction of
    /// the interval (0.0–1.0).
    pub budget_warn_threshold: f64,
    /// Random delay (0..max) added to the first run, so processes started
    /// together don't sweep the store at the same moment.
    pub initial_jitter: Duration,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            policy: MissedRunPolicy::default(),
            budget_warn_threshold: 0.5,
            initial_jitter: Duration::ZERO,
        }
    }
}

impl CronConfig {
    /// Shortest interval accepted.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`CronScheduler::new`].
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "cron interval too short, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        if self.initial_jitter > self.interval {
            self.initial_jitter = self.interval;
        }
        self
    }
}

/// Returned by [`CronScheduler::wait_for_run`] each time a run is due.
#[derive(Debug, Clone)]
pub struct RunInfo {
    /// Run number, starting at 1.
    pub run: u64,
    /// How far past its deadline the run fired.
    pub late_by: Duration,
    /// Whole intervals missed before this run.
    pub skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct CronScheduler {
    config: CronConfig,
    run_count: u64,
    skipped_total: u64,
    next_run: TokioInstant,
    run_start: Option<Instant>,
    paused: bool,
}

impl CronScheduler {
    pub fn new(config: CronConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max = config.initial_jitter.as_millis() as u64;
            Duration::from_millis(rand::rng().random_range(0..=max))
        };
        let next_run = TokioInstant::now() + config.interval + jitter;

        debug!(
            interval_s = config.interval.as_secs_f64(),
            jitter_ms = jitter.as_millis() as u64,
            policy = ?config.policy,
            "cron scheduler created"
        );

        Self {
            config,
            run_count: 0,
            skipped_total: 0,
            next_run,
            run_start: None,
            paused: false,
        }
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self::new(CronConfig::every(interval))
    }

    /// Waits until the next run is due.
    ///
    /// Pends forever while paused; use it inside `tokio::select!` next to
    /// whatever can resume the scheduler.
    pub async fn wait_for_run(&mut self) -> RunInfo {
        if self.paused {
            std::future::pending::<()>().await;
        }

        let due = self.next_run;
        time::sleep_until(due).await;

        let now = TokioInstant::now();
        let interval = self.config.interval;
        let late_by = now.saturating_duration_since(due);
        let skipped = u64::try_from(late_by.as_nanos() / interval.as_nanos()).unwrap_or(u64::MAX);

        self.run_count += 1;
        self.skipped_total += skipped;
        self.run_start = Some(Instant::now());

        if skipped > 0 {
            warn!(
                run = self.run_count,
                skipped,
                late_s = late_by.as_secs_f64(),
                "cron fell behind, missed runs dropped"
            );
        }

        self.next_run = match self.config.policy {
            MissedRunPolicy::Skip => now + interval,
            MissedRunPolicy::Align => aligned_next_run(due, interval, skipped).unwrap_or(now + interval),
        };

        trace!(run = self.run_count, "cron run due");

        RunInfo {
            run: self.run_count,
            late_by,
            skipped,
        }
    }

    /// Marks the current run finished and checks it against the budget.
    pub fn record_run_end(&mut self) {
        let Some(start) = self.run_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let used = elapsed.as_secs_f64() / self.config.interval.as_secs_f64();
        if used >= self.config.budget_warn_threshold {
            warn!(
                run = self.run_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                interval_ms = self.config.interval.as_secs_f64() * 1000.0,
                "cron run used {:.0}% of its interval",
                used * 100.0
            );
        }
    }

    /// Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(run = self.run_count, "cron paused");
        }
    }

    /// Resumes with the next run one interval from now, so a long pause
    /// doesn't produce a late run.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next_run = TokioInstant::now() + self.config.interval;
            debug!(run = self.run_count, "cron resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Total intervals missed since creation.
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }
}

// ---------------------------------------------------------------------------
// Job runner
// ---------------------------------------------------------------------------

/// A periodic job.
///
/// A job has no way to fail the scheduler: it logs its own errors and
/// tries again next run.
pub trait CronJob: Send + Sync + 'static {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    fn run(&self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Pause,
    Resume,
    Stop,
}

/// Controls a job started with [`spawn_cron`].
///
/// Dropping every handle stops the job after its current run.
#[derive(Debug, Clone)]
pub struct CronHandle {
    control: mpsc::Sender<Control>,
}

impl CronHandle {
    /// Returns `false` if the job already stopped.
    pub async fn pause(&self) -> bool {
        self.control.send(Control::Pause).await.is_ok()
    }

    pub async fn resume(&self) -> bool {
        self.control.send(Control::Resume).await.is_ok()
    }

    pub async fn stop(&self) -> bool {
        self.control.send(Control::Stop).await.is_ok()
    }

    pub fn is_running(&self) -> bool {
        !self.control.is_closed()
    }
}

/// Runs `job` every interval on a new task until stopped.
pub fn spawn_cron<J: CronJob>(config: CronConfig, job: Arc<J>) -> (CronHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(8);
    let mut scheduler = CronScheduler::new(config);

    let task = tokio::spawn(async move {
        info!(job = job.name(), interval_s = scheduler.interval().as_secs_f64(), "cron job started");
        loop {
            tokio::select! {
                control = rx.recv() => match control {
                    Some(Control::Pause) => scheduler.pause(),
                    Some(Control::Resume) => scheduler.resume(),
                    Some(Control::Stop) | None => break,
                },
                run = scheduler.wait_for_run() => {
                    trace!(job = job.name(), run = run.run, "cron job running");
                    job.run().await;
                    scheduler.record_run_end();
                }
            }
        }
        info!(job = job.name(), runs = scheduler.run_count(), "cron job stopped");
    });

    (CronHandle { control: tx }, task)
}

/// The first slot on `due`'s grid after `skipped` missed ones. `None` when
/// that is further out than an `Instant` reaches.
fn aligned_next_run(due: TokioInstant, interval: Duration, skipped: u64) -> Option<TokioInstant> {
    let steps = u32::try_from(skipped).unwrap_or(u32::MAX).saturating_add(1);
    interval.checked_mul(steps).and_then(|ahead| due.checked_add(ahead))
}
