//! Background calibration updater.
//!
//! The updater keeps the local file cache reconciled with the remote
//! calibration service. While running, a single background task fires a
//! reconciliation cycle every `interval`; the first fire is delayed by
//! `interval` minus the time since the last recorded attempt, so a process
//! restarting shortly after an update does not immediately re-trigger one
//! while a long-idle deployment updates promptly.
//!
//! One cycle compares the cached and remote [`Version`] of every registry
//! pair and downloads plus installs newer tables. All failures are per
//! pair: an unreachable service marks that pair "failed" and the cycle
//! moves on. At the end, every registered listener is notified with the
//! cycle's [`CalibrationUpdateEvent`]; delivery is best effort, a
//! panicking listener is logged and does not block the others.
//!
//! A process-wide lock serializes cycles: at most one, scheduled or
//! on-demand, executes at a time. [`CalibrationUpdater::stop`] only
//! cancels future fires, it never interrupts a cycle already executing.

use crate::cache::CalibrationFileCache;
use crate::calibration::CalibrationType;
use crate::error::{GcalError, GcalResult};
use crate::registry::CalibrationRegistry;
use crate::repository::CalibrationRepository;
use crate::version::Version;
use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Receives the outcome of every reconciliation cycle.
pub trait UpdateListener: Send + Sync {
    fn calibration_updated(&self, event: &CalibrationUpdateEvent);
}

/// Outcome of one reconciliation cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CalibrationUpdateEvent {
    /// Pair names (`<instrument>_<TYPE>`) whose tables were updated.
    pub updated: Vec<String>,
    /// Pair names whose reconciliation failed.
    pub failed: Vec<String>,
}

impl CalibrationUpdateEvent {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.failed.is_empty()
    }
}

/// Cached version of one `(instrument, type)` pair, as reported by
/// [`CalibrationUpdater::version_info`].
#[derive(Clone, Debug)]
pub struct PairVersion {
    pub instrument: String,
    pub calibration_type: CalibrationType,
    /// `None` when no data is available for the pair at all.
    pub version: Option<Version>,
}

/// The `<instrument>_<TYPE>` name used in events and cache file names.
pub fn pair_name(instrument: &str, calibration_type: CalibrationType) -> String {
    format!("{}_{}", instrument, calibration_type)
}

#[derive(Clone)]
struct Targets {
    cache: Arc<CalibrationFileCache>,
    source: Arc<dyn CalibrationRepository>,
    interval: Duration,
}

struct Schedule {
    shutdown: watch::Sender<bool>,
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

struct Inner {
    registry: Arc<CalibrationRegistry>,
    cycle_lock: AsyncMutex<()>,
    listeners: StdMutex<Vec<Arc<dyn UpdateListener>>>,
    targets: StdMutex<Option<Targets>>,
    schedule: StdMutex<Option<Schedule>>,
}

/// Handle to the process-wide updater. Clones share the same state.
#[derive(Clone)]
pub struct CalibrationUpdater {
    inner: Arc<Inner>,
}

impl CalibrationUpdater {
    pub fn new(registry: Arc<CalibrationRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                cycle_lock: AsyncMutex::new(()),
                listeners: StdMutex::new(Vec::new()),
                targets: StdMutex::new(None),
                schedule: StdMutex::new(None),
            }),
        }
    }

    /// Registers a listener for future update events.
    pub fn add_listener(&self, listener: Arc<dyn UpdateListener>) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Wires the updater to a cache and a source without scheduling
    /// anything, so `update_now` and `version_info` work on their own.
    pub fn configure(
        &self,
        cache: Arc<CalibrationFileCache>,
        source: Arc<dyn CalibrationRepository>,
        interval: Duration,
    ) {
        *self
            .inner
            .targets
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Targets {
            cache,
            source,
            interval,
        });
    }

    /// Starts (or restarts) the periodic reconciliation schedule.
    pub fn start(
        &self,
        cache: Arc<CalibrationFileCache>,
        source: Arc<dyn CalibrationRepository>,
        interval: Duration,
    ) {
        let elapsed = (Utc::now() - cache.last_update_timestamp())
            .to_std()
            .unwrap_or_default();
        let initial_delay = interval.saturating_sub(elapsed);
        self.start_with_delay(
            Targets {
                cache,
                source,
                interval,
            },
            initial_delay,
        );
    }

    fn start_with_delay(&self, targets: Targets, initial_delay: Duration) {
        self.stop();
        log::info!(
            "starting calibration updater, first cycle in {:?}, then every {:?}",
            initial_delay,
            targets.interval
        );
        let (shutdown, mut signal) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let task_targets = targets.clone();
        let handle = tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::select! {
                    _ = signal.changed() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                // The cycle itself is outside the select: a stop only takes
                // effect once the cycle has finished.
                inner
                    .run_cycle(&task_targets.cache, &task_targets.source)
                    .await;
                delay = task_targets.interval;
            }
        });
        *self
            .inner
            .targets
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(targets);
        *self
            .inner
            .schedule
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Schedule { shutdown, handle });
    }

    /// Cancels future scheduled cycles. A cycle already executing runs to
    /// completion.
    pub fn stop(&self) {
        if let Some(schedule) = self
            .inner
            .schedule
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            log::info!("stopping calibration updater");
            let _ = schedule.shutdown.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .schedule
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Runs one reconciliation cycle on the calling task and returns its
    /// event, for callers that need to block for the result.
    pub async fn update_now(&self) -> GcalResult<CalibrationUpdateEvent> {
        let targets = self.targets().ok_or(GcalError::UpdaterNotStarted)?;
        Ok(self.inner.run_cycle(&targets.cache, &targets.source).await)
    }

    /// Triggers an out-of-band cycle while preserving the steady-state
    /// interval. Returns `false` without queuing anything when a cycle is
    /// already in progress or the updater was never started.
    pub fn update_now_in_background(&self) -> bool {
        if self.inner.cycle_lock.try_lock().is_err() {
            return false;
        }
        let Some(targets) = self.targets() else {
            return false;
        };
        self.start_with_delay(targets, Duration::ZERO);
        true
    }

    /// The cached version of every registry pair. Empty before `start`.
    pub async fn version_info(&self) -> Vec<PairVersion> {
        let Some(targets) = self.targets() else {
            return Vec::new();
        };
        let mut info = Vec::new();
        for (instrument, calibration_type) in self.inner.registry.pairs() {
            let version = targets
                .cache
                .version(calibration_type, &instrument)
                .await
                .ok();
            info.push(PairVersion {
                instrument,
                calibration_type,
                version,
            });
        }
        info
    }

    fn targets(&self) -> Option<Targets> {
        self.inner
            .targets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Inner {
    async fn run_cycle(
        &self,
        cache: &CalibrationFileCache,
        source: &Arc<dyn CalibrationRepository>,
    ) -> CalibrationUpdateEvent {
        let _guard = self.cycle_lock.lock().await;
        log::debug!("starting calibration reconciliation cycle");

        if let Err(e) = cache.write_update_timestamp() {
            log::warn!("could not write update timestamp: {}", e);
        }

        let mut event = CalibrationUpdateEvent::default();
        for (instrument, calibration_type) in self.registry.pairs() {
            match Self::update_pair(cache, source.as_ref(), &instrument, calibration_type).await {
                Ok(true) => event.updated.push(pair_name(&instrument, calibration_type)),
                Ok(false) => {}
                Err(e) => {
                    log::info!("update of {} {} failed: {}", instrument, calibration_type, e);
                    event.failed.push(pair_name(&instrument, calibration_type));
                }
            }
        }

        log::info!(
            "calibration update cycle finished: {} updated, {} failed",
            event.updated.len(),
            event.failed.len()
        );
        self.notify_listeners(&event);
        event
    }

    async fn update_pair(
        cache: &CalibrationFileCache,
        source: &dyn CalibrationRepository,
        instrument: &str,
        calibration_type: CalibrationType,
    ) -> GcalResult<bool> {
        // A pair with no local data at all (no cache file, nothing bundled)
        // bootstraps from whatever the source has.
        let cached = match cache.version(calibration_type, instrument).await {
            Ok(version) => Some(version),
            Err(GcalError::NoData { .. }) => None,
            Err(e) => return Err(e),
        };
        let remote = source.version(calibration_type, instrument).await?;
        if let Some(cached) = &cached {
            if remote <= *cached {
                return Ok(false);
            }
        }
        log::info!(
            "updating {} {} from {} to {}",
            instrument,
            calibration_type,
            cached
                .map(|v| v.to_string())
                .unwrap_or_else(|| "none".to_string()),
            remote
        );
        let file = source.calibration_file(calibration_type, instrument).await?;
        cache.update_calibration_file(
            calibration_type,
            instrument,
            file.version(),
            file.raw_data(),
        )?;
        Ok(true)
    }

    fn notify_listeners(&self, event: &CalibrationUpdateEvent) {
        let listeners: Vec<Arc<dyn UpdateListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            // best-effort delivery: one broken listener must not block the rest
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.calibration_updated(event)));
            if outcome.is_err() {
                log::warn!("calibration update listener panicked");
            }
        }
    }
}
