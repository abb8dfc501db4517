//! Periodic exerciser.
//!
//! Invokes a single work callback on a fixed cadence. A tick that arrives
//! while the previous one is still busy is skipped, not queued, so a slow
//! callback can never pile up work.
//!
//! The busy flag is owned by an `ExerciseTick` guard handed to the callback.
//! Dropping the guard clears the flag, whether the callback returns, panics,
//! or moved the guard into asynchronous work that finishes later.

use crate::error::{FeedError, FeedResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Default exercise interval.
pub const DEFAULT_EXERCISE_INTERVAL: Duration = Duration::from_millis(100);

/// Guard proving the current tick owns the busy flag.
#[must_use = "dropping the tick immediately ends it"]
#[derive(Debug)]
pub struct ExerciseTick {
    busy: Arc<AtomicBool>,
}

impl ExerciseTick {
    fn try_acquire(busy: &Arc<AtomicBool>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                busy: Arc::clone(busy),
            })
    }
}

impl Drop for ExerciseTick {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    skipped: AtomicU64,
    panics: AtomicU64,
    last_tick: RwLock<Option<DateTime<Utc>>>,
}

struct RunningTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Exerciser statistics.
#[derive(Debug, Clone, Default)]
pub struct ExerciserStats {
    pub running: bool,
    pub ticks: u64,
    pub skipped: u64,
    pub panics: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

/// Reentrancy-guarded periodic timer.
pub struct Exerciser {
    interval: Duration,
    busy: Arc<AtomicBool>,
    counters: Arc<Counters>,
    running: Mutex<Option<RunningTask>>,
}

impl Exerciser {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            busy: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start firing `callback`, first tick immediately.
    ///
    /// Must be called within a tokio runtime.
    pub fn run<F>(&self, mut callback: F) -> FeedResult<()>
    where
        F: FnMut(ExerciseTick) + Send + 'static,
    {
        let mut running = self.running.lock();
        if running
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
        {
            return Err(FeedError::ExerciserAlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let busy = Arc::clone(&self.busy);
        let counters = Arc::clone(&self.counters);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    () = token.cancelled() => {
                        debug!("Exerciser stopped");
                        break;
                    }

                    _ = interval.tick() => {
                        let Some(tick) = ExerciseTick::try_acquire(&busy) else {
                            counters.skipped.fetch_add(1, Ordering::Relaxed);
                            trace!("Exercise tick skipped, previous tick still busy");
                            continue;
                        };

                        counters.ticks.fetch_add(1, Ordering::Relaxed);
                        *counters.last_tick.write() = Some(Utc::now());

                        if catch_unwind(AssertUnwindSafe(|| callback(tick))).is_err() {
                            counters.panics.fetch_add(1, Ordering::Relaxed);
                            error!("Exercise callback panicked");
                        }
                    }
                }
            }
        });

        info!(interval_ms = period.as_millis() as u64, "Exerciser started");
        *running = Some(RunningTask { shutdown, handle });
        Ok(())
    }

    /// Halt future firings. A tick already executing completes.
    pub fn stop(&self) {
        if let Some(task) = self.running.lock().take() {
            task.shutdown.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|task| !task.shutdown.is_cancelled() && !task.handle.is_finished())
    }

    /// Whether a tick (or its continuation) currently holds the busy flag.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ExerciserStats {
        ExerciserStats {
            running: self.is_running(),
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            panics: self.counters.panics.load(Ordering::Relaxed),
            last_tick: *self.counters.last_tick.read(),
        }
    }
}

impl Default for Exerciser {
    fn default() -> Self {
        Self::new(DEFAULT_EXERCISE_INTERVAL)
    }
}

impl Drop for Exerciser {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_tick_guard_clears_flag() {
        let busy = Arc::new(AtomicBool::new(false));

        let tick = ExerciseTick::try_acquire(&busy).unwrap();
        assert!(busy.load(Ordering::Acquire));
        assert!(ExerciseTick::try_acquire(&busy).is_none());

        drop(tick);
        assert!(!busy.load(Ordering::Acquire));
        assert!(ExerciseTick::try_acquire(&busy).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_immediately_and_periodically() {
        let exerciser = Exerciser::new(Duration::from_millis(100));
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        exerciser
            .run(move |_tick| {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(exerciser.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_tick_is_skipped() {
        let exerciser = Exerciser::new(Duration::from_millis(100));
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        exerciser
            .run(move |tick| {
                h.fetch_add(1, Ordering::SeqCst);
                // Asynchronous continuation keeps the tick busy for 250ms.
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    drop(tick);
                });
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(exerciser.is_busy());

        tokio::time::sleep(Duration::from_millis(300)).await;

        let stats = exerciser.stats();
        assert!(stats.skipped >= 1, "expected skipped ticks: {stats:?}");
        assert_eq!(stats.ticks, hits.load(Ordering::SeqCst) as u64);
        assert!(stats.ticks < 4, "busy ticks must not run: {stats:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_does_not_break_timer() {
        let exerciser = Exerciser::new(Duration::from_millis(100));
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        exerciser
            .run(move |_tick| {
                if h.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first tick fails");
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;

        let stats = exerciser.stats();
        assert_eq!(stats.panics, 1);
        assert!(hits.load(Ordering::SeqCst) >= 2);
        assert!(!exerciser.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_firing() {
        let exerciser = Exerciser::new(Duration::from_millis(100));
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        exerciser
            .run(move |_tick| {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        exerciser.stop();
        let after_stop = hits.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after_stop);
        assert!(!exerciser.is_running());
    }

    #[tokio::test]
    async fn test_run_twice_is_refused() {
        let exerciser = Exerciser::default();
        exerciser.run(|_tick| {}).unwrap();

        assert_eq!(
            exerciser.run(|_tick| {}),
            Err(FeedError::ExerciserAlreadyRunning)
        );

        exerciser.stop();
        assert_eq!(exerciser.interval(), DEFAULT_EXERCISE_INTERVAL);
    }
}
