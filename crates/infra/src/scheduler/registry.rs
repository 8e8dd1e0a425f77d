use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::error::FulfillmentError;

use super::task::{RecurringTask, TaskKey, TickOutcome};

/// Outcome of [`TaskRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new worker was started for the key.
    Started,
    /// A worker already runs for the key; nothing was started.
    AlreadyRunning,
}

/// Runtime statistics of one task.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskStats {
    pub started_at: DateTime<Utc>,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub consecutive_failures: u32,
}

impl TaskStats {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            ticks: 0,
            failed_ticks: 0,
            consecutive_failures: 0,
        }
    }
}

struct TaskEntry {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<TaskStats>>,
}

struct RegistryInner {
    tasks: Mutex<HashMap<TaskKey, TaskEntry>>,
    stall_threshold: u32,
}

/// Keyed registry of cancellable periodic workers.
///
/// Dropping the registry disconnects every worker, which then exits after its
/// current tick.
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

impl TaskRegistry {
    pub fn new(stall_threshold: u32) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tasks: Mutex::new(HashMap::new()),
                stall_threshold: stall_threshold.max(1),
            }),
        }
    }

    /// Start ticking `task` every `period`, unless a task already runs for `key`.
    ///
    /// The first tick happens one `period` after registration.
    pub fn register(
        &self,
        key: TaskKey,
        period: Duration,
        task: Arc<dyn RecurringTask>,
    ) -> Result<Registration, FulfillmentError> {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(&key) {
            debug!(task = %key, "task already running");
            return Ok(Registration::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(TaskStats::new()));
        let worker = Worker {
            key,
            period,
            task,
            shutdown: shutdown_rx,
            registry: Arc::downgrade(&self.inner),
            stats: stats.clone(),
            stall_threshold: self.inner.stall_threshold,
        };

        let join = thread::Builder::new()
            .name(key.to_string())
            .spawn(move || worker.run())
            .map_err(|e| FulfillmentError::Scheduler(format!("failed to spawn {key}: {e}")))?;

        tasks.insert(
            key,
            TaskEntry {
                shutdown: shutdown_tx,
                join: Some(join),
                stats,
            },
        );
        info!(task = %key, period_ms = period.as_millis() as u64, "task registered");
        Ok(Registration::Started)
    }

    pub fn is_running(&self, key: TaskKey) -> bool {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
    }

    pub fn running_tasks(&self) -> Vec<TaskKey> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn stats(&self, key: TaskKey) -> Option<TaskStats> {
        let tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks
            .get(&key)
            .map(|entry| entry.stats.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Stop every worker and wait for it to exit.
    ///
    /// Tasks stopped this way do not run to completion; their state stays as
    /// the last finished tick left it.
    pub fn shutdown(&self) {
        let entries: Vec<(TaskKey, TaskEntry)> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (key, mut entry) in entries {
            let _ = entry.shutdown.send(());
            if let Some(join) = entry.join.take() {
                if join.join().is_err() {
                    error!(task = %key, "task worker panicked");
                }
            }
        }
        info!("task registry shut down");
    }
}

impl core::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("running", &self.running_tasks())
            .field("stall_threshold", &self.inner.stall_threshold)
            .finish()
    }
}

struct Worker {
    key: TaskKey,
    period: Duration,
    task: Arc<dyn RecurringTask>,
    shutdown: mpsc::Receiver<()>,
    registry: Weak<RegistryInner>,
    stats: Arc<Mutex<TaskStats>>,
    stall_threshold: u32,
}

impl Worker {
    fn run(self) {
        debug!(task = %self.key, "task worker started");

        loop {
            // The interval wait doubles as the shutdown check.
            match self.shutdown.recv_timeout(self.period) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            match self.task.tick() {
                TickOutcome::Continue => self.record_tick(None),
                TickOutcome::Failed(err) => self.record_tick(Some(err)),
                TickOutcome::Finished => {
                    self.record_tick(None);
                    if self.try_unregister() {
                        info!(task = %self.key, "task finished");
                        break;
                    }
                }
            }
        }

        debug!(task = %self.key, "task worker stopped");
    }

    fn record_tick(&self, failure: Option<FulfillmentError>) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.ticks += 1;

        let Some(err) = failure else {
            stats.consecutive_failures = 0;
            return;
        };

        stats.failed_ticks += 1;
        stats.consecutive_failures += 1;
        let consecutive = stats.consecutive_failures;
        drop(stats);

        warn!(
            task = %self.key,
            error = %err,
            retryable = err.is_retryable(),
            consecutive,
            "tick failed, retrying next interval"
        );
        if consecutive % self.stall_threshold == 0 {
            error!(
                task = %self.key,
                error = %err,
                consecutive,
                "task stalled: repeated tick failures"
            );
        }
    }

    /// Remove this task from the registry if it is still finished.
    fn try_unregister(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return true;
        };
        let mut tasks = registry.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.task.confirm_finished() {
            debug!(task = %self.key, "new work arrived, task keeps running");
            return false;
        }
        // Dropping the entry detaches this thread's own join handle.
        tasks.remove(&self.key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Instant;

    use fabline_core::MaterialId;

    /// Finishes after `limit` ticks.
    struct Countdown {
        ticks: AtomicU32,
        limit: u32,
    }

    impl RecurringTask for Countdown {
        fn tick(&self) -> TickOutcome {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.limit {
                TickOutcome::Finished
            } else {
                TickOutcome::Continue
            }
        }
    }

    /// Always fails.
    struct Broken;

    impl RecurringTask for Broken {
        fn tick(&self) -> TickOutcome {
            TickOutcome::Failed(FulfillmentError::TransientStorage("down".to_string()))
        }
    }

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn key() -> TaskKey {
        TaskKey::Replenishment(MaterialId::new())
    }

    #[test]
    fn finished_task_unregisters_itself() {
        let registry = TaskRegistry::new(3);
        let task = Arc::new(Countdown {
            ticks: AtomicU32::new(0),
            limit: 3,
        });
        let key = key();

        let reg = registry
            .register(key, Duration::from_millis(5), task.clone())
            .unwrap();
        assert_eq!(reg, Registration::Started);

        assert!(wait_until(Duration::from_secs(5), || !registry.is_running(key)));
        assert_eq!(task.ticks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn second_registration_joins_running_task() {
        let registry = TaskRegistry::new(3);
        let key = key();
        let slow = Arc::new(Countdown {
            ticks: AtomicU32::new(0),
            limit: u32::MAX,
        });

        let first = registry
            .register(key, Duration::from_secs(60), slow.clone())
            .unwrap();
        let second = registry
            .register(key, Duration::from_secs(60), slow)
            .unwrap();

        assert_eq!(first, Registration::Started);
        assert_eq!(second, Registration::AlreadyRunning);
        assert_eq!(registry.running_tasks(), vec![key]);
        registry.shutdown();
        assert!(registry.running_tasks().is_empty());
    }

    #[test]
    fn failing_task_keeps_running_and_counts_failures() {
        let registry = TaskRegistry::new(2);
        let key = key();
        registry
            .register(key, Duration::from_millis(2), Arc::new(Broken))
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            registry
                .stats(key)
                .map(|s| s.consecutive_failures >= 4)
                .unwrap_or(false)
        }));
        assert!(registry.is_running(key));
        registry.shutdown();
    }

    /// Records the level and message of every event it sees.
    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<Mutex<Vec<(tracing::Level, String)>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CapturedEvents {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct Message(String);

            impl tracing::field::Visit for Message {
                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn core::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.0 = format!("{value:?}");
                    }
                }
            }

            let mut message = Message(String::new());
            event.record(&mut message);
            self.0
                .lock()
                .unwrap()
                .push((*event.metadata().level(), message.0));
        }
    }

    #[test]
    fn stall_is_reported_every_threshold_failures() {
        use tracing_subscriber::layer::SubscriberExt;

        let (_shutdown, shutdown_rx) = mpsc::channel();
        let stats = Arc::new(Mutex::new(TaskStats::new()));
        let worker = Worker {
            key: key(),
            period: Duration::from_secs(3600),
            task: Arc::new(Broken),
            shutdown: shutdown_rx,
            registry: Weak::new(),
            stats: stats.clone(),
            stall_threshold: 2,
        };

        let events = CapturedEvents::default();
        let subscriber = tracing_subscriber::registry().with(events.clone());
        tracing::subscriber::with_default(subscriber, || {
            for _ in 0..5 {
                if let TickOutcome::Failed(err) = worker.task.tick() {
                    worker.record_tick(Some(err));
                }
            }
        });

        let captured = events.0.lock().unwrap();
        let stalls = captured
            .iter()
            .filter(|(level, msg)| *level == tracing::Level::ERROR && msg.contains("task stalled"))
            .count();
        let retries = captured
            .iter()
            .filter(|(level, _)| *level == tracing::Level::WARN)
            .count();
        // Reported at the 2nd and 4th consecutive failure.
        assert_eq!((stalls, retries), (2, 5));
        assert_eq!(stats.lock().unwrap().consecutive_failures, 5);

        // A successful tick resets the streak.
        worker.record_tick(None);
        assert_eq!(stats.lock().unwrap().consecutive_failures, 0);
    }

    #[test]
    fn unconfirmed_finish_keeps_task_alive() {
        struct Reopened {
            reopened: AtomicBool,
            ticks: AtomicU32,
        }

        impl RecurringTask for Reopened {
            fn tick(&self) -> TickOutcome {
                self.ticks.fetch_add(1, Ordering::SeqCst);
                TickOutcome::Finished
            }

            fn confirm_finished(&self) -> bool {
                // Refuse the first finish, as if work was queued meanwhile.
                self.reopened.swap(true, Ordering::SeqCst)
            }
        }

        let registry = TaskRegistry::new(3);
        let key = key();
        let task = Arc::new(Reopened {
            reopened: AtomicBool::new(false),
            ticks: AtomicU32::new(0),
        });
        registry
            .register(key, Duration::from_millis(2), task.clone())
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || !registry.is_running(key)));
        assert_eq!(task.ticks.load(Ordering::SeqCst), 2);
    }
}
