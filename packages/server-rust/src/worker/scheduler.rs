//! Recurring task scheduler.
//!
//! Each registered id gets its own tokio task driving an interval. Firings
//! of one id never overlap: a slow callback delays that id's next firing and
//! nothing else. `stop()` cancels every task, lets in-flight callbacks
//! finish, and returns only once no further firing can start. Dropping the
//! scheduler, or cancelling the parent token it was built with, cancels
//! every task without waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Id of the cache sweep registered by every resource context.
pub const CACHE_SWEEP_TASK_ID: &str = "@cachesweep";

/// Ids starting with this prefix are reserved for internal tasks.
const RESERVED_PREFIX: char = '@';

/// Callback invoked on each firing with the task's cancellation token and
/// the instant the firing was due.
pub type TaskCallback = Arc<dyn Fn(CancellationToken, Instant) -> BoxFuture<'static, ()> + Send + Sync>;

/// When the first firing happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Start {
    /// Fire as soon as the task is registered.
    Immediately,
    At(Instant),
}

/// Lifecycle of one registered id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Scheduled,
    Fired,
    Terminated,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Scheduled,
            1 => Self::Fired,
            _ => Self::Terminated,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("task id {0:?} is reserved")]
    ReservedId(String),
    #[error("task {0:?} has a zero period")]
    ZeroPeriod(String),
    #[error("scheduler is stopped")]
    Stopped,
}

struct Registration {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    state: Arc<AtomicU8>,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Registration>,
    /// Per-id guard held while a callback runs. Survives re-registration so
    /// a replacement never overlaps the callback it replaced.
    guards: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

/// Runs callbacks on fixed periods.
pub struct Scheduler {
    inner: Mutex<Inner>,
    stopped: AtomicBool,
    root: CancellationToken,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(CancellationToken::new())
    }

    /// A scheduler whose tasks also end when `parent` is cancelled.
    #[must_use]
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self::with_root(parent.child_token())
    }

    fn with_root(root: CancellationToken) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            stopped: AtomicBool::new(false),
            root,
        }
    }

    /// Registers `callback` under `id`, replacing any prior registration.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ReservedId`] for ids starting with `@`,
    /// [`SchedulerError::ZeroPeriod`], or [`SchedulerError::Stopped`].
    pub fn add_recurring(
        &self,
        id: &str,
        start: Start,
        period: Duration,
        callback: TaskCallback,
    ) -> Result<(), SchedulerError> {
        if id.starts_with(RESERVED_PREFIX) {
            return Err(SchedulerError::ReservedId(id.to_string()));
        }
        self.register(id, start, period, callback)
    }

    /// Registers an internal task whose id carries the reserved prefix.
    pub(crate) fn add_reserved(
        &self,
        id: &str,
        start: Start,
        period: Duration,
        callback: TaskCallback,
    ) -> Result<(), SchedulerError> {
        self.register(id, start, period, callback)
    }

    fn register(
        &self,
        id: &str,
        start: Start,
        period: Duration,
        callback: TaskCallback,
    ) -> Result<(), SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod(id.to_string()));
        }

        let mut inner = self.inner.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::Stopped);
        }

        if let Some(previous) = inner.tasks.remove(id) {
            debug!(task = id, "replacing scheduled task");
            previous.cancel.cancel();
        }

        let guard = Arc::clone(inner.guards.entry(id.to_string()).or_default());
        let cancel = self.root.child_token();
        let state = Arc::new(AtomicU8::new(0));
        let first = match start {
            Start::Immediately => Instant::now(),
            Start::At(at) => at,
        };
        let handle = tokio::spawn(drive(
            id.to_string(),
            first,
            period,
            callback,
            cancel.clone(),
            guard,
            Arc::clone(&state),
        ));
        inner.tasks.insert(
            id.to_string(),
            Registration {
                cancel,
                handle,
                state,
            },
        );
        Ok(())
    }

    /// Current state of `id`, if registered.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.inner
            .lock()
            .tasks
            .get(id)
            .map(|r| TaskState::from_u8(r.state.load(Ordering::Acquire)))
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().tasks.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every task and waits for in-flight callbacks. Idempotent.
    pub async fn stop(&self) {
        let registrations: Vec<(String, Registration)> = {
            let mut inner = self.inner.lock();
            if self.stopped.swap(true, Ordering::AcqRel) {
                return;
            }
            self.root.cancel();
            inner.tasks.drain().collect()
        };

        let count = registrations.len();
        for (id, registration) in registrations {
            if let Err(e) = registration.handle.await {
                warn!(task = %id, error = %e, "scheduled task ended abnormally");
            }
            registration
                .state
                .store(TaskState::Terminated as u8, Ordering::Release);
        }
        info!(tasks = count, "scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn drive(
    id: String,
    first: Instant,
    period: Duration,
    callback: TaskCallback,
    cancel: CancellationToken,
    guard: Arc<tokio::sync::Mutex<()>>,
    state: Arc<AtomicU8>,
) {
    let mut ticker = tokio::time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let due = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            due = ticker.tick() => due,
        };
        let _running = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            running = guard.lock() => running,
        };
        if cancel.is_cancelled() {
            break;
        }

        state.store(TaskState::Fired as u8, Ordering::Release);
        // Own task so a panicking callback only loses this firing.
        if let Err(e) = tokio::spawn(callback(cancel.clone(), due)).await {
            warn!(task = %id, error = %e, "scheduled callback failed");
        }
        state.store(TaskState::Scheduled as u8, Ordering::Release);
    }
    state.store(TaskState::Terminated as u8, Ordering::Release);
    debug!(task = %id, "scheduled task terminated");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use futures_util::FutureExt;

    use super::*;

    fn counting(count: Arc<AtomicU32>, work: Duration) -> TaskCallback {
        Arc::new(move |_cancel: CancellationToken, _due: Instant| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                if !work.is_zero() {
                    tokio::time::sleep(work).await;
                }
            }
            .boxed()
        })
    }

    fn recording(dues: Arc<Mutex<Vec<Instant>>>) -> TaskCallback {
        Arc::new(move |_cancel: CancellationToken, due: Instant| {
            dues.lock().push(due);
            async {}.boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_start_then_every_period() {
        let scheduler = Scheduler::new();
        let dues = Arc::new(Mutex::new(Vec::new()));
        let registered_at = Instant::now();
        scheduler
            .add_reserved(
                CACHE_SWEEP_TASK_ID,
                Start::Immediately,
                Duration::from_secs(60),
                recording(Arc::clone(&dues)),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dues.lock().len(), 1);

        // Three and a half minutes: firings at 0, 60, 120, 180.
        tokio::time::sleep(Duration::from_secs(210)).await;
        scheduler.stop().await;

        let dues = dues.lock().clone();
        assert_eq!(dues.len(), 4);
        assert_eq!(dues[0], registered_at);
        for pair in dues.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(60));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_ends_tasks() {
        let parent = CancellationToken::new();
        let scheduler = Scheduler::with_parent(&parent);
        let count = Arc::new(AtomicU32::new(0));
        scheduler
            .add_recurring("tick", Start::Immediately, Duration::from_secs(1), counting(count.clone(), Duration::ZERO))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        parent.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.state("tick"), Some(TaskState::Terminated));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_scheduler_ends_tasks() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        scheduler
            .add_recurring("tick", Start::Immediately, Duration::from_secs(1), counting(count.clone(), Duration::ZERO))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(scheduler);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_start_waits() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        let at = Instant::now() + Duration::from_secs(30);
        scheduler
            .add_recurring("later", Start::At(at), Duration::from_secs(10), counting(count.clone(), Duration::ZERO))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_callback_never_overlaps_itself() {
        let scheduler = Scheduler::new();
        let active = Arc::new(AtomicU32::new(0));
        let max_active = Arc::new(AtomicU32::new(0));
        let (a, m) = (active.clone(), max_active.clone());
        let callback: TaskCallback = Arc::new(move |_cancel: CancellationToken, _due: Instant| {
            let (a, m) = (Arc::clone(&a), Arc::clone(&m));
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(25)).await;
                a.fetch_sub(1, Ordering::SeqCst);
            }
            .boxed()
        });
        scheduler
            .add_recurring("slow", Start::Immediately, Duration::from_secs(10), callback)
            .unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        scheduler.stop().await;
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_callback() {
        let scheduler = Scheduler::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let callback: TaskCallback = Arc::new(move |_cancel: CancellationToken, _due: Instant| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.store(true, Ordering::SeqCst);
            }
            .boxed()
        });
        scheduler
            .add_recurring("job", Start::Immediately, Duration::from_secs(60), callback)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        scheduler.stop().await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_firing_after_stop() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        scheduler
            .add_recurring("tick", Start::Immediately, Duration::from_secs(1), counting(count.clone(), Duration::ZERO))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.stop().await;
        let at_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), at_stop);
        assert_eq!(
            scheduler.add_recurring("tick", Start::Immediately, Duration::from_secs(1), counting(count, Duration::ZERO)),
            Err(SchedulerError::Stopped)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn re_adding_replaces_registration() {
        let scheduler = Scheduler::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        scheduler
            .add_recurring("job", Start::Immediately, Duration::from_secs(5), counting(first.clone(), Duration::ZERO))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        scheduler
            .add_recurring("job", Start::Immediately, Duration::from_secs(5), counting(second.clone(), Duration::ZERO))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.len(), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn misuse_is_rejected() {
        let scheduler = Scheduler::new();
        let cb = counting(Arc::new(AtomicU32::new(0)), Duration::ZERO);
        assert_eq!(
            scheduler.add_recurring(CACHE_SWEEP_TASK_ID, Start::Immediately, Duration::from_secs(60), cb.clone()),
            Err(SchedulerError::ReservedId(CACHE_SWEEP_TASK_ID.to_string()))
        );
        assert_eq!(
            scheduler.add_recurring("zero", Start::Immediately, Duration::ZERO, cb),
            Err(SchedulerError::ZeroPeriod("zero".to_string()))
        );
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_keeps_schedule() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let callback: TaskCallback = Arc::new(move |_cancel: CancellationToken, _due: Instant| {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first firing fails");
                }
            }
            .boxed()
        });
        scheduler
            .add_recurring("flaky", Start::Immediately, Duration::from_secs(1), callback)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.state("flaky"), Some(TaskState::Scheduled));
        scheduler.stop().await;
    }
}
