//! Asynchronous work: lane dispatchers, background workers, the scheduler.
//!
//! - [`background`]: generic queue-draining worker task
//! - [`lane`]: lane-tagged items and dispatch errors
//! - [`dispatcher`]: one lane's sharded workers
//! - [`scheduler`]: recurring tasks keyed by id
//! - [`pool`]: both lanes plus the scheduler, and the function references
//!   handed to business code

pub mod background;
pub mod dispatcher;
pub mod lane;
pub mod pool;
pub mod scheduler;

pub use background::{BackgroundRunnable, BackgroundWorker};
pub use dispatcher::LaneDispatcher;
pub use lane::{DispatchError, Lane, LaneHandler, QueueItem, Receipt};
pub use pool::{EventHandles, LaneDepths, LaneFn, LaneHandlers, PoolError, WorkerPool};
pub use scheduler::{Scheduler, SchedulerError, Start, TaskCallback, TaskState, CACHE_SWEEP_TASK_ID};
