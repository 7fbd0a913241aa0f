//! Operation entry points and the pipeline behind them.
//!
//! 1. **Host** (`host`): `create_status` / `do_media_operation` build an `Operation`
//! 2. **Middleware** (`middleware`): Tower layers (load shedding, metrics, timeout)
//! 3. **Handler** (`handler`): obtains a `ResourceContext` and dispatches to the processor

pub mod config;
pub mod handler;
pub mod host;
pub mod middleware;
pub mod operation;

pub use config::{
    CacheConfig, ContextMode, DatabaseConfig, LaneConfig, LockNaming, MediaLimits, ServerConfig,
};
pub use handler::{execute, ContextSource, InvocationStats, OperationHandler};
pub use host::{HostStats, ServiceHost};
pub use operation::{
    operation_names, MediaOp, MediaPayload, Operation, OperationContext, OperationError,
    OperationResponse,
};
