//! `weft` server: resource bootstrap and teardown, worker lanes, recurring
//! scheduler, bounded caches, media and status processing, HTTP transport.

pub mod bootstrap;
pub mod cache;
pub mod db;
pub mod network;
pub mod processing;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod traits;
pub mod worker;

pub use bootstrap::{bootstrap, Backends, BootstrapError, DefaultBackends, ResourceContext, Stage};
pub use network::{NetworkConfig, NetworkModule};
pub use processing::{LocalProcessor, Processor, ProcessingError};
pub use service::{
    ContextMode, MediaOp, MediaPayload, OperationError, ServerConfig, ServiceHost,
};
pub use traits::{BlobStorage, Database};
