//! Execution engine
//!
//! - [`scheduler`]: tick-based interpreter over a compiled agent graph
//! - [`snapshot`]: serializable session state
//! - [`store`]: snapshot persistence backends
//! - [`jobs`]: registry of forked jobs
//! - [`context`]: run identity, cancellation and circular-call counters

pub mod config;
pub mod context;
pub mod error;
pub mod jobs;
pub mod scheduler;
pub mod snapshot;
pub mod store;

pub use config::EngineConfig;
pub use context::{AgentHandle, CallCounters, RunContext};
pub use error::EngineError;
pub use jobs::{JobRecord, JobRegistry, JobStatus, MemoryJobRegistry};
pub use scheduler::{CycleReport, RuntimeServices, Scheduler};
pub use snapshot::{
    CircularBreach, ComponentStatus, LeafResult, LoopState, RunOutput, RuntimeData,
    RuntimeState, SessionKey, Snapshot,
};
pub use store::{create_store, FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StoreConfig};
#[cfg(feature = "store-sqlite")]
pub use store::SqliteSnapshotStore;
