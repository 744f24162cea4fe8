//! Resource-governed tool execution.
//!
//! - [`policy`]:    `ExecutionPolicy` and allow-list matching
//! - [`monitor`]:   rate windows, concurrency slots, access log, stats
//! - [`egress`]:    `HttpClient` trait, reqwest client, egress guard
//! - [`io`]:        `ToolIo` handle handed to executors
//! - [`estimate`]:  payload size estimation
//! - [`execution`]: `ExecutionSandbox`, the gated execution path

pub mod egress;
pub mod estimate;
pub mod execution;
pub mod io;
pub mod monitor;
pub mod policy;

pub use egress::{
    GuardedHttpClient, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient, StaticHttpClient,
};
pub use estimate::estimate_size;
pub use execution::{ExecutionContext, ExecutionResult, ExecutionSandbox};
pub use io::{ExecutionTrail, ToolIo};
pub use monitor::{
    AccessKind, AccessRecord, ConcurrencySlot, ExecutionOutcome, ExecutionStats, MemoryProbe,
    NoMemoryProbe, RateLimitViolation, ResourceMonitor, SysinfoProbe, RATE_WINDOW,
};
pub use policy::{domain_allowed, path_allowed, ExecutionPolicy};
