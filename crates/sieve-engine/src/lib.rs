//! Execution engine for sieve check scripts.
//!
//! Runs a compiled [`sieve_script::ScriptProgram`] once per input record:
//! the [`interpreter`] threads an [`context::ExecutionContext`] through the
//! script's operations, and the [`scheduler`] fans that out over a resizable
//! worker pool with proxy rotation, checkpointing and per-status output files.

pub mod browser;
pub mod checkpoint;
#[cfg(feature = "chromium")]
pub mod chromium;
pub mod context;
pub mod cookies;
pub mod events;
pub mod input;
pub mod interpreter;
pub mod operations;
pub mod output;
pub mod proxy;
pub mod scheduler;
pub mod selection;
pub mod stats;
pub mod template;
pub mod transport;

pub use browser::{BrowserDriver, BrowserSession, LaunchOptions, PageResponse, UnavailableDriver};
pub use checkpoint::{CheckpointStore, FileCheckpointStore};
pub use context::{BotInput, ExecutionContext};
pub use cookies::{Cookie, CookieJar};
pub use events::{EventEmitter, SchedulerEvent};
pub use interpreter::{Interpreter, RunOutcome};
pub use operations::{Environment, UserAgents};
pub use output::OutputSink;
pub use proxy::{ProxyEntry, ProxyPool, ProxyScheme};
pub use scheduler::{RunSummary, Scheduler, SchedulerConfig, SchedulerMetrics, SchedulerState};
pub use stats::{RunStats, StatsSnapshot};
pub use transport::{HttpBody, HttpRequest, HttpResponse, ReqwestTransport, Transport};
