//! specfan - parallel end-to-end spec execution
//!
//! Runs every spec of a batch against the browser-automation runner at the
//! same time, each in its own virtual display, under one shared deadline,
//! and reports each spec's outcome to a collector.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Orchestrator                                               │
//! │    ├── preflight: clone, config check, version, npm install │
//! │    │      └── on failure: Reporter::broadcast -> exit       │
//! │    ├── CancellationMonitor::start(timeout)                  │
//! │    ├── spawn SpecTask × N (no concurrency cap)              │
//! │    └── join all, remove working copy                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SpecTask                                                   │
//! │    ├── DisplayAllocator::assign(i) -> DisplayServer (Xvfb)  │
//! │    ├── InvocationBuilder::for_spec -> ProcessHandle         │
//! │    ├── wait, racing the Deadline (killpg on expiry)         │
//! │    ├── artifact: read, compact, hex-encode                  │
//! │    └── Reporter::report(spec, outcome)                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod display;
pub mod error;
pub mod invocation;
pub mod orchestrator;
pub mod outcome;
pub mod process;
pub mod reporter;
pub mod request;
pub mod worker;

pub use config::Settings;
pub use error::{RunError, RunResult};
pub use orchestrator::{BatchSummary, Orchestrator};
pub use outcome::{ExecutionOutcome, ExecutionStatus, Payload};
pub use reporter::{ReportSink, Reporter, Submission};
pub use request::{Credentials, ExecutionRequest, SourceRef};
