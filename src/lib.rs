//! Storage Array Client
//!
//! An asynchronous client for managing block storage arrays: discover pools,
//! provision volumes, register host initiators and control which initiators
//! may reach which volumes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              Session                                 │
//! │   timeout · last error · job tracker                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐  ┌───────────────┐  ┌─────────────────────────┐  │
//! │  │   Catalogs    │  │  Job Tracker  │  │     Access Mapping      │  │
//! │  │ pools/volumes │  │ poll · wait   │  │  grant · revoke · query │  │
//! │  │  initiators   │  │   release     │  │                         │  │
//! │  └───────┬───────┘  └───────┬───────┘  └────────────┬────────────┘  │
//! │          └──────────────────┼───────────────────────┘               │
//! │                             │                                        │
//! │                 ┌───────────┴───────────┐                            │
//! │                 │  StorageBackend port  │                            │
//! │                 └───────────┬───────────┘                            │
//! ├─────────────────────────────┼───────────────────────────────────────┤
//! │                 ┌───────────┴───────────┐                            │
//! │                 │  Simulator (sim://)   │                            │
//! │                 └───────────────────────┘                            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutating calls return an [`Outcome`]: either the finished value or a
//! [`Job`] handle to poll with [`Session::poll_job`], drive with
//! [`Session::wait_for`] and release with [`Session::release_job`].
//!
//! # Modules
//!
//! - [`client`]: Session, catalogs, jobs and access mapping
//! - [`backends`]: Backend implementations and the scheme factory
//! - [`domain`]: Core domain types, the backend port and connection URIs
//! - [`error`]: Error types and diagnostics
//! - [`telemetry`]: Logging setup

pub mod backends;
pub mod client;
pub mod domain;
pub mod error;
pub mod telemetry;

// Re-export commonly used types
pub use client::{ClientConfig, JobWaiter, Pacer, PollPolicy, Session, TokioPacer};

pub use backends::{BackendConfig, BackendFactory, JobMode, SimulatorBackend, SimulatorConfig};

pub use domain::ports::{
    AccessMapping, AccessMode, Credentials, Initiator, InitiatorType, Job, JobId, JobOutput,
    JobResult, JobSnapshot, JobStatus, OperationalStatus, Outcome, PluginInfo, Pool,
    ProvisionKind, ReplicationKind, StorageBackend, StorageBackendRef, System, Volume,
};
pub use domain::ConnectionUri;

pub use error::{Error, ErrorKind, ErrorRecord, Result, StatusCode};

pub use telemetry::{init_logging, LogConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
