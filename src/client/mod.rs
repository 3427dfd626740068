//! Array Client
//!
//! The [`Session`] and the operations it offers:
//! - catalogs of systems, pools, volumes and initiators
//! - job polling, release and waiting
//! - access mapping between initiators and volumes

pub mod catalog;
pub mod config;
pub mod jobs;
pub mod mapping;
pub mod session;

pub use config::{ClientConfig, DEFAULT_TIMEOUT_MS};
pub use jobs::{JobWaiter, Pacer, PollPolicy, TokioPacer};
pub use session::Session;
