//! Domain layer - Core types and port definitions
//!
//! This module defines the entities an array exposes and the backend trait
//! (port) that adapters implement.

pub mod ports;
pub mod uri;

pub use ports::*;
pub use uri::ConnectionUri;
