//! Domain model for keyword discovery and profile metrics runs.
//!
//! Everything here is synchronous and free of I/O: pipeline records and
//! their transition rules, the stream event vocabulary shared by the server
//! and the SDK, and the normalization rules for run input.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::*;
