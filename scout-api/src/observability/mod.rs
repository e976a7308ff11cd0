//! Structured logging and request correlation.

pub mod logging;

pub use logging::{init_logging, request_id_middleware, LogConfig, LogFormat, REQUEST_ID_HEADER};
