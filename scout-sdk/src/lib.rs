//! Scout SDK
//!
//! Client for the pipeline-run API: start discovery or metrics runs, follow
//! their progress as an ordered event stream, cancel them, and poll pipeline
//! snapshots.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use scout_sdk::{ScoutClient, SdkConfig, StreamHandlers};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ScoutClient::new(SdkConfig::new("http://localhost:3000"))?;
//!
//!     let stream = client.start_discovery(&["coffee", "latte art"]).await?;
//!     let cancel = stream.cancel_handle();
//!
//!     let end = stream
//!         .dispatch(
//!             StreamHandlers::new()
//!                 .on_output(|line, keyword| println!("[{:?}] {}", keyword, line))
//!                 .on_error(|message, _| eprintln!("{}", message))
//!                 .on_progress(|p| println!("{} {} {:?}%", p.keyword, p.status, p.progress))
//!                 .on_complete(move |done| {
//!                     if !done.success {
//!                         cancel.cancel();
//!                     }
//!                 }),
//!         )
//!         .await;
//!     println!("stream ended: {:?}", end);
//!     Ok(())
//! }
//! ```
//!
//! # Polling
//!
//! ```rust,no_run
//! use scout_sdk::{ScoutClient, SdkConfig};
//! use scout_core::PipelineId;
//!
//! # async fn example(id: PipelineId) -> Result<(), scout_sdk::SdkError> {
//! let client = ScoutClient::new(SdkConfig::new("http://localhost:3000"))?;
//! let pipeline = client.wait_for(id).await?;
//! println!("{} finished as {}", pipeline.label(), pipeline.status_str());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod stream;

pub use client::ScoutClient;
pub use config::{SdkConfig, DEFAULT_POLL_INTERVAL};
pub use error::{SdkError, SdkResult};
pub use stream::{CancelHandle, RunStream, StreamEnd, StreamHandlers};
