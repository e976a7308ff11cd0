//! Run execution for discovery and metrics jobs: the resilience layer around
//! the scraping provider, the pipeline registry and the run driver that ties
//! them to a progress stream.

pub mod engine;
pub mod error;
pub mod executor;
pub mod provider;
pub mod reduce;
pub mod resilience;
pub mod settings;
pub mod sink;

pub use engine::{PipelineRegistry, RunEmitter};
pub use error::{RunError, RunResult};
pub use executor::{RunDriver, RunSession};
pub use provider::{HttpScrapeProvider, JobOutput, JobRequest, ProviderSettings, ScrapeProvider};
pub use reduce::{item_owner, post_owners, reduce_post_metrics, HandleMetrics};
pub use settings::{DriverSettings, RetrySettings};
pub use sink::{InMemoryResultSink, ResultSink, SinkRecord};
