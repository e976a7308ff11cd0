pub mod event;
pub mod ids;
pub mod job;
pub mod pipeline;

pub use event::*;
pub use ids::*;
pub use job::*;
pub use pipeline::*;
