pub mod analysis;
pub mod config;
pub mod edgar;
pub mod error;
pub mod pipeline;
pub mod storage;

// Re-exports
pub use config::Config;
pub use error::PipelineError;
pub use pipeline::Pipeline;
