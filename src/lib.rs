pub mod config;
pub mod error;
pub mod fetch;
pub mod process;
pub mod storage;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
