/// Archive Insights
///
/// Background worker that ingests social media data archives, persists their
/// records and turns them into weekly, yearly and per-decade usage insights.

pub mod account;
pub mod archive;
pub mod blob_store;
pub mod config;
pub mod context;
pub mod db;
pub mod decoder;
pub mod error;
pub mod external;
pub mod jobs;
pub mod metrics;
pub mod pipeline;
pub mod records;
pub mod server;
pub mod stat_store;
pub mod stats;
pub mod timeutil;

pub use config::WorkerConfig;
pub use context::{Services, WorkerContext};
pub use error::{AppError, AppResult, PipelineError};
