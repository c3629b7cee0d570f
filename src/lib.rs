pub mod config;
pub mod error;
pub mod db;
pub mod source;
pub mod watch;
pub mod extract;
pub mod ingest;
pub mod embeddings;
pub mod cache;
pub mod store;
pub mod remote;
pub mod sync;
pub mod search;
pub mod pipeline;
pub mod scheduler;

pub use config::Config;
pub use error::{RagsyncError, Result};
pub use pipeline::{IngestReport, Pipeline, PipelineStats};
pub use sync::SyncReport;
