pub mod config;
pub mod error;
pub mod types;

pub use config::{
    load_config, Config, CrawlConfig, DedupConfig, FileConfig, SourceConfig, SourceKind,
};
pub use error::SafeDriveError;
pub use types::*;
