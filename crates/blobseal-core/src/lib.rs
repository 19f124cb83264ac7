pub mod config;
pub mod error;

pub use config::{load_config, BlobsealConfig};
pub use error::{BlobsealError, BlobsealResult};
