//! Configuration schema and loading.

pub mod file_config;
pub mod loader;

pub use file_config::{FileConfig, QuotaMode};
pub use loader::ConfigLoader;
