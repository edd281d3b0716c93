//! Infrastructure layer for council
//!
//! Adapters for the engine's ports: the streaming HTTP gateway, the quota
//! gates, the session store, the context library, the config-backed model
//! registry, and configuration loading.

pub mod config;
pub mod context;
pub mod gateway;
pub mod quota;
pub mod registry;
pub mod store;

pub use config::{ConfigLoader, FileConfig, QuotaMode};
pub use context::DirectoryContextSource;
pub use gateway::HttpLlmGateway;
pub use quota::{HttpQuotaGate, LocalQuotaGate};
pub use registry::ConfigModelRegistry;
pub use store::{JsonlMessageLog, MemorySessionStore};
