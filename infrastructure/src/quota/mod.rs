//! Quota gate adapters: local monthly counter and the remote service.

pub mod http;
pub mod local;

pub use http::HttpQuotaGate;
pub use local::LocalQuotaGate;
