//! Ports: interfaces the engine depends on, implemented by adapters in
//! the infrastructure layer.

pub mod context_source;
pub mod llm_gateway;
pub mod model_registry;
pub mod quota_gate;
pub mod session_store;

pub use context_source::{ContextError, ContextSelectors, ContextSource};
pub use llm_gateway::{
    ChatMessage, ChatRequest, ChatRole, ChatStream, GatewayError, LlmGateway, StreamChunk,
};
pub use model_registry::{ModelRegistry, RegistryError};
pub use quota_gate::{Admission, DenyKind, QuotaError, QuotaGate};
pub use session_store::{SessionStore, StoreError, StoreLease};
