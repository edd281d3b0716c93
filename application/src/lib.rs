//! Application layer for council
//!
//! The deliberation engine (orchestrator, stage executor, call runner,
//! event channel) plus the ports it drives. Adapters for the ports live
//! in the infrastructure layer.

pub mod config;
pub mod engine;
pub mod ports;

// Re-export the surface the transport and wiring layers use.
pub use config::EngineConfig;
pub use engine::{
    EventChannel, EventPublisher, EventSubscriber, SessionHandle, SessionOrchestrator,
    StartRequest,
};
pub use ports::{
    Admission, ChatMessage, ChatRequest, ChatRole, ChatStream, ContextError, ContextSelectors,
    ContextSource, DenyKind, GatewayError, LlmGateway, ModelRegistry, QuotaError, QuotaGate,
    RegistryError, SessionStore, StoreError, StoreLease, StreamChunk,
};
