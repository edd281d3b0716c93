//! The deliberation engine: one orchestrator, three stages, many workers.

pub mod assembler;
pub mod broadcast;
pub mod client;
pub mod orchestrator;
pub mod pool;
pub mod stage;

pub use assembler::{AssembleError, ContextAssembler};
pub use broadcast::{EventChannel, EventPublisher, EventSubscriber};
pub use client::{CallSpec, LlmCallRunner, TokenSink};
pub use orchestrator::{SessionHandle, SessionOrchestrator, StartRequest};
pub use pool::WorkerPool;
pub use stage::{StageExecutor, StageReport, StageRequest, WorkerReport, WorkerSpec};
