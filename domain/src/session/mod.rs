//! Session aggregate: stages, workers, and the persisted record.

pub mod entities;
pub mod record;
pub mod stage;
pub mod worker;

pub use entities::{Session, SessionOutcome};
pub use record::{DraftOutput, MessageRecord, RankerOutput, Synthesis};
pub use stage::{StageId, StagePolicy, StageState, StageStatus};
pub use worker::{FinishReason, WorkerOutcome, WorkerRole, WorkerState, WorkerStatus};
