//! Prompt construction for the deliberation stages.

pub mod template;

pub use template::PromptTemplate;
