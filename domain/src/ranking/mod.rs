//! Stage-2 ranking: ballot extraction and aggregation.

pub mod aggregate;
pub mod parsing;

pub use aggregate::{aggregate, alphabet, label_for, RankedEntry, MAX_PARTICIPANTS};
pub use parsing::parse_ranking;
