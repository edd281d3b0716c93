//! Opaque identifiers for the entities the engine touches.
//!
//! Ids are stable opaque strings minted by the caller (or by the
//! orchestrator for new sessions). The newtypes exist so a conversation id
//! can never be passed where a session id is expected.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

id_type! {
    /// A deliberation session.
    SessionId
}

id_type! {
    /// The user that started a session.
    UserId
}

id_type! {
    /// The company a session runs under. Absent for personal accounts.
    CompanyId
}

id_type! {
    /// The conversation a session's message record belongs to.
    ConversationId
}

id_type! {
    /// A persisted message record.
    MessageId
}
