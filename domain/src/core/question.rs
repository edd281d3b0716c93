//! Question value object

use serde::{Deserialize, Serialize};

/// Character cap for conversation titles derived from a question.
const TITLE_CHARS: usize = 80;

/// The user question a council session deliberates on (Value Object)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    content: String,
}

impl Question {
    /// Create a new question
    ///
    /// # Panics
    /// Panics if the content is empty or only whitespace
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        assert!(!content.trim().is_empty(), "Question cannot be empty");
        Self { content }
    }

    /// Try to create a new question, returning None if invalid
    pub fn try_new(content: impl Into<String>) -> Option<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            None
        } else {
            Some(Self { content })
        }
    }

    /// Get the question content
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Consume and return the inner content
    pub fn into_content(self) -> String {
        self.content
    }

    /// Derive a conversation title: the first sentence of the question,
    /// truncated at a word boundary if it exceeds the title cap.
    pub fn derive_title(&self) -> String {
        let first_line = self.content.lines().next().unwrap_or("").trim();
        let sentence = first_line
            .split_inclusive(['.', '?', '!'])
            .next()
            .unwrap_or(first_line)
            .trim();

        if sentence.chars().count() <= TITLE_CHARS {
            return sentence.to_string();
        }

        let capped: String = sentence.chars().take(TITLE_CHARS).collect();
        match capped.rfind(char::is_whitespace) {
            Some(cut) if cut > 0 => format!("{}…", capped[..cut].trim_end()),
            _ => format!("{}…", capped),
        }
    }
}

impl std::fmt::Display for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.content)
    }
}

impl From<&str> for Question {
    fn from(s: &str) -> Self {
        Question::new(s)
    }
}

impl From<String> for Question {
    fn from(s: String) -> Self {
        Question::new(s)
    }
}
