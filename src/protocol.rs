use serde::{Deserialize, Serialize};

// -- Conversation history ---------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only conversation log for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// -- Requests ---------------------------------------------------------------

/// Everything a stage needs to issue its request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub topic: String,
    pub outline: Option<String>,
    pub history: Vec<HistoryEntry>,
}

impl GenerationRequest {
    pub fn outline(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            outline: None,
            history: Vec::new(),
        }
    }

    pub fn animation(
        topic: impl Into<String>,
        outline: impl Into<String>,
        history: &ConversationHistory,
    ) -> Self {
        Self {
            topic: topic.into(),
            outline: Some(outline.into()),
            history: history.entries().to_vec(),
        }
    }

    pub fn combined(topic: impl Into<String>, history: &ConversationHistory) -> Self {
        Self {
            topic: topic.into(),
            outline: None,
            history: history.entries().to_vec(),
        }
    }
}

/// Body of `POST /generate-outline`.
#[derive(Debug, Serialize)]
pub struct OutlineBody<'a> {
    pub topic: &'a str,
}

/// Body of `POST /generate-animation`.
#[derive(Debug, Serialize)]
pub struct AnimationBody<'a> {
    pub topic: &'a str,
    pub outline: &'a str,
    pub history: &'a [HistoryEntry],
}

/// Body of the combined `POST /generate`.
#[derive(Debug, Serialize)]
pub struct CombinedBody<'a> {
    pub topic: &'a str,
    pub history: &'a [HistoryEntry],
}

// -- Endpoints --------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Outline,
    Animation,
    Combined,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Outline => write!(f, "generate-outline"),
            Endpoint::Animation => write!(f, "generate-animation"),
            Endpoint::Combined => write!(f, "generate"),
        }
    }
}
