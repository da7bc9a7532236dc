//! Shared request/response types exchanged with the model collaborator.

use serde::{Deserialize, Serialize};

/// Speaker of a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::System => "system",
        }
    }
}

/// One role-tagged unit of a conversational request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<String>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![text.into()],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    /// True if at least one part carries text.
    pub fn has_text(&self) -> bool {
        self.parts.iter().any(|part| !part.is_empty())
    }

    /// First part, or the empty string when the turn has none.
    pub fn first_text(&self) -> &str {
        self.parts.first().map(String::as_str).unwrap_or("")
    }
}

/// Outcome of a model call, checked explicitly instead of probing for content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelResponse {
    Present(String),
    Absent,
}

impl ModelResponse {
    /// Classify raw model output; whitespace-only output counts as absent.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.trim().is_empty() {
            ModelResponse::Absent
        } else {
            ModelResponse::Present(raw)
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ModelResponse::Present(text) => Some(text),
            ModelResponse::Absent => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            ModelResponse::Present(text) => Some(text),
            ModelResponse::Absent => None,
        }
    }
}
