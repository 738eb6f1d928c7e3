use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request to invoke one capability of the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub name: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

impl CapabilityCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// A call that takes no arguments.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, empty_arguments())
    }
}

/// One typed block of capability output, e.g. `{"type": "text", "text": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSegment {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl ResultSegment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }
}

/// Ordered output of a single capability invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityResult {
    #[serde(default)]
    pub content: Vec<ResultSegment>,
}

impl CapabilityResult {
    pub fn new(content: Vec<ResultSegment>) -> Self {
        Self { content }
    }

    /// The "no content" sentinel returned for empty or malformed replies.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Content means at least one text segment with visible text; anything
    /// else would flatten to an empty answer.
    pub fn has_content(&self) -> bool {
        self.content
            .iter()
            .any(|s| s.is_text() && !s.text.trim().is_empty())
    }

    /// Text segments joined by newlines; non-text segments are skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|s| s.is_text())
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One decoded record from the generative backend. Timing fields are
/// accepted but unused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    /// Set by the backend instead of `response` when generation fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
}
