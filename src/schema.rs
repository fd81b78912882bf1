//! Extraction result type.

use serde::Serialize;

use crate::normalize::FieldMap;

/// Value returned by every extraction call. Failures are values too.
///
/// Serializes as the bare field map, as `{"text": "..."}`, or as
/// `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtractionOutcome {
    Error { error: String },
    Text { text: String },
    Fields(FieldMap),
}

impl ExtractionOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}
