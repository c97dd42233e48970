//! Element data model and the schema boundary.
//!
//! Elements are schema-open JSON objects: only the `type` tag is enforced,
//! every other key rides along untouched so clients can extend the schema
//! without a server change. The server adds its own bookkeeping keys
//! (`id`, `createdBy`, `timestamp`, ...) on top of whatever the client sent.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The seven element tags the renderer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Rectangle,
    Circle,
    Line,
    Arrow,
    Pen,
    Text,
    Note,
}

impl ElementKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "rectangle" => Some(Self::Rectangle),
            "circle" => Some(Self::Circle),
            "line" => Some(Self::Line),
            "arrow" => Some(Self::Arrow),
            "pen" => Some(Self::Pen),
            "text" => Some(Self::Text),
            "note" => Some(Self::Note),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Rectangle => "rectangle",
            Self::Circle => "circle",
            Self::Line => "line",
            Self::Arrow => "arrow",
            Self::Pen => "pen",
            Self::Text => "text",
            Self::Note => "note",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("element is missing a type")]
    MissingType,
    #[error("unknown element type: {0}")]
    UnknownType(String),
}

/// One drawing element, stored and relayed as an open JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Element(Map<String, Value>);

impl Element {
    /// The `type` tag, validated against the known kinds.
    pub fn kind(&self) -> Result<ElementKind, ValidationError> {
        match self.0.get("type") {
            Some(Value::String(tag)) => {
                ElementKind::from_tag(tag).ok_or_else(|| ValidationError::UnknownType(tag.clone()))
            }
            Some(_) | None => Err(ValidationError::MissingType),
        }
    }

    /// The element identifier, if the element carries a non-empty one.
    pub fn id(&self) -> Option<&str> {
        self.0
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn set_id(&mut self, id: &str) {
        self.0.insert("id".to_owned(), Value::String(id.to_owned()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn stamp_created(&mut self, by: &str, at: u64) {
        self.0
            .insert("createdBy".to_owned(), Value::String(by.to_owned()));
        self.0.insert("timestamp".to_owned(), Value::from(at));
    }

    pub fn stamp_updated(&mut self, by: &str, at: u64) {
        self.0
            .insert("updatedBy".to_owned(), Value::String(by.to_owned()));
        self.0.insert("updatedAt".to_owned(), Value::from(at));
    }

    pub fn stamp_moved(&mut self, by: &str, at: u64) {
        self.0
            .insert("movedBy".to_owned(), Value::String(by.to_owned()));
        self.0.insert("movedAt".to_owned(), Value::from(at));
    }

    /// Last-writer-wins overlay: every key in `patch` replaces the prior
    /// value, everything else is kept.
    pub fn overlaid_with(&self, patch: &Element) -> Element {
        let mut merged = self.0.clone();
        for (key, value) in &patch.0 {
            merged.insert(key.clone(), value.clone());
        }
        Element(merged)
    }
}

/// Millisecond Unix timestamp used for session creation and element stamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
