//! Socket frame vocabulary, shared by ingress decoding and broadcast
//! encoding. Frames are tagged JSON objects; the tag is the `type` key.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::element::Element;

/// Frames a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Draw { element: Element },
    Erase { element_id: String },
    Clear,
    Move { element_id: String, element: Element },
    Reorder { element_id: String, position: String },
    Cursor { x: f64, y: f64 },
}

/// Frames the server emits to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Init {
        user_id: String,
        elements: Vec<Element>,
        user_count: usize,
    },
    Draw {
        element: Element,
    },
    Erase {
        element_id: String,
    },
    Clear,
    Move {
        element_id: String,
        element: Element,
    },
    Reorder {
        element_id: String,
        position: String,
    },
    Cursor {
        x: f64,
        y: f64,
        // Wire compat: long-deployed clients read the misspelled "oderId"
        // key. "userId" mirrors it for newer clients.
        #[serde(rename = "oderId")]
        oder_id: String,
        user_id: String,
    },
    UserCount {
        count: usize,
    },
    UserLeft {
        #[serde(rename = "oderId")]
        oder_id: String,
        user_id: String,
    },
}

impl ServerFrame {
    pub fn cursor(x: f64, y: f64, user_id: &str) -> Self {
        Self::Cursor {
            x,
            y,
            oder_id: user_id.to_owned(),
            user_id: user_id.to_owned(),
        }
    }

    pub fn user_left(user_id: &str) -> Self {
        Self::UserLeft {
            oder_id: user_id.to_owned(),
            user_id: user_id.to_owned(),
        }
    }

    /// Serialize once; the returned buffer is shared across subscribers.
    pub fn encode(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).expect("frame serialization must succeed"))
    }
}
