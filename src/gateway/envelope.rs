//! Wire envelope shared by requests, responses and broadcasts
//!
//! Frames are JSON objects with PascalCase keys:
//! `{ "Message": .., "Identifier": .., "Type": .., "Stacktrace": .. }`.
//! Clients only need to populate `Message`; everything else defaults.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier used for messages that do not answer a numbered request
pub const UNSOLICITED: i64 = -1;

/// Message classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>")]
pub enum MessageType {
    /// Anything that is not chat
    #[default]
    Generic,
    /// In-game chat line
    Chat,
}

impl From<Option<String>> for MessageType {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(kind) if kind.eq_ignore_ascii_case("chat") => MessageType::Chat,
            _ => MessageType::Generic,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Generic => write!(f, "Generic"),
            MessageType::Chat => write!(f, "Chat"),
        }
    }
}

/// The envelope exchanged over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteMessage {
    /// Command line for requests, free text otherwise
    #[serde(default)]
    pub message: String,

    /// Correlation id; [`UNSOLICITED`] when not answering a request
    #[serde(default = "unsolicited")]
    pub identifier: i64,

    /// Classification
    #[serde(default, rename = "Type")]
    pub kind: MessageType,

    /// Trace attached to log lines from errors
    #[serde(default)]
    pub stacktrace: Option<String>,
}

fn unsolicited() -> i64 {
    UNSOLICITED
}

impl RemoteMessage {
    /// Unsolicited generic message
    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            identifier: UNSOLICITED,
            kind: MessageType::Generic,
            stacktrace: None,
        }
    }

    /// Unsolicited message with an explicit classification
    pub fn classified(message: impl Into<String>, kind: MessageType) -> Self {
        Self {
            kind,
            ..Self::generic(message)
        }
    }

    /// Attach a stack trace, ignoring empty ones
    pub fn with_stacktrace(mut self, stacktrace: Option<String>) -> Self {
        self.stacktrace = stacktrace.filter(|trace| !trace.is_empty());
        self
    }

    /// Decode a text frame; malformed frames and `null` yield `None`
    pub fn decode(frame: &str) -> Option<Self> {
        serde_json::from_str::<Option<Self>>(frame).ok().flatten()
    }

    /// Encode as a pretty-printed text frame
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
