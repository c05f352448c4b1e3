//! Activity types
//!
//! Closed enumeration of the activity vocabulary the inbox understands, with
//! an explicit fallback for everything else.

use std::fmt;

/// ActivityStreams activity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Reject,
    Undo,
    Like,
    Announce,
    Block,
    /// Any type not listed above
    Unknown,
}

impl ActivityKind {
    /// Parse the `type` field of an activity
    pub fn from_type(value: &str) -> Self {
        match value {
            "Create" => Self::Create,
            "Update" => Self::Update,
            "Delete" => Self::Delete,
            "Follow" => Self::Follow,
            "Accept" => Self::Accept,
            "Reject" => Self::Reject,
            "Undo" => Self::Undo,
            "Like" => Self::Like,
            "Announce" => Self::Announce,
            "Block" => Self::Block,
            _ => Self::Unknown,
        }
    }

    /// Classify a JSON activity by its `type` field
    pub fn of(activity: &serde_json::Value) -> Self {
        activity
            .get("type")
            .and_then(|t| t.as_str())
            .map(Self::from_type)
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Undo => "Undo",
            Self::Like => "Like",
            Self::Announce => "Announce",
            Self::Block => "Block",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
