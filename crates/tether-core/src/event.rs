//! Event and wire message definitions
//!
//! Inbound messages arrive from the authoritative backend; outbound messages
//! carry locally-originated mutations to it. Both travel as JSON objects
//! tagged by `op`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{EventId, PathAddress, Value};

/// Structural kind of a list, fixed by the first append it observes
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Raw scalars
    Primitive,
    /// `(key, object)` pairs; the key is mirrored into `key_field`
    Keyed { key_field: String },
    /// Anonymous objects addressed by index
    Positional,
}

impl ListKind {
    /// Decode the structural metadata carried by an `append` message
    pub fn from_wire(primitive: bool, key_field: &str) -> Self {
        if primitive {
            ListKind::Primitive
        } else if key_field.is_empty() {
            ListKind::Positional
        } else {
            ListKind::Keyed {
                key_field: key_field.to_string(),
            }
        }
    }

    pub fn keyed(key_field: impl Into<String>) -> Self {
        ListKind::Keyed {
            key_field: key_field.into(),
        }
    }

    #[inline]
    pub fn is_primitive(&self) -> bool {
        matches!(self, ListKind::Primitive)
    }

    /// Key field name, or `""` for unkeyed lists (wire form)
    pub fn key_field(&self) -> &str {
        match self {
            ListKind::Keyed { key_field } => key_field,
            _ => "",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKind::Primitive => f.write_str("primitive"),
            ListKind::Keyed { key_field } => write!(f, "keyed({})", key_field),
            ListKind::Positional => f.write_str("positional"),
        }
    }
}

/// Mutation operation classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Set,
    Append,
    Delete,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpKind::Set => "set",
            OpKind::Append => "append",
            OpKind::Delete => "delete",
        })
    }
}

/// Message received from the authoritative side
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Inbound {
    Set {
        path: PathAddress,
        id: i64,
        value: Value,
    },
    Append {
        path: PathAddress,
        id: i64,
        primitive: bool,
        #[serde(default)]
        key: String,
    },
    Delete {
        path: PathAddress,
        id: i64,
    },
    Rollback {
        id: i64,
    },
}

impl Inbound {
    /// Local id this message correlates with, if any
    pub fn event_id(&self) -> Option<EventId> {
        let id = match self {
            Inbound::Set { id, .. }
            | Inbound::Append { id, .. }
            | Inbound::Delete { id, .. }
            | Inbound::Rollback { id } => *id,
        };
        EventId::from_wire(id)
    }

    pub fn path(&self) -> Option<&PathAddress> {
        match self {
            Inbound::Set { path, .. } | Inbound::Append { path, .. } | Inbound::Delete { path, .. } => {
                Some(path)
            }
            Inbound::Rollback { .. } => None,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Inbound::Set { .. } => "set",
            Inbound::Append { .. } => "append",
            Inbound::Delete { .. } => "delete",
            Inbound::Rollback { .. } => "rollback",
        }
    }
}

/// Message sent to the authoritative side
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Outbound {
    #[serde(rename = "set_client")]
    Set {
        path: PathAddress,
        value: Value,
        id: EventId,
    },
    #[serde(rename = "append_client")]
    Append {
        path: PathAddress,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        primitive: bool,
        key: String,
        id: EventId,
    },
    #[serde(rename = "delete_client")]
    Delete { path: PathAddress, id: EventId },
    /// One-time request for the initial snapshot
    #[serde(rename = "ready")]
    Ready,
}

impl Outbound {
    pub fn event_id(&self) -> Option<EventId> {
        match self {
            Outbound::Set { id, .. } | Outbound::Append { id, .. } | Outbound::Delete { id, .. } => {
                Some(*id)
            }
            Outbound::Ready => None,
        }
    }

    pub fn path(&self) -> Option<&PathAddress> {
        match self {
            Outbound::Set { path, .. } | Outbound::Append { path, .. } | Outbound::Delete { path, .. } => {
                Some(path)
            }
            Outbound::Ready => None,
        }
    }
}
