use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Lifecycle state of an active ticket.
///
/// `Completed` and `Cancelled` are terminal: the record store never holds a
/// ticket in either state, they exist only to label the close outcome that is
/// mirrored to the secondary stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketStatus::Pending => write!(f, "pending"),
            TicketStatus::InProgress => write!(f, "in_progress"),
            TicketStatus::Completed => write!(f, "completed"),
            TicketStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TicketStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TicketStatus::Pending),
            "in_progress" => Ok(TicketStatus::InProgress),
            "completed" => Ok(TicketStatus::Completed),
            "cancelled" => Ok(TicketStatus::Cancelled),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

/// Terminal outcome of a close operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseOutcome {
    Completed,
    Cancelled,
}

impl CloseOutcome {
    pub fn status(self) -> TicketStatus {
        match self {
            CloseOutcome::Completed => TicketStatus::Completed,
            CloseOutcome::Cancelled => TicketStatus::Cancelled,
        }
    }
}

impl fmt::Display for CloseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseOutcome::Completed => write!(f, "completed"),
            CloseOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Key column type of a ticket family.
///
/// The numeric family ("chamados") keys by an integer ID; the service-request
/// family ("sar") keys by an alphanumeric number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Integer,
    Text,
}

/// A validated ticket key, typed per the owning family's `KeyKind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketKey {
    Integer(i64),
    Text(String),
}

impl TicketKey {
    /// Parse a raw key string against the family's key kind.
    pub fn parse(raw: &str, kind: KeyKind) -> Result<Self, Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidKey(raw.to_string()));
        }
        match kind {
            KeyKind::Integer => raw
                .parse::<i64>()
                .map(TicketKey::Integer)
                .map_err(|_| Error::InvalidKey(raw.to_string())),
            KeyKind::Text => Ok(TicketKey::Text(raw.to_string())),
        }
    }

    /// SQL bind value for this key.
    pub fn to_value(&self) -> turso::Value {
        match self {
            TicketKey::Integer(n) => turso::Value::Integer(*n),
            TicketKey::Text(s) => turso::Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketKey::Integer(n) => write!(f, "{}", n),
            TicketKey::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One parsed entry of a ticket's append-only notes log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEntry {
    /// Display date in the fixed `dd/mm/yyyy HH:MM` format.
    pub date: String,
    pub user: String,
    pub text: String,
    /// ISO 8601 timestamp, when the entry header parsed cleanly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}
