//! Message contract, queue naming and the JSON wire codec.

use crate::error::{QueueError, SerializationError, ValidationError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Event Kind
// ============================================================================

/// Change kind carried by every transportable message
///
/// Serialized by name (`"Added"`). Names outside the three recognized kinds
/// decode to [`EventKind::Unrecognized`] so the payload is still delivered and
/// the dispatcher can reject it on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[default]
    Added,
    Updated,
    Deleted,
    #[serde(other)]
    Unrecognized,
}

impl EventKind {
    /// The kinds a handler can be registered for
    pub const RECOGNIZED: [EventKind; 3] = [Self::Added, Self::Updated, Self::Deleted];

    /// Check if the kind is one of Added, Updated or Deleted
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized)
    }

    /// Get the wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "Added",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
            Self::Unrecognized => "Unrecognized",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "added" => Ok(Self::Added),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            _ => Err(ValidationError::InvalidFormat {
                field: "event_kind".to_string(),
                message: format!("'{}' is not one of added, updated, deleted", s),
            }),
        }
    }
}

// ============================================================================
// Message Contract
// ============================================================================

/// A domain event that can travel through any [`MessageQueue`](crate::MessageQueue)
///
/// Implementors store the kind in a serialized field, conventionally named
/// `EventType` on the wire:
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use simple_queue::{EventKind, Message};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// #[serde(rename_all = "PascalCase")]
/// struct MediaMessage {
///     #[serde(rename = "EventType")]
///     event_kind: EventKind,
///     id: String,
/// }
///
/// impl Message for MediaMessage {
///     fn event_kind(&self) -> EventKind {
///         self.event_kind
///     }
///
///     fn set_event_kind(&mut self, kind: EventKind) {
///         self.event_kind = kind;
///     }
/// }
///
/// assert_eq!(MediaMessage::message_type(), "MediaMessage");
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Get the change kind of the message
    fn event_kind(&self) -> EventKind;

    /// Replace the change kind of the message
    fn set_event_kind(&mut self, kind: EventKind);

    /// Identifier of the message type, used to name its queue or topic
    fn message_type() -> &'static str {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }
}

// ============================================================================
// Queue Naming
// ============================================================================

/// Validated queue or topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores and dots allowed"
                    .to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Queue name for a message type: the type identifier itself
    pub fn for_message<T: Message>() -> Result<Self, ValidationError> {
        Self::new(T::message_type().to_string())
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

// ============================================================================
// Wire Codec
// ============================================================================

/// Serialize a message into its textual wire payload
pub fn encode<T: Message>(message: &T) -> Result<String, SerializationError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a wire payload
///
/// Returns `Ok(None)` when the payload is a JSON `null`. Callers on the receive
/// path treat both `None` and an error as a malformed item to skip.
pub fn decode<T: Message>(payload: &[u8]) -> Result<Option<T>, SerializationError> {
    let text = std::str::from_utf8(payload).map_err(|_| SerializationError::InvalidUtf8)?;
    Ok(serde_json::from_str::<Option<T>>(text)?)
}

/// Stamp `kind` onto the message and encode it for sending
///
/// Every backend goes through this so the kind is always set before
/// serialization, whichever adapter is in use.
pub fn stamp_and_encode<T: Message>(
    message: &mut T,
    kind: EventKind,
) -> Result<String, QueueError> {
    if !kind.is_recognized() {
        return Err(QueueError::UnsupportedEventKind { kind });
    }

    message.set_event_kind(kind);
    Ok(encode(message)?)
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
