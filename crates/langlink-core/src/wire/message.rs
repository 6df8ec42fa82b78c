//! Control and user sub-messages.
//!
//! Control ordinals: `1` operation (i32), `2` stash (nested message).
//! User ordinals: `1` handle (i32, optional), `2` payload (nested message).
//! Payload ordinals: `0` kind name (string), `1` body (nested message,
//! absent for the empty payload). The body is nested so handler-defined
//! ordinals never collide with the kind tag.

use super::field::{FieldMessage, FieldValue};
use crate::{LinkError, Result};

/// Control sub-message ordinals.
pub mod control_ordinal {
    pub const OPERATION: u16 = 1;
    pub const STASH: u16 = 2;
}

/// User sub-message ordinals.
pub mod user_ordinal {
    pub const HANDLE: u16 = 1;
    pub const PAYLOAD: u16 = 2;
}

/// Ordinal holding the payload kind name inside a payload message.
pub const PAYLOAD_KIND_ORDINAL: u16 = 0;

/// Ordinal holding the kind-specific body inside a payload message.
pub const PAYLOAD_BODY_ORDINAL: u16 = 1;

/// Control-plane operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOperation {
    Heartbeat,
    Poison,
    Stash,
    /// Unrecognised operation value; ignored by the reader.
    Other(i32),
}

impl ControlOperation {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ControlOperation::Heartbeat,
            2 => ControlOperation::Poison,
            3 => ControlOperation::Stash,
            other => ControlOperation::Other(other),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            ControlOperation::Heartbeat => 1,
            ControlOperation::Poison => 2,
            ControlOperation::Stash => 3,
            ControlOperation::Other(v) => *v,
        }
    }
}

/// A control-plane message.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub operation: ControlOperation,
    /// Opaque session snapshot. Written only for `Stash`; accepted on
    /// `Heartbeat` as the seed for session initialization.
    pub stash: Option<FieldMessage>,
}

impl ControlMessage {
    pub fn new(operation: ControlOperation) -> Self {
        Self {
            operation,
            stash: None,
        }
    }

    pub fn stash(snapshot: FieldMessage) -> Self {
        Self {
            operation: ControlOperation::Stash,
            stash: Some(snapshot),
        }
    }

    pub fn to_fields(&self) -> FieldMessage {
        let mut fields = FieldMessage::new().with(
            control_ordinal::OPERATION,
            FieldValue::I32(self.operation.as_i32()),
        );
        if self.operation == ControlOperation::Stash {
            if let Some(stash) = &self.stash {
                fields.push(control_ordinal::STASH, FieldValue::Message(stash.clone()));
            }
        }
        fields
    }

    pub fn from_fields(fields: &FieldMessage) -> Result<Self> {
        let operation = fields
            .get_i32(control_ordinal::OPERATION)
            .ok_or(LinkError::MissingField {
                message: "control",
                ordinal: control_ordinal::OPERATION,
            })?;
        Ok(Self {
            operation: ControlOperation::from_i32(operation),
            stash: fields.get_message(control_ordinal::STASH).cloned(),
        })
    }
}

/// Routing key for user payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Empty,
    Data,
    Function,
    Procedure,
    Custom(String),
}

impl PayloadKind {
    pub fn custom(name: impl Into<String>) -> Self {
        PayloadKind::Custom(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            PayloadKind::Empty => "empty",
            PayloadKind::Data => "data",
            PayloadKind::Function => "function",
            PayloadKind::Procedure => "procedure",
            PayloadKind::Custom(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "empty" => PayloadKind::Empty,
            "data" => PayloadKind::Data,
            "function" => PayloadKind::Function,
            "procedure" => PayloadKind::Procedure,
            other => PayloadKind::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user payload: a kind tag plus a body that only handlers interpret.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// Default payload, used when a handler produced nothing or failed.
    #[default]
    Empty,
    Data(FieldMessage),
    Function(FieldMessage),
    Procedure(FieldMessage),
    Custom { name: String, body: FieldMessage },
}

impl Payload {
    pub fn custom(name: impl Into<String>, body: FieldMessage) -> Self {
        Payload::Custom {
            name: name.into(),
            body,
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Empty => PayloadKind::Empty,
            Payload::Data(_) => PayloadKind::Data,
            Payload::Function(_) => PayloadKind::Function,
            Payload::Procedure(_) => PayloadKind::Procedure,
            Payload::Custom { name, .. } => PayloadKind::Custom(name.clone()),
        }
    }

    /// The kind-specific body; empty for `Payload::Empty`.
    pub fn body(&self) -> Option<&FieldMessage> {
        match self {
            Payload::Empty => None,
            Payload::Data(body)
            | Payload::Function(body)
            | Payload::Procedure(body)
            | Payload::Custom { body, .. } => Some(body),
        }
    }

    pub fn to_message(&self) -> FieldMessage {
        let mut message = FieldMessage::new().with(
            PAYLOAD_KIND_ORDINAL,
            FieldValue::Str(self.kind().as_str().to_string()),
        );
        if let Some(body) = self.body() {
            message.push(PAYLOAD_BODY_ORDINAL, FieldValue::Message(body.clone()));
        }
        message
    }

    pub fn from_message(message: &FieldMessage) -> Result<Self> {
        let kind = match message.get(PAYLOAD_KIND_ORDINAL) {
            Some(FieldValue::Str(name)) => PayloadKind::from_name(name),
            Some(_) => {
                return Err(LinkError::decode("Payload kind must be a string field"));
            }
            None => {
                return Err(LinkError::MissingField {
                    message: "payload",
                    ordinal: PAYLOAD_KIND_ORDINAL,
                });
            }
        };
        let body = match message.get(PAYLOAD_BODY_ORDINAL) {
            Some(FieldValue::Message(body)) => body.clone(),
            Some(_) => {
                return Err(LinkError::decode("Payload body must be a nested message"));
            }
            None => FieldMessage::new(),
        };
        Ok(match kind {
            PayloadKind::Empty => Payload::Empty,
            PayloadKind::Data => Payload::Data(body),
            PayloadKind::Function => Payload::Function(body),
            PayloadKind::Procedure => Payload::Procedure(body),
            PayloadKind::Custom(name) => Payload::Custom { name, body },
        })
    }
}

/// A user-plane message.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage {
    /// Correlation handle; present iff the sender expects a reply.
    pub handle: Option<i32>,
    pub payload: Payload,
}

impl UserMessage {
    pub fn new(handle: Option<i32>, payload: Payload) -> Self {
        Self { handle, payload }
    }

    pub fn to_fields(&self) -> FieldMessage {
        let mut fields = FieldMessage::new();
        if let Some(handle) = self.handle {
            fields.push(user_ordinal::HANDLE, FieldValue::I32(handle));
        }
        fields.push(
            user_ordinal::PAYLOAD,
            FieldValue::Message(self.payload.to_message()),
        );
        fields
    }

    pub fn from_fields(fields: &FieldMessage) -> Result<Self> {
        let payload = fields
            .get_message(user_ordinal::PAYLOAD)
            .ok_or(LinkError::MissingField {
                message: "user",
                ordinal: user_ordinal::PAYLOAD,
            })?;
        Ok(Self {
            handle: fields.get_i32(user_ordinal::HANDLE),
            payload: Payload::from_message(payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_operation_values() {
        assert_eq!(ControlOperation::Heartbeat.as_i32(), 1);
        assert_eq!(ControlOperation::Poison.as_i32(), 2);
        assert_eq!(ControlOperation::Stash.as_i32(), 3);
        assert_eq!(ControlOperation::from_i32(42), ControlOperation::Other(42));
    }

    #[test]
    fn test_stash_only_written_for_stash_operation() {
        let snapshot = FieldMessage::new().with(1, FieldValue::I64(9));
        let heartbeat = ControlMessage {
            operation: ControlOperation::Heartbeat,
            stash: Some(snapshot.clone()),
        };
        assert!(heartbeat.to_fields().get(control_ordinal::STASH).is_none());

        let stash = ControlMessage::stash(snapshot.clone());
        let decoded = ControlMessage::from_fields(&stash.to_fields()).unwrap();
        assert_eq!(decoded.stash, Some(snapshot));
    }

    #[test]
    fn test_heartbeat_with_stash_is_accepted() {
        let snapshot = FieldMessage::new().with(3, FieldValue::Str("state".into()));
        let fields = FieldMessage::new()
            .with(control_ordinal::OPERATION, FieldValue::I32(1))
            .with(control_ordinal::STASH, FieldValue::Message(snapshot.clone()));
        let decoded = ControlMessage::from_fields(&fields).unwrap();
        assert_eq!(decoded.operation, ControlOperation::Heartbeat);
        assert_eq!(decoded.stash, Some(snapshot));
    }

    #[test]
    fn test_control_missing_operation_is_error() {
        let fields = FieldMessage::new().with(control_ordinal::STASH, FieldValue::Indicator);
        assert!(matches!(
            ControlMessage::from_fields(&fields),
            Err(LinkError::MissingField { ordinal: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_ordinals_ignored() {
        let fields = FieldMessage::new()
            .with(99, FieldValue::Str("future".into()))
            .with(control_ordinal::OPERATION, FieldValue::I32(2));
        let decoded = ControlMessage::from_fields(&fields).unwrap();
        assert_eq!(decoded.operation, ControlOperation::Poison);
    }

    #[test]
    fn test_user_message_without_handle() {
        let message = UserMessage::new(None, Payload::Function(FieldMessage::new()));
        let fields = message.to_fields();
        assert!(fields.get(user_ordinal::HANDLE).is_none());
        assert_eq!(UserMessage::from_fields(&fields).unwrap(), message);
    }

    #[test]
    fn test_user_message_without_payload_is_error() {
        let fields = FieldMessage::new().with(user_ordinal::HANDLE, FieldValue::I32(3));
        assert!(UserMessage::from_fields(&fields).is_err());
    }

    #[test]
    fn test_payload_kind_is_ordinal_zero() {
        let payload = Payload::custom("echo", FieldMessage::new().with(1, FieldValue::I32(5)));
        let message = payload.to_message();
        assert_eq!(message.get_str(PAYLOAD_KIND_ORDINAL), Some("echo"));
        assert_eq!(
            message
                .get_message(PAYLOAD_BODY_ORDINAL)
                .and_then(|body| body.get_i32(1)),
            Some(5)
        );

        let decoded = Payload::from_message(&message).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.kind(), PayloadKind::custom("echo"));
    }

    #[test]
    fn test_body_ordinal_zero_kept_apart_from_kind() {
        let body = FieldMessage::new()
            .with(0, FieldValue::Str("row".into()))
            .with(1, FieldValue::I64(2));
        let payload = Payload::Data(body.clone());

        let decoded = Payload::from_message(&payload.to_message()).unwrap();
        assert_eq!(decoded.kind(), PayloadKind::Data);
        assert_eq!(decoded, Payload::Data(body));
    }

    #[test]
    fn test_empty_payload_has_no_body() {
        let message = Payload::Empty.to_message();
        assert!(message.get(PAYLOAD_BODY_ORDINAL).is_none());
        assert_eq!(Payload::from_message(&message).unwrap(), Payload::Empty);
    }

    #[test]
    fn test_builtin_kind_names() {
        for kind in [
            PayloadKind::Empty,
            PayloadKind::Data,
            PayloadKind::Function,
            PayloadKind::Procedure,
        ] {
            assert_eq!(PayloadKind::from_name(kind.as_str()), kind);
        }
        assert_eq!(Payload::default().kind(), PayloadKind::Empty);
    }

    #[test]
    fn test_payload_without_kind_is_error() {
        let message = FieldMessage::new().with(1, FieldValue::I32(1));
        assert!(Payload::from_message(&message).is_err());
    }
}
