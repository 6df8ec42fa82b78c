//! Binary wire format.
//!
//! - **Field**: ordinal-tagged sub-messages shared by every layer
//! - **Envelope**: directive header plus body, framed on the pipe
//! - **Message**: typed control and user sub-messages

pub mod envelope;
pub mod field;
pub mod message;

pub use envelope::{
    read_envelope, read_raw_envelope, write_envelope, Directive, Envelope, RawEnvelope, HEADER_LEN,
};
pub use field::{Field, FieldMessage, FieldValue};
pub use message::{ControlMessage, ControlOperation, Payload, PayloadKind, UserMessage};
