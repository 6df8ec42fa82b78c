//! Envelope framing.
//!
//! Every unit on the pipe is an envelope: an 8-byte header followed by the
//! encoded body fields.
//!
//! ```text
//! [u8: directive][u8: schema version][u16 BE: taxonomy][u32 BE: frame length incl. header][fields]
//! ```
//!
//! An envelope whose body has zero fields is the shutdown sentinel. It is
//! only ever produced locally and is never written to the pipe.

use super::field::FieldMessage;
use super::message::{ControlMessage, UserMessage};
use crate::{LinkError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Length of the fixed envelope header.
pub const HEADER_LEN: usize = 8;

const SCHEMA_VERSION: u8 = 0;
const TAXONOMY: u16 = 0;

/// Processing directive carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    /// Application payload traffic routed to handlers.
    User,
    /// Heartbeat, poison and stash traffic handled by the reader.
    Control,
    /// Anything else; dropped by the reader.
    Other(u8),
}

impl Directive {
    pub const USER: u8 = 1;
    pub const CONTROL: u8 = 2;

    pub fn from_u8(value: u8) -> Self {
        match value {
            Self::USER => Directive::User,
            Self::CONTROL => Directive::Control,
            other => Directive::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Directive::User => Self::USER,
            Directive::Control => Self::CONTROL,
            Directive::Other(v) => *v,
        }
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Directive::User => write!(f, "USER"),
            Directive::Control => write!(f, "CONTROL"),
            Directive::Other(v) => write!(f, "UNKNOWN({})", v),
        }
    }
}

/// One framed unit on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub directive: Directive,
    pub body: FieldMessage,
}

impl Envelope {
    pub fn new(directive: Directive, body: FieldMessage) -> Self {
        Self { directive, body }
    }

    pub fn user(message: &UserMessage) -> Self {
        Self::new(Directive::User, message.to_fields())
    }

    pub fn control(message: &ControlMessage) -> Self {
        Self::new(Directive::Control, message.to_fields())
    }

    /// The "no more output" marker.
    pub fn sentinel() -> Self {
        Self::new(Directive::User, FieldMessage::new())
    }

    pub fn is_sentinel(&self) -> bool {
        self.body.is_empty()
    }

    /// Encode header and body into one frame.
    pub fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        self.body.encode(&mut body);

        let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
        frame.put_u8(self.directive.as_u8());
        frame.put_u8(SCHEMA_VERSION);
        frame.put_u16(TAXONOMY);
        frame.put_u32((HEADER_LEN + body.len()) as u32);
        frame.put_slice(&body);
        frame
    }

    /// Decode one complete frame.
    pub fn decode(frame: Bytes) -> Result<Self> {
        RawEnvelope::parse(frame)?.decode()
    }
}

/// A frame whose header has been read but whose body is still undecoded.
///
/// The reader looks at the directive before touching the body, so traffic
/// it would drop anyway never reaches the field decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvelope {
    pub directive: Directive,
    pub body: Bytes,
}

impl RawEnvelope {
    /// Split one complete frame into directive and body bytes.
    pub fn parse(mut frame: Bytes) -> Result<Self> {
        if frame.len() < HEADER_LEN {
            return Err(LinkError::decode(format!(
                "Envelope frame of {} bytes is shorter than its header",
                frame.len()
            )));
        }
        let directive = Directive::from_u8(frame.get_u8());
        let _version = frame.get_u8();
        let _taxonomy = frame.get_u16();
        let declared = frame.get_u32() as usize;
        if declared != frame.len() + HEADER_LEN {
            return Err(LinkError::decode(format!(
                "Envelope declares {} bytes but frame holds {}",
                declared,
                frame.len() + HEADER_LEN
            )));
        }
        Ok(Self {
            directive,
            body: frame,
        })
    }

    pub fn decode_body(&self) -> Result<FieldMessage> {
        FieldMessage::decode(self.body.clone())
    }

    pub fn decode(self) -> Result<Envelope> {
        let body = self.decode_body()?;
        Ok(Envelope::new(self.directive, body))
    }
}

/// Read one frame from an async reader without decoding its body.
///
/// Returns `None` on clean EOF at a frame boundary (peer closed the pipe).
pub async fn read_raw_envelope<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<RawEnvelope>> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if size < HEADER_LEN {
        return Err(LinkError::decode(format!(
            "Envelope length {} is shorter than its header",
            size
        )));
    }
    if size > max_size {
        return Err(LinkError::EnvelopeTooLarge {
            size,
            max: max_size,
        });
    }

    let mut frame = BytesMut::with_capacity(size);
    frame.put_slice(&header);
    frame.resize(size, 0);
    reader.read_exact(&mut frame[HEADER_LEN..]).await?;

    RawEnvelope::parse(frame.freeze()).map(Some)
}

/// Read and fully decode one envelope.
///
/// Returns `None` on clean EOF at a frame boundary (peer closed the pipe).
pub async fn read_envelope<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Envelope>> {
    match read_raw_envelope(reader, max_size).await? {
        Some(raw) => raw.decode().map(Some),
        None => Ok(None),
    }
}

/// Write one envelope to an async writer and flush it.
pub async fn write_envelope<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<()> {
    let frame = envelope.encode();
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
