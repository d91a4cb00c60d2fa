//! Wire format between the orchestrator and the worker thread.
//!
//! Every message is an 8-byte header (magic, then version, both little
//! endian) followed by a `bitcode` payload. The header is checked before the
//! payload is decoded, so a frame from a different build is rejected with a
//! precise error instead of a garbled decode.

use crate::tick::{TickError, TickRequest, TickResult};
use heatnet_core::id::RequestId;
use heatnet_core::part::PartTable;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a heatnet worker frame ("HEAT").
pub const FRAME_MAGIC: u32 = 0x4845_4154;

/// Current protocol version. Increment when breaking the frame layout.
pub const PROTOCOL_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame too short for header: {0} bytes")]
    TooShort(usize),
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", FRAME_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported protocol version: expected {}, got {}", PROTOCOL_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("frame from future protocol version {0} (this build supports up to {PROTOCOL_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Orchestrator -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// Replace the worker's part table. Sent once at startup and on change.
    Parts(PartTable),
    Tick(TickRequest),
}

/// Worker -> orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerReply {
    Done(TickResult),
    /// `id` is `None` when the request itself could not be decoded.
    Failed {
        id: Option<RequestId>,
        error: TickError,
    },
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Frame header, validated before decoding the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u32,
}

impl FrameHeader {
    pub fn current() -> Self {
        Self {
            magic: FRAME_MAGIC,
            version: PROTOCOL_VERSION,
        }
    }

    pub fn read(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (Some(magic), Some(version)) = (word(bytes, 0), word(bytes, 4)) else {
            return Err(ProtocolError::TooShort(bytes.len()));
        };
        Ok(Self { magic, version })
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.magic != FRAME_MAGIC {
            return Err(ProtocolError::InvalidMagic(self.magic));
        }
        if self.version > PROTOCOL_VERSION {
            return Err(ProtocolError::FutureVersion(self.version));
        }
        if self.version < PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

fn word(bytes: &[u8], at: usize) -> Option<u32> {
    let chunk: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(chunk))
}

/// Encode a message into a framed buffer.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = bitcode::serialize(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    let header = FrameHeader::current();
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header.magic.to_le_bytes());
    frame.extend_from_slice(&header.version.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Validate the header and decode the payload.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, ProtocolError> {
    FrameHeader::read(frame)?.validate()?;
    bitcode::deserialize(&frame[HEADER_LEN..]).map_err(|e| ProtocolError::Decode(e.to_string()))
}
