//! JSON envelopes carried inside frames.
//!
//! Every frame payload is one UTF-8 JSON object naming the event and
//! carrying its data:
//!
//! ```text
//! {"event": "player-update", "data": {"x": 1}}
//! ```
//!
//! `data` may be any JSON value and defaults to `null` when absent.

use bytes::Bytes;
use pewpew_relay::OutboundEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::framing::{FrameConfig, FrameError, encode_frame};

/// One event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

impl From<&OutboundEvent> for Envelope {
    fn from(event: &OutboundEvent) -> Self {
        Self::new(event.name.clone(), event.data.clone())
    }
}

/// Envelope encoding/decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Nothing to decode.
    #[error("empty payload")]
    EmptyPayload,

    /// Not a JSON envelope.
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// Encoded envelope does not fit in a frame.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Serialize an envelope to JSON bytes.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Parse JSON bytes into an envelope.
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::EmptyPayload);
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Encode an envelope straight into a length-prefixed frame.
pub fn frame_envelope(envelope: &Envelope, config: &FrameConfig) -> Result<Bytes, CodecError> {
    let payload = encode_envelope(envelope)?;
    Ok(encode_frame(&payload, config)?)
}
