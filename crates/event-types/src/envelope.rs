//! # Wire Envelope
//!
//! The versioned envelope every event is wrapped in when it leaves the
//! process, over the socket or into a buffer file.
//!
//! ## Compatibility
//!
//! - Readers MUST reject any `version` other than [`PROTOCOL_VERSION`].
//! - `event_type` MUST agree with the payload's type.

use serde::{Deserialize, Serialize};

use crate::errors::EnvelopeError;
use crate::event::Event;
use crate::payloads::EventPayload;
use crate::types::EventType;

/// Protocol version compiled into this build.
pub const PROTOCOL_VERSION: u32 = 1;

/// Serialized form of an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Protocol version of the writer.
    pub version: u32,
    /// `"{block_nr}-{sequence}"`.
    pub id: String,
    /// Trace ID of the originating block.
    pub block: String,
    pub block_nr: i64,
    pub chain_id: String,
    pub tx_hash: String,
    /// Routing type; must match the payload.
    pub event_type: EventType,
    pub sequence: u64,
    pub payload: EventPayload,
}

impl BusEvent {
    /// Encode to bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        bincode::serialize(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Decode from bytes. Does not check the version.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        bincode::deserialize(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))
    }

    /// Reject envelopes written by a different protocol version.
    pub fn verify_version(&self) -> Result<(), EnvelopeError> {
        if self.version != PROTOCOL_VERSION {
            return Err(EnvelopeError::VersionMismatch {
                received: self.version,
                expected: PROTOCOL_VERSION,
            });
        }
        Ok(())
    }
}

impl TryFrom<BusEvent> for Event {
    type Error = EnvelopeError;

    fn try_from(envelope: BusEvent) -> Result<Self, Self::Error> {
        let payload_type = envelope.payload.event_type();
        if envelope.event_type.is_wildcard() || envelope.event_type != payload_type {
            return Err(EnvelopeError::TypeMismatch {
                envelope: envelope.event_type,
                payload: payload_type,
            });
        }
        Ok(Event::from_parts(envelope))
    }
}

impl Event {
    /// Encode the event's envelope.
    pub fn to_wire(&self) -> Result<Vec<u8>, EnvelopeError> {
        self.to_bus_event().encode()
    }

    /// Decode an envelope, check its version and convert it back to an event.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope = BusEvent::decode(bytes)?;
        envelope.verify_version()?;
        Self::try_from(envelope)
    }
}
