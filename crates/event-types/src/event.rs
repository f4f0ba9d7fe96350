//! # Event
//!
//! A typed, stamped unit of state change.

use std::sync::Arc;

use crate::context::TraceContext;
use crate::envelope::{BusEvent, PROTOCOL_VERSION};
use crate::payloads::{BeginBlock, EventPayload};
use crate::types::EventType;

/// A batch of sequenced events as handed to subscribers.
///
/// Shared by reference between the dispatch worker and every subscriber of
/// the batch's type; nobody may mutate it once sequenced.
pub type EventBatch = Arc<[Event]>;

/// A single event flowing through the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    trace_id: String,
    block_nr: i64,
    chain_id: String,
    tx_hash: String,
    sequence: u64,
    payload: EventPayload,
}

impl Event {
    /// Create an unsequenced event in the given context.
    #[must_use]
    pub fn new(ctx: &TraceContext, payload: EventPayload) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            block_nr: ctx.block_nr,
            chain_id: ctx.chain_id.clone(),
            tx_hash: ctx.tx_hash.clone(),
            sequence: 0,
            payload,
        }
    }

    /// Routing type, derived from the payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    #[must_use]
    pub fn block_nr(&self) -> i64 {
        self.block_nr
    }

    #[must_use]
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    #[must_use]
    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }

    /// Sequence within the trace; 0 until sequenced.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of sequence slots this event reserves.
    #[must_use]
    pub fn composite_count(&self) -> u64 {
        self.payload.composite_count()
    }

    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// The begin-block marker, if this is one.
    #[must_use]
    pub fn begin_block(&self) -> Option<&BeginBlock> {
        match &self.payload {
            EventPayload::BeginBlock(begin) => Some(begin),
            _ => None,
        }
    }

    /// Stamp the sequence. Only the sequence generator and decoders call this.
    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Builder form of [`Event::set_sequence`].
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Re-contextualise a staged event right before it is flushed.
    pub fn replace(&mut self, ctx: &TraceContext) {
        self.trace_id = ctx.trace_id.clone();
        self.block_nr = ctx.block_nr;
        self.chain_id = ctx.chain_id.clone();
        self.tx_hash = ctx.tx_hash.clone();
    }

    /// Build the wire envelope for this event.
    #[must_use]
    pub fn to_bus_event(&self) -> BusEvent {
        BusEvent {
            version: PROTOCOL_VERSION,
            id: format!("{}-{}", self.block_nr, self.sequence),
            block: self.trace_id.clone(),
            block_nr: self.block_nr,
            chain_id: self.chain_id.clone(),
            tx_hash: self.tx_hash.clone(),
            event_type: self.event_type(),
            sequence: self.sequence,
            payload: self.payload.clone(),
        }
    }

    pub(crate) fn from_parts(envelope: BusEvent) -> Self {
        Self {
            trace_id: envelope.block,
            block_nr: envelope.block_nr,
            chain_id: envelope.chain_id,
            tx_hash: envelope.tx_hash,
            sequence: envelope.sequence,
            payload: envelope.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::{LedgerMovement, Party};

    fn ctx() -> TraceContext {
        TraceContext::new("h1").with_block_nr(3).with_chain_id("testchain")
    }

    #[test]
    fn test_new_event_is_unsequenced() {
        let event = Event::new(&ctx(), EventPayload::Party(Party::default()));
        assert_eq!(event.sequence(), 0);
        assert_eq!(event.trace_id(), "h1");
        assert_eq!(event.block_nr(), 3);
        assert_eq!(event.event_type(), EventType::Party);
    }

    #[test]
    fn test_replace_updates_context() {
        let mut event = Event::new(&ctx(), EventPayload::Party(Party::default()));
        event.replace(&TraceContext::new("h2").with_block_nr(4));
        assert_eq!(event.trace_id(), "h2");
        assert_eq!(event.block_nr(), 4);
        assert_eq!(event.chain_id(), "");
    }

    #[test]
    fn test_composite_count_from_payload() {
        let event = Event::new(
            &ctx(),
            EventPayload::LedgerMovements(vec![LedgerMovement::default(); 4]),
        );
        assert_eq!(event.composite_count(), 4);
    }

    #[test]
    fn test_bus_event_id() {
        let event = Event::new(&ctx(), EventPayload::Party(Party::default())).with_sequence(9);
        let envelope = event.to_bus_event();
        assert_eq!(envelope.id, "3-9");
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert_eq!(envelope.event_type, EventType::Party);
    }
}
