//! # Consumer-Side Entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::BlockError;
use crate::event::Event;

/// A block as materialised by the transactional consumer.
///
/// Created exactly once per block boundary; the unit of commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: i64,
    pub hash: Vec<u8>,
    /// Block time, truncated to microseconds.
    pub vega_time: DateTime<Utc>,
}

impl Block {
    /// Build a block from a `BeginBlock` event.
    pub fn from_begin_block(event: &Event) -> Result<Self, BlockError> {
        let begin = event
            .begin_block()
            .ok_or(BlockError::NotBeginBlock(event.event_type()))?;

        let hash = hex::decode(event.trace_id()).map_err(|_| BlockError::InvalidHash {
            trace_id: event.trace_id().to_string(),
        })?;

        let micros = begin.timestamp.div_euclid(1_000);
        let vega_time = DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or(BlockError::InvalidTimestamp(begin.timestamp))?;

        let height =
            i64::try_from(begin.height).map_err(|_| BlockError::HeightOutOfRange(begin.height))?;

        Ok(Self {
            height,
            hash,
            vega_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TraceContext;
    use crate::payloads::{BeginBlock, EventPayload, Party};

    #[test]
    fn test_block_from_begin_block() {
        let ctx = TraceContext::new("DEADBEEF").with_block_nr(12);
        let event = Event::new(
            &ctx,
            EventPayload::BeginBlock(BeginBlock {
                height: 12,
                timestamp: 1_700_000_000_123_456_789,
                hash: "DEADBEEF".into(),
            }),
        );

        let block = Block::from_begin_block(&event).unwrap();
        assert_eq!(block.height, 12);
        assert_eq!(block.hash, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(block.vega_time.timestamp_micros(), 1_700_000_000_123_456);
    }

    #[test]
    fn test_rejects_other_events() {
        let event = Event::new(&TraceContext::new("00"), EventPayload::Party(Party::default()));
        assert!(matches!(
            Block::from_begin_block(&event),
            Err(BlockError::NotBeginBlock(_))
        ));
    }

    #[test]
    fn test_rejects_height_beyond_i64() {
        let event = Event::new(
            &TraceContext::new("00"),
            EventPayload::BeginBlock(BeginBlock {
                height: u64::MAX,
                ..Default::default()
            }),
        );
        assert_eq!(
            Block::from_begin_block(&event),
            Err(BlockError::HeightOutOfRange(u64::MAX))
        );
    }

    #[test]
    fn test_rejects_non_hex_trace() {
        let event = Event::new(
            &TraceContext::new("not-hex"),
            EventPayload::BeginBlock(BeginBlock::default()),
        );
        assert!(matches!(
            Block::from_begin_block(&event),
            Err(BlockError::InvalidHash { .. })
        ));
    }
}
