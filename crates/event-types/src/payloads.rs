//! # Event Payloads
//!
//! The tagged union of everything an event can carry. The broker treats these
//! as opaque; only the block markers are read by the transactional consumer.

use serde::{Deserialize, Serialize};

use crate::types::EventType;

// =============================================================================
// BLOCK MARKERS
// =============================================================================

/// Start of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginBlock {
    /// Block height.
    pub height: u64,
    /// Block time, Unix nanoseconds.
    pub timestamp: i64,
    /// Hex-encoded block hash.
    pub hash: String,
}

/// End of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndBlock {
    /// Block height.
    pub height: u64,
}

/// Block time update, Unix nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeUpdate {
    pub timestamp: i64,
}

/// The producer stops after `last_block_height` to upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolUpgradeStarted {
    pub last_block_height: u64,
}

/// A state snapshot was taken at the given block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreSnapshot {
    pub block_height: u64,
    pub block_hash: String,
    pub protocol_version: String,
}

// =============================================================================
// BUSINESS ENTITIES
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub decimals: u32,
}

/// Account balances are decimal strings; the broker never does arithmetic on them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub owner: String,
    pub asset: String,
    pub balance: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[default]
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    Active,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub market_id: String,
    pub party_id: String,
    pub side: Side,
    pub price: u64,
    pub size: u64,
    pub remaining: u64,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub market_id: String,
    pub buyer: String,
    pub seller: String,
    pub price: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub party_id: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: String,
    pub party_id: String,
    pub approve: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub from: String,
    pub to: String,
    pub asset: String,
    pub amount: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMovement {
    pub from_account: String,
    pub to_account: String,
    pub amount: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxError {
    pub party_id: String,
    pub error: String,
}

// =============================================================================
// PAYLOAD UNION
// =============================================================================

/// Everything an event can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    TimeUpdate(TimeUpdate),
    BeginBlock(BeginBlock),
    EndBlock(EndBlock),
    ProtocolUpgradeStarted(ProtocolUpgradeStarted),
    CoreSnapshot(CoreSnapshot),
    Party(Party),
    Asset(Asset),
    Account(Account),
    Order(Order),
    Trade(Trade),
    Proposal(Proposal),
    Vote(Vote),
    Transfer(Transfer),
    /// One physical event standing for one logical event per movement.
    LedgerMovements(Vec<LedgerMovement>),
    TxError(TxError),
}

impl EventPayload {
    /// Get the routing type of this payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TimeUpdate(_) => EventType::TimeUpdate,
            Self::BeginBlock(_) => EventType::BeginBlock,
            Self::EndBlock(_) => EventType::EndBlock,
            Self::ProtocolUpgradeStarted(_) => EventType::ProtocolUpgradeStarted,
            Self::CoreSnapshot(_) => EventType::CoreSnapshot,
            Self::Party(_) => EventType::Party,
            Self::Asset(_) => EventType::Asset,
            Self::Account(_) => EventType::Account,
            Self::Order(_) => EventType::Order,
            Self::Trade(_) => EventType::Trade,
            Self::Proposal(_) => EventType::Proposal,
            Self::Vote(_) => EventType::Vote,
            Self::Transfer(_) => EventType::Transfer,
            Self::LedgerMovements(_) => EventType::LedgerMovements,
            Self::TxError(_) => EventType::TxError,
        }
    }

    /// Number of sequence slots this payload reserves.
    #[must_use]
    pub fn composite_count(&self) -> u64 {
        match self {
            Self::LedgerMovements(movements) => (movements.len() as u64).max(1),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_type_mapping() {
        let payload = EventPayload::Trade(Trade::default());
        assert_eq!(payload.event_type(), EventType::Trade);

        let payload = EventPayload::BeginBlock(BeginBlock::default());
        assert_eq!(payload.event_type(), EventType::BeginBlock);
    }

    #[test]
    fn test_composite_count() {
        assert_eq!(EventPayload::Party(Party::default()).composite_count(), 1);
        assert_eq!(EventPayload::LedgerMovements(vec![]).composite_count(), 1);

        let movements = vec![LedgerMovement::default(); 3];
        assert_eq!(EventPayload::LedgerMovements(movements).composite_count(), 3);
    }
}
