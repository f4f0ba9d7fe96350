//! # Event Taxonomy
//!
//! The fixed set of event types the broker routes on, plus the `All`
//! wildcard used by subscribers interested in everything.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event types for subscription routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    /// Wildcard: matches every concrete type. Never carried by an event.
    All,
    /// Block time moved forward.
    TimeUpdate,
    /// A block started processing.
    BeginBlock,
    /// A block finished processing.
    EndBlock,
    /// The chain is about to stop for a protocol upgrade.
    ProtocolUpgradeStarted,
    /// The producer took a state snapshot.
    CoreSnapshot,
    /// Party created or updated.
    Party,
    /// Asset created or updated.
    Asset,
    /// Account balance changed.
    Account,
    /// Order created or updated.
    Order,
    /// Trade executed.
    Trade,
    /// Governance proposal created or updated.
    Proposal,
    /// Governance vote cast.
    Vote,
    /// Transfer between parties.
    Transfer,
    /// Batched ledger movements.
    LedgerMovements,
    /// A transaction was rejected.
    TxError,
}

impl EventType {
    /// Every concrete (non-wildcard) event type.
    pub const CONCRETE: [EventType; 15] = [
        EventType::TimeUpdate,
        EventType::BeginBlock,
        EventType::EndBlock,
        EventType::ProtocolUpgradeStarted,
        EventType::CoreSnapshot,
        EventType::Party,
        EventType::Asset,
        EventType::Account,
        EventType::Order,
        EventType::Trade,
        EventType::Proposal,
        EventType::Vote,
        EventType::Transfer,
        EventType::LedgerMovements,
        EventType::TxError,
    ];

    /// Returns true for the `All` wildcard.
    #[must_use]
    pub fn is_wildcard(self) -> bool {
        self == EventType::All
    }

    /// Expand a subscriber's declared interest into concrete types.
    ///
    /// An empty list, or any list containing `All`, means every type.
    #[must_use]
    pub fn expand(declared: &[EventType]) -> Vec<EventType> {
        if declared.is_empty() || declared.contains(&EventType::All) {
            return Self::CONCRETE.to_vec();
        }
        let mut types = declared.to_vec();
        types.sort();
        types.dedup();
        types
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
