//! # SQL Store Broker
//!
//! The block-transactional consumer at the end of the data-node pipeline.
//!
//! ## Guarantees
//!
//! | Property | How |
//! |----------|-----|
//! | One transaction per block | Opened on `BeginBlock`, committed on `EndBlock` |
//! | Resumable | Blocks at or below the store's last block are skipped |
//! | No silent loss | A block more than one past the last commit is fatal |
//! | Clean upgrade stop | `ProtocolUpgradeStarted` commits and returns `Ok(())` |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `ports/` - Outbound port traits (transactions, blocks, subscribers)
//! - `adapters/` - In-memory implementations of those ports
//! - `service/` - The consumer itself

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod config;
pub mod errors;
pub mod ports;
pub mod service;

pub use config::SqlStoreConfig;
pub use errors::{SqlStoreError, StoreError};
pub use ports::{
    BlockCommittedHook, BlockStore, ProtocolUpgradeHandler, SqlBrokerSubscriber,
    TransactionManager,
};
pub use service::SqlStoreBroker;
