//! # Event Bus
//!
//! The in-process event broker.
//!
//! ## Responsibilities
//!
//! - Stamp every event with its per-trace sequence ([`SequenceGenerator`]).
//! - Own subscriber identity and type routing ([`SubscriberRegistry`]).
//! - Fan batches out through one dispatch worker per event type.
//! - Mirror the sequenced stream to a socket and/or a file when streaming.
//!
//! ## Delivery Guarantees
//!
//! | Subscriber | Blocking | Loss | Order |
//! |------------|----------|------|-------|
//! | Required   | May stall its type's worker | Never | Submission order per type |
//! | Optional   | Never more than the fallback window | Under load | Never inverted |

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod broker;
pub mod config;
pub mod delivery;
mod dispatch;
pub mod errors;
pub mod registry;
pub mod sequence;
pub mod stats;
pub mod subscriber;

pub use broker::Broker;
pub use config::{BrokerConfig, FileConfig};
pub use delivery::{DeliveryOutcome, OptionalDelivery, FALLBACK_TIMEOUT};
pub use errors::BrokerError;
pub use registry::SubscriberRegistry;
pub use sequence::{SequenceGenerator, MAX_TRACKED_TRACES};
pub use stats::{BrokerStats, StatsSnapshot};
pub use subscriber::{
    ChannelSubscriber, OptionalSubscriber, RequiredSubscriber, SubscriberBase, SubscriberId,
    SubscriberMeta, Subscription,
};
