//! # Broker Node
//!
//! Runtime wiring for the two sides of the event stream.
//!
//! | Mode | Pipeline |
//! |------|----------|
//! | `core` | [`Heartbeat`] ─▶ `Broker` ─▶ socket and/or file mirror |
//! | `datanode` | socket or replay ─▶ buffer ─▶ decode ─▶ fan-out ─▶ [`DataNode`] consumer |
//!
//! Configuration comes from `BROKER_*` environment variables layered over
//! component defaults (see [`config`]).

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod consumer;
pub mod logging;
pub mod producer;

pub use config::{load_config, ConfigError, Mode, NodeConfig};
pub use consumer::{DataNode, DataNodeError, DataNodeExit};
pub use logging::{init_logging, LogConfig, LoggingError};
pub use producer::{Heartbeat, ProducerError, ProducerExit};
