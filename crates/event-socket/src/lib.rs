//! # Event Socket
//!
//! The process-boundary channel for the event stream.
//!
//! ## Wire Format
//!
//! One bincode-encoded [`event_types::BusEvent`] per frame. Frames are
//! length-delimited (`u32` big-endian) so the byte stream behaves as the
//! message-oriented channel the envelope assumes.
//!
//! ## Roles
//!
//! - [`SocketClient`]: producer side, mirrors the broker's stream.
//! - [`SocketServer`]: consumer side, a [`event_types::RawEventReceiver`]
//!   accepting exactly one connection.
//! - [`DecodingSource`]: wraps any raw source into an
//!   [`event_types::EventReceiver`], enforcing the protocol version.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod config;
pub mod connection;
pub mod decoding;
pub mod errors;
pub mod server;

pub use client::SocketClient;
pub use config::{SendFailurePolicy, SocketConfig, TransportKind};
pub use decoding::DecodingSource;
pub use errors::TransportError;
pub use server::SocketServer;
