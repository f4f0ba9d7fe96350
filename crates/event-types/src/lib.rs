//! # Event Types Crate
//!
//! This crate contains the event model that every broker component agrees on:
//! the event taxonomy, the payloads, the trace context an event is stamped
//! with, the wire envelope used across process boundaries and the source
//! traits consumers read from.
//!
//! ## Design Principles
//!
//! - **Opaque payloads**: the broker never interprets an [`EventPayload`]; it
//!   only reads the [`EventType`] derived from it.
//! - **Sequence once**: an [`Event`]'s sequence is assigned exactly once by the
//!   sequence generator, after which the event is shared read-only.
//! - **Versioned envelope**: every [`BusEvent`] carries [`PROTOCOL_VERSION`];
//!   readers reject any other version.

pub mod context;
pub mod entities;
pub mod envelope;
pub mod errors;
pub mod event;
pub mod payloads;
pub mod source;
pub mod types;

pub use context::TraceContext;
pub use entities::Block;
pub use envelope::{BusEvent, PROTOCOL_VERSION};
pub use errors::{BlockError, EnvelopeError, SourceError};
pub use event::{Event, EventBatch};
pub use payloads::*;
pub use source::{EventReceiver, EventStream, RawEventReceiver, RawEventStream};
pub use types::EventType;
