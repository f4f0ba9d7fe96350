//! # Event Buffer
//!
//! Everything that puts the event stream on disk or splits it.
//!
//! ## File Formats
//!
//! | Variant | Record | Written by | Read by |
//! |---------|--------|------------|---------|
//! | Sequenced | `[len: u32][seq: u64][envelope]` | [`BufferedEventSource`] | [`BufferedEventSource`] |
//! | Plain | `[len: u32][envelope]` | [`FileSink`] | [`BufferFilesEventSource`] |
//!
//! All integers are big-endian. Envelopes are [`event_types::BusEvent`]s.
//!
//! ## Sources
//!
//! - [`BufferedEventSource`]: durable write-ahead buffer over a raw source.
//! - [`BufferFilesEventSource`]: paced replay of recorded files.
//! - [`FanOutEventSource`]: one upstream, N identical consumers, with
//!   sequence validation.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod archive;
pub mod buffered;
pub mod config;
pub mod errors;
pub mod fanout;
pub mod files;
pub mod record;
pub mod replay;
pub mod sink;

pub use archive::Archiver;
pub use buffered::BufferedEventSource;
pub use config::{BufferConfig, ReplayConfig};
pub use errors::BufferError;
pub use fanout::{FanOutEventSource, SequenceValidator};
pub use replay::BufferFilesEventSource;
pub use sink::FileSink;
