//! # Event Broker Test Suite
//!
//! Cross-crate scenarios that run the producer and consumer sides together.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs        # Shared config and block builders
//!     ├── socket_pipeline.rs # Broker -> socket -> buffer -> fan-out -> store
//!     └── file_replay.rs     # Broker file mirror -> replay -> store
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p broker-tests
//! cargo test -p broker-tests integration::socket_pipeline::
//! ```

pub mod integration;
