//! # Ports Layer
//!
//! - `outbound.rs` - Driven ports: the storage collaborators the consumer
//!   commits through. The consumer itself is the only driving surface.

pub mod outbound;

pub use outbound::*;
