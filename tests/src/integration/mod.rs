//! # Integration Scenarios

#[cfg(test)]
pub mod fixtures;

mod file_replay;
mod socket_pipeline;
