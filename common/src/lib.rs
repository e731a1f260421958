//! Ratefeed Common Types
//!
//! Shared types for the ratefeed workspace: normalized asset symbols,
//! per-asset source configuration and rate tables.

pub mod asset;
pub mod rate;

pub use asset::*;
pub use rate::*;
