//! Easel Core - Foundational types for the Easel generation engine
//!
//! This crate provides the types the other Easel crates depend on:
//! - `RequestId`, `UnitId` - Request and unit identifiers
//! - `ContentHash` - SHA-256 based content hashing for published assets
//! - Error types and Result alias

mod error;
mod hash;
mod id;

pub use error::{EaselError, Result};
pub use hash::ContentHash;
pub use id::{RequestId, UnitId};
