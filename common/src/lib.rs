//! Replicant Common Types
//!
//! This crate contains shared types used across the Replicant workspace,
//! including cluster identity, role and coordination state definitions,
//! the published primary record, and the error type.

pub mod identity;
pub mod role;
pub mod record;
pub mod error;
pub mod time;

pub use identity::*;
pub use role::*;
pub use record::*;
pub use error::*;
pub use time::*;
