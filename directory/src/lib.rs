//! Replicant Name Directory
//!
//! The directory maps a cluster's well-known primary name to the address of
//! the node currently acting as primary. Every mutation is conditional:
//! claims bind only if the name is absent, already held by the caller, or
//! held by an address the caller explicitly expects to replace.

pub mod directory;
pub mod memory;
pub mod postgres;
pub mod timed;

pub use directory::{ClaimMode, NameDirectory};
pub use memory::InMemoryDirectory;
pub use postgres::PgDirectory;
pub use timed::TimedDirectory;
