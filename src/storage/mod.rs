//! State Storage Module
//!
//! In-process state shared by the dispatcher, the worker pool and the index service.
//!
//! ## Core Concepts
//! - **TTL**: Every entry carries its own expiry; expired entries are invisible to reads.
//! - **Results**: `ResultStore` keeps task records and write-once task results.
//! - **Leases**: `LockManager` grants exclusive, expiring claims keyed by task or dataset id.

pub mod lease;
pub mod memory;
pub mod results;

#[cfg(test)]
mod tests;
