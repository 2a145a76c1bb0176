//! services/api/src/lib.rs
//!
//! Library half of the `api` service: store adapters, the session sweeper and
//! the HTTP layer. The binaries in `src/bin/` wire these together.

pub mod adapters;
pub mod config;
pub mod error;
pub mod sweeper;
pub mod web;
