//! Test utilities and helpers for VeilNode
//!
//! Fixtures for clients on a shared in-memory store plus timeout helpers for
//! feeds and background tasks.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
