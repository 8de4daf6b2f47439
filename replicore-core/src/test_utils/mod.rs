//! Test utilities and helpers for Replicore
//!
//! Fixtures, scripted sandboxes and storage doubles shared by unit tests,
//! integration tests and benches.

pub mod assertions;
pub mod fixtures;
pub mod sandboxes;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
