//! Deterministic, pure logic shared by the decision engine and the bridge.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod decision;
pub mod patterns;
pub mod seen_cache;
pub mod types;
pub mod verdict;
pub mod window;
