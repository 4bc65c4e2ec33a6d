//! Deterministic, pure logic shared by the loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod invariants;
pub mod prompt;
pub mod retry;
pub mod selector;
pub mod types;
