//! Deterministic, pure logic shared by the pipeline and the generators.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod control;
pub mod invocation;
pub mod merge;
pub mod sanitize;
pub mod state;
pub mod structure;
pub mod types;
