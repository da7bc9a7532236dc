//! Sequential language-model pipeline that co-authors branching text adventures.
//!
//! A story is a binary tree: every internal node carries a paragraph plus two
//! mutually exclusive choices (`a` and `b`), every leaf is an ending. The crate
//! keeps the same separation throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (structure validation, sanitizing,
//!   turn merging, pipeline state). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (model processes, artifact stores,
//!   configuration, prompt templates, story files).
//!
//! Orchestration modules ([`runtime`], [`pipeline`], [`generate`]) wire core
//! logic to the collaborators to implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod generate;
pub mod hooks;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod runtime;
pub mod story;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
