//! Stable exit codes for storyteller CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid configuration, unreadable input, or any other failure.
pub const INVALID: i32 = 1;
/// `storyteller validate` found a structurally malformed story.
pub const MALFORMED: i32 = 2;
/// A generator used up its attempts without an acceptable response.
pub const EXHAUSTED: i32 = 3;
