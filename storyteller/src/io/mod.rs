//! Side-effecting collaborators: model processes, artifact stores, config,
//! prompt templates, and story files.

pub mod artifacts;
pub mod config;
pub mod model;
pub mod process;
pub mod prompt;
pub mod story_store;
