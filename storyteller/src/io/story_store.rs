//! Story file load/save with schema + structure validation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::debug;

use crate::core::structure::{ROOT_DEPTH, StructurePolicy, structure_violations};
use crate::story::StoryNode;

/// JSON Schema every story file must satisfy (Draft 2020-12).
pub const STORY_SCHEMA: &str = include_str!("../../schemas/story_node.schema.json");

static STORY_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(STORY_SCHEMA).expect("story schema should be JSON");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("story schema should compile")
});

/// Why a story file was rejected.
#[derive(Debug, thiserror::Error)]
pub enum StoryFileError {
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("schema validation failed:\n- {}", .0.join("\n- "))]
    Schema(Vec<String>),
    #[error("structure violations:\n- {}", .0.join("\n- "))]
    Structure(Vec<String>),
}

impl StoryFileError {
    /// True when the file was read but its content is not a valid story.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, StoryFileError::Read { .. })
    }
}

/// Load and validate a story from disk (schema, then structure).
pub fn load_story(
    path: &Path,
    max_depth: u32,
    policy: StructurePolicy,
) -> Result<StoryNode, StoryFileError> {
    let contents = fs::read_to_string(path).map_err(|source| StoryFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&contents).map_err(|source| StoryFileError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let story = check_story(value, max_depth, policy)?;
    debug!(path = %path.display(), depth = story.depth(), "loaded story");
    Ok(story)
}

/// Validate an in-memory document and convert it.
pub fn check_story(
    value: Value,
    max_depth: u32,
    policy: StructurePolicy,
) -> Result<StoryNode, StoryFileError> {
    let messages: Vec<String> = STORY_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(StoryFileError::Schema(messages));
    }
    let violations = structure_violations(&value, ROOT_DEPTH, max_depth, policy);
    if !violations.is_empty() {
        return Err(StoryFileError::Structure(violations));
    }
    StoryNode::from_value(value).map_err(|err| StoryFileError::Schema(vec![err.to_string()]))
}

/// File name of an accepted story.
pub fn story_filename(id: &str) -> String {
    format!("story_{id}.json")
}

/// Write `story` as `<dir>/story_<id>.json` (pretty JSON, trailing newline).
pub fn write_story(dir: &Path, id: &str, story: &StoryNode) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    let path = dir.join(story_filename(id));
    let payload = story.to_pretty_json().context("serialize story")?;
    fs::write(&path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
