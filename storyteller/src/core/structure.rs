//! Structural rules for branching-story documents.
//!
//! The checks run on raw JSON (not on [`crate::story::StoryNode`]) because a
//! malformed document must be rejected before typed conversion: extra fields,
//! a lone `a` without `b`, or a missing `text` all need to be visible.
//!
//! Rules, with the root at depth 1:
//! - every node is an object with a string `text`;
//! - a node with exactly one of `a`/`b` is malformed at any depth;
//! - below `max_depth`, internal nodes recurse into both children;
//! - at `max_depth` a node must be a leaf carrying `text` and nothing else.
//!
//! Below `max_depth` a leaf is accepted under [`StructurePolicy::Lenient`]
//! (branches may end early) and rejected under [`StructurePolicy::Exact`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Depth of the root node.
pub const ROOT_DEPTH: u32 = 1;

/// How leaves found before `max_depth` are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructurePolicy {
    /// Early leaves end their branch and are valid.
    #[default]
    Lenient,
    /// Every branch must reach `max_depth`.
    Exact,
}

/// Validate a whole story document starting at the root (lenient policy).
pub fn validate_story(node: &Value, max_depth: u32) -> bool {
    validate_structure(node, ROOT_DEPTH, max_depth)
}

/// Validate the subtree at `node`, which sits at `depth` (lenient policy).
pub fn validate_structure(node: &Value, depth: u32, max_depth: u32) -> bool {
    structure_violations(node, depth, max_depth, StructurePolicy::Lenient).is_empty()
}

/// Collect every violated rule under `node`.
///
/// An empty result means the document is valid. Paths name the choices taken
/// from the root, e.g. `root/a/b`.
pub fn structure_violations(
    node: &Value,
    depth: u32,
    max_depth: u32,
    policy: StructurePolicy,
) -> Vec<String> {
    let mut errors = Vec::new();
    check_node(node, depth, max_depth, policy, "root", &mut errors);
    errors
}

fn check_node(
    node: &Value,
    depth: u32,
    max_depth: u32,
    policy: StructurePolicy,
    path: &str,
    errors: &mut Vec<String>,
) {
    let Some(fields) = node.as_object() else {
        errors.push(format!("{path}: node must be a JSON object"));
        return;
    };

    match fields.get("text") {
        Some(Value::String(_)) => {}
        Some(_) => errors.push(format!("{path}: 'text' must be a string")),
        None => errors.push(format!("{path}: missing 'text'")),
    }

    let a = fields.get("a");
    let b = fields.get("b");

    if depth >= max_depth {
        if a.is_some() || b.is_some() {
            errors.push(format!(
                "{path}: depth {depth} reached max depth {max_depth}, node must be a leaf"
            ));
        } else if fields.len() != 1 {
            errors.push(format!(
                "{path}: leaf at max depth may only carry 'text' (found {})",
                extra_fields(fields).join(", ")
            ));
        }
        return;
    }

    match (a, b) {
        (None, None) => {
            if policy == StructurePolicy::Exact {
                errors.push(format!(
                    "{path}: leaf at depth {depth} ends before max depth {max_depth}"
                ));
            }
        }
        (Some(a), Some(b)) => {
            check_node(a, depth + 1, max_depth, policy, &format!("{path}/a"), errors);
            check_node(b, depth + 1, max_depth, policy, &format!("{path}/b"), errors);
        }
        _ => errors.push(format!("{path}: internal node must carry both 'a' and 'b'")),
    }
}

fn extra_fields(fields: &Map<String, Value>) -> Vec<String> {
    fields
        .keys()
        .filter(|key| key.as_str() != "text")
        .map(|key| format!("'{key}'"))
        .collect()
}
