use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One point in a branching narrative.
///
/// Leaves carry only `text`. Internal nodes carry `text` plus both choices.
/// Shape rules are enforced on the raw JSON by
/// [`crate::core::structure`] before a value is converted into this type.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoryNode {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<Box<StoryNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<Box<StoryNode>>,
}

impl StoryNode {
    pub fn leaf(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            a: None,
            b: None,
        }
    }

    pub fn branch(text: impl Into<String>, a: StoryNode, b: StoryNode) -> Self {
        Self {
            text: text.into(),
            a: Some(Box::new(a)),
            b: Some(Box::new(b)),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.a.is_none() && self.b.is_none()
    }

    /// Both choices of an internal node, `None` for leaves.
    pub fn choices(&self) -> Option<(&StoryNode, &StoryNode)> {
        match (&self.a, &self.b) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }

    /// Number of levels on the longest path, counting this node as level 1.
    pub fn depth(&self) -> u32 {
        let below = [&self.a, &self.b]
            .into_iter()
            .flatten()
            .map(|child| child.depth())
            .max()
            .unwrap_or(0);
        1 + below
    }

    pub fn leaf_count(&self) -> usize {
        if self.is_leaf() {
            return 1;
        }
        [&self.a, &self.b]
            .into_iter()
            .flatten()
            .map(|child| child.leaf_count())
            .sum()
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Serialize to pretty-printed JSON with trailing newline.
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        let mut buf = serde_json::to_string_pretty(self)?;
        buf.push('\n');
        Ok(buf)
    }
}
