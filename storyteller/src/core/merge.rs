//! Collapse a multi-turn request into one synthesized user turn.
//!
//! The model backends only reliably attend to a single turn, so every prior
//! turn's text is concatenated (in order, newline-separated) before dispatch.

use crate::core::types::{Role, Turn};

/// Separator placed between merged text parts.
pub const MERGE_SEPARATOR: &str = "\n";

/// Result of [`merge_turns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing to merge; forward the request unchanged.
    PassThrough,
    /// The single turn that replaces the whole sequence.
    Merged(Turn),
}

/// Merge every non-empty text part of `turns` into one `user` turn.
pub fn merge_turns(turns: &[Turn]) -> MergeOutcome {
    let texts: Vec<&str> = turns
        .iter()
        .flat_map(|turn| turn.parts.iter())
        .map(String::as_str)
        .filter(|text| !text.is_empty())
        .collect();
    if texts.is_empty() {
        return MergeOutcome::PassThrough;
    }
    MergeOutcome::Merged(Turn::new(Role::User, texts.join(MERGE_SEPARATOR)))
}

/// Apply [`merge_turns`] in place. Returns true if `turns` was rewritten.
pub fn merge_in_place(turns: &mut Vec<Turn>) -> bool {
    match merge_turns(turns) {
        MergeOutcome::PassThrough => false,
        MergeOutcome::Merged(turn) => {
            turns.clear();
            turns.push(turn);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_passes_through() {
        assert_eq!(merge_turns(&[]), MergeOutcome::PassThrough);
    }

    #[test]
    fn empty_text_passes_through() {
        let turns = vec![Turn::user(""), Turn::new(Role::Model, "")];
        assert_eq!(merge_turns(&turns), MergeOutcome::PassThrough);
    }

    #[test]
    fn merges_in_order_with_newline() {
        let turns = vec![Turn::user("A"), Turn::model("B")];
        assert_eq!(
            merge_turns(&turns),
            MergeOutcome::Merged(Turn::user("A\nB"))
        );
    }

    #[test]
    fn skips_empty_parts_inside_turns() {
        let turns = vec![
            Turn {
                role: Role::System,
                parts: vec!["rules".to_string(), String::new(), "more".to_string()],
            },
            Turn::user(""),
            Turn::model("reply"),
        ];
        let MergeOutcome::Merged(turn) = merge_turns(&turns) else {
            panic!("expected merge");
        };
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.parts, vec!["rules\nmore\nreply".to_string()]);
    }

    #[test]
    fn merge_in_place_rewrites_request() {
        let mut turns = vec![Turn::user("A"), Turn::model("B")];
        assert!(merge_in_place(&mut turns));
        assert_eq!(turns, vec![Turn::user("A\nB")]);

        let mut empty: Vec<Turn> = Vec::new();
        assert!(!merge_in_place(&mut empty));
        assert!(empty.is_empty());
    }
}
