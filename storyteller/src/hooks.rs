//! Pre-call hooks that inspect or rewrite a request before the model sees it.

use tracing::{debug, info};

use crate::core::merge::merge_in_place;
use crate::core::types::ModelResponse;
use crate::io::model::ModelRequest;

/// Response returned instead of calling the model when a request is blocked.
pub const BLOCKED_RESPONSE: &str = "LLM call was blocked by before_model_callback.";

/// What to do after a hook ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// Continue with the (possibly rewritten) request.
    Proceed,
    /// Skip the model call and use this response instead.
    Respond(ModelResponse),
}

/// Runs before every model call. May rewrite `request` in place.
pub trait BeforeModel {
    fn name(&self) -> &'static str;
    fn before_model(&self, request: &mut ModelRequest) -> HookDecision;
}

/// Collapse all turns into one user turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeTurns;

impl BeforeModel for MergeTurns {
    fn name(&self) -> &'static str {
        "merge_turns"
    }

    fn before_model(&self, request: &mut ModelRequest) -> HookDecision {
        let before = request.turns.len();
        if merge_in_place(&mut request.turns) {
            debug!(turns = before, "merged request turns");
        }
        HookDecision::Proceed
    }
}

/// Skip the call when the last user turn contains a keyword (case-insensitive).
#[derive(Debug, Clone)]
pub struct BlockKeyword {
    keyword: String,
}

impl BlockKeyword {
    pub fn new(keyword: &str) -> Self {
        Self {
            keyword: keyword.to_uppercase(),
        }
    }
}

impl BeforeModel for BlockKeyword {
    fn name(&self) -> &'static str {
        "block_keyword"
    }

    fn before_model(&self, request: &mut ModelRequest) -> HookDecision {
        let Some(text) = request.last_user_text() else {
            return HookDecision::Proceed;
        };
        if self.keyword.is_empty() || !text.to_uppercase().contains(&self.keyword) {
            return HookDecision::Proceed;
        }
        info!(keyword = %self.keyword, "keyword found, skipping model call");
        HookDecision::Respond(ModelResponse::Present(BLOCKED_RESPONSE.to_string()))
    }
}

/// Prepend a fixed marker to the instruction.
#[derive(Debug, Clone)]
pub struct InstructionPrefix {
    prefix: String,
}

impl InstructionPrefix {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }
}

impl BeforeModel for InstructionPrefix {
    fn name(&self) -> &'static str {
        "instruction_prefix"
    }

    fn before_model(&self, request: &mut ModelRequest) -> HookDecision {
        request.instruction = format!("{}{}", self.prefix, request.instruction);
        HookDecision::Proceed
    }
}

/// Ordered hook list; the first `Respond` wins and later hooks are skipped.
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Box<dyn BeforeModel>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard chain: merge first, then the optional hooks.
    pub fn standard(block_keyword: Option<&str>, instruction_prefix: Option<&str>) -> Self {
        let mut chain = Self::new().with(MergeTurns);
        if let Some(prefix) = instruction_prefix {
            chain = chain.with(InstructionPrefix::new(prefix));
        }
        if let Some(keyword) = block_keyword {
            chain = chain.with(BlockKeyword::new(keyword));
        }
        chain
    }

    pub fn with(mut self, hook: impl BeforeModel + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    pub fn run(&self, request: &mut ModelRequest) -> HookDecision {
        for hook in &self.hooks {
            if let HookDecision::Respond(response) = hook.before_model(request) {
                debug!(hook = hook.name(), "hook answered the request");
                return HookDecision::Respond(response);
            }
        }
        HookDecision::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Turn;
    use std::time::Duration;

    fn request(turns: Vec<Turn>) -> ModelRequest {
        let mut request = ModelRequest::new("m", 1.0, Duration::from_secs(1));
        request.turns = turns;
        request
    }

    #[test]
    fn merge_hook_rewrites_and_proceeds() {
        let mut req = request(vec![Turn::user("A"), Turn::model("B")]);
        assert_eq!(MergeTurns.before_model(&mut req), HookDecision::Proceed);
        assert_eq!(req.turns, vec![Turn::user("A\nB")]);
    }

    #[test]
    fn merge_hook_leaves_empty_request_alone() {
        let mut req = request(Vec::new());
        assert_eq!(MergeTurns.before_model(&mut req), HookDecision::Proceed);
        assert!(req.turns.is_empty());
    }

    #[test]
    fn block_keyword_is_case_insensitive() {
        let hook = BlockKeyword::new("BLOCK");
        let mut req = request(vec![Turn::user("please block this")]);
        assert_eq!(
            hook.before_model(&mut req),
            HookDecision::Respond(ModelResponse::Present(BLOCKED_RESPONSE.to_string()))
        );

        let mut req = request(vec![Turn::user("open the door")]);
        assert_eq!(hook.before_model(&mut req), HookDecision::Proceed);
    }

    #[test]
    fn block_keyword_only_checks_last_user_turn() {
        let hook = BlockKeyword::new("block");
        let mut req = request(vec![Turn::user("BLOCK"), Turn::model("reply")]);
        assert_eq!(hook.before_model(&mut req), HookDecision::Proceed);
    }

    #[test]
    fn chain_merges_before_blocking() {
        let chain = HookChain::standard(Some("BLOCK"), Some("[Modified] "));
        assert_eq!(
            chain.names(),
            vec!["merge_turns", "instruction_prefix", "block_keyword"]
        );

        // The keyword sits in a model turn; after merging it is part of the
        // single user turn and blocks the call.
        let mut req = request(vec![Turn::user("start"), Turn::model("BLOCK here")]);
        req.instruction = "Write.".to_string();
        assert!(matches!(chain.run(&mut req), HookDecision::Respond(_)));
        assert_eq!(req.instruction, "[Modified] Write.");
        assert_eq!(req.turns, vec![Turn::user("start\nBLOCK here")]);
    }
}
