//! Test-only builders and scripted model doubles.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::core::types::ModelResponse;
use crate::io::model::{ModelClient, ModelError, ModelRequest};
use crate::story::StoryNode;

/// Build a complete tree with `levels` levels (root = level 1).
///
/// Node text is the path from the root, e.g. `root/a/b`.
pub fn full_story(levels: u32) -> StoryNode {
    build("root".to_string(), levels.max(1))
}

fn build(path: String, levels: u32) -> StoryNode {
    if levels <= 1 {
        return StoryNode::leaf(path);
    }
    let a = build(format!("{path}/a"), levels - 1);
    let b = build(format!("{path}/b"), levels - 1);
    StoryNode::branch(path, a, b)
}

/// Model double that replays queued outcomes in order and records requests.
///
/// Once the script is exhausted every further call returns
/// [`ModelResponse::Absent`].
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: RefCell<VecDeque<Result<ModelResponse, ModelError>>>,
    requests: RefCell<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw text; whitespace-only text replays as an absent response.
    pub fn then_text(self, text: &str) -> Self {
        self.script
            .borrow_mut()
            .push_back(Ok(ModelResponse::from_raw(text)));
        self
    }

    pub fn then_absent(self) -> Self {
        self.script.borrow_mut().push_back(Ok(ModelResponse::Absent));
        self
    }

    pub fn then_error(self, error: ModelError) -> Self {
        self.script.borrow_mut().push_back(Err(error));
        self
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl ModelClient for ScriptedModel {
    fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.borrow_mut().push(request.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(ModelResponse::Absent))
    }
}

/// Model double that echoes the merged prompt back, prefixed with `prefix`.
///
/// Useful for checking exactly what a stage sent to the model.
#[derive(Debug)]
pub struct EchoModel {
    prefix: String,
    requests: RefCell<Vec<ModelRequest>>,
}

impl EchoModel {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.borrow().clone()
    }
}

impl ModelClient for EchoModel {
    fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.borrow_mut().push(request.clone());
        let body = request
            .turns
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("|");
        Ok(ModelResponse::from_raw(format!("{}{}", self.prefix, body)))
    }
}
