//! One model call with its surrounding hooks, as used by every agent.
//!
//! A call runs: stop checks → pre-call hooks → model → sanitizer → artifact
//! writer. The generators and the pipeline stages all go through
//! [`Runtime::call`], so they share the same request shaping and persistence.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::control::{Interrupt, RunControl};
use crate::core::invocation::InvocationIds;
use crate::core::sanitize::Sanitizer;
use crate::core::state::SessionScope;
use crate::core::types::{ModelResponse, Turn};
use crate::hooks::{HookChain, HookDecision};
use crate::io::artifacts::{ArtifactFormat, ArtifactReceipt, ArtifactWriter};
use crate::io::model::{ModelClient, ModelError, ModelRequest};

/// Model parameters shared by every call of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f64,
    /// Ceiling for a single call; the run deadline may shorten it.
    pub timeout: Duration,
}

impl ModelSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 1.0,
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Result of one call that reached (or was answered in place of) the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub invocation_id: String,
    /// Sanitized text; `None` when the model answered with nothing usable.
    pub text: Option<String>,
    /// True when a hook answered instead of the model.
    pub answered_by_hook: bool,
    pub receipt: Option<ArtifactReceipt>,
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Interrupted(#[from] Interrupt),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Collaborators for the model calls of one run.
pub struct Runtime<'a> {
    client: &'a dyn ModelClient,
    settings: ModelSettings,
    hooks: HookChain,
    sanitizer: Sanitizer,
    writer: ArtifactWriter,
    ids: InvocationIds,
    control: RunControl,
}

impl<'a> Runtime<'a> {
    /// Runtime with the standard hooks, default sanitizer, no artifact store,
    /// and no deadline.
    pub fn new(client: &'a dyn ModelClient, settings: ModelSettings) -> Self {
        Self {
            client,
            settings,
            hooks: HookChain::standard(None, None),
            sanitizer: Sanitizer::default(),
            writer: ArtifactWriter::new(None, "output"),
            ids: InvocationIds::new(SessionScope::default(), ""),
            control: RunControl::unbounded(),
        }
    }

    pub fn with_hooks(mut self, hooks: HookChain) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_writer(mut self, writer: ArtifactWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_ids(mut self, ids: InvocationIds) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn writer(&self) -> &ArtifactWriter {
        &self.writer
    }

    /// Run one call labelled `label` (stage or generator name).
    #[instrument(skip_all, fields(label = %label, model = %self.settings.model))]
    pub fn call(
        &self,
        label: &str,
        instruction: &str,
        turns: Vec<Turn>,
        artifact: ArtifactFormat,
    ) -> Result<CallOutcome, CallError> {
        let timeout = self.control.budget(self.settings.timeout)?;
        let invocation_id = self.ids.next(label);

        let mut request = ModelRequest::new(
            self.settings.model.clone(),
            self.settings.temperature,
            timeout,
        )
        .with_instruction(instruction);
        request.turns = turns;

        let (response, answered_by_hook) = match self.hooks.run(&mut request) {
            HookDecision::Respond(response) => (response, true),
            HookDecision::Proceed => match self.client.invoke(&request) {
                Ok(response) => (response, false),
                // The budget was cut short by the run deadline, so the run
                // timed out rather than the model.
                Err(ModelError::TimedOut(_)) if timeout < self.settings.timeout => {
                    warn!(budget = ?timeout, "run deadline elapsed during model call");
                    return Err(Interrupt::TimedOut.into());
                }
                Err(err) => return Err(err.into()),
            },
        };

        let text = match response {
            ModelResponse::Present(raw) => {
                let cleaned = self.sanitizer.clean(&raw);
                (!cleaned.is_empty()).then_some(cleaned)
            }
            ModelResponse::Absent => None,
        };

        let receipt = match &text {
            Some(text) => self.writer.write(artifact, &invocation_id, text),
            None => {
                debug!("no text in response, nothing to save");
                None
            }
        };
        info!(
            invocation_id = %invocation_id,
            present = text.is_some(),
            answered_by_hook,
            "model call finished"
        );

        Ok(CallOutcome {
            invocation_id,
            text,
            answered_by_hook,
            receipt,
        })
    }
}
