//! Fixed, ordered multi-stage pipeline over shared keyed state.
//!
//! Every stage sees the run's initial input plus every value recorded by the
//! stages before it, makes one model call, and records the sanitized answer
//! under its own output key. A failed stage stops the run; values recorded by
//! earlier stages stay in the state for inspection.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::control::Interrupt;
use crate::core::state::{DuplicateKey, PipelineState, SessionScope};
use crate::core::types::Turn;
use crate::io::artifacts::ArtifactFormat;
use crate::io::model::ModelError;
use crate::io::prompt::{
    CHOICE_A_INSTRUCTION, CHOICE_B_INSTRUCTION, SETTING_INSTRUCTION, render_instruction,
};
use crate::runtime::{CallError, Runtime};

/// One unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// State key the answer is recorded under.
    pub output_key: String,
    /// minijinja template; sees `language`, `input`, and `state`.
    pub instruction: String,
    #[serde(default)]
    pub artifact: ArtifactFormat,
}

impl Stage {
    pub fn new(name: &str, output_key: &str, instruction: &str) -> Self {
        Self {
            name: name.to_string(),
            output_key: output_key.to_string(),
            instruction: instruction.to_string(),
            artifact: ArtifactFormat::default(),
        }
    }

    pub fn with_artifact(mut self, artifact: ArtifactFormat) -> Self {
        self.artifact = artifact;
        self
    }
}

/// The built-in `setting` → `choice_a` → `choice_b` stages.
pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new("setting_agent", "setting", SETTING_INSTRUCTION),
        Stage::new("choice_a_agent", "choice_a", CHOICE_A_INSTRUCTION)
            .with_artifact(ArtifactFormat::Text),
        Stage::new("choice_b_agent", "choice_b", CHOICE_B_INSTRUCTION)
            .with_artifact(ArtifactFormat::Text),
    ]
}

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Idle,
    /// Stage `i` is next (or executing).
    Running(usize),
    Done,
    /// Stage `i` failed; later stages never ran.
    Failed(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("stage '{stage}': {source}")]
    Model {
        stage: String,
        #[source]
        source: ModelError,
    },
    #[error("stage '{stage}': model returned no usable text")]
    EmptyResponse { stage: String },
    #[error("run cancelled before stage '{stage}'")]
    Cancelled { stage: String },
    #[error("run deadline elapsed before stage '{stage}'")]
    TimedOut { stage: String },
    #[error("stage '{stage}': render instruction: {source}")]
    Render {
        stage: String,
        #[source]
        source: minijinja::Error,
    },
    #[error(transparent)]
    DuplicateKey(#[from] DuplicateKey),
    #[error("a pipeline needs at least one stage")]
    NoStages,
}

impl PipelineError {
    fn from_call(stage: &str, err: CallError) -> Self {
        let stage = stage.to_string();
        match err {
            CallError::Interrupted(Interrupt::Cancelled) | CallError::Model(ModelError::Cancelled) => {
                PipelineError::Cancelled { stage }
            }
            CallError::Interrupted(Interrupt::TimedOut) => PipelineError::TimedOut { stage },
            CallError::Model(source) => PipelineError::Model { stage, source },
        }
    }
}

/// Validated, immutable stage list.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
    language: String,
}

impl Pipeline {
    /// Rejects an empty list and output keys used by more than one stage.
    pub fn new(stages: Vec<Stage>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        let mut keys = HashSet::new();
        for stage in &stages {
            if !keys.insert(stage.output_key.as_str()) {
                return Err(DuplicateKey(stage.output_key.clone()).into());
            }
        }
        Ok(Self {
            stages,
            language: "English".to_string(),
        })
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// A fresh run over `input` with empty state.
    pub fn start(&self, input: &str, scope: SessionScope) -> PipelineRun<'_> {
        PipelineRun {
            pipeline: self,
            input: input.to_string(),
            state: PipelineState::new(scope),
            status: PipelineStatus::Idle,
        }
    }

    /// Run every stage over `input` and return the final state.
    pub fn run(
        &self,
        runtime: &Runtime<'_>,
        input: &str,
        scope: SessionScope,
    ) -> Result<PipelineState, PipelineError> {
        let mut run = self.start(input, scope);
        run.run_to_end(runtime)?;
        Ok(run.into_state())
    }
}

/// One execution of a [`Pipeline`].
#[derive(Debug)]
pub struct PipelineRun<'p> {
    pipeline: &'p Pipeline,
    input: String,
    state: PipelineState,
    status: PipelineStatus,
}

impl PipelineRun<'_> {
    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn into_state(self) -> PipelineState {
        self.state
    }

    /// Execute the next stage. Returns `Ok(true)` while stages remain.
    ///
    /// A finished or failed run is left unchanged and returns `Ok(false)`.
    #[instrument(skip_all, fields(status = ?self.status))]
    pub fn step(&mut self, runtime: &Runtime<'_>) -> Result<bool, PipelineError> {
        let index = match self.status {
            PipelineStatus::Idle => 0,
            PipelineStatus::Running(index) => index,
            PipelineStatus::Done | PipelineStatus::Failed(_) => return Ok(false),
        };
        self.status = PipelineStatus::Running(index);

        let pipeline = self.pipeline;
        let stage = &pipeline.stages[index];
        if let Err(err) = self.execute(runtime, stage) {
            warn!(stage = %stage.name, err = %err, "stage failed");
            self.status = PipelineStatus::Failed(index);
            return Err(err);
        }

        let next = index + 1;
        if next < pipeline.stages.len() {
            self.status = PipelineStatus::Running(next);
            Ok(true)
        } else {
            self.status = PipelineStatus::Done;
            info!(keys = ?self.state.keys(), "pipeline done");
            Ok(false)
        }
    }

    /// Step until the run is done or a stage fails.
    pub fn run_to_end(&mut self, runtime: &Runtime<'_>) -> Result<&PipelineState, PipelineError> {
        while self.step(runtime)? {}
        Ok(&self.state)
    }

    /// Initial input first, then every recorded value in insertion order.
    fn request_turns(&self) -> Vec<Turn> {
        let mut turns = vec![Turn::user(self.input.as_str())];
        turns.extend(self.state.iter().map(|(_, value)| Turn::model(value)));
        turns
    }

    fn execute(&mut self, runtime: &Runtime<'_>, stage: &Stage) -> Result<(), PipelineError> {
        info!(stage = %stage.name, output_key = %stage.output_key, "running stage");
        let instruction = render_instruction(
            &stage.instruction,
            &self.pipeline.language,
            &self.input,
            &self.state,
        )
        .map_err(|source| PipelineError::Render {
            stage: stage.name.clone(),
            source,
        })?;

        let outcome = runtime
            .call(&stage.name, &instruction, self.request_turns(), stage.artifact)
            .map_err(|err| PipelineError::from_call(&stage.name, err))?;
        let text = outcome.text.ok_or_else(|| PipelineError::EmptyResponse {
            stage: stage.name.clone(),
        })?;
        self.state.record(stage.output_key.as_str(), text)?;
        Ok(())
    }
}
