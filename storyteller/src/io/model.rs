//! Model abstraction for story generation.
//!
//! The [`ModelClient`] trait decouples the generators and the pipeline from
//! the actual backend (a local model CLI such as `ollama run`). Tests use
//! scripted clients that return predetermined responses without spawning
//! processes.

use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::control::RunControl;
use crate::core::types::{ModelResponse, Role, Turn};
use crate::io::process::{ProcessError, run_command_with_timeout};

/// Characters of stderr kept in [`ModelError::Failed`].
const STDERR_TAIL_CHARS: usize = 400;

/// Parameters for one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub temperature: f64,
    /// System instruction, sent ahead of the turns.
    pub instruction: String,
    pub turns: Vec<Turn>,
    pub timeout: Duration,
}

impl ModelRequest {
    pub fn new(model: impl Into<String>, temperature: f64, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            temperature,
            instruction: String::new(),
            turns: Vec::new(),
            timeout,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_turn(mut self, turn: Turn) -> Self {
        self.turns.push(turn);
        self
    }

    /// First text part of the last turn, if that turn is from the user.
    pub fn last_user_text(&self) -> Option<&str> {
        self.turns
            .last()
            .filter(|turn| turn.role == Role::User)
            .map(Turn::first_text)
    }

    /// Flatten the request into the plain-text prompt written to the process.
    pub fn prompt_text(&self) -> String {
        let mut sections = Vec::new();
        if !self.instruction.trim().is_empty() {
            sections.push(self.instruction.trim().to_string());
        }
        for turn in &self.turns {
            let text = turn
                .parts
                .iter()
                .filter(|part| !part.is_empty())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                sections.push(text);
            }
        }
        sections.join("\n\n")
    }
}

/// Why a model call produced no response.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to start model command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("model process i/o: {0}")]
    Io(String),
    #[error("model call timed out after {0:?}")]
    TimedOut(Duration),
    #[error("model command exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },
    #[error("model call cancelled")]
    Cancelled,
}

impl From<ProcessError> for ModelError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Spawn { program, source } => ModelError::Spawn { program, source },
            other => ModelError::Io(other.to_string()),
        }
    }
}

/// Abstraction over model backends.
pub trait ModelClient {
    /// Send `request` and return the raw response text (unsanitized).
    fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;
}

impl<M: ModelClient + ?Sized> ModelClient for &M {
    fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        (**self).invoke(request)
    }
}

impl<M: ModelClient + ?Sized> ModelClient for Box<M> {
    fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        (**self).invoke(request)
    }
}

/// Client that runs a local command per call, prompt on stdin, reply on stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    argv: Vec<String>,
    output_limit_bytes: usize,
    control: RunControl,
}

impl CommandModel {
    pub fn new(argv: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            output_limit_bytes,
            control: RunControl::unbounded(),
        }
    }

    /// Share a cancel flag; a cancelled control stops calls before spawning.
    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    /// The argv for `request`, with `{model}` and `{temperature}` filled in.
    pub fn render_argv(&self, request: &ModelRequest) -> Vec<String> {
        let temperature = request.temperature.to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{model}", &request.model)
                    .replace("{temperature}", &temperature)
            })
            .collect()
    }
}

impl ModelClient for CommandModel {
    #[instrument(skip_all, fields(model = %request.model, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        if self.control.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        let argv = self.render_argv(request);
        let Some((program, args)) = argv.split_first() else {
            return Err(ModelError::Io("model command is empty".to_string()));
        };
        info!(program = %program, "invoking model");

        let mut cmd = Command::new(program);
        cmd.args(args);
        let prompt = request.prompt_text();
        debug!(prompt_bytes = prompt.len(), "writing prompt");

        let output = run_command_with_timeout(
            cmd,
            Some(prompt.into_bytes()),
            request.timeout,
            self.output_limit_bytes,
        )?;

        if self.control.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "model call timed out");
            return Err(ModelError::TimedOut(request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(ModelError::Failed {
                status: output.status.code(),
                stderr: output.stderr_tail(STDERR_TAIL_CHARS),
            });
        }

        let response = ModelResponse::from_raw(output.stdout_lossy());
        debug!(
            present = response.text().is_some(),
            stdout_bytes = output.stdout.len(),
            "model call completed"
        );
        Ok(response)
    }
}
