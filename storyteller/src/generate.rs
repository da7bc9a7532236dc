//! Single-shot generators: a whole story tree, or one action choice.
//!
//! Both retry a bounded number of times. An attempt fails when the model call
//! fails, the response is empty after sanitizing, or (for trees) the text is
//! not JSON or breaks the structural rules. Cancellation and the run deadline
//! stop the loop immediately.

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::control::Interrupt;
use crate::core::structure::{ROOT_DEPTH, StructurePolicy, structure_violations};
use crate::core::types::Turn;
use crate::io::artifacts::ArtifactFormat;
use crate::io::model::ModelError;
use crate::io::prompt::{choice_input, render_choice_instruction, render_story_prompt};
use crate::retry::{RetryError, RetryPolicy, Retryable, retry_until};
use crate::runtime::{CallError, Runtime};
use crate::story::StoryNode;

/// Labels used for invocation ids and logs.
pub const STORY_LABEL: &str = "story_agent";
pub const CHOICE_LABEL: &str = "choice_agent";

/// Why a single attempt was rejected.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Interrupted(#[from] Interrupt),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("response is not valid JSON: {0}")]
    Parse(String),
    #[error("story structure is invalid: {}", .0.join("; "))]
    Malformed(Vec<String>),
}

impl From<CallError> for AttemptError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Interrupted(interrupt) => AttemptError::Interrupted(interrupt),
            CallError::Model(model) => AttemptError::Model(model),
        }
    }
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AttemptError::Interrupted(_) | AttemptError::Model(ModelError::Cancelled)
        )
    }
}

/// Terminal failure of a generator.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("could not generate a valid {what} after {attempts} attempts for keywords '{keywords}'")]
    Exhausted {
        what: &'static str,
        keywords: String,
        attempts: u32,
        #[source]
        last: Option<AttemptError>,
    },
    #[error("generation was cancelled")]
    Cancelled,
    #[error("generation deadline elapsed")]
    TimedOut,
    #[error("render prompt: {0}")]
    Prompt(#[from] minijinja::Error),
}

impl GenerationError {
    fn from_retry(what: &'static str, keywords: &str, err: RetryError<AttemptError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => GenerationError::Exhausted {
                what,
                keywords: keywords.to_string(),
                attempts,
                last,
            },
            RetryError::Aborted { error, .. } => match error {
                AttemptError::Interrupted(Interrupt::TimedOut) => GenerationError::TimedOut,
                _ => GenerationError::Cancelled,
            },
        }
    }
}

/// Shape and retry limits for [`generate_story`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryOptions {
    pub max_depth: u32,
    pub policy: StructurePolicy,
    pub retry: RetryPolicy,
    pub language: String,
}

impl Default for StoryOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            policy: StructurePolicy::Lenient,
            retry: RetryPolicy::default(),
            language: "English".to_string(),
        }
    }
}

/// An accepted story with the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedStory {
    pub story: StoryNode,
    pub invocation_id: String,
    pub attempts: u32,
}

/// An accepted choice with the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedChoice {
    pub text: String,
    pub invocation_id: String,
    pub attempts: u32,
}

struct Attempt<T> {
    value: T,
    invocation_id: String,
    number: u32,
}

/// Ask the model for a complete branching tree about `keywords`.
#[instrument(skip_all, fields(max_depth = options.max_depth, max_attempts = options.retry.max_attempts))]
pub fn generate_story(
    runtime: &Runtime<'_>,
    keywords: &str,
    options: &StoryOptions,
) -> Result<GeneratedStory, GenerationError> {
    info!(keywords, "generating story");
    let prompt = render_story_prompt(keywords, options.max_depth, &options.language)?;

    let accepted = retry_until(
        &options.retry,
        |number| -> Result<Attempt<Value>, AttemptError> {
            let outcome = runtime.call(
                STORY_LABEL,
                "",
                vec![Turn::user(prompt.as_str())],
                ArtifactFormat::Json,
            )?;
            let text = outcome.text.ok_or(AttemptError::EmptyResponse)?;
            let value = serde_json::from_str::<Value>(&text)
                .map_err(|err| AttemptError::Parse(err.to_string()))?;
            Ok(Attempt {
                value,
                invocation_id: outcome.invocation_id,
                number,
            })
        },
        |attempt| {
            let violations =
                structure_violations(&attempt.value, ROOT_DEPTH, options.max_depth, options.policy);
            if violations.is_empty() {
                Ok(())
            } else {
                Err(AttemptError::Malformed(violations))
            }
        },
    )
    .map_err(|err| GenerationError::from_retry("story", keywords, err))?;

    let story = StoryNode::from_value(accepted.value).map_err(|err| {
        warn!(err = %err, "validated story did not convert");
        GenerationError::Exhausted {
            what: "story",
            keywords: keywords.to_string(),
            attempts: accepted.number,
            last: Some(AttemptError::Parse(err.to_string())),
        }
    })?;
    info!(
        attempts = accepted.number,
        depth = story.depth(),
        leaves = story.leaf_count(),
        "story accepted"
    );
    Ok(GeneratedStory {
        story,
        invocation_id: accepted.invocation_id,
        attempts: accepted.number,
    })
}

/// Ask the model for one action choice that fits `keywords`.
#[instrument(skip_all, fields(max_attempts = retry.max_attempts))]
pub fn generate_choice(
    runtime: &Runtime<'_>,
    keywords: &str,
    retry: &RetryPolicy,
    language: &str,
) -> Result<GeneratedChoice, GenerationError> {
    info!(keywords, "generating choice");
    let instruction = render_choice_instruction(language)?;
    let input = choice_input(keywords);

    let accepted = retry_until(
        retry,
        |number| -> Result<Attempt<String>, AttemptError> {
            let outcome = runtime.call(
                CHOICE_LABEL,
                &instruction,
                vec![Turn::user(input.as_str())],
                ArtifactFormat::Text,
            )?;
            let text = outcome.text.ok_or(AttemptError::EmptyResponse)?;
            Ok(Attempt {
                value: text,
                invocation_id: outcome.invocation_id,
                number,
            })
        },
        |_| Ok(()),
    )
    .map_err(|err| GenerationError::from_retry("choice", keywords, err))?;

    info!(attempts = accepted.number, "choice accepted");
    Ok(GeneratedChoice {
        text: accepted.value,
        invocation_id: accepted.invocation_id,
        attempts: accepted.number,
    })
}
