//! Storyteller configuration stored in `storyteller.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::state::SessionScope;
use crate::core::structure::StructurePolicy;
use crate::pipeline::Stage;
use crate::retry::RetryPolicy;

/// Environment variable naming the model identifier.
pub const MODEL_ENV: &str = "STORYTELLER_MODEL";
/// Environment variable naming the output language.
pub const LANGUAGE_ENV: &str = "STORYTELLER_LANGUAGE";

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "storyteller.toml";

/// Longest accepted per-call model timeout: one day.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Storyteller configuration (TOML).
///
/// Missing fields fall back to defaults. The model identifier has no usable
/// default: it must come from the file or from [`MODEL_ENV`] before any
/// command that calls a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoryConfig {
    pub model: ModelConfig,
    pub story: StorySettings,
    pub output: OutputConfig,
    pub session: SessionScope,
    pub sanitize: SanitizeConfig,
    pub hooks: HooksConfig,
    /// Pipeline stages; empty means the built-in setting/choice_a/choice_b run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier, e.g. `llama3.1`.
    pub id: String,
    /// Argv of the model process. `{model}` and `{temperature}` are substituted
    /// in every element; the prompt is written to stdin.
    pub command: Vec<String>,
    pub temperature: f64,
    /// Per-call wall-clock limit in seconds.
    pub timeout_secs: u64,
    /// Truncate model stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            command: vec![
                "ollama".to_string(),
                "run".to_string(),
                "{model}".to_string(),
            ],
            temperature: 1.0,
            timeout_secs: 5 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorySettings {
    /// Depth of the deepest allowed leaf, root = 1.
    pub max_depth: u32,
    pub max_attempts: u32,
    pub policy: StructurePolicy,
    /// Fixed pause between attempts; 0 disables it.
    pub retry_delay_ms: u64,
    /// Language the stories are written in.
    pub language: String,
}

impl Default for StorySettings {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_attempts: 3,
            policy: StructurePolicy::Lenient,
            retry_delay_ms: 0,
            language: "English".to_string(),
        }
    }
}

impl StorySettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts).with_delay(Duration::from_millis(self.retry_delay_ms))
    }
}

/// Where artifacts are versioned before being mirrored to `output.dir`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactBackend {
    #[default]
    Memory,
    Fs,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub artifacts: ArtifactBackend,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            artifacts: ArtifactBackend::Memory,
        }
    }
}

impl OutputConfig {
    /// Root of the filesystem artifact store.
    pub fn artifact_root(&self) -> PathBuf {
        self.dir.join(".artifacts")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Literal strings removed after the built-in rules.
    pub extra_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HooksConfig {
    /// Skip the model call when the last user turn contains this keyword.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_keyword: Option<String>,
    /// Prepended to every instruction before the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction_prefix: Option<String>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            story: StorySettings::default(),
            output: OutputConfig::default(),
            session: SessionScope::default(),
            sanitize: SanitizeConfig::default(),
            hooks: HooksConfig::default(),
            stages: Vec::new(),
        }
    }
}

impl StoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if !self.model.temperature.is_finite() || self.model.temperature < 0.0 {
            return Err(anyhow!("model.temperature must be a non-negative number"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(anyhow!("model.timeout_secs must be <= {MAX_TIMEOUT_SECS}"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if self.story.max_depth == 0 {
            return Err(anyhow!("story.max_depth must be >= 1"));
        }
        if self.story.max_attempts == 0 {
            return Err(anyhow!("story.max_attempts must be >= 1"));
        }
        if self.story.language.trim().is_empty() {
            return Err(anyhow!("story.language must not be empty"));
        }
        if self.output.dir.as_os_str().is_empty() {
            return Err(anyhow!("output.dir must not be empty"));
        }
        if let Some(keyword) = &self.hooks.block_keyword
            && keyword.trim().is_empty()
        {
            return Err(anyhow!("hooks.block_keyword must not be empty when set"));
        }
        self.validate_stages()
    }

    fn validate_stages(&self) -> Result<()> {
        let mut keys = HashSet::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(anyhow!("stages[{idx}].name must not be empty"));
            }
            if stage.output_key.trim().is_empty() {
                return Err(anyhow!("stages[{idx}].output_key must not be empty"));
            }
            if !keys.insert(stage.output_key.as_str()) {
                return Err(anyhow!(
                    "stages[{idx}].output_key '{}' is used by an earlier stage",
                    stage.output_key
                ));
            }
        }
        Ok(())
    }

    /// Apply environment overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup(MODEL_ENV).filter(|value| !value.trim().is_empty()) {
            debug!(model = %model, "model id from environment");
            self.model.id = model.trim().to_string();
        }
        if let Some(language) = lookup(LANGUAGE_ENV).filter(|value| !value.trim().is_empty()) {
            debug!(language = %language, "language from environment");
            self.story.language = language.trim().to_string();
        }
    }

    /// The configured model identifier; an error if none was provided.
    pub fn model_id(&self) -> Result<&str> {
        let id = self.model.id.trim();
        if id.is_empty() {
            return Err(anyhow!(
                "no model configured: set model.id in the config file or {MODEL_ENV}"
            ));
        }
        Ok(id)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model.timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StoryConfig::default()`.
pub fn load_config(path: &Path) -> Result<StoryConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        let cfg = StoryConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StoryConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StoryConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::artifacts::ArtifactFormat;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, StoryConfig::default());
        assert!(cfg.model_id().is_err());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("storyteller.toml");
        let mut cfg = StoryConfig::default();
        cfg.model.id = "llama3.1".to_string();
        cfg.hooks.block_keyword = Some("BLOCK".to_string());
        cfg.stages.push(Stage::new("intro", "intro", "Write an intro."));
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.model_id().expect("model"), "llama3.1");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("storyteller.toml");
        fs::write(
            &path,
            r#"
[story]
max_depth = 4
policy = "exact"

[[stages]]
name = "setting"
output_key = "setting"
instruction = "Describe a place."
artifact = "text"
"#,
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.story.max_depth, 4);
        assert_eq!(cfg.story.policy, StructurePolicy::Exact);
        assert_eq!(cfg.story.max_attempts, 3);
        assert_eq!(cfg.model.command[0], "ollama");
        assert_eq!(cfg.stages[0].artifact, ArtifactFormat::Text);
    }

    #[test]
    fn rejects_duplicate_stage_keys() {
        let mut cfg = StoryConfig::default();
        cfg.stages.push(Stage::new("one", "same", "x"));
        cfg.stages.push(Stage::new("two", "same", "y"));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("output_key 'same'"));
    }

    #[test]
    fn rejects_zero_depth_and_attempts() {
        let mut cfg = StoryConfig::default();
        cfg.story.max_depth = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = StoryConfig::default();
        cfg.story.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_timeout_beyond_one_day() {
        let mut cfg = StoryConfig::default();
        cfg.model.timeout_secs = MAX_TIMEOUT_SECS;
        cfg.validate().expect("one day is accepted");
        cfg.model.timeout_secs = u64::MAX;
        let err = cfg.validate().expect_err("too large");
        assert!(err.to_string().contains("model.timeout_secs"));
    }

    #[test]
    fn env_overrides_model_and_language() {
        let mut cfg = StoryConfig::default();
        cfg.apply_env(|key| match key {
            MODEL_ENV => Some(" llama3.1 ".to_string()),
            LANGUAGE_ENV => Some("Italian".to_string()),
            _ => None,
        });
        assert_eq!(cfg.model_id().expect("model"), "llama3.1");
        assert_eq!(cfg.story.language, "Italian");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut cfg = StoryConfig::default();
        cfg.model.id = "from-file".to_string();
        cfg.apply_env(|_| Some("  ".to_string()));
        assert_eq!(cfg.model_id().expect("model"), "from-file");
        assert_eq!(cfg.story.language, "English");
    }
}
