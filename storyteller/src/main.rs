//! Storyteller CLI.
//!
//! Generates branching text adventures with a local language model, runs the
//! multi-stage story pipeline, and validates story files.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use storyteller::core::control::RunControl;
use storyteller::core::invocation::InvocationIds;
use storyteller::core::sanitize::Sanitizer;
use storyteller::core::structure::StructurePolicy;
use storyteller::exit_codes;
use storyteller::generate::{GenerationError, StoryOptions, generate_choice, generate_story};
use storyteller::hooks::HookChain;
use storyteller::io::artifacts::{
    ArtifactStore, ArtifactWriter, FsArtifactStore, InMemoryArtifactStore,
};
use storyteller::io::config::{
    ArtifactBackend, DEFAULT_CONFIG_FILE, StoryConfig, load_config, write_config,
};
use storyteller::io::model::CommandModel;
use storyteller::io::story_store::{load_story, write_story};
use storyteller::logging;
use storyteller::pipeline::{Pipeline, default_stages};
use storyteller::runtime::{ModelSettings, Runtime};

#[derive(Parser)]
#[command(
    name = "storyteller",
    version,
    about = "Co-author branching text adventures with a local language model"
)]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Generate a complete story tree and save it as `story_<id>.json`.
    Generate {
        /// Keywords the story is about, e.g. "haunted castle, treasure".
        keywords: String,
        #[arg(long)]
        max_depth: Option<u32>,
        #[arg(long)]
        attempts: Option<u32>,
        /// Require every branch to reach the maximum depth.
        #[arg(long)]
        exact: bool,
    },
    /// Generate one action choice and print it.
    Choice {
        keywords: String,
        #[arg(long)]
        attempts: Option<u32>,
    },
    /// Run the configured stages over an input and print the final state.
    Pipeline {
        input: String,
        /// Deadline for the whole run.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Check a story file against the schema and structure rules.
    Validate {
        file: PathBuf,
        #[arg(long)]
        max_depth: Option<u32>,
        #[arg(long)]
        exact: bool,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Generate {
            keywords,
            max_depth,
            attempts,
            exact,
        } => {
            let mut cfg = load_effective_config(&cli.config)?;
            override_story(&mut cfg, max_depth, attempts, exact)?;
            cmd_generate(&cfg, &keywords)
        }
        Command::Choice { keywords, attempts } => {
            let mut cfg = load_effective_config(&cli.config)?;
            override_story(&mut cfg, None, attempts, false)?;
            cmd_choice(&cfg, &keywords)
        }
        Command::Pipeline {
            input,
            timeout_secs,
        } => {
            let cfg = load_effective_config(&cli.config)?;
            cmd_pipeline(&cfg, &input, timeout_secs.map(Duration::from_secs))
        }
        Command::Validate {
            file,
            max_depth,
            exact,
        } => {
            let mut cfg = load_effective_config(&cli.config)?;
            override_story(&mut cfg, max_depth, None, exact)?;
            cmd_validate(&cfg, &file)
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &StoryConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_generate(cfg: &StoryConfig, keywords: &str) -> Result<i32> {
    let model = command_model(cfg, RunControl::unbounded());
    let runtime = build_runtime(cfg, &model, RunControl::unbounded())?;
    let options = StoryOptions {
        max_depth: cfg.story.max_depth,
        policy: cfg.story.policy,
        retry: cfg.story.retry_policy(),
        language: cfg.story.language.clone(),
    };
    match generate_story(&runtime, keywords, &options) {
        Ok(generated) => {
            let path = write_story(&cfg.output.dir, &generated.invocation_id, &generated.story)?;
            info!(path = %path.display(), attempts = generated.attempts, "story saved");
            println!("{}", path.display());
            Ok(exit_codes::OK)
        }
        Err(err) => generation_failed(err),
    }
}

fn cmd_choice(cfg: &StoryConfig, keywords: &str) -> Result<i32> {
    let model = command_model(cfg, RunControl::unbounded());
    let runtime = build_runtime(cfg, &model, RunControl::unbounded())?;
    match generate_choice(
        &runtime,
        keywords,
        &cfg.story.retry_policy(),
        &cfg.story.language,
    ) {
        Ok(choice) => {
            println!("{}", choice.text);
            Ok(exit_codes::OK)
        }
        Err(err) => generation_failed(err),
    }
}

fn cmd_pipeline(cfg: &StoryConfig, input: &str, timeout: Option<Duration>) -> Result<i32> {
    let control = match timeout {
        Some(timeout) => RunControl::with_timeout(timeout),
        None => RunControl::unbounded(),
    };
    let model = command_model(cfg, control.clone());
    let runtime = build_runtime(cfg, &model, control)?;

    let stages = if cfg.stages.is_empty() {
        default_stages()
    } else {
        cfg.stages.clone()
    };
    let pipeline = Pipeline::new(stages)?.with_language(&cfg.story.language);
    let state = pipeline
        .run(&runtime, input, cfg.session.clone())
        .context("pipeline run failed")?;

    let mut payload = serde_json::to_string_pretty(&state).context("serialize pipeline state")?;
    payload.push('\n');
    print!("{payload}");
    Ok(exit_codes::OK)
}

fn cmd_validate(cfg: &StoryConfig, file: &Path) -> Result<i32> {
    match load_story(file, cfg.story.max_depth, cfg.story.policy) {
        Ok(story) => {
            println!(
                "{}: ok (depth {}, {} endings)",
                file.display(),
                story.depth(),
                story.leaf_count()
            );
            Ok(exit_codes::OK)
        }
        Err(err) if err.is_malformed() => {
            eprintln!("{}: {err}", file.display());
            Ok(exit_codes::MALFORMED)
        }
        Err(err) => Err(err.into()),
    }
}

fn generation_failed(err: GenerationError) -> Result<i32> {
    match err {
        GenerationError::Exhausted { .. } => {
            eprintln!("{:#}", anyhow::Error::new(err));
            Ok(exit_codes::EXHAUSTED)
        }
        other => Err(other.into()),
    }
}

fn load_effective_config(path: &Path) -> Result<StoryConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env(|key| std::env::var(key).ok());
    cfg.validate().context("invalid config after environment overrides")?;
    Ok(cfg)
}

/// Apply command-line story flags and re-check the result.
fn override_story(
    cfg: &mut StoryConfig,
    max_depth: Option<u32>,
    attempts: Option<u32>,
    exact: bool,
) -> Result<()> {
    if let Some(max_depth) = max_depth {
        cfg.story.max_depth = max_depth;
    }
    if let Some(attempts) = attempts {
        cfg.story.max_attempts = attempts;
    }
    if exact {
        cfg.story.policy = StructurePolicy::Exact;
    }
    cfg.validate().context("invalid command-line options")
}

fn command_model(cfg: &StoryConfig, control: RunControl) -> CommandModel {
    CommandModel::new(cfg.model.command.clone(), cfg.model.output_limit_bytes).with_control(control)
}

fn build_runtime<'a>(
    cfg: &StoryConfig,
    model: &'a CommandModel,
    control: RunControl,
) -> Result<Runtime<'a>> {
    let mut settings = ModelSettings::new(cfg.model_id()?);
    settings.temperature = cfg.model.temperature;
    settings.timeout = cfg.model_timeout();

    let store: Option<Box<dyn ArtifactStore>> = match cfg.output.artifacts {
        ArtifactBackend::Memory => Some(Box::new(InMemoryArtifactStore::new())),
        ArtifactBackend::Fs => Some(Box::new(FsArtifactStore::new(cfg.output.artifact_root()))),
        ArtifactBackend::None => None,
    };
    debug!(backend = ?cfg.output.artifacts, dir = %cfg.output.dir.display(), "artifact store");

    let hooks = HookChain::standard(
        cfg.hooks.block_keyword.as_deref(),
        cfg.hooks.instruction_prefix.as_deref(),
    );
    Ok(Runtime::new(model, settings)
        .with_hooks(hooks)
        .with_sanitizer(Sanitizer::default().with_literals(&cfg.sanitize.extra_prefixes))
        .with_writer(ArtifactWriter::new(store, &cfg.output.dir))
        .with_ids(InvocationIds::new(cfg.session.clone(), run_salt()))
        .with_control(control))
}

/// Distinguishes invocation ids of separate CLI runs with the same scope.
fn run_salt() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["storyteller", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_generate_with_overrides() {
        let cli = Cli::parse_from([
            "storyteller",
            "generate",
            "haunted castle, treasure",
            "--max-depth",
            "4",
            "--exact",
            "--config",
            "alt.toml",
        ]);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        let Command::Generate {
            keywords,
            max_depth,
            attempts,
            exact,
        } = cli.command
        else {
            panic!("expected generate");
        };
        assert_eq!(keywords, "haunted castle, treasure");
        assert_eq!(max_depth, Some(4));
        assert_eq!(attempts, None);
        assert!(exact);
    }

    #[test]
    fn parse_pipeline_timeout() {
        let cli = Cli::parse_from([
            "storyteller",
            "pipeline",
            "a ruined tower",
            "--timeout-secs",
            "30",
        ]);
        assert!(matches!(
            cli.command,
            Command::Pipeline { timeout_secs: Some(30), .. }
        ));
    }

    #[test]
    fn override_story_applies_flags() {
        let mut cfg = StoryConfig::default();
        override_story(&mut cfg, Some(5), Some(2), true).expect("override");
        assert_eq!(cfg.story.max_depth, 5);
        assert_eq!(cfg.story.max_attempts, 2);
        assert_eq!(cfg.story.policy, StructurePolicy::Exact);

        let mut cfg = StoryConfig::default();
        override_story(&mut cfg, None, None, false).expect("override");
        assert_eq!(cfg, StoryConfig::default());

        let mut cfg = StoryConfig::default();
        assert!(override_story(&mut cfg, Some(0), None, false).is_err());
    }

    #[test]
    fn runtime_requires_model_id() {
        let cfg = StoryConfig::default();
        let model = command_model(&cfg, RunControl::unbounded());
        let err = build_runtime(&cfg, &model, RunControl::unbounded())
            .err()
            .expect("missing model id");
        assert!(err.to_string().contains("no model configured"));
    }
}
