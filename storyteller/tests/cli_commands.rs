//! CLI tests for `storyteller` commands.
//!
//! Spawns the binary in a temp directory and checks exit codes and the files
//! each command leaves behind.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use storyteller::exit_codes;
use storyteller::io::config::{
    DEFAULT_CONFIG_FILE, MODEL_ENV, StoryConfig, load_config, write_config,
};
use storyteller::io::story_store::write_story;
use storyteller::test_support::full_story;

fn storyteller(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_storyteller"))
        .current_dir(dir)
        .env_remove(MODEL_ENV)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("run storyteller")
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = storyteller(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let cfg = load_config(&temp.path().join(DEFAULT_CONFIG_FILE)).expect("load");
    assert_eq!(cfg, StoryConfig::default());

    let output = storyteller(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let output = storyteller(temp.path(), &["init", "--force"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[test]
fn validate_accepts_well_formed_story() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_story(temp.path(), "good", &full_story(3)).expect("write");
    let output = storyteller(temp.path(), &["validate", path.to_str().expect("utf-8")]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("depth 3, 4 endings"), "{stdout}");
}

#[test]
fn validate_reports_malformed_story() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_story(temp.path(), "deep", &full_story(4)).expect("write");
    let output = storyteller(temp.path(), &["validate", "story_deep.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::MALFORMED));

    // Deep enough once the limit is raised.
    let output = storyteller(
        temp.path(),
        &["validate", "story_deep.json", "--max-depth", "4"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    fs::write(temp.path().join("broken.json"), "{\"text\": ").expect("write");
    let output = storyteller(temp.path(), &["validate", "broken.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::MALFORMED));
}

#[test]
fn validate_missing_file_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = storyteller(temp.path(), &["validate", "missing.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn generate_without_model_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = storyteller(temp.path(), &["generate", "haunted castle"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(MODEL_ENV), "{stderr}");
}

#[cfg(unix)]
fn config_with_command(dir: &Path, script: &str, max_attempts: u32) {
    let mut cfg = StoryConfig::default();
    cfg.model.id = "scripted".to_string();
    cfg.model.command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    cfg.story.max_attempts = max_attempts;
    write_config(&dir.join(DEFAULT_CONFIG_FILE), &cfg).expect("write config");
}

#[cfg(unix)]
#[test]
fn generate_saves_accepted_story() {
    let temp = tempfile::tempdir().expect("tempdir");
    let story = serde_json::to_string(&full_story(3)).expect("serialize");
    config_with_command(
        temp.path(),
        &format!("cat >/dev/null; printf '%s' '```json\n{story}\n```'"),
        3,
    );

    let output = storyteller(temp.path(), &["generate", "haunted castle"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let printed = String::from_utf8_lossy(&output.stdout).trim().to_string();
    assert!(printed.contains("story_"), "{printed}");
    let saved = temp.path().join(&printed);
    let loaded: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(saved).expect("read story")).expect("json");
    assert_eq!(loaded["a"]["b"]["text"], "root/a/b");

    // The raw response is mirrored under output/ as well.
    let mirrored = fs::read_dir(temp.path().join("output"))
        .expect("output dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("story_response_"))
        .count();
    assert_eq!(mirrored, 1);
}

#[cfg(unix)]
#[test]
fn generate_exhaustion_exits_with_exhausted_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    config_with_command(temp.path(), "cat >/dev/null; echo 'not a story'", 2);

    let output = storyteller(temp.path(), &["generate", "dragons"]);
    assert_eq!(output.status.code(), Some(exit_codes::EXHAUSTED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("after 2 attempts"), "{stderr}");
    assert!(stderr.contains("'dragons'"), "{stderr}");
}

#[cfg(unix)]
#[test]
fn pipeline_prints_state_in_stage_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    config_with_command(
        temp.path(),
        "cat >/dev/null; echo 'Story_Agent: the gate opens'",
        1,
    );

    let output = storyteller(temp.path(), &["pipeline", "a ruined tower"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let setting = stdout.find("\"setting\"").expect("setting key");
    let choice_a = stdout.find("\"choice_a\"").expect("choice_a key");
    let choice_b = stdout.find("\"choice_b\"").expect("choice_b key");
    assert!(setting < choice_a && choice_a < choice_b, "{stdout}");
    assert!(!stdout.contains("Story_Agent"), "{stdout}");
}
