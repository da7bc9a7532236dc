//! Pipeline runs end to end against scripted models and real artifact stores.

use std::fs;
use std::time::Duration;

use storyteller::core::control::RunControl;
use storyteller::core::invocation::InvocationIds;
use storyteller::core::state::SessionScope;
use storyteller::io::artifacts::{
    ArtifactFormat, ArtifactStore, ArtifactWriter, FsArtifactStore, JSON_CONTENT_TYPE,
};
use storyteller::io::model::ModelError;
use storyteller::pipeline::{Pipeline, PipelineError, PipelineStatus, Stage, default_stages};
use storyteller::runtime::{ModelSettings, Runtime};
use storyteller::test_support::ScriptedModel;

fn scope() -> SessionScope {
    SessionScope {
        app_name: "story_app".to_string(),
        user_id: "reader".to_string(),
        session_id: "lifecycle".to_string(),
    }
}

#[test]
fn default_stages_persist_every_answer() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output_dir = temp.path().join("output");
    let store_root = output_dir.join(".artifacts");

    let model = ScriptedModel::new()
        .then_text("```json\n{\"place\": \"a flooded crypt\"}\n```")
        .then_text("Story_Agent: Swim toward the faint light")
        .then_text("Climb the collapsed stairs");
    let writer = ArtifactWriter::new(
        Some(Box::new(FsArtifactStore::new(&store_root))),
        &output_dir,
    );
    let runtime = Runtime::new(&model, ModelSettings::new("llama3.1"))
        .with_writer(writer)
        .with_ids(InvocationIds::new(scope(), "fixed"));

    let pipeline = Pipeline::new(default_stages()).expect("pipeline");
    let state = pipeline
        .run(&runtime, "a crypt under the chapel", scope())
        .expect("run");

    assert_eq!(state.keys(), vec!["setting", "choice_a", "choice_b"]);
    assert_eq!(state.get("setting"), Some("{\"place\": \"a flooded crypt\"}"));
    assert_eq!(state.get("choice_a"), Some("Swim toward the faint light"));

    // One JSON artifact for the setting, text artifacts for both choices.
    let mut mirrored: Vec<String> = fs::read_dir(&output_dir)
        .expect("output dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("story_response_"))
        .collect();
    mirrored.sort();
    assert_eq!(mirrored.len(), 3);
    assert_eq!(mirrored.iter().filter(|name| name.ends_with(".json")).count(), 1);
    assert_eq!(mirrored.iter().filter(|name| name.ends_with(".txt")).count(), 2);

    let json_name = mirrored
        .iter()
        .find(|name| name.ends_with(".json"))
        .expect("json artifact");
    let store = FsArtifactStore::new(&store_root);
    let stored = store.load(json_name, 0).expect("load").expect("version 0");
    assert_eq!(stored.content_type, JSON_CONTENT_TYPE);
    let mirrored_bytes = fs::read(output_dir.join(json_name)).expect("read mirror");
    assert_eq!(stored.bytes, mirrored_bytes);
}

#[test]
fn later_stages_see_earlier_answers() {
    let model = ScriptedModel::new()
        .then_text("a foggy harbor")
        .then_text("Board the ghost ship")
        .then_text("Follow the lighthouse keeper");
    let runtime = Runtime::new(&model, ModelSettings::new("m"));
    let pipeline = Pipeline::new(default_stages())
        .expect("pipeline")
        .with_language("French");
    pipeline.run(&runtime, "harbor", scope()).expect("run");

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    // Hooks merge everything into one user turn before the call.
    assert_eq!(
        requests[2].turns[0].first_text(),
        "harbor\na foggy harbor\nBoard the ghost ship"
    );
    assert!(requests[2].instruction.contains("Board the ghost ship"));
    assert!(requests[0].instruction.contains("French"));
}

#[test]
fn failed_stage_keeps_earlier_state() {
    let model = ScriptedModel::new()
        .then_text("a salt mine")
        .then_error(ModelError::Failed {
            status: Some(1),
            stderr: "model not found".to_string(),
        });
    let runtime = Runtime::new(&model, ModelSettings::new("m"));
    let pipeline = Pipeline::new(default_stages()).expect("pipeline");

    let mut run = pipeline.start("mine", scope());
    assert!(run.step(&runtime).expect("setting stage"));
    let err = run.step(&runtime).unwrap_err();
    assert!(matches!(err, PipelineError::Model { ref stage, .. } if stage == "choice_a_agent"));
    assert_eq!(run.status(), PipelineStatus::Failed(1));
    assert_eq!(run.state().get("setting"), Some("a salt mine"));
    assert!(!run.state().contains("choice_a"));

    // A failed run stays failed.
    assert!(!run.step(&runtime).expect("terminal"));
    assert_eq!(model.calls(), 2);
}

#[test]
fn elapsed_deadline_stops_before_first_call() {
    let model = ScriptedModel::new().then_text("never used");
    let runtime = Runtime::new(&model, ModelSettings::new("m"))
        .with_control(RunControl::with_timeout(Duration::ZERO));
    let pipeline = Pipeline::new(vec![
        Stage::new("only", "only", "Say something.").with_artifact(ArtifactFormat::None),
    ])
    .expect("pipeline");

    let err = pipeline.run(&runtime, "go", scope()).unwrap_err();
    assert!(matches!(err, PipelineError::TimedOut { .. }));
    assert_eq!(model.calls(), 0);
}
