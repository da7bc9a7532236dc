//! Prompt rendering for the generators and pipeline stages.

use minijinja::{Environment, UndefinedBehavior, Value, context};
use tracing::debug;

use crate::core::state::PipelineState;
use crate::story::StoryNode;

const STORY_TREE_TEMPLATE: &str = include_str!("prompts/story_tree.md");
const CHOICE_TEMPLATE: &str = include_str!("prompts/choice.md");

/// Built-in stage instructions, by stage name.
pub const SETTING_INSTRUCTION: &str = include_str!("prompts/stage_setting.md");
pub const CHOICE_A_INSTRUCTION: &str = include_str!("prompts/stage_choice_a.md");
pub const CHOICE_B_INSTRUCTION: &str = include_str!("prompts/stage_choice_b.md");

/// Deepest skeleton embedded in the story prompt; deeper trees rely on the
/// level rule alone.
const MAX_SKELETON_DEPTH: u32 = 4;

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        // Unknown state keys must fail the render.
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template("story_tree", STORY_TREE_TEMPLATE)
            .expect("story_tree template should be valid");
        env.add_template("choice", CHOICE_TEMPLATE)
            .expect("choice template should be valid");
        Self { env }
    }
}

/// Prompt asking for a complete branching tree about `keywords`.
pub fn render_story_prompt(
    keywords: &str,
    max_depth: u32,
    language: &str,
) -> Result<String, minijinja::Error> {
    let engine = PromptEngine::new();
    let template = engine.env.get_template("story_tree")?;
    let rendered = template.render(context! {
        keywords => keywords.trim(),
        max_depth => max_depth,
        language => language,
        skeleton => skeleton(max_depth),
    })?;
    debug!(bytes = rendered.len(), "rendered story prompt");
    Ok(rendered)
}

/// System instruction of the single-choice generator.
pub fn render_choice_instruction(language: &str) -> Result<String, minijinja::Error> {
    let engine = PromptEngine::new();
    let template = engine.env.get_template("choice")?;
    template.render(context! { language => language })
}

/// User input of the single-choice generator.
pub fn choice_input(keywords: &str) -> String {
    format!("Context: {}. Generate a choice.", keywords.trim())
}

/// Render a stage instruction template.
///
/// Templates see `language`, `input` (the run's initial user text) and
/// `state`, the values recorded by earlier stages (`{{ state.setting }}`).
/// Referencing a key that is not recorded yet is an error.
pub fn render_instruction(
    template: &str,
    language: &str,
    input: &str,
    state: &PipelineState,
) -> Result<String, minijinja::Error> {
    let engine = PromptEngine::new();
    let rendered = engine.env.render_str(
        template,
        context! {
            language => language,
            input => input,
            state => Value::from_serialize(state),
        },
    )?;
    Ok(rendered.trim().to_string())
}

/// A full tree of `...` placeholders, pretty-printed, or `None` past
/// [`MAX_SKELETON_DEPTH`].
fn skeleton(max_depth: u32) -> Option<String> {
    if max_depth == 0 || max_depth > MAX_SKELETON_DEPTH {
        return None;
    }
    let node = placeholder_tree(max_depth);
    serde_json::to_string_pretty(&node).ok()
}

fn placeholder_tree(levels: u32) -> StoryNode {
    if levels <= 1 {
        return StoryNode::leaf("...");
    }
    StoryNode::branch(
        "...",
        placeholder_tree(levels - 1),
        placeholder_tree(levels - 1),
    )
}
