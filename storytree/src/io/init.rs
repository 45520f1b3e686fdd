//! Initialization helpers for `.storytree/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::Draft;
use serde_json::Value;

use crate::core::invariants::validate_invariants;
use crate::io::config::{StoryConfig, write_config};
use crate::io::state::StoredState;
use crate::tree::Forest;

pub const STATE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/story_tree/v1.schema.json"
));

/// All canonical paths within `.storytree/` for a project root.
#[derive(Debug, Clone)]
pub struct StoryPaths {
    pub root: PathBuf,
    pub story_dir: PathBuf,
    pub state_dir: PathBuf,
    pub blobs_dir: PathBuf,
    pub config_path: PathBuf,
    pub schema_path: PathBuf,
}

impl StoryPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let story_dir = root.join(".storytree");
        let state_dir = story_dir.join("state");
        let blobs_dir = state_dir.join("blobs");
        Self {
            root,
            story_dir: story_dir.clone(),
            state_dir: state_dir.clone(),
            blobs_dir,
            config_path: state_dir.join("config.toml"),
            schema_path: state_dir.join("schema.json"),
        }
    }
}

/// Options for `init_story`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing tool-owned files.
    pub force: bool,
}

/// Create `.storytree/` scaffolding in `root`.
///
/// Fails if `.storytree/` already exists unless `options.force` is set.
pub fn init_story(root: &Path, options: &InitOptions) -> Result<StoryPaths> {
    let paths = StoryPaths::new(root);
    if paths.story_dir.exists() && !options.force {
        return Err(anyhow!(
            "storytree init: .storytree already exists (use --force to overwrite)"
        ));
    }
    if paths.story_dir.exists() && !paths.story_dir.is_dir() {
        return Err(anyhow!(
            "storytree init: .storytree exists but is not a directory"
        ));
    }

    for dir in [&paths.story_dir, &paths.state_dir, &paths.blobs_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    fs::write(&paths.schema_path, STATE_SCHEMA)
        .with_context(|| format!("write schema {}", paths.schema_path.display()))?;
    write_config(&paths.config_path, &StoryConfig::default())?;

    Ok(paths)
}

/// Parse and validate a persisted blob: schema conformance + invariants.
///
/// Returns the parsed state on success, or an error describing violations.
pub fn validate_blob(blob: &Value, schema_raw: &str) -> Result<StoredState> {
    let schema_json: Value = serde_json::from_str(schema_raw).context("parse schema json")?;
    validate_schema(blob, &schema_json)?;
    let state = StoredState::from_blob(blob)?;
    let forest = Forest::new(state.tasks.clone());
    let errors = validate_invariants(&forest);
    if !errors.is_empty() {
        return Err(anyhow!("invariant violations:\n- {}", errors.join("\n- ")));
    }
    Ok(state)
}

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "schema validation failed:\n- {}",
            messages.join("\n- ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{InitOptions, STATE_SCHEMA, init_story, validate_blob};
    use crate::io::state::StoredState;
    use crate::test_support::{task, with_children};

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_story(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.story_dir.is_dir());
        assert!(paths.state_dir.is_dir());
        assert!(paths.blobs_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert!(paths.schema_path.is_file());
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_story(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_story(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn default_state_passes_schema_and_invariants() {
        let blob = StoredState::default().to_blob().expect("blob");
        validate_blob(&blob, STATE_SCHEMA).expect("validate");
    }

    #[test]
    fn duplicate_ids_fail_validation() {
        let state = StoredState {
            tasks: vec![with_children(task(1, "a"), vec![task(1, "dup")])],
            ..StoredState::default()
        };
        let blob = state.to_blob().expect("blob");
        let err = validate_blob(&blob, STATE_SCHEMA).unwrap_err();
        assert!(err.to_string().contains("duplicate id"));
    }

    #[test]
    fn unknown_fields_fail_the_schema() {
        let blob = serde_json::json!({ "tasks": [], "extra": true });
        let err = validate_blob(&blob, STATE_SCHEMA).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }
}
