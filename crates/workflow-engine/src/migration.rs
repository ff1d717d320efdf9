//! One-way forward migrations of persisted workflow descriptions
//!
//! Each migration step is a pure byte-stream transform rewriting specific
//! fields of one format version and nothing else. The update-needed checks
//! are cheap pre-checks over the parsed file, and they are
//! idempotence-aware: running them against an already-migrated stream
//! returns `false`. A failing transform leaves the original untouched.

use crate::error::{EngineError, Result};
use crate::persistence::WorkflowFile;

/// Version written by the current engine
pub const CURRENT_WORKFLOW_VERSION: i32 = 1;

/// Version assumed for files without a version field
pub const INITIAL_WORKFLOW_VERSION: i32 = 0;

/// Identifier of the script component whose configuration the 0→1 migration
/// rewrites
pub const SCRIPT_COMPONENT_ID: &str = "calyx.components.script";

/// Configuration key rewritten by the 0→1 migration
pub const SCRIPT_INSTALLATION_KEY: &str = "pythonInstallation";

/// Placeholder the script installation path is deferred to since version 1
pub const SCRIPT_INSTALLATION_PLACEHOLDER: &str = "${pathPlaceholder}";

/// Bring a persisted workflow description up to the current format version
///
/// Applies every migration step at or above `from_version` in order; later
/// steps see the output of earlier ones.
pub fn update_workflow_description(bytes: &[u8], from_version: i32) -> Result<Vec<u8>> {
    let mut current = bytes.to_vec();
    if from_version <= 0 {
        current = update_from_version_0_to_1(&current)?;
    }
    Ok(current)
}

/// Check whether the given persisted workflow is incompatible with the
/// current format version
pub fn is_update_needed(bytes: &[u8], from_version: i32) -> Result<bool> {
    if from_version <= 0 && is_update_needed_from_version_0_to_1(bytes)? {
        return Ok(true);
    }
    Ok(false)
}

fn parse(bytes: &[u8]) -> Result<WorkflowFile> {
    serde_json::from_slice(bytes).map_err(|error| EngineError::Parse(error.to_string()))
}

fn version_of(file: &WorkflowFile) -> Result<i32> {
    file.workflow_version
        .parse::<i32>()
        .map_err(|error| EngineError::Parse(format!("invalid workflow version: {}", error)))
}

/// Version 0 stored the script component's installation path as a literal
/// configuration value; version 1 defers it to a placeholder resolved at
/// launch time
fn update_from_version_0_to_1(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut file = parse(bytes)?;

    for node in &mut file.nodes {
        if node.component.identifier == SCRIPT_COMPONENT_ID {
            let configuration = node.configuration.get_or_insert_with(Default::default);
            configuration.insert(
                SCRIPT_INSTALLATION_KEY.to_string(),
                serde_json::Value::String(SCRIPT_INSTALLATION_PLACEHOLDER.to_string()),
            );
        }
    }
    file.workflow_version = "1".to_string();

    Ok(serde_json::to_vec_pretty(&file)?)
}

fn is_update_needed_from_version_0_to_1(bytes: &[u8]) -> Result<bool> {
    let file = parse(bytes)?;
    if version_of(&file)? >= 1 {
        return Ok(false);
    }
    Ok(file
        .nodes
        .iter()
        .any(|node| node.component.identifier == SCRIPT_COMPONENT_ID))
}
