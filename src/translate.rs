//! Turns a locked task into a command request.
//!
//! The process definition carries the base command as a JSON document in
//! the `payload` variable. Additional task variables named `inputs.<path>`
//! override single values inside that document through the parameter
//! overlay; an override that does not fit is logged and skipped so that one
//! stray parameter never blocks an otherwise valid command.

use tracing::warn;

use crate::error::ExecutionError;
use crate::overlay::overlay;
use crate::types::command::CommandRequest;
use crate::types::task::Task;

/// Task variable holding the JSON command document.
pub const PAYLOAD_VARIABLE: &str = "payload";

/// Prefix marking task variables that overlay single command inputs.
pub const INPUT_PREFIX: &str = "inputs.";

/// Extracts the command request from `task`, applying input overlays.
///
/// Fails with [`ExecutionError::MalformedTask`] when the payload variable
/// is missing, is not a string, or does not parse as JSON.
pub fn to_command_request(task: &Task) -> Result<CommandRequest, ExecutionError> {
    let payload = task
        .variables
        .get(PAYLOAD_VARIABLE)
        .ok_or_else(|| ExecutionError::MalformedTask {
            detail: format!("no '{PAYLOAD_VARIABLE}' variable"),
        })?;
    let text = payload.value.as_str().ok_or_else(|| ExecutionError::MalformedTask {
        detail: format!(
            "'{PAYLOAD_VARIABLE}' variable is {}, not a string",
            payload.value.type_name()
        ),
    })?;
    let mut request: CommandRequest =
        serde_json::from_str(text).map_err(|e| ExecutionError::MalformedTask {
            detail: format!("'{PAYLOAD_VARIABLE}' variable does not parse: {e}"),
        })?;

    for (name, variable) in &task.variables {
        let Some(path) = name.strip_prefix(INPUT_PREFIX) else { continue };
        if path.is_empty() {
            continue;
        }
        if let Err(error) = overlay(&mut request.inputs, path, &variable.value) {
            warn!(task_id = %task.id, parameter = %name, %error, "skipping overlay parameter");
        }
    }
    Ok(request)
}
