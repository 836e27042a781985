//! Wire types for the workflow engine's external-task API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::value::VarValue;

/// A unit of work claimed from the task queue.
///
/// Produced by a successful fetch-and-lock call; the claim stays valid until
/// the queue's lock duration elapses or the task is completed or failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Opaque task id, unique per claim.
    pub id: String,
    /// Variable bag attached to the task.
    #[serde(default)]
    pub variables: HashMap<String, TaskVariable>,
    /// Id of the BPMN activity the task belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    /// Engine-assigned retry count. Absent until a retry count has been
    /// written for the task, which is distinct from zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i64>,
    /// Tenant the task belongs to, used as the caller identity for
    /// permission checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Error recorded by the queue for a previous attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Task {
    /// The caller identity for Directory permission checks.
    pub fn tenant(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or_default()
    }
}

/// One task variable: a value plus the engine's declared type tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskVariable {
    /// The engine's type tag. Informational; the value itself is authoritative.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    /// The variable value.
    pub value: VarValue,
}

impl TaskVariable {
    /// An untagged variable holding `value`.
    pub fn new(value: VarValue) -> Self {
        Self { value_type: None, value }
    }
}

/// A completion output: the task variable written back on `complete`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    /// Name of the output variable.
    pub name: String,
    /// The command document carrying the populated `outputs` mapping.
    pub value: crate::types::command::CommandRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_fetched_task() {
        let json = r#"{
            "id": "t1",
            "variables": {"payload": {"type": "String", "value": "{}"}},
            "activityId": "SendCommand",
            "retries": null,
            "tenantId": "user-1"
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id, "t1");
        assert_eq!(task.retries, None);
        assert_eq!(task.tenant(), "user-1");
        assert_eq!(
            task.variables["payload"].value,
            VarValue::String("{}".into())
        );
    }

    #[test]
    fn missing_optional_fields_default() {
        let task: Task = serde_json::from_str(r#"{"id": "t2"}"#).unwrap();
        assert!(task.variables.is_empty());
        assert_eq!(task.retries, None);
        assert_eq!(task.tenant(), "");
        assert_eq!(task.error_message, None);
    }

    #[test]
    fn retry_count_round_trips() {
        let task: Task = serde_json::from_str(r#"{"id": "t3", "retries": 1}"#).unwrap();
        assert_eq!(task.retries, Some(1));
    }

    #[test]
    fn variable_type_tag_is_optional() {
        let var: TaskVariable = serde_json::from_str(r#"{"value": 5}"#).unwrap();
        assert_eq!(var.value_type, None);
        assert_eq!(var.value, VarValue::Int(5));
    }
}
