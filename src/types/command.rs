//! The command document exchanged between process models and this worker.

use serde::{Deserialize, Serialize};

use crate::types::value::VarMap;

/// The decoded intent of a task: which device/service to invoke and with
/// what inputs.
///
/// Carried as a JSON string in the task's `payload` variable on the way in,
/// and written back as the completion output with `outputs` populated on the
/// way out. The field names are fixed by the deployed process models and
/// protocol handlers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandRequest {
    /// Target device instance id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_id: String,
    /// Target service id on that device.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_id: String,
    /// Input values keyed by declared service input name.
    #[serde(default, skip_serializing_if = "VarMap::is_empty")]
    pub inputs: VarMap,
    /// Output values keyed by declared service output name; populated only
    /// on the response side.
    #[serde(default, skip_serializing_if = "VarMap::is_empty")]
    pub outputs: VarMap,
    /// Error text attached by a protocol handler, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_msg: String,
}

impl CommandRequest {
    /// A response document carrying only `outputs`.
    pub fn from_outputs(outputs: VarMap) -> Self {
        Self { outputs, ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::value::VarValue;

    #[test]
    fn parses_the_payload_document() {
        let req: CommandRequest = serde_json::from_str(
            r#"{"instance_id":"d1","service_id":"s1","inputs":{"color":"red"}}"#,
        )
        .unwrap();
        assert_eq!(req.instance_id, "d1");
        assert_eq!(req.service_id, "s1");
        assert_eq!(req.inputs["color"], VarValue::String("red".into()));
        assert!(req.outputs.is_empty());
    }

    #[test]
    fn empty_members_are_omitted_on_the_wire() {
        let req = CommandRequest {
            instance_id: "d1".into(),
            service_id: "s1".into(),
            ..CommandRequest::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"instance_id": "d1", "service_id": "s1"})
        );
    }

    #[test]
    fn response_document_keeps_only_outputs() {
        let doc = CommandRequest::from_outputs(VarMap::from([(
            "temperature".to_string(),
            VarValue::Float(21.5),
        )]));
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json, serde_json::json!({"outputs": {"temperature": 21.5}}));
    }
}
