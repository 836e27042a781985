//! Device and service metadata as served by the Directory.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A resolved device instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceMetadata {
    /// Device instance id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Device endpoint template; may contain `{{name}}` placeholders
    /// resolved from [`DeviceMetadata::config`].
    #[serde(default)]
    pub url: String,
    /// Device-level configuration entries.
    #[serde(default)]
    pub config: Vec<ConfigEntry>,
}

/// One device configuration entry, substituted into URL templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigEntry {
    /// Placeholder name.
    pub name: String,
    /// Substituted value.
    pub value: String,
}

/// A resolved service offered by a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceMetadata {
    /// Service id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Service endpoint template, same placeholder rules as the device URL.
    #[serde(default)]
    pub url: String,
    /// Protocol routing metadata.
    #[serde(default)]
    pub protocol: ProtocolMetadata,
    /// Declared input fields.
    #[serde(default)]
    pub inputs: Vec<FieldSpec>,
    /// Declared output fields.
    #[serde(default)]
    pub outputs: Vec<FieldSpec>,
}

/// How commands for a service reach their protocol handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProtocolMetadata {
    /// Protocol id.
    #[serde(default)]
    pub id: String,
    /// Broker topic of the protocol handler. Empty means the service is not
    /// routable and commands for it must be rejected.
    #[serde(default)]
    pub handler_topic: String,
}

/// One declared service input or output field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    /// Task-facing field name (key in the command document).
    pub name: String,
    /// Declared value type.
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    /// Declared wire format.
    #[serde(default)]
    pub format: WireFormat,
    /// Extra format information passed through to the codec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_info: Option<String>,
    /// Constant-value constraint: when set, the encoded value must render
    /// to exactly this text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
    /// Wire-segment name carried by the matching protocol part.
    pub segment: String,
}

/// Declared type of a service field.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// UTF-8 text.
    #[default]
    String,
    /// Signed integer.
    Integer,
    /// Floating-point number.
    Float,
    /// Boolean.
    Boolean,
    /// Nested mapping or sequence.
    Structure,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Structure => "structure",
        };
        f.write_str(name)
    }
}

/// Declared wire format of a service field.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Value rendered as a JSON document.
    #[default]
    Json,
    /// Value rendered as bare text.
    Text,
}

/// Substitutes `{{name}}` placeholders from device configuration entries.
/// Applied to endpoint URL templates and to encoded field values alike;
/// placeholders without a matching entry are left untouched.
pub fn apply_device_config(template: &str, config: &[ConfigEntry]) -> String {
    let mut resolved = template.to_string();
    for entry in config {
        let placeholder = format!("{{{{{}}}}}", entry.name);
        resolved = resolved.replace(&placeholder, &entry.value);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_substituted_from_config() {
        let config = vec![
            ConfigEntry { name: "host".into(), value: "lamp-3.local".into() },
            ConfigEntry { name: "port".into(), value: "8080".into() },
        ];
        assert_eq!(
            apply_device_config("http://{{host}}:{{port}}/cmd", &config),
            "http://lamp-3.local:8080/cmd"
        );
    }

    #[test]
    fn unmatched_placeholders_stay() {
        assert_eq!(apply_device_config("http://{{host}}/x", &[]), "http://{{host}}/x");
    }

    #[test]
    fn field_spec_wire_form() {
        let json = r#"{
            "name": "color",
            "type": "string",
            "format": "text",
            "segment": "body"
        }"#;
        let field: FieldSpec = serde_json::from_str(json).unwrap();
        assert_eq!(field.value_type, ValueType::String);
        assert_eq!(field.format, WireFormat::Text);
        assert_eq!(field.literal, None);
    }

    #[test]
    fn value_type_defaults_to_string() {
        let field: FieldSpec =
            serde_json::from_str(r#"{"name": "x", "segment": "body"}"#).unwrap();
        assert_eq!(field.value_type, ValueType::String);
        assert_eq!(field.format, WireFormat::Json);
    }

    #[test]
    fn service_round_trips() {
        let service = ServiceMetadata {
            id: "s1".into(),
            name: "set color".into(),
            url: "http://{{host}}/color".into(),
            protocol: ProtocolMetadata { id: "p1".into(), handler_topic: "mqtt".into() },
            inputs: vec![FieldSpec {
                name: "color".into(),
                segment: "payload".into(),
                ..FieldSpec::default()
            }],
            outputs: vec![],
        };
        let json = serde_json::to_string(&service).unwrap();
        let back: ServiceMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, service);
    }
}
