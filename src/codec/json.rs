//! The default codec: JSON documents and bare-text scalars.

use crate::types::metadata::{
    apply_device_config, ConfigEntry, FieldSpec, ValueType, WireFormat,
};
use crate::types::value::{parse_bool, VarValue};

use super::{Codec, CodecError};

/// Codec for services whose fields are declared as JSON documents or bare
/// text scalars. This covers every protocol handler the platform currently
/// routes to; a structure field declared with the text format is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(
        &self,
        device_config: &[ConfigEntry],
        field: &FieldSpec,
        value: &VarValue,
    ) -> Result<String, CodecError> {
        let coerced = coerce(value, field.value_type)?;
        let rendered = render(&coerced, field.format, field.value_type)?;
        if let Some(literal) = &field.literal {
            if rendered != *literal {
                return Err(CodecError::Literal {
                    expected: literal.clone(),
                    got: rendered,
                });
            }
        }
        Ok(apply_device_config(&rendered, device_config))
    }

    fn decode(&self, field: &FieldSpec, wire: &str) -> Result<VarValue, CodecError> {
        match field.format {
            WireFormat::Json => {
                let parsed: serde_json::Value =
                    serde_json::from_str(wire).map_err(|e| CodecError::Parse {
                        declared: field.value_type,
                        detail: e.to_string(),
                    })?;
                coerce(&VarValue::from(parsed), field.value_type)
            }
            WireFormat::Text => match field.value_type {
                ValueType::String => Ok(VarValue::String(wire.to_string())),
                ValueType::Integer => wire
                    .trim()
                    .parse::<i64>()
                    .map(VarValue::Int)
                    .map_err(|e| parse_detail(field.value_type, wire, &e)),
                ValueType::Float => wire
                    .trim()
                    .parse::<f64>()
                    .map(VarValue::Float)
                    .map_err(|e| parse_detail(field.value_type, wire, &e)),
                ValueType::Boolean => parse_bool(wire.trim())
                    .map(VarValue::Bool)
                    .ok_or_else(|| CodecError::Parse {
                        declared: field.value_type,
                        detail: format!("'{wire}' is not a boolean"),
                    }),
                ValueType::Structure => Err(CodecError::StructureAsText),
            },
        }
    }
}

/// Converts `value` into the declared type, applying the same scalar
/// coercions the parameter overlay accepts. Structures only fit the
/// structure type; a string offered for a structure slot is parsed as JSON.
fn coerce(value: &VarValue, declared: ValueType) -> Result<VarValue, CodecError> {
    use VarValue::{Bool, Float, Int, Map, Seq, String as Str};
    match declared {
        ValueType::String => match value {
            Str(s) => Ok(Str(s.clone())),
            Int(i) => Ok(Str(i.to_string())),
            Float(f) => Ok(Str(f.to_string())),
            Bool(b) => Ok(Str(b.to_string())),
            other => Err(type_error(declared, other)),
        },
        ValueType::Integer => match value {
            Int(i) => Ok(Int(*i)),
            Float(f) => Ok(Int(*f as i64)),
            Bool(b) => Ok(Int(i64::from(*b))),
            Str(s) => s
                .trim()
                .parse::<i64>()
                .map(Int)
                .map_err(|e| parse_detail(declared, s, &e)),
            other => Err(type_error(declared, other)),
        },
        ValueType::Float => match value {
            Float(f) => Ok(Float(*f)),
            Int(i) => Ok(Float(*i as f64)),
            Bool(b) => Ok(Float(if *b { 1.0 } else { 0.0 })),
            Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Float)
                .map_err(|e| parse_detail(declared, s, &e)),
            other => Err(type_error(declared, other)),
        },
        ValueType::Boolean => match value {
            Bool(b) => Ok(Bool(*b)),
            Int(i) => Ok(Bool(*i >= 1)),
            Float(f) => Ok(Bool(*f >= 1.0)),
            Str(s) => parse_bool(s.trim()).map(Bool).ok_or_else(|| CodecError::Parse {
                declared,
                detail: format!("'{s}' is not a boolean"),
            }),
            other => Err(type_error(declared, other)),
        },
        ValueType::Structure => match value {
            Map(m) => Ok(Map(m.clone())),
            Seq(s) => Ok(Seq(s.clone())),
            Str(s) => {
                let parsed: serde_json::Value =
                    serde_json::from_str(s).map_err(|e| parse_detail(declared, s, &e))?;
                match VarValue::from(parsed) {
                    v @ (Map(_) | Seq(_)) => Ok(v),
                    other => Err(type_error(declared, &other)),
                }
            }
            other => Err(type_error(declared, other)),
        },
    }
}

fn render(
    value: &VarValue,
    format: WireFormat,
    declared: ValueType,
) -> Result<String, CodecError> {
    match format {
        WireFormat::Json => serde_json::to_string(value).map_err(|e| CodecError::Parse {
            declared,
            detail: e.to_string(),
        }),
        WireFormat::Text => match value {
            VarValue::String(s) => Ok(s.clone()),
            VarValue::Int(i) => Ok(i.to_string()),
            VarValue::Float(f) => Ok(f.to_string()),
            VarValue::Bool(b) => Ok(b.to_string()),
            VarValue::Null | VarValue::Seq(_) | VarValue::Map(_) => {
                Err(CodecError::StructureAsText)
            }
        },
    }
}

fn type_error(declared: ValueType, found: &VarValue) -> CodecError {
    CodecError::Type { declared, found: found.type_name() }
}

fn parse_detail(
    declared: ValueType,
    value: &str,
    error: &dyn std::fmt::Display,
) -> CodecError {
    CodecError::Parse { declared, detail: format!("'{value}': {error}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::value::VarMap;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn field(value_type: ValueType, format: WireFormat) -> FieldSpec {
        FieldSpec {
            name: "level".into(),
            value_type,
            format,
            format_info: None,
            literal: None,
            segment: "body".into(),
        }
    }

    #[test]
    fn text_string_passes_through() {
        let f = field(ValueType::String, WireFormat::Text);
        let out = JsonCodec.encode(&[], &f, &VarValue::String("on".into())).unwrap();
        assert_eq!(out, "on");
    }

    #[test]
    fn scalars_coerce_to_declared_string() {
        let f = field(ValueType::String, WireFormat::Text);
        assert_eq!(JsonCodec.encode(&[], &f, &VarValue::Int(21)).unwrap(), "21");
        assert_eq!(JsonCodec.encode(&[], &f, &VarValue::Bool(true)).unwrap(), "true");
        assert_eq!(JsonCodec.encode(&[], &f, &VarValue::Float(4.5)).unwrap(), "4.5");
    }

    #[test]
    fn string_parses_into_declared_integer() {
        let f = field(ValueType::Integer, WireFormat::Json);
        let out = JsonCodec.encode(&[], &f, &VarValue::String(" 42 ".into())).unwrap();
        assert_eq!(out, "42");
    }

    #[test]
    fn unparsable_string_is_a_parse_error() {
        let f = field(ValueType::Integer, WireFormat::Json);
        let err = JsonCodec
            .encode(&[], &f, &VarValue::String("forty-two".into()))
            .unwrap_err();
        assert!(matches!(err, CodecError::Parse { declared: ValueType::Integer, .. }));
    }

    #[test]
    fn structure_renders_as_json_document() {
        let f = field(ValueType::Structure, WireFormat::Json);
        let value = VarValue::Map(VarMap::from([
            ("r".to_string(), VarValue::Int(255)),
            ("on".to_string(), VarValue::Bool(true)),
        ]));
        let out = JsonCodec.encode(&[], &f, &value).unwrap();
        let back: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(back, serde_json::json!({"r": 255, "on": true}));
    }

    #[test]
    fn structure_as_bare_text_is_rejected() {
        let f = field(ValueType::Structure, WireFormat::Text);
        let value = VarValue::Seq(vec![VarValue::Int(1)]);
        let err = JsonCodec.encode(&[], &f, &value).unwrap_err();
        assert_eq!(err, CodecError::StructureAsText);
    }

    #[test]
    fn null_never_fits_a_declared_type() {
        let f = field(ValueType::String, WireFormat::Text);
        let err = JsonCodec.encode(&[], &f, &VarValue::Null).unwrap_err();
        assert!(matches!(err, CodecError::Type { found: "null", .. }));
    }

    #[test]
    fn literal_constraint_accepts_the_declared_constant() {
        let mut f = field(ValueType::String, WireFormat::Text);
        f.literal = Some("on".into());
        let out = JsonCodec.encode(&[], &f, &VarValue::String("on".into())).unwrap();
        assert_eq!(out, "on");
    }

    #[test]
    fn literal_mismatch_is_rejected() {
        let mut f = field(ValueType::String, WireFormat::Text);
        f.literal = Some("on".into());
        let err = JsonCodec.encode(&[], &f, &VarValue::String("off".into())).unwrap_err();
        assert_eq!(
            err,
            CodecError::Literal { expected: "on".into(), got: "off".into() }
        );
    }

    #[test]
    fn device_config_fills_placeholders_in_rendered_text() {
        let f = field(ValueType::String, WireFormat::Text);
        let config = vec![ConfigEntry { name: "unit".into(), value: "celsius".into() }];
        let out = JsonCodec
            .encode(&config, &f, &VarValue::String("21 {{unit}}".into()))
            .unwrap();
        assert_eq!(out, "21 celsius");
    }

    #[test]
    fn decodes_json_numbers_to_declared_types() {
        let f = field(ValueType::Integer, WireFormat::Json);
        assert_eq!(JsonCodec.decode(&f, "42").unwrap(), VarValue::Int(42));
        let f = field(ValueType::Float, WireFormat::Json);
        assert_eq!(JsonCodec.decode(&f, "42").unwrap(), VarValue::Float(42.0));
    }

    #[test]
    fn decodes_quoted_and_bare_strings() {
        let f = field(ValueType::String, WireFormat::Json);
        assert_eq!(
            JsonCodec.decode(&f, "\"on\"").unwrap(),
            VarValue::String("on".into())
        );
        let f = field(ValueType::String, WireFormat::Text);
        assert_eq!(
            JsonCodec.decode(&f, "not json at all").unwrap(),
            VarValue::String("not json at all".into())
        );
    }

    #[test]
    fn decodes_text_scalars_per_declared_type() {
        let f = field(ValueType::Float, WireFormat::Text);
        assert_eq!(JsonCodec.decode(&f, "3.5").unwrap(), VarValue::Float(3.5));
        let f = field(ValueType::Boolean, WireFormat::Text);
        assert_eq!(JsonCodec.decode(&f, "1").unwrap(), VarValue::Bool(true));
    }

    #[test]
    fn decodes_structures_from_json_documents() {
        let f = field(ValueType::Structure, WireFormat::Json);
        let out = JsonCodec.decode(&f, r#"{"lumen": 800}"#).unwrap();
        match out {
            VarValue::Map(m) => assert_eq!(m["lumen"], VarValue::Int(800)),
            other => panic!("expected map, got {}", other.type_name()),
        }
    }

    #[test]
    fn undecodable_text_is_a_parse_error() {
        let f = field(ValueType::Boolean, WireFormat::Text);
        let err = JsonCodec.decode(&f, "maybe").unwrap_err();
        assert!(matches!(err, CodecError::Parse { declared: ValueType::Boolean, .. }));
    }

    proptest! {
        #[test]
        fn integers_survive_the_wire(n in proptest::num::i64::ANY) {
            let f = field(ValueType::Integer, WireFormat::Json);
            let wire = JsonCodec.encode(&[], &f, &VarValue::Int(n)).unwrap();
            prop_assert_eq!(JsonCodec.decode(&f, &wire).unwrap(), VarValue::Int(n));
        }

        #[test]
        fn finite_floats_survive_the_wire(x in -1.0e12f64..1.0e12) {
            let f = field(ValueType::Float, WireFormat::Text);
            let wire = JsonCodec.encode(&[], &f, &VarValue::Float(x)).unwrap();
            prop_assert_eq!(JsonCodec.decode(&f, &wire).unwrap(), VarValue::Float(x));
        }
    }
}
