//! Per-field value formatting between task documents and protocol wire text.
//!
//! Service metadata declares, for every input and output field, a value type
//! and a wire format ([`FieldSpec`]). A [`Codec`] bridges the two worlds:
//! `encode` turns a task-supplied value into the wire text a protocol
//! handler expects, `decode` turns a protocol part back into a task-facing
//! value. Codecs are pure; all IO stays in the callers.

use thiserror::Error;

use crate::types::metadata::{ConfigEntry, FieldSpec, ValueType};
use crate::types::value::VarValue;

pub mod json;

pub use json::JsonCodec;

/// Errors surfaced by a [`Codec`] implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The value's type cannot be coerced to the field's declared type.
    #[error("{found} value does not fit declared type {declared}")]
    Type {
        /// Declared field type.
        declared: ValueType,
        /// Type of the value that was offered.
        found: &'static str,
    },

    /// A textual value failed to parse as the declared type.
    #[error("cannot parse as {declared}: {detail}")]
    Parse {
        /// Declared field type.
        declared: ValueType,
        /// Parser diagnostic.
        detail: String,
    },

    /// A constant-value field rendered to something other than its literal.
    #[error("literal mismatch: expected '{expected}', got '{got}'")]
    Literal {
        /// The declared constant.
        expected: String,
        /// What the value actually rendered to.
        got: String,
    },

    /// A structure field was declared with the bare-text wire format.
    #[error("structured values cannot be rendered as bare text")]
    StructureAsText,
}

/// Formatting and parsing of single service fields.
///
/// `encode` coerces `value` to the field's declared type, validates the
/// field's literal constraint, renders per the declared wire format, and
/// substitutes `{{name}}` placeholders from the device configuration.
/// `decode` is the response-side inverse, minus the device configuration
/// (responses carry no placeholders).
pub trait Codec: Send + Sync {
    /// Renders a task-supplied value into the field's wire text.
    fn encode(
        &self,
        device_config: &[ConfigEntry],
        field: &FieldSpec,
        value: &VarValue,
    ) -> Result<String, CodecError>;

    /// Parses a protocol part's wire text into a task-facing value.
    fn decode(&self, field: &FieldSpec, wire: &str) -> Result<VarValue, CodecError>;
}
