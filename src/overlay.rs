//! Dotted-path parameter overlay with cross-type coercion.
//!
//! Process models frequently patch a prepared command document with extra
//! task variables (`inputs.a.b.2.c = "7"`). The overlay engine walks the
//! dotted path through nested mappings and sequences and replaces the slot
//! it lands on, coercing the override to the type currently occupying that
//! slot. The coercion rules form an explicit table over [`VarValue`]
//! variants; anything outside the table is a [`PathError`] for that one
//! parameter.

use thiserror::Error;

use crate::types::value::{parse_bool, VarMap, VarValue};

/// Failure to apply a single overlay parameter.
///
/// Overlay failures are recoverable by design: the caller logs them and
/// skips the parameter instead of aborting the whole task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    /// The path was empty.
    #[error("empty overlay path")]
    EmptyPath,

    /// A path segment was not a key of the mapping it was applied to.
    #[error("path segment '{segment}' not found in mapping")]
    UnknownKey {
        /// The segment that did not resolve.
        segment: String,
    },

    /// A path segment addressed a sequence but was not a valid index.
    #[error("path segment '{segment}' is not a valid sequence index")]
    BadIndex {
        /// The segment that failed to parse as an index.
        segment: String,
    },

    /// A numeric segment pointed past the end of a sequence.
    #[error("sequence index {index} out of range (length {len})")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The sequence length.
        len: usize,
    },

    /// The path tried to descend into a scalar.
    #[error("cannot traverse '{segment}': slot holds a {found}")]
    NotTraversable {
        /// The segment that could not be applied.
        segment: String,
        /// Type name of the scalar occupying the slot.
        found: &'static str,
    },

    /// The override/slot type pair has no entry in the coercion table.
    #[error("cannot coerce {from} override into {into} slot")]
    UnsupportedCoercion {
        /// Type name of the override value.
        from: &'static str,
        /// Type name of the destination slot.
        into: &'static str,
    },

    /// The override was textual but did not parse as the slot's type.
    #[error("override '{value}' does not parse as {into}: {detail}")]
    Parse {
        /// The raw override text.
        value: String,
        /// Type name of the destination slot.
        into: &'static str,
        /// Parser diagnostic.
        detail: String,
    },
}

/// Sets the value at `path` inside `root`, coercing `value` to the type of
/// the slot it replaces.
///
/// The first path segment is a key of `root`; later segments descend
/// through nested mappings by key and through sequences by numeric index.
///
/// # Examples
///
/// ```
/// use taskbridge::overlay::overlay;
/// use taskbridge::types::value::{VarMap, VarValue};
///
/// let mut inputs = VarMap::from([(
///     "level".to_string(),
///     VarValue::Int(0),
/// )]);
/// overlay(&mut inputs, "level", &VarValue::String("7".into())).unwrap();
/// assert_eq!(inputs["level"], VarValue::Int(7));
/// ```
pub fn overlay(root: &mut VarMap, path: &str, value: &VarValue) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::EmptyPath);
    }
    let segments: Vec<&str> = path.split('.').collect();
    let slot = root
        .get_mut(segments[0])
        .ok_or_else(|| PathError::UnknownKey { segment: segments[0].to_string() })?;
    set_on_value(slot, &segments[1..], value)
}

fn set_on_value(
    slot: &mut VarValue,
    segments: &[&str],
    value: &VarValue,
) -> Result<(), PathError> {
    let Some((segment, rest)) = segments.split_first() else {
        *slot = coerce(value, slot)?;
        return Ok(());
    };
    match slot {
        VarValue::Map(entries) => {
            let next = entries
                .get_mut(*segment)
                .ok_or_else(|| PathError::UnknownKey { segment: (*segment).to_string() })?;
            set_on_value(next, rest, value)
        }
        VarValue::Seq(items) => {
            let index: usize = segment
                .parse()
                .map_err(|_| PathError::BadIndex { segment: (*segment).to_string() })?;
            let len = items.len();
            let next = items
                .get_mut(index)
                .ok_or(PathError::IndexOutOfRange { index, len })?;
            set_on_value(next, rest, value)
        }
        other => Err(PathError::NotTraversable {
            segment: (*segment).to_string(),
            found: other.type_name(),
        }),
    }
}

/// The coercion table: override value × destination slot → stored value.
fn coerce(value: &VarValue, slot: &VarValue) -> Result<VarValue, PathError> {
    use VarValue::{Bool, Float, Int, Map, Seq, String as Str};
    match (value, slot) {
        (Str(s), Str(_)) => Ok(Str(s.clone())),
        (Str(s), Int(_)) => s
            .parse::<i64>()
            .map(Int)
            .map_err(|e| parse_error(s, "integer", e)),
        (Str(s), Bool(_)) => parse_bool(s)
            .map(Bool)
            .ok_or_else(|| PathError::Parse {
                value: s.clone(),
                into: "boolean",
                detail: "not a recognized boolean form".into(),
            }),
        (Str(s), Float(_)) => s
            .parse::<f64>()
            .map(Float)
            .map_err(|e| parse_error(s, "float", e)),
        // Structured slots take the override as a JSON document and are
        // replaced wholesale by whatever it parses to.
        (Str(s), Map(_) | Seq(_)) => {
            serde_json::from_str(s).map_err(|e| parse_error(s, "json", e))
        }

        (Int(i), Str(_)) => Ok(Str(i.to_string())),
        (Int(i), Int(_)) => Ok(Int(*i)),
        (Int(i), Bool(_)) => Ok(Bool(*i >= 1)),
        (Int(i), Float(_)) => Ok(Float(*i as f64)),

        (Bool(b), Str(_)) => Ok(Str(b.to_string())),
        (Bool(b), Int(_)) => Ok(Int(i64::from(*b))),
        (Bool(b), Bool(_)) => Ok(Bool(*b)),
        (Bool(b), Float(_)) => Ok(Float(if *b { 1.0 } else { 0.0 })),

        (Float(f), Str(_)) => Ok(Str(f.to_string())),
        (Float(f), Int(_)) => Ok(Int(*f as i64)),
        (Float(f), Bool(_)) => Ok(Bool(*f >= 1.0)),
        (Float(f), Float(_)) => Ok(Float(*f)),

        (value, slot) => Err(PathError::UnsupportedCoercion {
            from: value.type_name(),
            into: slot.type_name(),
        }),
    }
}

fn parse_error(value: &str, into: &'static str, err: impl std::fmt::Display) -> PathError {
    PathError::Parse {
        value: value.to_string(),
        into,
        detail: err.to_string(),
    }
}
