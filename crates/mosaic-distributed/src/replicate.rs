//! One-time static-state replication.
//!
//! After setup the master captures the model's flat static state — an
//! ordered list of `(name, value)` pairs matching the declared schema — and
//! broadcasts it. Primitive entries copy their value verbatim; grid
//! references copy only the name, which each receiver resolves against its
//! own grid registry built during the grid scatter. Anything else is a
//! programming/config error: this subsystem deliberately supports flat
//! scalar + named-resource state only, never arbitrary object graphs.
//!
//! The wire format spells every entry kind out as a byte, so an
//! unrecognized kind fails loudly at decode time instead of deserializing
//! into the wrong variant.

use crate::types::ReplicateError;
use mosaic_core::grid::GridRegistry;
use mosaic_core::model::{StateSchema, StateValue};
use std::collections::BTreeMap;

const KIND_INT: u8 = 0x01;
const KIND_FLOAT: u8 = 0x02;
const KIND_BOOL: u8 = 0x03;
const KIND_TEXT: u8 = 0x04;
const KIND_GRID_REF: u8 = 0x10;

/// The captured static state of the master, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub values: Vec<(String, StateValue)>,
}

impl StateSnapshot {
    pub fn get(&self, name: &str) -> Option<&StateValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Validate captured values against the declared schema.
///
/// Every value must be declared, and its runtime kind must match the
/// declaration; the schema was built once at model-registration time and is
/// the only authority on what replicates.
pub fn capture(
    schema: &StateSchema,
    values: Vec<(String, StateValue)>,
) -> Result<StateSnapshot, ReplicateError> {
    for (name, value) in &values {
        let entry = schema
            .get(name)
            .ok_or_else(|| ReplicateError::UndeclaredEntry { name: name.clone() })?;
        if value.kind() != entry.kind {
            return Err(ReplicateError::KindMismatch {
                name: name.clone(),
                got: value.kind(),
                want: entry.kind,
            });
        }
    }
    Ok(StateSnapshot { values })
}

/// Encode a snapshot for broadcast: entry count, then per entry a
/// length-prefixed name, a kind byte, and the kind's value bytes.
pub fn encode_snapshot(snapshot: &StateSnapshot) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend((snapshot.values.len() as u32).to_le_bytes());
    for (name, value) in &snapshot.values {
        write_str(&mut out, name);
        match value {
            StateValue::Int(v) => {
                out.push(KIND_INT);
                out.extend(v.to_le_bytes());
            }
            StateValue::Float(v) => {
                out.push(KIND_FLOAT);
                out.extend(v.to_le_bytes());
            }
            StateValue::Bool(v) => {
                out.push(KIND_BOOL);
                out.push(*v as u8);
            }
            StateValue::Text(v) => {
                out.push(KIND_TEXT);
                write_str(&mut out, v);
            }
            StateValue::GridRef(v) => {
                out.push(KIND_GRID_REF);
                write_str(&mut out, v);
            }
        }
    }
    out
}

/// Decode a broadcast snapshot, rejecting unknown entry kinds.
pub fn decode_snapshot(bytes: &[u8]) -> Result<StateSnapshot, ReplicateError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let count = cursor.read_u32("entry count")?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = cursor.read_str("entry name")?;
        let kind = cursor.read_u8("entry kind")?;
        let value = match kind {
            KIND_INT => StateValue::Int(i64::from_le_bytes(cursor.read_array("int value")?)),
            KIND_FLOAT => StateValue::Float(f64::from_le_bytes(cursor.read_array("float value")?)),
            KIND_BOOL => StateValue::Bool(cursor.read_u8("bool value")? != 0),
            KIND_TEXT => StateValue::Text(cursor.read_str("text value")?),
            KIND_GRID_REF => StateValue::GridRef(cursor.read_str("grid name")?),
            other => {
                return Err(ReplicateError::UnsupportedKind {
                    name,
                    kind: other,
                })
            }
        };
        values.push((name, value));
    }
    Ok(StateSnapshot { values })
}

/// The replicated state as seen by one rank after resolution.
#[derive(Debug, Clone, Default)]
pub struct ReplicatedState {
    values: BTreeMap<String, StateValue>,
}

impl ReplicatedState {
    pub fn get(&self, name: &str) -> Option<&StateValue> {
        self.values.get(name)
    }

    /// The grid a `GridRef` entry points at, if the entry exists and is one.
    pub fn grid_ref(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(StateValue::GridRef(grid)) => Some(grid),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resolve a received snapshot against the local grid registry.
///
/// Grid references must name a grid this rank already constructed during
/// the grid scatter; a dangling name is an error, never a silently
/// defaulted empty grid.
pub fn apply(
    snapshot: &StateSnapshot,
    grids: &GridRegistry,
) -> Result<ReplicatedState, ReplicateError> {
    let mut values = BTreeMap::new();
    for (name, value) in &snapshot.values {
        if let StateValue::GridRef(grid) = value {
            if !grids.contains(grid) {
                return Err(ReplicateError::UnresolvedGrid {
                    entry: name.clone(),
                    grid: grid.clone(),
                });
            }
        }
        values.insert(name.clone(), value.clone());
    }
    Ok(ReplicatedState { values })
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend((s.len() as u32).to_le_bytes());
    out.extend(s.as_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_u8(&mut self, context: &'static str) -> Result<u8, ReplicateError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(ReplicateError::Truncated(context))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_array<const N: usize>(
        &mut self,
        context: &'static str,
    ) -> Result<[u8; N], ReplicateError> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ReplicateError::Truncated(context))?;
        self.pos = end;
        Ok(slice.try_into().expect("slice length equals N"))
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32, ReplicateError> {
        Ok(u32::from_le_bytes(self.read_array(context)?))
    }

    fn read_str(&mut self, context: &'static str) -> Result<String, ReplicateError> {
        let len = self.read_u32(context)? as usize;
        let end = self.pos + len;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ReplicateError::Truncated(context))?;
        self.pos = end;
        String::from_utf8(slice.to_vec())
            .map_err(|_| ReplicateError::Truncated(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::grid::Grid;
    use mosaic_core::model::{StateEntry, StateKind};

    fn schema() -> StateSchema {
        StateSchema::new(vec![
            StateEntry::primitive("diffusion-rate"),
            StateEntry::primitive("max-age"),
            StateEntry::primitive("label"),
            StateEntry::primitive("torus"),
            StateEntry::grid_reference("heat"),
        ])
    }

    fn sample_values() -> Vec<(String, StateValue)> {
        vec![
            ("diffusion-rate".to_string(), StateValue::Float(0.25)),
            ("max-age".to_string(), StateValue::Int(100)),
            ("label".to_string(), StateValue::Text("run-1".to_string())),
            ("torus".to_string(), StateValue::Bool(true)),
            ("heat".to_string(), StateValue::GridRef("heat".to_string())),
        ]
    }

    #[test]
    fn test_capture_validates_declarations() {
        let snapshot = capture(&schema(), sample_values()).unwrap();
        assert_eq!(snapshot.len(), 5);

        let err = capture(
            &schema(),
            vec![("rogue".to_string(), StateValue::Int(1))],
        )
        .unwrap_err();
        assert!(matches!(err, ReplicateError::UndeclaredEntry { .. }));
    }

    #[test]
    fn test_capture_rejects_kind_mismatch() {
        // "heat" is declared as a grid reference, not a primitive.
        let err = capture(
            &schema(),
            vec![("heat".to_string(), StateValue::Float(1.0))],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ReplicateError::KindMismatch {
                got: StateKind::Primitive,
                want: StateKind::GridReference,
                ..
            }
        ));
    }

    #[test]
    fn test_wire_roundtrip() {
        let snapshot = capture(&schema(), sample_values()).unwrap();
        let bytes = encode_snapshot(&snapshot);
        let decoded = decode_snapshot(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_unknown_kind_byte_rejected() {
        let snapshot = capture(
            &schema(),
            vec![("max-age".to_string(), StateValue::Int(7))],
        )
        .unwrap();
        let mut bytes = encode_snapshot(&snapshot);
        // The kind byte sits right after the 4-byte count and the
        // length-prefixed name.
        let kind_pos = 4 + 4 + "max-age".len();
        assert_eq!(bytes[kind_pos], 0x01);
        bytes[kind_pos] = 0x7F;
        let err = decode_snapshot(&bytes).unwrap_err();
        assert!(
            matches!(err, ReplicateError::UnsupportedKind { ref name, kind: 0x7F } if name == "max-age")
        );
    }

    #[test]
    fn test_truncated_rejected() {
        let snapshot = capture(&schema(), sample_values()).unwrap();
        let bytes = encode_snapshot(&snapshot);
        let err = decode_snapshot(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, ReplicateError::Truncated(_)));
    }

    #[test]
    fn test_apply_resolves_grid_refs() {
        let mut grids = GridRegistry::new();
        grids.insert(Grid::new("heat", 4, 4, 0.0)).unwrap();

        let snapshot = capture(&schema(), sample_values()).unwrap();
        let state = apply(&snapshot, &grids).unwrap();
        assert_eq!(state.grid_ref("heat"), Some("heat"));
        assert_eq!(state.get("max-age"), Some(&StateValue::Int(100)));
    }

    #[test]
    fn test_apply_rejects_dangling_grid_ref() {
        let grids = GridRegistry::new(); // no grids registered
        let snapshot = StateSnapshot {
            values: vec![("heat".to_string(), StateValue::GridRef("heat".to_string()))],
        };
        let err = apply(&snapshot, &grids).unwrap_err();
        assert!(
            matches!(err, ReplicateError::UnresolvedGrid { ref grid, .. } if grid == "heat")
        );
    }
}
