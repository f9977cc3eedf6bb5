//! Patch compression: path hashes and dynamic-key slots.
//!
//! Every registered state path pattern gets a 32-bit hash; a compressed patch
//! is `[pathHash, dynamicKey, op, value?]` instead of carrying the full JSON
//! Pointer. Dynamic keys fill the pattern's `*` segments and may themselves
//! be interned into per-connection slots: `[slot, key]` defines a slot, a
//! bare integer reuses one. The slot dictionary is write-once for the life of
//! the connection and reset only on disconnect; referencing a slot before its
//! definition is a decode error.

use std::collections::HashMap;

use serde_json::Value;

use crate::api::error::CodecError;
use crate::state::diff::{Patch, PatchOp};
use crate::state::path::{PathPattern, dotted_to_pointer, pointer_to_dotted};

/// Registered path patterns, addressable by hash.
#[derive(Debug, Default)]
pub struct PathTable {
    patterns: Vec<PathPattern>,
    by_hash: HashMap<u32, usize>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for pattern in patterns {
            table.register(pattern.as_ref());
        }
        table
    }

    pub fn register(&mut self, pattern: &str) {
        let parsed = PathPattern::parse(pattern);
        let hash = parsed.hash();
        if self.by_hash.contains_key(&hash) {
            return;
        }
        self.by_hash.insert(hash, self.patterns.len());
        self.patterns.push(parsed);
    }

    pub fn lookup(&self, hash: u32) -> Option<&PathPattern> {
        self.by_hash.get(&hash).map(|&i| &self.patterns[i])
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Match a concrete dotted path against the registered patterns,
    /// returning the pattern hash and the extracted dynamic keys.
    pub fn compress(&self, dotted: &str) -> Option<(u32, Vec<String>)> {
        for pattern in &self.patterns {
            if let Some(keys) = pattern.match_concrete(dotted) {
                return Some((pattern.hash(), keys));
            }
        }
        None
    }
}

/// Per-connection dynamic-key slot dictionary. Write-once; dropped with the
/// connection.
#[derive(Debug, Default)]
pub struct SlotTable {
    by_slot: HashMap<u32, String>,
    by_key: HashMap<String, u32>,
    next: u32,
}

/// How a key is carried after interning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRef {
    /// First sighting: define the slot alongside the key.
    Define(u32, String),
    /// The slot was defined earlier on this connection.
    Reuse(u32),
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a key on the encoding side.
    pub fn intern(&mut self, key: &str) -> SlotRef {
        if let Some(&slot) = self.by_key.get(key) {
            return SlotRef::Reuse(slot);
        }
        let slot = self.next;
        self.next += 1;
        self.by_slot.insert(slot, key.to_string());
        self.by_key.insert(key.to_string(), slot);
        SlotRef::Define(slot, key.to_string())
    }

    /// Record a definition seen on the decoding side.
    pub fn define(&mut self, slot: u32, key: &str) -> Result<(), CodecError> {
        match self.by_slot.get(&slot) {
            Some(existing) if existing == key => Ok(()),
            Some(_) => Err(CodecError::SlotRedefined(slot)),
            None => {
                self.by_slot.insert(slot, key.to_string());
                self.by_key.insert(key.to_string(), slot);
                if slot >= self.next {
                    self.next = slot + 1;
                }
                Ok(())
            }
        }
    }

    pub fn resolve(&self, slot: u32) -> Result<&str, CodecError> {
        self.by_slot
            .get(&slot)
            .map(String::as_str)
            .ok_or(CodecError::UndefinedSlot(slot))
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }
}

fn dynamic_key_value(keys: &[String], slots: Option<&mut SlotTable>) -> Value {
    match keys {
        [] => Value::Null,
        [key] => match slots {
            Some(table) => match table.intern(key) {
                SlotRef::Define(slot, key) => {
                    Value::Array(vec![Value::from(slot), Value::from(key)])
                }
                SlotRef::Reuse(slot) => Value::from(slot),
            },
            None => Value::from(key.as_str()),
        },
        many => Value::Array(many.iter().map(|k| Value::from(k.as_str())).collect()),
    }
}

fn parse_dynamic_key(value: &Value, slots: &mut SlotTable) -> Result<Vec<String>, CodecError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(key) => Ok(vec![key.clone()]),
        Value::Number(n) => {
            // An integer is a slot reference once the connection dictionary
            // is live. Before any definition it can only be a literal numeric
            // map key, since the peer has nothing to reference.
            if slots.is_empty() {
                return Ok(vec![n.to_string()]);
            }
            let slot = n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| CodecError::Malformed("slot reference".to_string()))?;
            Ok(vec![slots.resolve(slot)?.to_string()])
        }
        Value::Array(items) => match items.as_slice() {
            [Value::Number(slot), Value::String(key)] => {
                let slot = slot
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| CodecError::Malformed("slot definition".to_string()))?;
                slots.define(slot, key)?;
                Ok(vec![key.clone()])
            }
            keys => keys
                .iter()
                .map(|k| match k {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(CodecError::Malformed("dynamic key list".to_string())),
                })
                .collect(),
        },
        _ => Err(CodecError::Malformed("dynamic key".to_string())),
    }
}

/// Encode a patch as a compressed `[pathHash, dynamicKey, op, value?]` array
/// when its path matches a registered pattern; `None` means the caller falls
/// back to the verbose form.
pub fn compress_patch(
    patch: &Patch,
    table: &PathTable,
    slots: Option<&mut SlotTable>,
) -> Option<Value> {
    let dotted = pointer_to_dotted(&patch.path);
    let (hash, keys) = table.compress(&dotted)?;
    let mut out = vec![
        Value::from(hash),
        dynamic_key_value(&keys, slots),
        Value::from(patch.op.opcode()),
    ];
    if let Some(value) = &patch.value {
        out.push(value.clone());
    }
    Some(Value::Array(out))
}

/// Decode one patch array, verbose or compressed.
pub fn expand_patch(
    items: &[Value],
    table: &PathTable,
    slots: &mut SlotTable,
) -> Result<Patch, CodecError> {
    match items {
        [Value::String(pointer), Value::Number(op), rest @ ..] => {
            build_patch(pointer.clone(), op, rest)
        }
        [Value::Number(hash), dynamic, Value::Number(op), rest @ ..] => {
            let hash = hash
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| CodecError::Malformed("path hash".to_string()))?;
            let pattern = table
                .lookup(hash)
                .ok_or(CodecError::UnknownPathHash(hash))?;
            let keys = parse_dynamic_key(dynamic, slots)?;
            let dotted = pattern.expand(&keys).ok_or_else(|| {
                CodecError::Malformed(format!(
                    "pattern `{}` expects {} dynamic keys, got {}",
                    pattern.as_str(),
                    pattern.wildcard_count(),
                    keys.len()
                ))
            })?;
            build_patch(dotted_to_pointer(&dotted), op, rest)
        }
        _ => Err(CodecError::Malformed("patch array".to_string())),
    }
}

fn build_patch(
    path: String,
    op: &serde_json::Number,
    rest: &[Value],
) -> Result<Patch, CodecError> {
    let opcode = op
        .as_i64()
        .ok_or_else(|| CodecError::Malformed("patch op".to_string()))?;
    let op =
        PatchOp::from_opcode(opcode).ok_or_else(|| CodecError::Malformed("patch op".to_string()))?;
    let value = match rest {
        [] => None,
        [value] => Some(value.clone()),
        _ => return Err(CodecError::Malformed("patch arity".to_string())),
    };
    if value.is_none() && op != PatchOp::Remove {
        return Err(CodecError::Malformed("missing patch value".to_string()));
    }
    Ok(Patch { path, op, value })
}
