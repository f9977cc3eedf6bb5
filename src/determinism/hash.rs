//! Canonical JSON hashing: FNV-1a over sorted-key serialization.
//!
//! The 64-bit variant fingerprints whole state snapshots (emitted as 16 hex
//! chars in records and replay reports); the 32-bit variant identifies
//! registered state paths on the wire. Both depend only on byte content, so
//! hashes agree across processes and architectures.

use serde_json::Value;

const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

const FNV32_OFFSET: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV64_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV64_PRIME);
    }
    hash
}

pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// Serialize a value as canonical JSON: object keys sorted, no whitespace.
/// Numbers keep their JSON text form, so fixed-point integers stay integers.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// FNV-1a-64 of the canonical JSON form.
pub fn hash_value(value: &Value) -> u64 {
    fnv1a64(canonical_json(value).as_bytes())
}

/// Canonical hash rendered the way records store it: 16 lowercase hex chars.
pub fn hash_hex(value: &Value) -> String {
    format!("{:016x}", hash_value(value))
}
