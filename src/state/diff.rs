//! Snapshot diffing.
//!
//! A diff between two snapshots of the same mode is a totally ordered list of
//! JSON-Pointer patches. Values are replaced whole: a changed nested object
//! produces one `replace` of the leaf path, never a sub-path merge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::path::dotted_to_pointer;
use crate::state::snapshot::Snapshot;

/// Patch operation opcodes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchOp {
    Replace = 1,
    Remove = 2,
    Add = 3,
}

impl PatchOp {
    pub fn opcode(self) -> i64 {
        self as i64
    }

    pub fn from_opcode(code: i64) -> Option<Self> {
        Some(match code {
            1 => Self::Replace,
            2 => Self::Remove,
            3 => Self::Add,
            _ => return None,
        })
    }
}

/// One JSON-Pointer edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// JSON Pointer, e.g. `/players/p1/position`.
    pub path: String,
    pub op: PatchOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Patch {
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Replace,
            value: Some(value),
        }
    }

    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Add,
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Remove,
            value: None,
        }
    }
}

/// Minimal ordered patch list turning `old` into `new`.
///
/// Both snapshots are sorted maps, so one merged walk suffices and the output
/// order is deterministic: path-sorted, removes and adds interleaved.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Vec<Patch> {
    let mut patches = Vec::new();
    let mut old_iter = old.iter().peekable();
    let mut new_iter = new.iter().peekable();

    loop {
        match (old_iter.peek(), new_iter.peek()) {
            (Some((old_path, old_value)), Some((new_path, new_value))) => {
                match old_path.cmp(new_path) {
                    std::cmp::Ordering::Less => {
                        patches.push(Patch::remove(dotted_to_pointer(old_path)));
                        old_iter.next();
                    }
                    std::cmp::Ordering::Greater => {
                        patches.push(Patch::add(
                            dotted_to_pointer(new_path),
                            (*new_value).clone(),
                        ));
                        new_iter.next();
                    }
                    std::cmp::Ordering::Equal => {
                        if old_value != new_value {
                            patches.push(Patch::replace(
                                dotted_to_pointer(new_path),
                                (*new_value).clone(),
                            ));
                        }
                        old_iter.next();
                        new_iter.next();
                    }
                }
            }
            (Some((old_path, _)), None) => {
                patches.push(Patch::remove(dotted_to_pointer(old_path)));
                old_iter.next();
            }
            (None, Some((new_path, new_value))) => {
                patches.push(Patch::add(
                    dotted_to_pointer(new_path),
                    (*new_value).clone(),
                ));
                new_iter.next();
            }
            (None, None) => break,
        }
    }

    patches
}

/// A diff against a partial (dirty-only) snapshot: paths absent from `new`
/// are unchanged rather than removed, so only adds and replaces are emitted.
pub fn diff_partial(old: &Snapshot, new: &Snapshot) -> Vec<Patch> {
    let mut patches = Vec::new();
    for (path, value) in new {
        match old.get(path) {
            Some(existing) if existing == value => {}
            Some(_) => patches.push(Patch::replace(dotted_to_pointer(path), value.clone())),
            None => patches.push(Patch::add(dotted_to_pointer(path), value.clone())),
        }
    }
    patches
}

/// Apply patches to a snapshot, in order. Inverse of [`diff`]:
/// `apply(diff(a, b), a) == b`.
pub fn apply(snapshot: &mut Snapshot, patches: &[Patch]) {
    use crate::state::path::pointer_to_dotted;
    for patch in patches {
        let dotted = pointer_to_dotted(&patch.path);
        match patch.op {
            PatchOp::Remove => {
                snapshot.remove(&dotted);
            }
            PatchOp::Replace | PatchOp::Add => {
                if let Some(value) = &patch.value {
                    snapshot.insert(dotted, value.clone());
                }
            }
        }
    }
}
