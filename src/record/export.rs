//! JSONL replay export: one line per tick, sorted by tick id.
//!
//! Each line is `{"tickId", "stateSnapshot", "stateHash"?, "serverEvents"}`.
//! The exporter streams over any writer; the loader feeds the re-evaluator's
//! field-level snapshot comparison.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{RecordError, RecordedServerEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonlTickLine {
    pub tick_id: i64,
    pub state_snapshot: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_events: Vec<RecordedServerEvent>,
}

/// Streaming exporter. Lines must be written in ascending tick order; the
/// writer enforces it rather than buffering and sorting.
#[derive(Debug)]
pub struct JsonlExporter<W: Write> {
    writer: W,
    last_tick: i64,
}

impl<W: Write> JsonlExporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            last_tick: -1,
        }
    }

    pub fn write_tick(&mut self, line: &JsonlTickLine) -> Result<(), RecordError> {
        if line.tick_id <= self.last_tick {
            return Err(RecordError::Export(format!(
                "tick {} exported after tick {}",
                line.tick_id, self.last_tick
            )));
        }
        let raw =
            serde_json::to_string(line).map_err(|e| RecordError::Serialize(e.to_string()))?;
        self.writer
            .write_all(raw.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .map_err(|e| RecordError::Export(e.to_string()))?;
        self.last_tick = line.tick_id;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Load a JSONL export, keyed by tick id.
pub fn read_jsonl(reader: impl BufRead) -> Result<BTreeMap<i64, JsonlTickLine>, RecordError> {
    let mut lines = BTreeMap::new();
    for line in reader.lines() {
        let line = line.map_err(|e| RecordError::Parse(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: JsonlTickLine =
            serde_json::from_str(&line).map_err(|e| RecordError::Parse(e.to_string()))?;
        lines.insert(parsed.tick_id, parsed);
    }
    Ok(lines)
}
