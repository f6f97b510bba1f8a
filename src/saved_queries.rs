//! Saved query slots for the TUI.
//!
//! Ten slots (0–9) persisted as a JSON object at
//! `<gai_home>/saved_queries.json`, keyed by the slot digit.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AceError, Result};

pub const SLOT_COUNT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedQueries {
    slots: [Option<String>; SLOT_COUNT],
}

impl SavedQueries {
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(AceError::io(path, e)),
        };
        let map: BTreeMap<String, String> = serde_json::from_str(&text)
            .map_err(|e| AceError::Parse(format!("{}: {e}", path.display())))?;

        let mut queries = Self::default();
        for (key, value) in map {
            if let Ok(slot) = key.parse::<usize>() {
                if slot < SLOT_COUNT {
                    queries.slots[slot] = Some(value);
                }
            }
        }
        Ok(queries)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let map: BTreeMap<String, &String> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, query)| query.as_ref().map(|q| (slot.to_string(), q)))
            .collect();
        let text = serde_json::to_string_pretty(&map)
            .map_err(|e| AceError::Parse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AceError::io(parent, e))?;
        }
        std::fs::write(path, text).map_err(|e| AceError::io(path, e))
    }

    pub fn get(&self, slot: usize) -> Option<&str> {
        self.slots.get(slot).and_then(|q| q.as_deref())
    }

    pub fn set(&mut self, slot: usize, query: Option<String>) {
        if slot < SLOT_COUNT {
            self.slots[slot] = query;
        }
    }
}
