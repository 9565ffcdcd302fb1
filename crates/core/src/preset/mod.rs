use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// A named preset. The payload is opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetEntry {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PresetEntry {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Ordered set of presets with unique names.
#[derive(Debug, Clone, Default)]
pub struct PresetLibrary {
    entries: Vec<PresetEntry>,
}

impl PresetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<PresetEntry>) -> Result<Self> {
        let mut library = Self::new();
        for entry in entries {
            library.insert(entry)?;
        }
        Ok(library)
    }

    /// Loads a JSON object mapping preset names to payloads.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)?;
        Self::from_entries(
            map.into_iter()
                .map(|(name, payload)| PresetEntry::new(name, payload))
                .collect(),
        )
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn insert(&mut self, entry: PresetEntry) -> Result<()> {
        if self.get(&entry.name).is_some() {
            return Err(EngineError::msg(format!(
                "duplicate preset name `{}`",
                entry.name
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PresetEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    pub fn entries(&self) -> &[PresetEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<PresetEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_duplicate_names() {
        let err = PresetLibrary::from_entries(vec![
            PresetEntry::new("Flexi - mindblob", json!({})),
            PresetEntry::new("Flexi - mindblob", json!({ "v": 2 })),
        ])
        .unwrap_err();
        assert!(format!("{err}").contains("mindblob"));
    }

    #[test]
    fn loads_name_to_payload_maps() {
        let library =
            PresetLibrary::from_json_str(r#"{ "b": { "warp": 1.0 }, "a": { "zoom": 0.9 } }"#)
                .unwrap();

        assert_eq!(library.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(library.get("b").unwrap().payload["warp"], json!(1.0));
    }
}
