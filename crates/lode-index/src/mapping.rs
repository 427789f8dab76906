//! Position-to-key mapping persisted next to the index.
//!
//! `keys[i]` names the passage stored at index position `i`. The mapping file
//! is the commit marker of the store: a key is durable once it appears here.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use lode_core::error::{LodeError, Result};
use lode_core::types::PassageMeta;

use crate::atomic;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub keys: Vec<String>,
    pub meta: BTreeMap<String, PassageMeta>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.meta.contains_key(key)
    }

    /// Key stored at `position`, if any.
    pub fn key_at(&self, position: usize) -> Option<&str> {
        self.keys.get(position).map(String::as_str)
    }

    /// Append `key` at the next position.
    pub fn push(&mut self, key: impl Into<String>, meta: PassageMeta) -> Result<()> {
        let key = key.into();
        if self.contains(&key) {
            return Err(LodeError::Validation(format!(
                "key {} is already mapped",
                key
            )));
        }
        self.keys.push(key.clone());
        self.meta.insert(key, meta);
        Ok(())
    }

    /// Undo the most recent [`Mapping::push`].
    pub fn pop(&mut self) -> Option<String> {
        let key = self.keys.pop()?;
        self.meta.remove(&key);
        Some(key)
    }

    /// Load a mapping file; a missing file is an empty mapping.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let mapping: Mapping = serde_json::from_str(&content).map_err(|e| {
            LodeError::Validation(format!("malformed mapping {}: {}", path.display(), e))
        })?;
        mapping.validate()?;
        Ok(mapping)
    }

    /// Persist the mapping as pretty-printed JSON via write-then-rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic::write_atomically(path, |writer| {
            serde_json::to_writer_pretty(writer, self)?;
            Ok(())
        })
    }

    /// Keys must be unique and each must carry metadata.
    fn validate(&self) -> Result<()> {
        if self.meta.len() != self.keys.len() {
            return Err(LodeError::Validation(format!(
                "mapping lists {} keys but {} metadata records",
                self.keys.len(),
                self.meta.len()
            )));
        }
        if let Some(key) = self.keys.iter().find(|k| !self.meta.contains_key(k.as_str())) {
            return Err(LodeError::Validation(format!(
                "mapping key {} has no metadata",
                key
            )));
        }
        Ok(())
    }
}
