//! Local persistence for the scrolling text list.
//!
//! The list lives under a single key in a small key-value store. The file
//! backed store keeps every key in one JSON object.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key the text list is stored under
pub const TEXTS_KEY: &str = "wholesomeTexts";

pub trait KeyValueStore: Send {
    fn load_list(&self, key: &str) -> Result<Option<Vec<String>>>;
    fn store_list(&mut self, key: &str, values: &[String]) -> Result<()>;
}

/// In-process store, nothing is written to disk
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<String>>,
}

impl KeyValueStore for MemoryStore {
    fn load_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn store_list(&mut self, key: &str, values: &[String]) -> Result<()> {
        self.entries.insert(key.to_string(), values.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("{} is not a JSON object", self.path.display()),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn load_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        let map = self.read_all()?;
        match map.get(key) {
            Some(value) => {
                let list = serde_json::from_value(value.clone())
                    .with_context(|| format!("key `{}` is not a list of strings", key))?;
                Ok(Some(list))
            }
            None => Ok(None),
        }
    }

    fn store_list(&mut self, key: &str, values: &[String]) -> Result<()> {
        // An unreadable file is left alone rather than replaced
        let mut map = self.read_all()?;
        map.insert(key.to_string(), serde_json::to_value(values)?);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&Value::Object(map))?;
        fs::write(&self.path, json).with_context(|| format!("writing {}", self.path.display()))?;
        debug!("Stored {} entries under `{}`", values.len(), key);
        Ok(())
    }
}
