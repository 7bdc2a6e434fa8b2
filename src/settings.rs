//! Hierarchical key-value settings store.
//!
//! Every configurable component (plugin, module, the run itself) owns one
//! named group of scalar options. Components read their group in
//! `apply_settings` and write it back in `save_settings`; the store itself
//! is a plain TOML document so a settings file is diffable and editable by
//! hand.
//!
//! The store is deliberately dumb: no defaults, no validation. A component
//! that does not find a key keeps its current value, which makes partially
//! filled settings files valid.

use crate::error::{AppResult, DaqError};
use std::path::Path;
use toml::Table;

/// A TOML-backed settings document, one table per component name.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    root: Table,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a store from TOML text.
    pub fn from_str(text: &str) -> AppResult<Self> {
        let root = text
            .parse::<Table>()
            .map_err(|e| DaqError::Settings(e.to_string()))?;
        Ok(Self { root })
    }

    /// Load a store from a TOML file.
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Write the store to a TOML file.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let text =
            toml::to_string_pretty(&self.root).map_err(|e| DaqError::Settings(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Read-only view of a component's group. Absent groups read as empty.
    pub fn group<'a>(&'a self, name: &str) -> SettingsGroup<'a> {
        SettingsGroup {
            table: self.root.get(name).and_then(|v| v.as_table()),
        }
    }

    /// Writable view of a component's group, created on first use.
    pub fn group_mut<'a>(&'a mut self, name: &str) -> SettingsGroupMut<'a> {
        let entry = self
            .root
            .entry(name.to_string())
            .or_insert_with(|| toml::Value::Table(Table::new()));
        if entry.as_table().is_none() {
            *entry = toml::Value::Table(Table::new());
        }
        // The entry was just forced to a table.
        match entry.as_table_mut() {
            Some(table) => SettingsGroupMut { table },
            None => unreachable!(),
        }
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.root
            .get(name)
            .and_then(|v| v.as_table())
            .is_some()
    }

    /// The raw document, for loaders that deserialize whole sections.
    pub fn root(&self) -> &Table {
        &self.root
    }
}

/// Read-only accessor over one component's scalar options.
#[derive(Debug, Clone, Copy)]
pub struct SettingsGroup<'a> {
    table: Option<&'a Table>,
}

impl<'a> SettingsGroup<'a> {
    /// Wrap an attribute table directly, as used by plugin factories.
    pub fn from_table(table: &'a Table) -> Self {
        Self { table: Some(table) }
    }

    pub fn is_empty(&self) -> bool {
        self.table.map(|t| t.is_empty()).unwrap_or(true)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.table?.get(key)?.as_integer()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        let value = self.table?.get(key)?;
        value.as_float().or_else(|| value.as_integer().map(|i| i as f64))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.table?.get(key)?.as_bool()
    }

    pub fn get_str(&self, key: &str) -> Option<&'a str> {
        self.table?.get(key)?.as_str()
    }

    /// Integer read clamped to `usize`, ignoring negative values.
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get_i64(key).and_then(|v| usize::try_from(v).ok())
    }

    /// Integer read clamped to `u16`, ignoring out-of-range values.
    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.get_i64(key).and_then(|v| u16::try_from(v).ok())
    }

    /// Integer read clamped to `u64`, ignoring negative values.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_i64(key).and_then(|v| u64::try_from(v).ok())
    }
}

/// Writable accessor over one component's scalar options.
#[derive(Debug)]
pub struct SettingsGroupMut<'a> {
    table: &'a mut Table,
}

impl SettingsGroupMut<'_> {
    pub fn set_i64(&mut self, key: &str, value: i64) {
        self.table.insert(key.to_string(), toml::Value::Integer(value));
    }

    pub fn set_f64(&mut self, key: &str, value: f64) {
        self.table.insert(key.to_string(), toml::Value::Float(value));
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.table.insert(key.to_string(), toml::Value::Boolean(value));
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.table
            .insert(key.to_string(), toml::Value::String(value.to_string()));
    }
}
