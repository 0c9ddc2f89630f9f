//! # AoM Preferences
//!
//! Hierarchical key-value configuration, read through dotted paths such as
//! `network.port`. Backed by a TOML document.
//!
//! ```rust
//! use aom_preferences::{PreferenceReader, Preferences};
//!
//! let prefs: Preferences = r#"
//! [network]
//! address = "0.0.0.0"
//! port = 10000
//! "#.parse()?;
//!
//! assert_eq!(prefs.get_int("network.port", 0), 10000);
//! assert_eq!(prefs.get_string("network.missing", "fallback"), "fallback");
//! let network = prefs.section("network").unwrap();
//! assert_eq!(network.get_string("address", ""), "0.0.0.0");
//! # Ok::<(), aom_preferences::PreferenceError>(())
//! ```

mod error;

pub use error::PreferenceError;
pub use toml::{Table, Value};

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Separator between the segments of a preference path.
pub const PATH_SEPARATOR: char = '.';

fn lookup<'a>(table: &'a Table, path: &str) -> Option<&'a Value> {
    let mut segments = path.split(PATH_SEPARATOR);
    let mut current = table.get(segments.next()?)?;
    for segment in segments {
        current = current.as_table()?.get(segment)?;
    }
    Some(current)
}

fn lookup_table_mut<'a>(table: &'a mut Table, path: &str) -> Result<&'a mut Table, PreferenceError> {
    let mut current = table;
    for segment in path.split(PATH_SEPARATOR) {
        if segment.is_empty() {
            return Err(PreferenceError::EmptyPath);
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        current = match entry {
            Value::Table(inner) => inner,
            _ => return Err(PreferenceError::NotASection(path.to_string())),
        };
    }
    Ok(current)
}

/// Read accessors shared by whole documents and their sections.
///
/// Typed getters fall back to `default` when the path is absent or holds a
/// value of another type.
pub trait PreferenceReader {
    fn get(&self, path: &str) -> Option<&Value>;

    fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    fn get_string(&self, path: &str, default: &str) -> String {
        self.get(path)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    fn get_int(&self, path: &str, default: i64) -> i64 {
        self.get(path).and_then(Value::as_integer).unwrap_or(default)
    }

    /// Integers are widened, so `port = 10` reads as `10.0`.
    fn get_float(&self, path: &str, default: f64) -> f64 {
        match self.get(path) {
            Some(Value::Float(value)) => *value,
            Some(Value::Integer(value)) => *value as f64,
            _ => default,
        }
    }

    fn get_bool(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(Value::as_bool).unwrap_or(default)
    }

    fn get_list(&self, path: &str) -> Option<&Vec<Value>> {
        self.get(path).and_then(Value::as_array)
    }

    /// Every element rendered as a string; an absent list reads as empty.
    fn get_string_list(&self, path: &str) -> Vec<String> {
        self.get_list(path)
            .map(|values| {
                values
                    .iter()
                    .map(|value| match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A preference document, optionally tied to the file it was loaded from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preferences {
    root: Table,
    path: Option<PathBuf>,
}

impl Preferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and parses a TOML file. The file is remembered for [`Preferences::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PreferenceError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let mut preferences: Preferences = content.parse()?;
        preferences.path = Some(path.to_path_buf());
        debug!("📄 Loaded preferences from {}", path.display());
        Ok(preferences)
    }

    /// Writes the document back to the file it was loaded from.
    pub fn save(&self) -> Result<(), PreferenceError> {
        let path = self.path.as_ref().ok_or(PreferenceError::NoBackingFile)?;
        self.save_to(path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), PreferenceError> {
        let content = toml::to_string_pretty(&self.root)?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn file(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn root(&self) -> PreferenceSection<'_> {
        PreferenceSection {
            path: String::new(),
            table: &self.root,
        }
    }

    /// The table found at `path`, if there is one.
    pub fn section(&self, path: &str) -> Option<PreferenceSection<'_>> {
        let table = lookup(&self.root, path)?.as_table()?;
        Some(PreferenceSection {
            path: path.to_string(),
            table,
        })
    }

    /// Creates every missing table along `path` and returns the last one.
    pub fn create_section(&mut self, path: &str) -> Result<&mut Table, PreferenceError> {
        lookup_table_mut(&mut self.root, path)
    }

    /// Stores `value` at `path`, creating intermediate sections as needed.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), PreferenceError> {
        let (parent, key) = match path.rsplit_once(PATH_SEPARATOR) {
            Some((parent, key)) => (Some(parent), key),
            None => (None, path),
        };
        if key.is_empty() {
            return Err(PreferenceError::EmptyPath);
        }
        let table = match parent {
            Some(parent) => lookup_table_mut(&mut self.root, parent)?,
            None => &mut self.root,
        };
        table.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Top level keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.root.keys().cloned().collect()
    }
}

impl FromStr for Preferences {
    type Err = PreferenceError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            root: toml::from_str(content)?,
            path: None,
        })
    }
}

impl PreferenceReader for Preferences {
    fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.root, path)
    }
}

/// A read-only view of one table inside a [`Preferences`] document.
#[derive(Debug, Clone)]
pub struct PreferenceSection<'a> {
    path: String,
    table: &'a Table,
}

impl<'a> PreferenceSection<'a> {
    /// Last segment of the path; empty for the document root.
    pub fn name(&self) -> &str {
        self.path.rsplit(PATH_SEPARATOR).next().unwrap_or("")
    }

    /// Full dotted path from the document root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn section(&self, path: &str) -> Option<PreferenceSection<'a>> {
        let table = lookup(self.table, path)?.as_table()?;
        let full = if self.path.is_empty() {
            path.to_string()
        } else {
            format!("{}{}{}", self.path, PATH_SEPARATOR, path)
        };
        Some(PreferenceSection {
            path: full,
            table,
        })
    }

    /// Keys of this table in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.table.keys().cloned().collect()
    }
}

impl PreferenceReader for PreferenceSection<'_> {
    fn get(&self, path: &str) -> Option<&Value> {
        lookup(self.table, path)
    }
}
