//! Error types for preference files.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse preferences: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize preferences: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("'{0}' exists and is not a section")]
    NotASection(String),

    #[error("Preference path is empty")]
    EmptyPath,

    #[error("Preferences were not loaded from a file and cannot be saved in place")]
    NoBackingFile,

    #[error("Preferences file not found: {0}")]
    NotFound(PathBuf),
}
