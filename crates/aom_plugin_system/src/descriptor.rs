//! Static plugin metadata read from `plugin.toml`.

use crate::error::PluginSystemError;
use aom_preferences::{PreferenceReader, Preferences, Value};
use std::path::{Path, PathBuf};

/// Entry symbol used when the manifest does not name one.
pub const DEFAULT_ENTRY: &str = "create_plugin";

/// Immutable manifest of a plugin.
///
/// A plugin lives in its own directory holding a `plugin.toml` and, for
/// dynamically loaded plugins, the compiled library:
///
/// ```toml
/// name = "chat"
/// version = "1.2.0"
/// website = "https://example.org"
/// authors = ["Ada"]
/// dependencies = ["permissions"]
/// entry = "create_plugin"
/// library = "libchat.so"
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    name: String,
    version: String,
    website: String,
    authors: Vec<String>,
    dependencies: Vec<String>,
    entry: String,
    library: Option<String>,
    path: PathBuf,
}

impl Descriptor {
    pub const FILE_NAME: &'static str = "plugin.toml";

    /// Descriptor for a plugin that is not backed by a manifest, typically a
    /// statically linked one.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0".to_string(),
            website: "Unknown".to_string(),
            authors: Vec::new(),
            dependencies: Vec::new(),
            entry: DEFAULT_ENTRY.to_string(),
            library: None,
            path: PathBuf::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Reads `<directory>/plugin.toml`.
    pub fn load(directory: impl AsRef<Path>) -> Result<Self, PluginSystemError> {
        let directory = directory.as_ref();
        let preferences = Preferences::load(directory.join(Self::FILE_NAME))?;
        Self::from_preferences(&preferences, directory)
    }

    /// Builds a descriptor from already parsed manifest data.
    ///
    /// `name` is mandatory; everything else has a default.
    pub fn from_preferences(
        manifest: &impl PreferenceReader,
        directory: impl Into<PathBuf>,
    ) -> Result<Self, PluginSystemError> {
        let path = directory.into();
        let name = manifest.get_string("name", "").trim().to_string();
        if name.is_empty() {
            return Err(PluginSystemError::InvalidDescriptor(format!(
                "'name' is missing from {}",
                path.join(Self::FILE_NAME).display()
            )));
        }

        // Accept both `version = 3` and `version = "1.2.0"`.
        let version = match manifest.get("version") {
            Some(Value::String(version)) => version.clone(),
            Some(Value::Integer(version)) => version.to_string(),
            Some(Value::Float(version)) => version.to_string(),
            _ => "0".to_string(),
        };

        let entry = manifest.get_string("entry", DEFAULT_ENTRY);
        if entry.trim().is_empty() {
            return Err(PluginSystemError::InvalidDescriptor(format!(
                "'entry' of plugin {} is empty",
                name
            )));
        }

        let library = manifest
            .get("library")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            name,
            version,
            website: manifest.get_string("website", "Unknown"),
            authors: manifest.get_string_list("authors"),
            dependencies: manifest.get_string_list("dependencies"),
            entry,
            library,
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn website(&self) -> &str {
        &self.website
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Name of the symbol, or the registered constructor, that creates the
    /// plugin instance.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Directory the plugin was discovered in. Plugins keep their own data
    /// there.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the dynamic library: the manifest's `library` if given,
    /// otherwise the platform's naming of the plugin name
    /// (`libchat.so`, `libchat.dylib`, `chat.dll`).
    pub fn library_path(&self) -> PathBuf {
        match &self.library {
            Some(library) => self.path.join(library),
            None => self.path.join(format!(
                "{}{}{}",
                std::env::consts::DLL_PREFIX,
                self.name,
                std::env::consts::DLL_SUFFIX
            )),
        }
    }
}
