use aom_preferences::PreferenceError;
use thiserror::Error;

/// Failures of the plugin manager itself. Errors raised by plugin code are
/// [`PluginError`](crate::PluginError)s.
#[derive(Error, Debug)]
pub enum PluginSystemError {
    #[error("Plugin loading failed: {0}")]
    LoadingError(String),
    #[error("Invalid plugin descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Dependency missing: {0}")]
    DependencyMissing(String),
    #[error("Cyclic dependency detected for: {0}")]
    CyclicDependency(String),
    #[error("Dependency could not be loaded: {0}")]
    DependencyUnavailable(String),
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),
    #[error("Plugin already exists: {0}")]
    PluginAlreadyExists(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Library error: {0}")]
    LibraryError(String),
    #[error("Version mismatch: {0}")]
    VersionMismatch(String),
    #[error("Preference error: {0}")]
    Preference(#[from] PreferenceError),
}
