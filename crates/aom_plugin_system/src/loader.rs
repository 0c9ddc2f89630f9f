//! Turning a [`Descriptor`] into a live [`Plugin`] instance.

use crate::descriptor::Descriptor;
use crate::error::PluginSystemError;
use crate::plugin::Plugin;
use crate::ABI_VERSION;
use libloading::{Library, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::os::raw::c_char;
use tracing::{info, warn};

/// Symbol every dynamic plugin exports with the ABI it was built against.
pub const VERSION_SYMBOL: &str = "get_plugin_version";

const MAX_PLUGIN_VERSION_LENGTH: usize = 1024;

/// A created plugin together with whatever keeps its code mapped.
///
/// The instance is dropped before the library it came from. The
/// [`PluginManager`](crate::PluginManager) takes the library out on unload and
/// keeps it open until the manager itself is dropped.
pub struct PluginInstance {
    plugin: Box<dyn Plugin>,
    library: Option<Library>,
}

impl PluginInstance {
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        Self {
            plugin,
            library: None,
        }
    }

    /// A plugin whose code lives in `library`.
    pub fn with_library(plugin: Box<dyn Plugin>, library: Library) -> Self {
        Self {
            plugin,
            library: Some(library),
        }
    }

    pub fn plugin_mut(&mut self) -> &mut dyn Plugin {
        self.plugin.as_mut()
    }

    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }

    pub(crate) fn take_library(&mut self) -> Option<Library> {
        self.library.take()
    }
}

/// Creates plugin instances from descriptors.
pub trait PluginLoader: Send + Sync {
    fn load(&self, descriptor: &Descriptor) -> Result<PluginInstance, PluginSystemError>;
}

/// Safety switches for loading dynamic libraries built by someone else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginSafetyConfig {
    /// Accept plugins built with a different Rust compiler.
    pub allow_unsafe_plugins: bool,
    /// Accept plugins built against an incompatible engine version.
    pub allow_abi_mismatch: bool,
    /// Require the exact engine version instead of a major.minor match.
    pub strict_versioning: bool,
}

/// Loads plugins from dynamic libraries built with [`export_plugin!`](crate::export_plugin).
///
/// The library must export [`VERSION_SYMBOL`], returning the ABI string the
/// plugin was compiled against, and the descriptor's entry symbol, returning
/// a boxed [`Plugin`].
#[derive(Debug, Default)]
pub struct DynamicLoader {
    safety: PluginSafetyConfig,
}

impl DynamicLoader {
    pub fn new(safety: PluginSafetyConfig) -> Self {
        if safety.allow_unsafe_plugins {
            warn!("⚠️ Plugins built with a different Rust compiler will be accepted");
        }
        if safety.allow_abi_mismatch {
            warn!("⚠️ Plugins built against a different engine version will be accepted");
        }
        Self { safety }
    }

    pub fn safety(&self) -> &PluginSafetyConfig {
        &self.safety
    }

    /// Checks a plugin's `crate_version:rust_version` string against ours.
    pub fn validate_compatibility(&self, plugin_version: &str, expected_version: &str) -> Result<(), PluginSystemError> {
        let (plugin_crate_version, plugin_rust_version) = split_abi(plugin_version);
        let (expected_crate_version, expected_rust_version) = split_abi(expected_version);
        let (
            Some(plugin_crate_version),
            Some(plugin_rust_version),
            Some(expected_crate_version),
            Some(expected_rust_version),
        ) = (plugin_crate_version, plugin_rust_version, expected_crate_version, expected_rust_version)
        else {
            return Err(PluginSystemError::VersionMismatch(format!(
                "Invalid version format. Expected 'crate:rust', got plugin='{}', expected='{}'",
                plugin_version, expected_version
            )));
        };

        let versions_compatible = if self.safety.strict_versioning {
            plugin_crate_version == expected_crate_version
        } else {
            versions_major_minor_compatible(plugin_crate_version, expected_crate_version)
        };

        if !versions_compatible && !self.safety.allow_abi_mismatch {
            let comparison = if self.safety.strict_versioning { "exact" } else { "major.minor" };
            return Err(PluginSystemError::VersionMismatch(format!(
                "ABI version mismatch: plugin built against aom_plugin_system v{}, but the engine uses v{} ({} match required). \
                Rebuild the plugin against the engine, or pass --danger-allow-abi-mismatch to load it anyway.",
                plugin_crate_version, expected_crate_version, comparison
            )));
        }

        let rust_mismatch = plugin_rust_version != expected_rust_version
            && plugin_rust_version != "unknown"
            && expected_rust_version != "unknown";

        if rust_mismatch && !self.safety.allow_unsafe_plugins {
            return Err(PluginSystemError::VersionMismatch(format!(
                "Rust compiler version mismatch: plugin built with Rust {}, but the engine with Rust {}. \
                Trait object layouts may differ. Rebuild with the same compiler, or pass --danger-allow-unsafe-plugins.",
                plugin_rust_version, expected_rust_version
            )));
        }

        if !versions_compatible {
            warn!(
                "Loading plugin with ABI version mismatch (override enabled): plugin v{} != engine v{}",
                plugin_crate_version, expected_crate_version
            );
        }
        if rust_mismatch {
            warn!(
                "Loading plugin with Rust compiler version mismatch (override enabled): plugin {} != engine {}",
                plugin_rust_version, expected_rust_version
            );
        }

        Ok(())
    }
}

fn split_abi(version: &str) -> (Option<&str>, Option<&str>) {
    let mut parts = version.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(crate_version), Some(rust_version), None) => (Some(crate_version), Some(rust_version)),
        _ => (None, None),
    }
}

/// Major and minor must match, the patch level is ignored.
pub fn versions_major_minor_compatible(plugin_version: &str, expected_version: &str) -> bool {
    let parse_major_minor = |version: &str| -> Option<(u32, u32)> {
        let mut parts = version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some((major, minor))
    };

    match (parse_major_minor(plugin_version), parse_major_minor(expected_version)) {
        (Some(plugin), Some(expected)) => plugin == expected,
        _ => plugin_version == expected_version,
    }
}

impl PluginLoader for DynamicLoader {
    fn load(&self, descriptor: &Descriptor) -> Result<PluginInstance, PluginSystemError> {
        let path = descriptor.library_path();
        info!("🔄 Loading plugin library: {}", path.display());

        let library = unsafe {
            Library::new(&path).map_err(|e| {
                PluginSystemError::LibraryError(format!("Failed to load {}: {}", path.display(), e))
            })?
        };

        let plugin_version = {
            let get_plugin_version: Symbol<unsafe extern "C" fn() -> *const c_char> = unsafe {
                library.get(VERSION_SYMBOL.as_bytes()).map_err(|e| {
                    PluginSystemError::LoadingError(format!(
                        "Plugin does not export '{}': {}",
                        VERSION_SYMBOL, e
                    ))
                })?
            };
            read_version(unsafe { get_plugin_version() })?
        };
        self.validate_compatibility(&plugin_version, ABI_VERSION)?;

        let plugin = {
            let entry = descriptor.entry();
            let create_plugin: Symbol<unsafe extern "C" fn() -> *mut dyn Plugin> = unsafe {
                library.get(entry.as_bytes()).map_err(|e| {
                    PluginSystemError::LoadingError(format!("Plugin does not export '{}': {}", entry, e))
                })?
            };
            let plugin_ptr = unsafe { create_plugin() };
            if plugin_ptr.is_null() {
                return Err(PluginSystemError::LoadingError(format!(
                    "'{}' returned null",
                    entry
                )));
            }
            unsafe { Box::from_raw(plugin_ptr) }
        };

        Ok(PluginInstance::with_library(plugin, library))
    }
}

fn read_version(pointer: *const c_char) -> Result<String, PluginSystemError> {
    if pointer.is_null() {
        return Err(PluginSystemError::LoadingError(
            "Plugin returned null version string".to_string(),
        ));
    }
    let mut length = 0;
    while unsafe { *pointer.add(length) } != 0 {
        length += 1;
        if length == MAX_PLUGIN_VERSION_LENGTH {
            return Err(PluginSystemError::LoadingError(
                "Plugin version string is not null-terminated".to_string(),
            ));
        }
    }
    let bytes = unsafe { std::slice::from_raw_parts(pointer as *const u8, length) };
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

type Constructor = Box<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Creates plugins linked into the engine binary, keyed by entry name.
#[derive(Default)]
pub struct StaticLoader {
    constructors: HashMap<String, Constructor>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` under `entry`, replacing an earlier one.
    pub fn register<F, P>(mut self, entry: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Plugin + 'static,
    {
        self.constructors
            .insert(entry.into(), Box::new(move || Box::new(constructor()) as Box<dyn Plugin>));
        self
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.constructors.contains_key(entry)
    }
}

impl PluginLoader for StaticLoader {
    fn load(&self, descriptor: &Descriptor) -> Result<PluginInstance, PluginSystemError> {
        let constructor = self.constructors.get(descriptor.entry()).ok_or_else(|| {
            PluginSystemError::LoadingError(format!(
                "No plugin registered for entry '{}'",
                descriptor.entry()
            ))
        })?;
        Ok(PluginInstance::new(constructor()))
    }
}

impl std::fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticLoader")
            .field("entries", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Tries each loader in turn and returns the first success.
///
/// Lets statically linked plugins and dynamic ones share a plugin directory.
pub struct ChainLoader {
    loaders: Vec<Box<dyn PluginLoader>>,
}

impl ChainLoader {
    pub fn new(loaders: Vec<Box<dyn PluginLoader>>) -> Self {
        Self { loaders }
    }
}

impl PluginLoader for ChainLoader {
    fn load(&self, descriptor: &Descriptor) -> Result<PluginInstance, PluginSystemError> {
        let mut last_error = None;
        for loader in &self.loaders {
            match loader.load(descriptor) {
                Ok(instance) => return Ok(instance),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            PluginSystemError::LoadingError("No plugin loader configured".to_string())
        }))
    }
}
