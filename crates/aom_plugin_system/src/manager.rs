use crate::descriptor::Descriptor;
use crate::error::PluginSystemError;
use crate::loader::{PluginInstance, PluginLoader};
use crate::order::{resolve_load_order_with, Unresolved};
use crate::plugin::{Plugin, PluginContext, PluginError, PluginState, PluginStateEvent};
use aom_event_system::{EventBus, Owner, Scheduler};
use aom_scheduler::panic_message;
use aom_server::SessionManager;
use dashmap::DashMap;
use libloading::Library;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, info_span, warn, Span};

/// A plugin held by the [`PluginManager`].
pub struct LoadedPlugin {
    context: PluginContext,
    enabled: AtomicBool,
    span: Span,
    instance: Mutex<PluginInstance>,
}

impl LoadedPlugin {
    fn new(context: PluginContext, instance: PluginInstance) -> Self {
        let span = info_span!("plugin", name = %context.descriptor().name());
        Self {
            context,
            enabled: AtomicBool::new(false),
            span,
            instance: Mutex::new(instance),
        }
    }

    pub fn name(&self) -> &str {
        self.context.descriptor().name()
    }

    pub fn descriptor(&self) -> &Descriptor {
        self.context.descriptor()
    }

    pub fn owner(&self) -> &Owner {
        self.context.owner()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Runs a lifecycle hook inside the plugin's span, turning a panic into a
    /// [`PluginError::Runtime`].
    fn run_hook<F>(&self, hook: F) -> Result<(), PluginError>
    where
        F: FnOnce(&mut dyn Plugin, &PluginContext) -> Result<(), PluginError>,
    {
        let _entered = self.span.enter();
        let mut instance = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        catch_unwind(AssertUnwindSafe(|| hook(instance.plugin_mut(), &self.context))).unwrap_or_else(
            |payload| {
                Err(PluginError::Runtime(format!(
                    "Plugin panicked: {}",
                    panic_message(payload.as_ref())
                )))
            },
        )
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("name", &self.name())
            .field("version", &self.descriptor().version())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Discovers, orders and drives the lifecycle of plugins.
///
/// Each plugin registers its events and tasks under its own [`Owner`], which
/// the manager uses to tear them down when the plugin is unloaded. A failing
/// plugin never stops the others from loading, enabling or disabling.
///
/// # Lifecycle
///
/// ```text
/// load ──▶ Loaded ──enable──▶ Enabled ──disable──▶ Disabled ──unload──▶ gone
///                                 └──────────────unload (disables first)───▶
/// ```
pub struct PluginManager {
    scheduler: Arc<Scheduler>,
    events: Arc<EventBus>,
    sessions: Arc<SessionManager>,
    loader: Box<dyn PluginLoader>,
    plugins: DashMap<String, Arc<LoadedPlugin>>,
    order: Mutex<Vec<String>>,
    // Cancelled tasks and in-flight handler snapshots may still hold closures
    // built by an unloaded plugin. Its library stays mapped until this field
    // drops, which is after the scheduler and event bus handles above.
    retired: Mutex<Vec<(String, Library)>>,
}

impl PluginManager {
    pub fn new(events: Arc<EventBus>, sessions: Arc<SessionManager>, loader: Box<dyn PluginLoader>) -> Self {
        Self {
            scheduler: Arc::clone(events.scheduler()),
            events,
            sessions,
            loader,
            plugins: DashMap::new(),
            order: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Reads the descriptor of every plugin directory below `directory`,
    /// creating `directory` when it does not exist yet.
    ///
    /// A subdirectory is a plugin when it holds a `plugin.toml`. Unreadable
    /// manifests and duplicate names are logged and skipped.
    pub fn discover<P: AsRef<Path>>(&self, directory: P) -> Result<Vec<Descriptor>, PluginSystemError> {
        let directory = directory.as_ref();
        if !directory.exists() {
            std::fs::create_dir_all(directory)?;
            info!("📁 Created plugin directory: {}", directory.display());
        }

        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(directory)? {
            let path = entry?.path();
            if path.is_dir() && path.join(Descriptor::FILE_NAME).is_file() {
                candidates.push(path);
            }
        }
        candidates.sort();

        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(candidates.len());
        for path in candidates {
            match Descriptor::load(&path) {
                Ok(descriptor) if !seen.insert(descriptor.name().to_string()) => {
                    warn!(
                        "⚠️ Skipping {}: another plugin is already named {}",
                        path.display(),
                        descriptor.name()
                    );
                }
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => error!("❌ Could not load '{}': {}", path.display(), e),
            }
        }

        debug!("🔍 Discovered {} plugin(s) in {}", descriptors.len(), directory.display());
        Ok(descriptors)
    }

    /// Discovers and loads every plugin in `directory` in dependency order.
    ///
    /// # Returns
    ///
    /// The number of plugins that loaded.
    pub fn load_plugins<P: AsRef<Path>>(&self, directory: P) -> usize {
        let directory = directory.as_ref();
        info!("🔌 Loading plugins from: {}", directory.display());
        match self.discover(directory) {
            Ok(descriptors) => self.load_descriptors(descriptors),
            Err(e) => {
                error!("❌ Failed to scan {}: {}", directory.display(), e);
                0
            }
        }
    }

    /// Loads `descriptors` in dependency order. Plugins caught in a cycle or
    /// missing a dependency are reported and left out.
    pub fn load_descriptors(&self, descriptors: Vec<Descriptor>) -> usize {
        let order = resolve_load_order_with(&descriptors, |name| self.is_loaded(name));
        let mut by_name: HashMap<String, Descriptor> = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.name().to_string(), descriptor))
            .collect();

        for (name, reason) in &order.unresolved {
            let error = match reason {
                Unresolved::Missing(missing) => PluginSystemError::DependencyMissing(missing.join(", ")),
                Unresolved::Cycle => PluginSystemError::CyclicDependency(name.clone()),
                Unresolved::Blocked(blocked) => PluginSystemError::DependencyUnavailable(blocked.join(", ")),
            };
            warn!("⚠️ {} not loaded: {}", name, error);
        }

        let mut loaded = 0;
        for name in order.ordered {
            let Some(descriptor) = by_name.remove(&name) else {
                continue;
            };
            match self.load_plugin(descriptor) {
                Ok(()) => loaded += 1,
                Err(e) => error!("❌ Failed to load plugin {}: {}", name, e),
            }
        }

        info!("🔌 {} plugin(s) loaded", loaded);
        loaded
    }

    /// Loads a single plugin. Every dependency must already be loaded.
    pub fn load_plugin(&self, descriptor: Descriptor) -> Result<(), PluginSystemError> {
        let name = descriptor.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(PluginSystemError::PluginAlreadyExists(name));
        }
        if let Some(missing) = descriptor
            .dependencies()
            .iter()
            .find(|dependency| !self.plugins.contains_key(dependency.as_str()))
        {
            return Err(PluginSystemError::DependencyMissing(missing.clone()));
        }

        info!("📦 {} v{} is being loaded", name, descriptor.version());
        let instance = self.loader.load(&descriptor)?;
        let context = PluginContext::new(
            Arc::new(descriptor),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.events),
            Arc::clone(&self.sessions),
        );
        let plugin = Arc::new(LoadedPlugin::new(context, instance));

        if let Err(e) = plugin.run_hook(|plugin, context| plugin.on_loaded(context)) {
            self.release(&plugin);
            self.retire(&plugin);
            return Err(PluginSystemError::LoadingError(format!("{}: {}", name, e)));
        }

        self.plugins.insert(name.clone(), plugin);
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.clone());
        info!("✅ {} loaded", name);
        self.events.invoke_event(PluginStateEvent::new(name, PluginState::Loaded));
        Ok(())
    }

    /// Enables a plugin.
    ///
    /// # Returns
    ///
    /// `true` if the plugin was disabled before, `false` if it already was
    /// enabled.
    pub fn enable_plugin(&self, name: &str) -> Result<bool, PluginSystemError> {
        let plugin = self.require(name)?;
        Ok(self.enable(&plugin))
    }

    /// Enables every loaded plugin in load order.
    pub fn enable_all(&self) {
        for plugin in self.plugins() {
            self.enable(&plugin);
        }
    }

    /// Disables a plugin.
    ///
    /// # Returns
    ///
    /// `true` if the plugin was enabled before.
    pub fn disable_plugin(&self, name: &str) -> Result<bool, PluginSystemError> {
        let plugin = self.require(name)?;
        Ok(self.disable(&plugin))
    }

    /// Disables every loaded plugin in reverse load order.
    pub fn disable_all(&self) {
        for plugin in self.plugins().into_iter().rev() {
            self.disable(&plugin);
        }
    }

    /// Unloads a plugin, disabling it first if needed. Everything registered
    /// under its owner is cancelled.
    pub fn unload_plugin(&self, name: &str) -> Result<(), PluginSystemError> {
        let plugin = self.require(name)?;
        self.unload(&plugin);
        Ok(())
    }

    /// Unloads every plugin in reverse load order.
    pub fn unload_all(&self) {
        for plugin in self.plugins().into_iter().rev() {
            self.unload(&plugin);
        }
    }

    fn enable(&self, plugin: &LoadedPlugin) -> bool {
        if plugin.enabled.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!("▶️ {} is being enabled", plugin.name());
        if let Err(e) = plugin.run_hook(|plugin, context| plugin.on_enabled(context)) {
            warn!("⚠️ Exception when enabling {}: {}", plugin.name(), e);
        }
        self.events
            .invoke_event(PluginStateEvent::new(plugin.name(), PluginState::Enabled));
        true
    }

    fn disable(&self, plugin: &LoadedPlugin) -> bool {
        if !plugin.enabled.swap(false, Ordering::AcqRel) {
            return false;
        }
        info!("⏸️ {} is being disabled", plugin.name());
        if let Err(e) = plugin.run_hook(|plugin, context| plugin.on_disabled(context)) {
            warn!("⚠️ Exception when disabling {}: {}", plugin.name(), e);
        }
        self.events
            .invoke_event(PluginStateEvent::new(plugin.name(), PluginState::Disabled));
        true
    }

    fn unload(&self, plugin: &LoadedPlugin) {
        let name = plugin.name().to_string();
        let dependents: Vec<String> = self
            .plugins()
            .iter()
            .filter(|other| other.descriptor().dependencies().contains(&name))
            .map(|other| other.name().to_string())
            .collect();
        if !dependents.is_empty() {
            warn!("⚠️ Unloading {} while {} still depend on it", name, dependents.join(", "));
        }

        self.disable(plugin);
        info!("🗑️ {} is being unloaded", name);
        if let Err(e) = plugin.run_hook(|plugin, context| plugin.on_unloaded(context)) {
            warn!("⚠️ Exception when unloading {}: {}", name, e);
        }
        self.release(plugin);
        self.retire(plugin);

        self.plugins.remove(&name);
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|loaded| loaded != &name);
        self.events
            .invoke_event(PluginStateEvent::new(name, PluginState::Unloaded));
    }

    /// Drops every task and event handler registered under the plugin's owner.
    fn release(&self, plugin: &LoadedPlugin) {
        self.scheduler.cancel_all_tasks_by(plugin.owner());
        let handlers = self.events.unregister_all_events_by(plugin.owner());
        debug!("🧹 Released {} event handler(s) of {}", handlers, plugin.name());
    }

    /// Moves the plugin's library, if any, to the retired list.
    fn retire(&self, plugin: &LoadedPlugin) {
        let library = plugin
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take_library();
        if let Some(library) = library {
            debug!("📚 Library of {} kept until shutdown", plugin.name());
            self.retired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((plugin.name().to_string(), library));
        }
    }

    /// Libraries of unloaded plugins that are still mapped.
    pub fn retired_libraries(&self) -> Vec<String> {
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn require(&self, name: &str) -> Result<Arc<LoadedPlugin>, PluginSystemError> {
        self.plugin(name)
            .ok_or_else(|| PluginSystemError::PluginNotFound(name.to_string()))
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<LoadedPlugin>> {
        self.plugins.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Loaded plugins in load order.
    pub fn plugins(&self) -> Vec<Arc<LoadedPlugin>> {
        self.plugin_names()
            .iter()
            .filter_map(|name| self.plugin(name))
            .collect()
    }

    /// Names of the loaded plugins in load order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.plugins
            .get(name)
            .is_some_and(|plugin| plugin.is_enabled())
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        if !self.plugins.is_empty() {
            debug!("Unloading {} plugin(s) left behind", self.plugins.len());
            self.unload_all();
        }
        let retired = self.retired.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !retired.is_empty() {
            // Close in reverse load order once the fields above are gone.
            retired.reverse();
            info!("📚 Unloading {} plugin libraries...", retired.len());
        }
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugin_names())
            .finish()
    }
}
