//! The interface implemented by plugins and what the engine hands them.

use crate::descriptor::Descriptor;
use aom_event_system::{Event, EventBus, Owner, Scheduler};
use aom_server::SessionManager;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors a plugin reports from its lifecycle hooks.
#[derive(Error, Debug)]
pub enum PluginError {
    /// Plugin initialization failed during startup
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),
    /// Error occurred during plugin execution
    #[error("Plugin execution error: {0}")]
    ExecutionError(String),
    /// Runtime error such as panic or system failure
    #[error("Plugin runtime error: {0}")]
    Runtime(String),
}

/// Lifecycle of a plugin.
///
/// Every hook receives the plugin's [`PluginContext`]. Events and tasks
/// registered under [`PluginContext::owner`] are torn down by the manager when
/// the plugin is unloaded, so a plugin only has to clean up state of its own.
///
/// An error returned from [`Plugin::on_loaded`] aborts the load. Errors and
/// panics from the other hooks are logged and the transition still happens.
///
/// # Example
///
/// ```rust,no_run
/// use aom_plugin_system::*;
/// use aom_event_system::EventPriority;
/// use aom_server::SessionConnectedEvent;
///
/// #[derive(Default)]
/// struct Greeter;
///
/// impl Plugin for Greeter {
///     fn on_enabled(&mut self, context: &PluginContext) -> Result<(), PluginError> {
///         context.events().register_event(
///             context.owner().clone(),
///             EventPriority::Lowest,
///             |event: &mut SessionConnectedEvent| {
///                 tracing::info!("👋 Hello {}", event.session().remote_addr());
///             },
///         );
///         Ok(())
///     }
/// }
///
/// export_plugin!(Greeter);
/// ```
pub trait Plugin: Send + Sync {
    /// Called once after the instance is created, before it is registered.
    fn on_loaded(&mut self, _context: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_enabled(&mut self, _context: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_disabled(&mut self, _context: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Last call before the instance is dropped.
    fn on_unloaded(&mut self, _context: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Engine services available to a plugin.
#[derive(Clone)]
pub struct PluginContext {
    owner: Owner,
    descriptor: Arc<Descriptor>,
    scheduler: Arc<Scheduler>,
    events: Arc<EventBus>,
    sessions: Arc<SessionManager>,
}

impl PluginContext {
    pub fn new(
        descriptor: Arc<Descriptor>,
        scheduler: Arc<Scheduler>,
        events: Arc<EventBus>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            owner: Owner::named(descriptor.name()),
            descriptor,
            scheduler,
            events,
            sessions,
        }
    }

    /// Owner to register events and tasks under.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("owner", &self.owner)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    Loaded,
    Enabled,
    Disabled,
    Unloaded,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            PluginState::Loaded => "loaded",
            PluginState::Enabled => "enabled",
            PluginState::Disabled => "disabled",
            PluginState::Unloaded => "unloaded",
        };
        f.write_str(state)
    }
}

/// Raised synchronously after a plugin changed state.
#[derive(Debug, Clone)]
pub struct PluginStateEvent {
    name: String,
    state: PluginState,
}

impl PluginStateEvent {
    pub fn new(name: impl Into<String>, state: PluginState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PluginState {
        self.state
    }
}

impl Event for PluginStateEvent {}
