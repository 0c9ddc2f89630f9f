//! Engine assembly and lifecycle.

use crate::config::AppConfig;
use crate::demo::{echo_protocol, ConnectionLogger};
use crate::logging::display_banner;
use crate::signals::{wait_for_shutdown_signal, wait_for_shutdown_signal_silent};
use aom_event_system::{EventBus, Owner, Scheduler, SchedulerError, Task, TaskPriority};
use aom_plugin_system::{DynamicLoader, PluginLoader, PluginManager, PluginSafetyConfig};
use aom_server::SessionManager;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// The engine core wired together: scheduler, event bus, session manager and
/// plugin manager.
///
/// # Startup
///
/// 1. [`Engine::start`] runs the tick loop on its own thread and schedules the
///    session pulse as a critical task every tick
/// 2. [`Engine::bind`] starts accepting sessions
/// 3. [`Engine::load_plugins`] loads and enables the plugin directory
///
/// [`Engine::shutdown`] undoes all of it in reverse.
pub struct Engine {
    config: AppConfig,
    scheduler: Arc<Scheduler>,
    events: Arc<EventBus>,
    sessions: Arc<SessionManager>,
    plugins: PluginManager,
    tick_thread: Option<JoinHandle<Result<(), SchedulerError>>>,
    pulse: Option<Arc<Task>>,
}

impl Engine {
    pub fn new(config: AppConfig, safety: PluginSafetyConfig) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_loader(config, Box::new(DynamicLoader::new(safety)))
    }

    /// Builds the engine around a custom plugin loader.
    pub fn with_loader(
        config: AppConfig,
        loader: Box<dyn PluginLoader>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.desired_ticks,
            config.scheduler.workers,
        )?);
        let events = Arc::new(EventBus::new(Arc::clone(&scheduler)));
        let sessions = Arc::new(SessionManager::new(
            Arc::new(echo_protocol()?),
            Arc::clone(&events),
        ));
        events.register_events(Owner::Anonymous, Arc::new(ConnectionLogger));
        let plugins = PluginManager::new(Arc::clone(&events), Arc::clone(&sessions), loader);

        Ok(Self {
            config,
            scheduler,
            events,
            sessions,
            plugins,
            tick_thread: None,
            pulse: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
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

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// Starts the tick loop and the session pulse.
    pub fn start(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if self.tick_thread.is_some() {
            return Err(SchedulerError::AlreadyStarted.into());
        }

        let scheduler = Arc::clone(&self.scheduler);
        let thread = std::thread::Builder::new()
            .name("aom-tick".to_string())
            .spawn(move || scheduler.run())?;
        self.tick_thread = Some(thread);

        let sessions = Arc::clone(&self.sessions);
        self.pulse = Some(self.scheduler.invoke_repeating(
            Owner::Anonymous,
            TaskPriority::Critical,
            0,
            1,
            move |_| sessions.pulse(),
        ));
        info!(
            "⏱️ Tick loop started at {} ticks per second",
            self.scheduler.desired_ticks()
        );
        Ok(())
    }

    /// Starts accepting sessions on the configured address.
    pub async fn bind(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        let address: SocketAddr = self.config.server.bind_address.parse()?;
        if !self.sessions.bind(address).await {
            return Err(format!("Failed to bind {}", address).into());
        }
        Ok(self.sessions.local_addr().unwrap_or(address))
    }

    /// Loads every plugin of the configured directory and enables them.
    pub fn load_plugins(&self) -> usize {
        let directory = PathBuf::from(&self.config.plugins.directory);
        let loaded = self.plugins.load_plugins(&directory);
        self.plugins.enable_all();
        loaded
    }

    /// Stops everything started by [`Engine::start`], [`Engine::bind`] and
    /// [`Engine::load_plugins`], plugins first and the tick loop last.
    pub async fn shutdown(&mut self) {
        info!("🔌 Disabling plugins...");
        self.plugins.disable_all();
        self.plugins.unload_all();

        self.sessions.stop("Server shutting down").await;

        if let Some(pulse) = self.pulse.take() {
            self.scheduler.cancel_task(&pulse);
        }
        let Some(thread) = self.tick_thread.take() else {
            return;
        };
        // The loop may not have flagged itself active yet.
        while let Err(e) = self.scheduler.stop() {
            if thread.is_finished() {
                warn!("Failed to stop the scheduler: {}", e);
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(Ok(()))) => info!("⏱️ Tick loop stopped"),
            Ok(Ok(Err(e))) => error!("❌ Tick loop failed: {}", e),
            Ok(Err(_)) => error!("❌ Tick loop panicked"),
            Err(e) => error!("❌ Failed to join the tick loop: {}", e),
        }
    }

    /// Runs the engine until SIGINT or SIGTERM, then shuts down.
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        display_banner();
        self.log_configuration_summary();

        self.start()?;
        let address = match self.bind().await {
            Ok(address) => address,
            Err(e) => {
                self.shutdown().await;
                return Err(e);
            }
        };

        if self.config.plugins.auto_load {
            let loaded = self.load_plugins();
            info!("🔌 {} plugin(s) active", loaded);
        }

        info!("✅ AoM engine is now running on {}", address);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        wait_for_shutdown_signal().await?;

        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_signal_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        self.shutdown().await;
        info!("👋 AoM engine shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  ⏱️ Desired ticks: {}", self.config.scheduler.desired_ticks);
        info!("  🔌 Plugin directory: {}", self.config.plugins.directory);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scheduler", &self.scheduler)
            .field("sessions", &self.sessions)
            .field("plugins", &self.plugins)
            .field("running", &self.tick_thread.is_some())
            .finish()
    }
}
