use crate::*;
use aom_event_system::{Event, EventBus, EventPriority, Owner, Scheduler, TaskPriority};
use aom_server::{Protocol, SessionManager};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Default)]
struct Ping;

impl Event for Ping {}

/// Writes every hook call to a shared journal. In `on_enabled` it registers
/// an event handler and a repeating task under its owner.
struct Recorder {
    name: &'static str,
    journal: Journal,
    fail_on: Option<&'static str>,
}

impl Recorder {
    fn record(&self, hook: &'static str) -> Result<(), PluginError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, hook));
        match self.fail_on {
            Some(failing) if failing == hook => Err(PluginError::ExecutionError(format!("{} refused", hook))),
            _ => Ok(()),
        }
    }
}

impl Plugin for Recorder {
    fn on_loaded(&mut self, context: &PluginContext) -> Result<(), PluginError> {
        if self.fail_on == Some("loaded") {
            context
                .events()
                .register_event(context.owner().clone(), EventPriority::Normal, |_: &mut Ping| {});
        }
        self.record("loaded")
    }

    fn on_enabled(&mut self, context: &PluginContext) -> Result<(), PluginError> {
        context
            .events()
            .register_event(context.owner().clone(), EventPriority::Normal, |_: &mut Ping| {});
        context
            .scheduler()
            .invoke_repeating(context.owner().clone(), TaskPriority::Normal, 1, 1, |_| {});
        self.record("enabled")
    }

    fn on_disabled(&mut self, _context: &PluginContext) -> Result<(), PluginError> {
        self.record("disabled")
    }

    fn on_unloaded(&mut self, _context: &PluginContext) -> Result<(), PluginError> {
        self.record("unloaded")
    }
}

struct Panicker;

impl Plugin for Panicker {
    fn on_enabled(&mut self, _context: &PluginContext) -> Result<(), PluginError> {
        panic!("enable exploded");
    }
}

struct Harness {
    manager: PluginManager,
    events: Arc<EventBus>,
    journal: Journal,
}

impl Harness {
    fn entries(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.journal.lock().unwrap().clear();
    }
}

/// A manager whose static loader knows the entries `A`..`E`, `fails_load`,
/// `fails_enable` and `panics`.
fn harness() -> Harness {
    let scheduler = Arc::new(Scheduler::new(60, 1).unwrap());
    let events = Arc::new(EventBus::new(scheduler));
    let sessions = Arc::new(SessionManager::new(
        Arc::new(Protocol::builder().build()),
        Arc::clone(&events),
    ));
    let journal: Journal = Arc::default();

    let mut loader = StaticLoader::new().register("panics", || Panicker);
    for name in ["A", "B", "C", "D", "E"] {
        let journal = Arc::clone(&journal);
        loader = loader.register(name, move || Recorder {
            name,
            journal: Arc::clone(&journal),
            fail_on: None,
        });
    }
    for (entry, hook) in [("fails_load", "loaded"), ("fails_enable", "enabled")] {
        let journal = Arc::clone(&journal);
        loader = loader.register(entry, move || Recorder {
            name: entry,
            journal: Arc::clone(&journal),
            fail_on: Some(hook),
        });
    }

    Harness {
        manager: PluginManager::new(Arc::clone(&events), sessions, Box::new(loader)),
        events,
        journal,
    }
}

fn plugin(name: &str, dependencies: &[&str]) -> Descriptor {
    Descriptor::new(name)
        .with_entry(name)
        .with_dependencies(dependencies.iter().copied())
}

fn write_manifest(root: &std::path::Path, directory: &str, manifest: &str) {
    let path = root.join(directory);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join(Descriptor::FILE_NAME), manifest).unwrap();
}

#[test]
fn test_plugins_load_in_dependency_order() {
    let h = harness();

    let loaded = h
        .manager
        .load_descriptors(vec![plugin("C", &["B"]), plugin("A", &[]), plugin("B", &["A"])]);

    assert_eq!(loaded, 3);
    assert_eq!(h.manager.plugin_names(), ["A", "B", "C"]);
    assert_eq!(h.entries(), ["A:loaded", "B:loaded", "C:loaded"]);
}

#[test]
fn test_cyclic_plugins_are_not_loaded() {
    let h = harness();

    let loaded = h
        .manager
        .load_descriptors(vec![plugin("A", &["B"]), plugin("B", &["A"]), plugin("C", &[])]);

    assert_eq!(loaded, 1);
    assert!(!h.manager.is_loaded("A"));
    assert!(!h.manager.is_loaded("B"));
    assert!(h.manager.is_loaded("C"));
    assert_eq!(h.entries(), ["C:loaded"]);
}

#[test]
fn test_missing_dependency_fails_only_that_plugin() {
    let h = harness();

    let result = h.manager.load_plugin(plugin("B", &["A"]));
    assert!(matches!(result, Err(PluginSystemError::DependencyMissing(ref name)) if name == "A"));

    let loaded = h
        .manager
        .load_descriptors(vec![plugin("C", &["ghost"]), plugin("D", &[])]);
    assert_eq!(loaded, 1);
    assert_eq!(h.manager.plugin_names(), ["D"]);
}

#[test]
fn test_later_batch_may_depend_on_loaded_plugins() {
    let h = harness();
    h.manager.load_plugin(plugin("A", &[])).unwrap();

    let loaded = h
        .manager
        .load_descriptors(vec![plugin("C", &["B", "A"]), plugin("B", &["A"])]);

    assert_eq!(loaded, 2);
    assert!(h.manager.is_loaded("B"));
    assert_eq!(h.manager.plugin_names(), ["A", "B", "C"]);
}

#[test]
fn test_failed_dependency_skips_dependents() {
    let h = harness();

    let loaded = h.manager.load_descriptors(vec![
        Descriptor::new("base").with_entry("fails_load"),
        plugin("A", &["base"]),
        plugin("B", &[]),
    ]);

    assert_eq!(loaded, 1);
    assert_eq!(h.manager.plugin_names(), ["B"]);
}

#[test]
fn test_duplicate_plugin_is_rejected() {
    let h = harness();
    h.manager.load_plugin(plugin("A", &[])).unwrap();

    let result = h.manager.load_plugin(plugin("A", &[]));
    assert!(matches!(result, Err(PluginSystemError::PluginAlreadyExists(_))));
    assert_eq!(h.manager.plugin_count(), 1);
}

#[test]
fn test_unknown_plugin_is_reported() {
    let h = harness();
    assert!(matches!(
        h.manager.enable_plugin("nobody"),
        Err(PluginSystemError::PluginNotFound(_))
    ));
    assert!(h.manager.unload_plugin("nobody").is_err());
}

#[test]
fn test_enable_and_disable_are_idempotent() {
    let h = harness();
    h.manager.load_plugin(plugin("A", &[])).unwrap();
    h.clear();

    assert!(h.manager.enable_plugin("A").unwrap());
    assert!(!h.manager.enable_plugin("A").unwrap());
    assert!(h.manager.is_enabled("A"));

    assert!(h.manager.disable_plugin("A").unwrap());
    assert!(!h.manager.disable_plugin("A").unwrap());
    assert!(!h.manager.is_enabled("A"));

    assert_eq!(h.entries(), ["A:enabled", "A:disabled"]);
}

#[test]
fn test_enable_all_in_order_and_disable_all_in_reverse() {
    let h = harness();
    h.manager
        .load_descriptors(vec![plugin("A", &[]), plugin("B", &["A"]), plugin("C", &["B"])]);
    h.clear();

    h.manager.enable_all();
    h.manager.disable_all();

    assert_eq!(
        h.entries(),
        ["A:enabled", "B:enabled", "C:enabled", "C:disabled", "B:disabled", "A:disabled"]
    );
}

#[test]
fn test_failing_hooks_do_not_block_others() {
    let h = harness();
    h.manager.load_descriptors(vec![
        Descriptor::new("broken").with_entry("panics"),
        Descriptor::new("grumpy").with_entry("fails_enable"),
        plugin("A", &[]),
    ]);

    h.manager.enable_all();

    assert!(h.manager.is_enabled("A"));
    assert!(h.manager.is_enabled("broken"));
    assert!(h.manager.is_enabled("grumpy"));
}

#[test]
fn test_failed_load_releases_what_it_registered() {
    let h = harness();

    let result = h
        .manager
        .load_plugin(Descriptor::new("flaky").with_entry("fails_load"));

    assert!(matches!(result, Err(PluginSystemError::LoadingError(_))));
    assert!(!h.manager.is_loaded("flaky"));
    assert_eq!(h.events.handler_count::<Ping>(), 0);
}

#[test]
fn test_unload_disables_first_and_releases_owner() {
    let h = harness();
    let scheduler = Arc::clone(h.events.scheduler());
    h.manager.load_plugin(plugin("A", &[])).unwrap();
    h.manager.enable_plugin("A").unwrap();

    // Work registered by someone else must survive.
    h.events
        .register_event(Owner::Anonymous, EventPriority::Normal, |_: &mut Ping| {});
    assert_eq!(h.events.handler_count::<Ping>(), 2);
    assert_eq!(scheduler.pending_tasks(), 1);

    h.manager.unload_plugin("A").unwrap();

    assert!(!h.manager.is_loaded("A"));
    assert_eq!(h.events.handler_count::<Ping>(), 1);
    assert_eq!(scheduler.pending_tasks(), 0);
    assert_eq!(h.entries(), ["A:loaded", "A:enabled", "A:disabled", "A:unloaded"]);
}

#[test]
fn test_unload_all_in_reverse_order() {
    let h = harness();
    h.manager
        .load_descriptors(vec![plugin("A", &[]), plugin("B", &["A"])]);
    h.clear();

    h.manager.unload_all();

    assert_eq!(h.manager.plugin_count(), 0);
    assert_eq!(h.entries(), ["B:unloaded", "A:unloaded"]);
}

#[test]
fn test_state_events_follow_transitions() {
    let h = harness();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    h.events
        .register_event(Owner::Anonymous, EventPriority::Normal, move |event: &mut PluginStateEvent| {
            sink.lock()
                .unwrap()
                .push((event.name().to_string(), event.state()));
        });

    h.manager.load_plugin(plugin("A", &[])).unwrap();
    h.manager.enable_plugin("A").unwrap();
    h.manager.enable_plugin("A").unwrap();
    h.manager.unload_plugin("A").unwrap();

    let states: Vec<PluginState> = seen.lock().unwrap().iter().map(|(_, state)| *state).collect();
    assert_eq!(
        states,
        [PluginState::Loaded, PluginState::Enabled, PluginState::Disabled, PluginState::Unloaded]
    );
    assert!(seen.lock().unwrap().iter().all(|(name, _)| name == "A"));
}

#[test]
fn test_load_plugins_from_directory() {
    let temp_dir = TempDir::new().unwrap();
    write_manifest(temp_dir.path(), "zeta", "name = \"C\"\nentry = \"C\"\ndependencies = [\"B\"]\n");
    write_manifest(temp_dir.path(), "alpha", "name = \"B\"\nentry = \"B\"\ndependencies = [\"A\"]\n");
    write_manifest(temp_dir.path(), "mid", "name = \"A\"\nentry = \"A\"\nversion = 2\n");
    write_manifest(temp_dir.path(), "broken", "this is not toml");
    std::fs::create_dir_all(temp_dir.path().join("not_a_plugin")).unwrap();

    let h = harness();
    let loaded = h.manager.load_plugins(temp_dir.path());

    assert_eq!(loaded, 3);
    assert_eq!(h.manager.plugin_names(), ["A", "B", "C"]);
    let a = h.manager.plugin("A").unwrap();
    assert_eq!(a.descriptor().version(), "2");
    assert_eq!(a.descriptor().path(), temp_dir.path().join("mid"));
    assert_eq!(a.owner(), &Owner::named("A"));
}

#[test]
fn test_discover_skips_duplicate_names() {
    let temp_dir = TempDir::new().unwrap();
    write_manifest(temp_dir.path(), "first", "name = \"A\"\n");
    write_manifest(temp_dir.path(), "second", "name = \"A\"\n");

    let h = harness();
    let descriptors = h.manager.discover(temp_dir.path()).unwrap();

    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].path(), temp_dir.path().join("first"));
}

#[test]
fn test_missing_plugin_directory_is_created() {
    let temp_dir = TempDir::new().unwrap();
    let directory = temp_dir.path().join("plugins");

    let h = harness();
    assert_eq!(h.manager.load_plugins(&directory), 0);
    assert!(directory.is_dir());
}

/// Hands out recorders backed by the running executable as their "library".
#[cfg(unix)]
struct ProcessLoader {
    journal: Journal,
}

#[cfg(unix)]
impl PluginLoader for ProcessLoader {
    fn load(&self, descriptor: &Descriptor) -> Result<PluginInstance, PluginSystemError> {
        let fail_on = (descriptor.entry() == "fails_load").then_some("loaded");
        let plugin = Recorder {
            name: "dynamic",
            journal: Arc::clone(&self.journal),
            fail_on,
        };
        let library = libloading::os::unix::Library::this();
        Ok(PluginInstance::with_library(Box::new(plugin), library.into()))
    }
}

#[cfg(unix)]
#[test]
fn test_unloaded_libraries_stay_mapped_until_the_manager_drops() {
    let scheduler = Arc::new(Scheduler::new(60, 1).unwrap());
    let events = Arc::new(EventBus::new(Arc::clone(&scheduler)));
    let sessions = Arc::new(SessionManager::new(
        Arc::new(Protocol::builder().build()),
        Arc::clone(&events),
    ));
    let loader = ProcessLoader {
        journal: Arc::default(),
    };
    let manager = PluginManager::new(Arc::clone(&events), sessions, Box::new(loader));

    manager.load_plugin(Descriptor::new("A")).unwrap();
    manager.enable_plugin("A").unwrap();
    assert!(manager.plugin("A").unwrap().is_enabled());
    assert!(manager.retired_libraries().is_empty());

    manager.unload_plugin("A").unwrap();
    assert!(!manager.is_loaded("A"));
    assert_eq!(manager.retired_libraries(), ["A"]);

    let result = manager.load_plugin(Descriptor::new("B").with_entry("fails_load"));
    assert!(matches!(result, Err(PluginSystemError::LoadingError(_))));
    assert_eq!(manager.retired_libraries(), ["A", "B"]);

    drop(manager);
}
