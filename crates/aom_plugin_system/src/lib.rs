//! # AoM Plugin System
//!
//! Discovers plugins on disk, orders them by their declared dependencies and
//! drives them through their lifecycle.
//!
//! ## Plugin Layout
//!
//! ```text
//! plugins/
//! ├── permissions/
//! │   ├── plugin.toml
//! │   └── libpermissions.so
//! └── chat/
//!     ├── plugin.toml          # dependencies = ["permissions"]
//!     └── libchat.so
//! ```
//!
//! ## Loading
//!
//! 1. [`PluginManager::discover`] reads every `plugin.toml` into a [`Descriptor`]
//! 2. [`resolve_load_order`] sorts them so dependencies come first (plugins
//!    loaded earlier count as satisfied); plugins in
//!    a cycle or with a missing dependency are reported and skipped
//! 3. A [`PluginLoader`] creates each instance and [`Plugin::on_loaded`] runs
//! 4. [`PluginManager::enable_all`] runs [`Plugin::on_enabled`] in load order
//!
//! Shutdown runs the same steps backwards. Unloading a plugin cancels every
//! task and event handler registered under its [`Owner`](aom_event_system::Owner).
//!
//! ## Dynamic Plugins
//!
//! A plugin crate is built as a `cdylib` and exports its constructor with
//! [`export_plugin!`]. The loader refuses libraries whose [`ABI_VERSION`]
//! does not match the engine unless [`PluginSafetyConfig`] says otherwise.

pub mod descriptor;
pub mod error;
pub mod loader;
pub mod manager;
pub mod order;
pub mod plugin;

#[cfg(test)]
mod tests;

pub use descriptor::{Descriptor, DEFAULT_ENTRY};
pub use error::PluginSystemError;
pub use loader::{
    versions_major_minor_compatible, ChainLoader, DynamicLoader, PluginInstance, PluginLoader,
    PluginSafetyConfig, StaticLoader, VERSION_SYMBOL,
};
pub use manager::{LoadedPlugin, PluginManager};
pub use order::{resolve_load_order, resolve_load_order_with, LoadOrder, Unresolved};
pub use plugin::{Plugin, PluginContext, PluginError, PluginState, PluginStateEvent};

/// ABI version for plugin compatibility validation.
///
/// Format: `"<crate version>:<rustc version>"`, e.g. `"0.1.0:1.75.0"` or
/// `"0.1.0:unknown"` when the build could not determine the compiler.
pub const ABI_VERSION: &str = {
    const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");
    const RUST_VERSION: &str = env!("AOM_RUSTC_VERSION");
    const_format::concatcp!(CRATE_VERSION, ":", RUST_VERSION)
};

/// Exports a [`Plugin`] type from a `cdylib` so [`DynamicLoader`] can create it.
///
/// The type must implement [`Default`]. Generates `get_plugin_version` and the
/// default entry symbol `create_plugin`; a second argument names a different
/// entry symbol, which must match the manifest's `entry`.
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Chat;
///
/// impl aom_plugin_system::Plugin for Chat {}
///
/// aom_plugin_system::export_plugin!(Chat);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($plugin_type:ty) => {
        $crate::export_plugin!($plugin_type, create_plugin);
    };
    ($plugin_type:ty, $entry:ident) => {
        #[no_mangle]
        pub unsafe extern "C" fn get_plugin_version() -> *const ::std::os::raw::c_char {
            static VERSION: ::std::sync::OnceLock<::std::ffi::CString> = ::std::sync::OnceLock::new();
            VERSION
                .get_or_init(|| ::std::ffi::CString::new($crate::ABI_VERSION).unwrap_or_default())
                .as_ptr()
        }

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn $entry() -> *mut dyn $crate::Plugin {
            // Unwinding across the FFI boundary is undefined behaviour.
            match ::std::panic::catch_unwind(|| {
                let plugin: ::std::boxed::Box<dyn $crate::Plugin> =
                    ::std::boxed::Box::new(<$plugin_type as ::std::default::Default>::default());
                ::std::boxed::Box::into_raw(plugin)
            }) {
                Ok(plugin) => plugin,
                Err(_) => ::std::ptr::null_mut::<$plugin_type>() as *mut dyn $crate::Plugin,
            }
        }
    };
}
