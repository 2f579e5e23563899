//! Native plugin loader: dynamic libraries exposing a single
//! `extern "C" fn frippy_plugin_new() -> *mut dyn Plugin` constructor
//! symbol. Kept deliberately thin, since loading a `.so`/`.dylib` is
//! inherently `unsafe` and this module is the one place that boundary
//! is crossed.

use std::path::Path;

use libloading::{Library, Symbol};

use crate::error::{PluginError, Result};
use crate::plugin::Plugin;

/// The symbol every native plugin library must export.
pub const ENTRY_SYMBOL: &[u8] = b"frippy_plugin_new";

type PluginConstructor = unsafe extern "C" fn() -> *mut dyn Plugin;

/// A loaded dynamic library kept alive for as long as the plugin object
/// it produced is in use (the library must outlive the plugin's vtable).
pub struct NativeLibrary {
    _library: Library,
}

/// Loads the native plugin at `path`, returning the boxed plugin object
/// and the library handle keeping its code mapped.
///
/// # Safety
/// The caller must trust `path`: this calls into arbitrary foreign code
/// with no sandboxing, matching the control protocol's "plugin-load"
/// command, which only operators (not remote IRC users) can invoke.
pub unsafe fn load(path: &Path) -> Result<(Box<dyn Plugin>, NativeLibrary)> {
    let library = Library::new(path)
        .map_err(|_| PluginError::InvalidIdentifier)?;
    let constructor: Symbol<PluginConstructor> = library
        .get(ENTRY_SYMBOL)
        .map_err(|_| PluginError::InvalidIdentifier)?;

    let raw = constructor();
    if raw.is_null() {
        return Err(PluginError::ExecError.into());
    }
    let plugin = Box::from_raw(raw);

    Ok((plugin, NativeLibrary { _library: library }))
}
