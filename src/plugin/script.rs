//! Script-plugin loader contract. Embedding an actual scripting runtime
//! (Lua/JS/etc.) is explicitly out of scope; this module only defines the
//! trait a future embedding would implement and a loader that recognizes
//! script files without executing them, so `plugin-load` fails cleanly
//! with a clear error instead of silently doing nothing.

use std::path::Path;

use crate::error::{PluginError, Result};
use crate::plugin::Plugin;

/// A scripting runtime capable of turning a script file into a [`Plugin`].
/// No implementation ships in this crate.
pub trait ScriptEngine {
    fn extension(&self) -> &'static str;
    fn load(&self, path: &Path) -> Result<Box<dyn Plugin>>;
}

/// Returns `PluginError::ExecError` for any recognized script extension,
/// since no [`ScriptEngine`] is registered by default.
pub fn load(path: &Path, engines: &[Box<dyn ScriptEngine>]) -> Result<Box<dyn Plugin>> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match engines.iter().find(|e| e.extension() == ext) {
        Some(engine) => engine.load(path),
        None => Err(PluginError::ExecError.into()),
    }
}
