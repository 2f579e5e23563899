//! Hook runner: spawns an external executable for a matching event,
//! with argv built from [`crate::irc::event::EventKind::hook_args`].
//! Output is captured to the log; the child's exit status is recorded
//! but never fails the event pipeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{HookError, Result};
use crate::irc::event::Event;
use crate::limits;

#[derive(Clone, Debug)]
pub struct Hook {
    pub id: String,
    pub path: PathBuf,
    pub timeout: Duration,
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        HookRegistry::default()
    }

    pub fn add(&mut self, id: impl Into<String>, path: PathBuf) -> Result<()> {
        let id = id.into();
        if self.hooks.contains_key(&id) {
            return Err(HookError::AlreadyExists.into());
        }
        if !path.is_absolute() {
            return Err(HookError::InvalidPath.into());
        }
        self.hooks.insert(
            id.clone(),
            Hook {
                id,
                path,
                timeout: Duration::from_secs(limits::HOOK_DEFAULT_TIMEOUT_SECS),
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<()> {
        self.hooks.remove(id).map(|_| ()).ok_or_else(|| HookError::NotFound.into())
    }

    pub fn ids(&self) -> Vec<String> {
        self.hooks.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hook> {
        self.hooks.values()
    }
}

/// Runs every registered hook against `event`'s argv, one at a time
/// (hooks are assumed cheap; spec does not require them to run
/// concurrently with each other). Failures are logged, not propagated.
/// Argv's first element is always the server id, ahead of whatever
/// `hook_args` contributes for the event's own fields.
pub async fn run_all(hooks: &HookRegistry, event: &Event) {
    let mut args = Vec::with_capacity(1 + event.kind.hook_args().len());
    args.push(event.server_id());
    args.extend(event.kind.hook_args());
    for hook in hooks.iter() {
        if let Err(e) = run_single(hook, event.kind.name(), &args).await {
            crate::error::log_error(&format!("hook {}", hook.id), &e);
        }
    }
}

pub async fn run_single(hook: &Hook, event_name: &str, args: &[String]) -> Result<()> {
    let mut command = Command::new(&hook.path);
    command
        .arg(event_name)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|_| HookError::InvalidPath)?;

    let wait = tokio::time::timeout(hook.timeout, child.wait());
    let status = match wait.await {
        Ok(status) => status.map_err(crate::error::FrippyError::Connection)?,
        Err(_) => {
            kill_with_grace(&mut child).await;
            tracing::warn!(hook = %hook.id, "hook timed out");
            return Ok(());
        }
    };

    if !status.success() {
        tracing::warn!(hook = %hook.id, code = ?status.code(), "hook exited non-zero");
    }
    Ok(())
}

async fn kill_with_grace(child: &mut tokio::process::Child) {
    if let Some(id) = child.id() {
        unsafe {
            libc::kill(id as libc::pid_t, libc::SIGTERM);
        }
    }
    let grace = tokio::time::timeout(
        Duration::from_secs(limits::HOOK_KILL_GRACE_SECS),
        child.wait(),
    );
    if grace.await.is_err() {
        let _ = child.kill().await;
    }
}
