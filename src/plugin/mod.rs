//! Plugin host contract: the callback trait every plugin implements,
//! the per-plugin config/template/path maps, and the registry that owns
//! loaded plugins and contains failures at the callback boundary so one
//! misbehaving plugin can never take down the bot or block its siblings.

pub mod native;
pub mod script;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{PluginError, Result};
use crate::irc::event::{Event, EventKind};
use crate::subst;

/// A line a plugin wants sent back out to a server, queued during
/// dispatch and flushed by the bot's event loop once every plugin has
/// had a chance to run (plugins never touch the socket directly).
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub server: String,
    pub target: String,
    pub text: String,
    pub notice: bool,
}

/// Everything a loaded plugin needs in order to answer a callback:
/// its own config/template/path maps, a substitution context seeded with
/// the event's keywords, and the outbox to queue replies on.
pub struct PluginContext<'a> {
    pub id: &'a str,
    pub options: &'a HashMap<String, String>,
    pub templates: &'a HashMap<String, String>,
    pub paths: &'a HashMap<String, PathBuf>,
    outbox: &'a RefCell<Vec<OutboundMessage>>,
}

impl<'a> PluginContext<'a> {
    pub fn template(&self, key: &str) -> Option<&str> {
        self.templates.get(key).map(String::as_str)
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Renders `template(key)` (or `fallback` if unset) through
    /// [`subst::subst`] with `ctx`.
    pub fn render(&self, key: &str, fallback: &str, ctx: &subst::Context) -> String {
        let template = self.template(key).unwrap_or(fallback);
        subst::subst(template, ctx)
    }

    /// Queues a PRIVMSG reply to `target` on `server`.
    pub fn say(&self, server: &str, target: &str, text: impl Into<String>) {
        self.outbox.borrow_mut().push(OutboundMessage {
            server: server.to_string(),
            target: target.to_string(),
            text: text.into(),
            notice: false,
        });
    }

    /// Queues a NOTICE reply to `target` on `server`.
    pub fn notice(&self, server: &str, target: &str, text: impl Into<String>) {
        self.outbox.borrow_mut().push(OutboundMessage {
            server: server.to_string(),
            target: target.to_string(),
            text: text.into(),
            notice: true,
        });
    }
}

/// Static metadata a plugin reports back through `plugin-info`.
#[derive(Clone, Debug)]
pub struct PluginInfo {
    pub name: &'static str,
    pub author: &'static str,
    pub license: &'static str,
    pub summary: &'static str,
    pub version: &'static str,
}

impl Default for PluginInfo {
    fn default() -> Self {
        PluginInfo {
            name: "unknown",
            author: "unknown",
            license: "unknown",
            summary: "",
            version: "0.0.0",
        }
    }
}

/// The callback surface every plugin implements. Every method has a
/// default no-op body: a plugin only overrides what it cares about.
/// `handle_command` is the one callback invoked for messages addressed to
/// this plugin specifically (`<prefix><id> ...`); every other callback
/// fires for every matching event regardless of addressing.
pub trait Plugin {
    /// Static metadata surfaced through the control protocol's
    /// `plugin-info` command.
    fn info(&self) -> PluginInfo {
        PluginInfo::default()
    }

    fn handle_load(&mut self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    fn handle_reload(&mut self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    fn handle_unload(&mut self, _ctx: &PluginContext) {}

    fn handle_connect(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_disconnect(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_message(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_command(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_join(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_part(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_kick(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_topic(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_notice(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_nick(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_mode(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_names(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_whois(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_invite(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn handle_me(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
        Ok(())
    }

    /// Fires when one of this plugin's own timers comes due. Unlike the
    /// callbacks above, this never reaches plugins that didn't create the
    /// timer: the bot looks up the owner before calling in.
    fn handle_timer(&mut self, _ctx: &PluginContext, _timer_id: u64) -> Result<()> {
        Ok(())
    }
}

/// Everything the host keeps about one loaded plugin besides the plugin
/// object itself.
pub struct PluginEntry {
    pub id: String,
    pub options: HashMap<String, String>,
    pub templates: HashMap<String, String>,
    pub paths: HashMap<String, PathBuf>,
    plugin: Box<dyn Plugin>,
    /// Kept alive for as long as the entry exists when `plugin` came from
    /// a dynamic library: dropping this before the plugin would unmap the
    /// code behind its vtable. `None` for built-in (statically linked)
    /// plugins.
    library: Option<native::NativeLibrary>,
}

impl PluginEntry {
    fn context<'a>(&'a self, outbox: &'a RefCell<Vec<OutboundMessage>>) -> PluginContext<'a> {
        PluginContext {
            id: &self.id,
            options: &self.options,
            templates: &self.templates,
            paths: &self.paths,
            outbox,
        }
    }
}

/// Owns every loaded plugin and dispatches events to them in load order,
/// catching and logging any `Err` a callback returns instead of letting
/// it propagate (a crash in one plugin must never stop dispatch to the
/// others or kill the daemon).
#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<PluginEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn info(&self, id: &str) -> Result<PluginInfo> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.plugin.info())
            .ok_or_else(|| PluginError::NotFound.into())
    }

    pub fn options_mut(&mut self, id: &str) -> Result<&mut HashMap<String, String>> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .map(|e| &mut e.options)
            .ok_or_else(|| PluginError::NotFound.into())
    }

    pub fn templates_mut(&mut self, id: &str) -> Result<&mut HashMap<String, String>> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .map(|e| &mut e.templates)
            .ok_or_else(|| PluginError::NotFound.into())
    }

    pub fn paths_mut(&mut self, id: &str) -> Result<&mut HashMap<String, PathBuf>> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .map(|e| &mut e.paths)
            .ok_or_else(|| PluginError::NotFound.into())
    }

    pub fn load(
        &mut self,
        id: impl Into<String>,
        plugin: Box<dyn Plugin>,
        options: HashMap<String, String>,
        templates: HashMap<String, String>,
        paths: HashMap<String, PathBuf>,
    ) -> Result<()> {
        self.insert(id, plugin, None, options, templates, paths)
    }

    /// Like [`load`](Self::load), but keeps the dynamic library that
    /// produced `plugin` alive for as long as the entry exists.
    pub fn load_native(
        &mut self,
        id: impl Into<String>,
        plugin: Box<dyn Plugin>,
        library: native::NativeLibrary,
        options: HashMap<String, String>,
        templates: HashMap<String, String>,
        paths: HashMap<String, PathBuf>,
    ) -> Result<()> {
        self.insert(id, plugin, Some(library), options, templates, paths)
    }

    fn insert(
        &mut self,
        id: impl Into<String>,
        plugin: Box<dyn Plugin>,
        library: Option<native::NativeLibrary>,
        options: HashMap<String, String>,
        templates: HashMap<String, String>,
        paths: HashMap<String, PathBuf>,
    ) -> Result<()> {
        let id = id.into();
        if self.contains(&id) {
            return Err(PluginError::AlreadyExists.into());
        }

        let mut entry = PluginEntry {
            id,
            options,
            templates,
            paths,
            plugin,
            library,
        };
        let outbox = RefCell::new(Vec::new());
        if let Err(e) = entry.plugin.handle_load(&entry.context(&outbox)) {
            crate::error::log_error("plugin load", &e);
            return Err(e);
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn unload(&mut self, id: &str) -> Result<()> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(PluginError::NotFound)?;
        let mut entry = self.entries.remove(idx);
        let outbox = RefCell::new(Vec::new());
        entry.plugin.handle_unload(&entry.context(&outbox));
        Ok(())
    }

    pub fn reload(&mut self, id: &str) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(PluginError::NotFound)?;
        let outbox = RefCell::new(Vec::new());
        entry.plugin.handle_reload(&entry.context(&outbox))
    }

    /// Dispatches `event` to every loaded plugin's matching callback,
    /// containing and logging any plugin error so dispatch continues to
    /// the rest. Returns every reply the plugins queued, in dispatch order.
    pub fn dispatch(&mut self, event: &Event) -> Vec<OutboundMessage> {
        let outbox = RefCell::new(Vec::new());
        for entry in &mut self.entries {
            Self::dispatch_one(entry, event, &outbox);
        }
        outbox.into_inner()
    }

    /// Like [`dispatch`](Self::dispatch), but only calls the plugins named
    /// in `allowed`: the rule engine decides, per plugin, whether this
    /// event reaches it at all.
    pub fn dispatch_to(&mut self, event: &Event, allowed: &std::collections::HashSet<String>) -> Vec<OutboundMessage> {
        let outbox = RefCell::new(Vec::new());
        for entry in &mut self.entries {
            if !allowed.contains(&entry.id) {
                continue;
            }
            Self::dispatch_one(entry, event, &outbox);
        }
        outbox.into_inner()
    }

    fn dispatch_one(entry: &mut PluginEntry, event: &Event, outbox: &RefCell<Vec<OutboundMessage>>) {
        let ctx = PluginContext {
            id: &entry.id,
            options: &entry.options,
            templates: &entry.templates,
            paths: &entry.paths,
            outbox,
        };
        let result = match &event.kind {
            EventKind::Connect(_) => entry.plugin.handle_connect(&ctx, event),
            EventKind::Disconnect(_) => entry.plugin.handle_disconnect(&ctx, event),
            EventKind::Message(_) => entry.plugin.handle_message(&ctx, event),
            EventKind::Command(_) => entry.plugin.handle_command(&ctx, event),
            EventKind::Join(_) => entry.plugin.handle_join(&ctx, event),
            EventKind::Part(_) => entry.plugin.handle_part(&ctx, event),
            EventKind::Kick(_) => entry.plugin.handle_kick(&ctx, event),
            EventKind::Topic(_) => entry.plugin.handle_topic(&ctx, event),
            EventKind::Notice(_) => entry.plugin.handle_notice(&ctx, event),
            EventKind::Nick(_) => entry.plugin.handle_nick(&ctx, event),
            EventKind::Mode(_) => entry.plugin.handle_mode(&ctx, event),
            EventKind::Names(_) => entry.plugin.handle_names(&ctx, event),
            EventKind::Whois(_) => entry.plugin.handle_whois(&ctx, event),
            EventKind::Invite(_) => entry.plugin.handle_invite(&ctx, event),
            EventKind::Me(_) => entry.plugin.handle_me(&ctx, event),
        };
        if let Err(e) = result {
            crate::error::log_error(&format!("plugin {} callback", entry.id), &e);
        }
    }

    /// Fires `handle_timer` on the single plugin that owns `timer_id`,
    /// silently doing nothing if that plugin was unloaded out from under
    /// its own still-pending timer. Returns whatever replies it queued.
    pub fn dispatch_timer(&mut self, plugin_id: &str, timer_id: u64) -> Vec<OutboundMessage> {
        let outbox = RefCell::new(Vec::new());
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == plugin_id) {
            let ctx = PluginContext {
                id: &entry.id,
                options: &entry.options,
                templates: &entry.templates,
                paths: &entry.paths,
                outbox: &outbox,
            };
            if let Err(e) = entry.plugin.handle_timer(&ctx, timer_id) {
                crate::error::log_error(&format!("plugin {plugin_id} timer callback"), &e);
            }
        }
        outbox.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::connection::ServerState;
    use crate::irc::event::ConnectEvent;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counter(Rc<Cell<u32>>);

    impl Plugin for Counter {
        fn handle_connect(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    struct Failing;

    impl Plugin for Failing {
        fn handle_connect(&mut self, _ctx: &PluginContext, _event: &Event) -> Result<()> {
            Err(crate::error::BotError::Internal.into())
        }
    }

    #[test]
    fn one_plugin_failing_does_not_stop_dispatch_to_others() {
        let count = Rc::new(Cell::new(0));
        let mut registry = PluginRegistry::new();
        registry
            .load("failing", Box::new(Failing), HashMap::new(), HashMap::new(), HashMap::new())
            .unwrap();
        registry
            .load(
                "counter",
                Box::new(Counter(count.clone())),
                HashMap::new(),
                HashMap::new(),
                HashMap::new(),
            )
            .unwrap();

        let server = ServerState::new("s1", "irc.example.org", 6667);
        let event = Event::new(server, EventKind::Connect(ConnectEvent {}));
        registry.dispatch(&event);

        assert_eq!(count.get(), 1);
    }

    struct Ticker(Rc<Cell<u64>>);

    impl Plugin for Ticker {
        fn handle_timer(&mut self, ctx: &PluginContext, timer_id: u64) -> Result<()> {
            self.0.set(timer_id);
            ctx.say("local", "#chan", "tick");
            Ok(())
        }
    }

    #[test]
    fn dispatch_timer_reaches_only_the_owning_plugin() {
        let fired = Rc::new(Cell::new(0));
        let counted = Rc::new(Cell::new(0));
        let mut registry = PluginRegistry::new();
        registry
            .load("ticker", Box::new(Ticker(fired.clone())), HashMap::new(), HashMap::new(), HashMap::new())
            .unwrap();
        registry
            .load(
                "counter",
                Box::new(Counter(counted.clone())),
                HashMap::new(),
                HashMap::new(),
                HashMap::new(),
            )
            .unwrap();

        let replies = registry.dispatch_timer("ticker", 42);

        assert_eq!(fired.get(), 42);
        assert_eq!(counted.get(), 0);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text, "tick");
    }

    #[test]
    fn dispatch_timer_on_unknown_plugin_is_a_no_op() {
        let mut registry = PluginRegistry::new();
        assert!(registry.dispatch_timer("ghost", 1).is_empty());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut registry = PluginRegistry::new();
        registry
            .load(
                "counter",
                Box::new(Counter(Rc::new(Cell::new(0)))),
                HashMap::new(),
                HashMap::new(),
                HashMap::new(),
            )
            .unwrap();
        let err = registry.load(
            "counter",
            Box::new(Counter(Rc::new(Cell::new(0)))),
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
        );
        assert!(err.is_err());
    }
}
