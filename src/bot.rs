//! The composition root: owns every registry (servers, plugins,
//! rules, hooks, timers), drives the single-threaded event loop, and
//! wires inbound IRC events through the rule engine into the plugin
//! pipeline and the hook runner.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;

use crate::config::{Config, ServerConfig};
use crate::error::{FrippyError, Result, ServerError};
use crate::hook::HookRegistry;
use crate::irc::connection::{Connection, ConnectionOptions, ConnectionState, Credentials, ServerHandle, ServerState};
use crate::irc::dispatch::dispatch as dispatch_message;
use crate::irc::event::Event;
use crate::irc::message::Message;
use crate::plugin::PluginRegistry;
use crate::rule::{Candidate, RuleSet};
use crate::timer::TimerRegistry;

/// One configured, possibly-connected server: its shared data model plus
/// the connection state machine driving it.
pub struct ServerSlot {
    pub handle: ServerHandle,
    pub connection: Connection,
}

pub struct Bot {
    pub servers: HashMap<String, ServerSlot>,
    pub plugins: PluginRegistry,
    pub rules: RuleSet,
    pub hooks: HookRegistry,
    pub timers: TimerRegistry,
}

/// Shared handle to the running bot: `Rc<RefCell<_>>` because everything
/// touching it (the event loop, the control-socket sessions, timers) runs
/// on the same single-threaded runtime and never needs `Send`.
pub type BotHandle = Rc<RefCell<Bot>>;

impl Bot {
    pub fn new() -> BotHandle {
        Rc::new(RefCell::new(Bot {
            servers: HashMap::new(),
            plugins: PluginRegistry::new(),
            rules: RuleSet::new(),
            hooks: HookRegistry::new(),
            timers: TimerRegistry::new(),
        }))
    }

    pub fn from_config(config: &Config) -> BotHandle {
        let bot = Bot::new();
        for server in &config.servers {
            bot.borrow_mut().add_server(server).expect("config validated at load time");
        }
        bot
    }

    pub fn add_server(&mut self, cfg: &ServerConfig) -> Result<()> {
        if self.servers.contains_key(&cfg.id) {
            return Err(ServerError::AlreadyExists.into());
        }
        let handle = ServerState::new(cfg.id.clone(), cfg.hostname.clone(), cfg.port);
        {
            let mut state = handle.borrow_mut();
            state.options = ConnectionOptions {
                tls: cfg.tls,
                tls_verify: cfg.tls_verify,
                ipv4: cfg.ipv4,
                ipv6: cfg.ipv6,
                auto_rejoin: cfg.auto_rejoin,
                join_invite: cfg.join_invite,
                auto_reconnect: cfg.auto_reconnect,
            };
            state.credentials = Credentials {
                nickname: cfg.nickname.clone(),
                username: cfg.username.clone(),
                realname: cfg.realname.clone(),
                password: cfg.password.clone(),
            };
            state.current_nickname = cfg.nickname.clone();
            state.command_prefix = cfg.command_prefix.clone();
            if let Some(v) = &cfg.ctcp_version {
                state.ctcp_version = v.clone();
            }
            state.autojoin = cfg
                .autojoin
                .iter()
                .map(|a| crate::irc::connection::AutoJoinChannel {
                    name: a.channel.clone(),
                    key: a.key.clone(),
                })
                .collect();
        }
        self.servers.insert(
            cfg.id.clone(),
            ServerSlot {
                connection: Connection::new(handle.clone()),
                handle,
            },
        );
        Ok(())
    }

    pub fn remove_server(&mut self, id: &str) -> Result<()> {
        self.servers.remove(id).map(|_| ()).ok_or_else(|| ServerError::NotFound.into())
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// Writes one already-CRLF-terminated line to `server`'s socket, for
    /// control commands that poke the wire directly (JOIN/PART/TOPIC/...).
    pub async fn send_line(&mut self, server: &str, line: &str) -> Result<()> {
        let slot = self.servers.get_mut(server).ok_or(ServerError::NotFound)?;
        slot.connection.write_line(line).await.map_err(FrippyError::Connection)
    }

    /// Drops the current connection (if any) and marks `server` for an
    /// immediate reconnect attempt on the next event-loop turn.
    pub fn request_reconnect(&mut self, server: &str) -> Result<()> {
        let slot = self.servers.get_mut(server).ok_or(ServerError::NotFound)?;
        slot.connection.detach();
        slot.handle.borrow_mut().state = ConnectionState::WaitingReconnect;
        slot.connection.backoff = crate::irc::connection::Backoff::default();
        Ok(())
    }

    /// Unloads `id`, cancelling any timer it still owns so a pending
    /// one-shot can't fire into a plugin that's no longer there.
    pub fn unload_plugin(&mut self, id: &str) -> Result<()> {
        self.plugins.unload(id)?;
        self.timers.cancel_owned_by(id);
        Ok(())
    }

    /// Reloads `id` via `handle_reload`, then drops whatever timers it
    /// held before reloading: a plugin that still wants one re-creates it
    /// from `handle_reload`.
    pub fn reload_plugin(&mut self, id: &str) -> Result<()> {
        self.timers.cancel_owned_by(id);
        self.plugins.reload(id)
    }
}

/// Connects every configured server that isn't already connected. Actual
/// reconnect scheduling happens in [`run`]'s main loop via each
/// connection's backoff.
async fn dial_disconnected(bot: &BotHandle) {
    let pending: Vec<String> = {
        let b = bot.borrow();
        b.servers
            .iter()
            .filter(|(_, s)| matches!(s.handle.borrow().state, ConnectionState::Disconnected))
            .map(|(id, _)| id.clone())
            .collect()
    };

    for id in pending {
        connect_one(bot, &id).await;
    }
}

async fn connect_one(bot: &BotHandle, id: &str) {
    bot.borrow_mut().servers.get_mut(id).unwrap().handle.borrow_mut().state = ConnectionState::Connecting;

    let handle = bot.borrow().servers[id].handle.clone();
    match crate::irc::connection::dial(&handle).await {
        Ok(stream) => {
            let mut b = bot.borrow_mut();
            let slot = b.servers.get_mut(id).unwrap();
            slot.connection.attach(stream);
            slot.handle.borrow_mut().state = ConnectionState::Handshaking;
            drop(b);
            send_handshake(bot, id).await;
        }
        Err(e) => {
            tracing::warn!(server = id, error = %e, "connect failed");
            let mut b = bot.borrow_mut();
            let slot = b.servers.get_mut(id).unwrap();
            slot.handle.borrow_mut().state = ConnectionState::WaitingReconnect;
            let _ = slot.connection.backoff.next_delay();
        }
    }
}

async fn send_handshake(bot: &BotHandle, id: &str) {
    let (nickname, username, realname, password) = {
        let b = bot.borrow();
        let s = b.servers[id].handle.borrow();
        (
            s.credentials.nickname.clone(),
            s.credentials.username.clone(),
            s.credentials.realname.clone(),
            s.credentials.password.clone(),
        )
    };

    let mut lines = Vec::new();
    if let Some(pass) = password {
        lines.push(format!("PASS {pass}\r\n"));
    }
    lines.push(format!("NICK {nickname}\r\n"));
    lines.push(format!("USER {username} 0 * :{realname}\r\n"));

    let mut b = bot.borrow_mut();
    let slot = b.servers.get_mut(id).unwrap();
    for line in lines {
        let _ = slot.connection.write_line(&line).await;
    }
}

/// Reads and dispatches everything currently available from one server's
/// socket, returning `false` if the peer disconnected.
async fn pump_server(bot: &BotHandle, id: &str) -> bool {
    let lines = {
        let mut b = bot.borrow_mut();
        let slot = b.servers.get_mut(id).unwrap();
        match slot.connection.read_lines().await {
            Ok(Some(lines)) => lines,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(server = id, error = %e, "read error");
                return false;
            }
        }
    };

    for line in lines {
        let Ok(msg) = Message::parse(&line) else {
            continue;
        };
        handle_line(bot, id, &msg).await;
    }
    true
}

/// Recognizes a `MessageEvent` addressed to a plugin (`<prefix><id> ...`)
/// and promotes it to a `CommandEvent`, per the plugin-host contract:
/// `handle_command` only fires for messages that name a loaded plugin.
fn promote_to_command(bot: &BotHandle, id: &str, kind: crate::irc::event::EventKind) -> crate::irc::event::EventKind {
    use crate::irc::event::{CommandEvent, EventKind};

    let EventKind::Message(msg) = &kind else {
        return kind;
    };

    let prefix = bot.borrow().servers[id].handle.borrow().command_prefix.clone();
    let Some(rest) = msg.message.strip_prefix(&prefix) else {
        return kind;
    };
    if prefix.is_empty() || rest.is_empty() {
        return kind;
    }

    let mut tokens = rest.split_whitespace().map(str::to_string);
    let Some(plugin_id) = tokens.next() else {
        return kind;
    };

    if !bot.borrow().plugins.contains(&plugin_id) {
        return kind;
    }

    EventKind::Command(CommandEvent {
        origin: msg.origin.clone(),
        channel: msg.channel.clone(),
        plugin: plugin_id,
        tokens: tokens.collect(),
    })
}

async fn handle_line(bot: &BotHandle, id: &str, msg: &Message) {
    let (event_kinds, outbound) = {
        let b = bot.borrow();
        let handle = b.servers[id].handle.clone();
        let mut state = handle.borrow_mut();
        let result = dispatch_message(&mut state, msg);
        (result.events, result.outbound)
    };

    {
        let mut b = bot.borrow_mut();
        let slot = b.servers.get_mut(id).unwrap();
        for line in outbound {
            let _ = slot.connection.write_line(&line).await;
        }
    }

    for kind in event_kinds {
        let kind = promote_to_command(bot, id, kind);
        let handle = bot.borrow().servers[id].handle.clone();
        if matches!(kind, crate::irc::event::EventKind::Connect(_)) {
            handle.borrow_mut().state = ConnectionState::Connected;
            let mut b = bot.borrow_mut();
            b.servers.get_mut(id).unwrap().connection.backoff.mark_connected();
        }
        let event = Event::new(handle, kind);
        dispatch_event(bot, &event).await;
    }
}

/// Runs the event through the rule engine, then the plugin pipeline and
/// the hooks. Invariant 3 requires the rule engine to be consulted once
/// per candidate plugin, so a rule naming a specific plugin can block
/// delivery to just that one: a single `plugin=""` solve used to gate
/// dispatch to every plugin at once, which made per-plugin rules
/// unsatisfiable. The `plugin=""` solve still gates the hooks, which
/// aren't plugin-scoped.
async fn dispatch_event(bot: &BotHandle, event: &Event) {
    let server_id = event.server_id();
    let casemapping = event.server.borrow().isupport.casemapping();
    let channel = event.kind.channel();
    let origin_nick = event.kind.origin_nick();
    let event_name = event.kind.name();

    let hooks_allowed = {
        let b = bot.borrow();
        let candidate = Candidate {
            server: &server_id,
            channel,
            origin_nick,
            plugin: "",
            event: event_name,
            casemapping,
        };
        b.rules.solve(&candidate)
    };

    let allowed_plugins: std::collections::HashSet<String> = {
        let b = bot.borrow();
        b.plugins
            .ids()
            .into_iter()
            .filter(|id| {
                let candidate = Candidate {
                    server: &server_id,
                    channel,
                    origin_nick,
                    plugin: id,
                    event: event_name,
                    casemapping,
                };
                b.rules.solve(&candidate)
            })
            .collect()
    };

    if !allowed_plugins.is_empty() {
        let replies = bot.borrow_mut().plugins.dispatch_to(event, &allowed_plugins);
        flush_replies(bot, replies).await;
    }

    if hooks_allowed {
        run_hooks(bot, event).await;
    }
}

/// Writes every queued plugin reply out to its target server, framing and
/// splitting long lines the same way a direct `PRIVMSG`/`NOTICE` control
/// command would. Replies naming a server the bot is no longer connected
/// to are silently dropped.
async fn flush_replies(bot: &BotHandle, replies: Vec<crate::plugin::OutboundMessage>) {
    for reply in replies {
        let verb = if reply.notice { "NOTICE" } else { "PRIVMSG" };
        let mut b = bot.borrow_mut();
        let Some(slot) = b.servers.get_mut(&reply.server) else {
            continue;
        };
        for line in crate::irc::connection::frame_outbound(verb, &reply.target, &reply.text) {
            let _ = slot.connection.write_line(&line).await;
        }
    }
}

async fn run_hooks(bot: &BotHandle, event: &Event) {
    // Hooks are cloned out so the `await` points below don't hold `bot`'s
    // `RefCell` borrow across a suspension point.
    let hooks: Vec<crate::hook::Hook> = bot.borrow().hooks.iter().cloned().collect();
    let mut args = Vec::with_capacity(1 + event.kind.hook_args().len());
    args.push(event.server_id());
    args.extend(event.kind.hook_args());
    for hook in &hooks {
        if let Err(e) = crate::hook::run_single(hook, event.kind.name(), &args).await {
            crate::error::log_error(&format!("hook {}", hook.id), &e);
        }
    }
}

/// Idle/keepalive sweep: pings servers quiet past the idle threshold and
/// disconnects ones unresponsive past the hard timeout, scheduling a
/// reconnect.
async fn sweep_keepalive(bot: &BotHandle) {
    let ids: Vec<String> = bot.borrow().server_ids();
    for id in ids {
        let (idle, connected) = {
            let b = bot.borrow();
            let slot = &b.servers[&id];
            (
                slot.connection.idle_for(),
                matches!(slot.handle.borrow().state, ConnectionState::Connected),
            )
        };
        if !connected {
            continue;
        }
        if idle >= Duration::from_secs(crate::limits::TIMEOUT_SECS) {
            let mut b = bot.borrow_mut();
            let slot = b.servers.get_mut(&id).unwrap();
            slot.connection.detach();
            slot.handle.borrow_mut().state = ConnectionState::WaitingReconnect;
        } else if idle >= Duration::from_secs(crate::limits::PING_IDLE_SECS) {
            let hostname = bot.borrow().servers[&id].handle.borrow().hostname.clone();
            let mut b = bot.borrow_mut();
            let slot = b.servers.get_mut(&id).unwrap();
            let _ = slot.connection.write_line(&format!("PING :{hostname}\r\n")).await;
        }
    }
}

async fn sweep_reconnects(bot: &BotHandle) {
    let ids: Vec<String> = bot.borrow().server_ids();
    for id in ids {
        let waiting = {
            let b = bot.borrow();
            matches!(b.servers[&id].handle.borrow().state, ConnectionState::WaitingReconnect)
        };
        if waiting {
            connect_one(bot, &id).await;
        }
    }
}

/// Runs the shutdown sequence: every connected server is sent QUIT, every
/// loaded plugin's `handle_unload` runs (which also cancels its timers),
/// and the hook registry is cleared so no further hook gets invoked. The
/// daemon is single-threaded and cooperative, so no hook process can be
/// mid-flight at this point: each `run_single` call is awaited to
/// completion before the loop ever checks for shutdown again.
async fn shutdown_bot(bot: &BotHandle) {
    let ids: Vec<String> = bot.borrow().server_ids();
    for id in &ids {
        let mut b = bot.borrow_mut();
        let Some(slot) = b.servers.get_mut(id) else { continue };
        if slot.connection.is_connected() {
            let _ = slot.connection.write_line("QUIT :shutting down\r\n").await;
        }
    }

    let plugin_ids = bot.borrow().plugins.ids();
    for id in plugin_ids {
        let _ = bot.borrow_mut().unload_plugin(&id);
    }

    let hook_ids = bot.borrow().hooks.ids();
    for id in hook_ids {
        let _ = bot.borrow_mut().hooks.remove(&id);
    }
}

/// Drives the cooperative event loop: server sockets, timers, and the
/// keepalive/reconnect sweep all interleave on one `current_thread`
/// runtime. Returns when `shutdown` fires (SIGINT/SIGTERM/SIGHUP), after
/// running the shutdown teardown sequence.
pub async fn run(bot: BotHandle, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
    dial_disconnected(&bot).await;

    loop {
        let due_timers = bot.borrow_mut().timers.poll();
        for (timer_id, plugin_id) in due_timers {
            let replies = bot.borrow_mut().plugins.dispatch_timer(&plugin_id, timer_id);
            flush_replies(&bot, replies).await;
        }

        // Every connected server's read is raced concurrently rather than
        // pumped one at a time: a quiet server must never block delivery
        // of another server's already-waiting events.
        let ids: Vec<String> = bot.borrow().server_ids();
        let mut reads: FuturesUnordered<_> = ids
            .into_iter()
            .filter(|id| bot.borrow().servers[id].connection.is_connected())
            .map(|id| {
                let bot = bot.clone();
                async move {
                    let ok = pump_server(&bot, &id).await;
                    (id, ok)
                }
            })
            .collect();

        let tick = tokio::time::sleep(Duration::from_millis(500));
        tokio::pin!(tick);

        tokio::select! {
            _ = shutdown.recv() => {
                shutdown_bot(&bot).await;
                return;
            }
            _ = &mut tick => {
                sweep_keepalive(&bot).await;
                sweep_reconnects(&bot).await;
            }
            Some((id, ok)) = reads.next(), if !reads.is_empty() => {
                if !ok {
                    let mut b = bot.borrow_mut();
                    let slot = b.servers.get_mut(&id).unwrap();
                    slot.connection.detach();
                    slot.handle.borrow_mut().state = ConnectionState::WaitingReconnect;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use crate::timer::TimerKind;

    struct Noop;
    impl Plugin for Noop {}

    #[test]
    fn unloading_a_plugin_cancels_its_timers() {
        let bot = Bot::new();
        bot.borrow_mut()
            .plugins
            .load("greeter", Box::new(Noop), HashMap::new(), HashMap::new(), HashMap::new())
            .unwrap();
        let id = bot.borrow_mut().timers.create("greeter", TimerKind::Repeat, Duration::from_secs(60));

        bot.borrow_mut().unload_plugin("greeter").unwrap();

        assert!(bot.borrow_mut().timers.stop(id).is_err());
    }

    #[test]
    fn reloading_a_plugin_drops_its_pre_reload_timers() {
        let bot = Bot::new();
        bot.borrow_mut()
            .plugins
            .load("greeter", Box::new(Noop), HashMap::new(), HashMap::new(), HashMap::new())
            .unwrap();
        let id = bot.borrow_mut().timers.create("greeter", TimerKind::Single, Duration::from_secs(60));

        bot.borrow_mut().reload_plugin("greeter").unwrap();

        assert!(bot.borrow_mut().timers.stop(id).is_err());
    }
}
