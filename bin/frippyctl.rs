//! `frippyctl`: a thin client for the control socket. Each subcommand
//! sends one JSON request and prints the one JSON response it gets back.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "frippyctl", version, about = "Control client for frippyd")]
struct Args {
    /// Path to a Unix control socket.
    #[arg(long, conflicts_with = "tcp")]
    socket: Option<PathBuf>,

    /// host:port of a TCP control listener.
    #[arg(long)]
    tcp: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List connected servers.
    ServerList,
    /// Report one server's connection details.
    ServerInfo { server: String },
    /// Connect to a new server.
    ServerConnect {
        name: String,
        host: String,
        nickname: String,
        #[arg(long, default_value_t = 6667)]
        port: u16,
        #[arg(long)]
        ssl: bool,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        realname: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Disconnect from a server, or all of them if none is given.
    ServerDisconnect { server: Option<String> },
    /// Force a reconnect attempt, or for all servers if none is given.
    ServerReconnect { server: Option<String> },
    /// Join a channel.
    ServerJoin {
        server: String,
        channel: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Leave a channel.
    ServerPart {
        server: String,
        channel: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Kick a user from a channel.
    ServerKick {
        server: String,
        channel: String,
        target: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Invite a user to a channel.
    ServerInvite {
        server: String,
        channel: String,
        target: String,
    },
    /// Set a channel topic.
    ServerTopic {
        server: String,
        channel: String,
        topic: String,
    },
    /// Send a PRIVMSG.
    ServerMessage {
        server: String,
        target: String,
        message: String,
    },
    /// Send a CTCP ACTION (/me).
    ServerMe {
        server: String,
        target: String,
        message: String,
    },
    /// Send a NOTICE.
    ServerNotice {
        server: String,
        target: String,
        message: String,
    },
    /// Set a channel mode.
    ServerMode {
        server: String,
        channel: String,
        mode: String,
        #[arg(long)]
        args: Option<String>,
    },
    /// Change the bot's nickname on a server.
    ServerNick { server: String, nickname: String },
    /// List loaded plugins.
    PluginList,
    /// Report one plugin's metadata.
    PluginInfo { plugin: String },
    /// Load a native plugin from a path.
    PluginLoad { plugin: String, path: PathBuf },
    /// Unload a plugin.
    PluginUnload { plugin: String },
    /// Reload a plugin.
    PluginReload { plugin: String },
    /// Get or set a plugin's config variables.
    PluginConfig {
        plugin: String,
        variable: Option<String>,
        value: Option<String>,
    },
    /// Get or set a plugin's template strings.
    PluginTemplate {
        plugin: String,
        variable: Option<String>,
        value: Option<String>,
    },
    /// Get or set a plugin's filesystem paths.
    PluginPaths {
        plugin: String,
        variable: Option<String>,
        value: Option<String>,
    },
    /// Report the number of configured rules.
    RuleList,
    /// Report one rule's matchers.
    RuleInfo { index: usize },
    /// Append a rule (accept or drop).
    RuleAdd {
        action: String,
        #[arg(long)]
        index: Option<usize>,
        #[arg(long)]
        servers: Vec<String>,
        #[arg(long)]
        channels: Vec<String>,
        #[arg(long)]
        origins: Vec<String>,
        #[arg(long)]
        plugins: Vec<String>,
        #[arg(long)]
        events: Vec<String>,
    },
    /// Edit an existing rule's action and/or matchers.
    RuleEdit {
        index: usize,
        #[arg(long)]
        action: Option<String>,
        #[arg(long = "add-servers")]
        add_servers: Vec<String>,
        #[arg(long = "remove-servers")]
        remove_servers: Vec<String>,
        #[arg(long = "add-channels")]
        add_channels: Vec<String>,
        #[arg(long = "remove-channels")]
        remove_channels: Vec<String>,
        #[arg(long = "add-origins")]
        add_origins: Vec<String>,
        #[arg(long = "remove-origins")]
        remove_origins: Vec<String>,
        #[arg(long = "add-plugins")]
        add_plugins: Vec<String>,
        #[arg(long = "remove-plugins")]
        remove_plugins: Vec<String>,
        #[arg(long = "add-events")]
        add_events: Vec<String>,
        #[arg(long = "remove-events")]
        remove_events: Vec<String>,
    },
    /// Remove a rule by index.
    RuleRemove { index: usize },
    /// Move a rule from one index to another.
    RuleMove { from: usize, to: usize },
    /// Register a hook.
    HookAdd { id: String, path: PathBuf },
    /// Remove a hook.
    HookRemove { id: String },
    /// List registered hooks.
    HookList,
}

fn main() {
    let args = Args::parse();

    let (command, rest) = match &args.command {
        Command::ServerList => ("server-list", json!({})),
        Command::ServerInfo { server } => ("server-info", json!({ "server": server })),
        Command::ServerConnect {
            name,
            host,
            nickname,
            port,
            ssl,
            username,
            realname,
            password,
        } => (
            "server-connect",
            json!({
                "name": name,
                "host": host,
                "nickname": nickname,
                "port": port,
                "ssl": ssl,
                "username": username,
                "realname": realname,
                "password": password,
            }),
        ),
        Command::ServerDisconnect { server } => ("server-disconnect", json!({ "server": server })),
        Command::ServerReconnect { server } => ("server-reconnect", json!({ "server": server })),
        Command::ServerJoin { server, channel, password } => (
            "server-join",
            json!({ "server": server, "channel": channel, "password": password }),
        ),
        Command::ServerPart { server, channel, reason } => (
            "server-part",
            json!({ "server": server, "channel": channel, "reason": reason }),
        ),
        Command::ServerKick { server, channel, target, reason } => (
            "server-kick",
            json!({ "server": server, "channel": channel, "target": target, "reason": reason }),
        ),
        Command::ServerInvite { server, channel, target } => (
            "server-invite",
            json!({ "server": server, "channel": channel, "target": target }),
        ),
        Command::ServerTopic { server, channel, topic } => (
            "server-topic",
            json!({ "server": server, "channel": channel, "topic": topic }),
        ),
        Command::ServerMessage { server, target, message } => (
            "server-message",
            json!({ "server": server, "target": target, "message": message }),
        ),
        Command::ServerMe { server, target, message } => (
            "server-me",
            json!({ "server": server, "target": target, "message": message }),
        ),
        Command::ServerNotice { server, target, message } => (
            "server-notice",
            json!({ "server": server, "target": target, "message": message }),
        ),
        Command::ServerMode { server, channel, mode, args } => (
            "server-mode",
            json!({ "server": server, "channel": channel, "mode": mode, "args": args }),
        ),
        Command::ServerNick { server, nickname } => {
            ("server-nick", json!({ "server": server, "nickname": nickname }))
        }
        Command::PluginList => ("plugin-list", json!({})),
        Command::PluginInfo { plugin } => ("plugin-info", json!({ "plugin": plugin })),
        Command::PluginLoad { plugin, path } => ("plugin-load", json!({ "plugin": plugin, "path": path })),
        Command::PluginUnload { plugin } => ("plugin-unload", json!({ "plugin": plugin })),
        Command::PluginReload { plugin } => ("plugin-reload", json!({ "plugin": plugin })),
        Command::PluginConfig { plugin, variable, value } => (
            "plugin-config",
            json!({ "plugin": plugin, "variable": variable, "value": value }),
        ),
        Command::PluginTemplate { plugin, variable, value } => (
            "plugin-template",
            json!({ "plugin": plugin, "variable": variable, "value": value }),
        ),
        Command::PluginPaths { plugin, variable, value } => (
            "plugin-paths",
            json!({ "plugin": plugin, "variable": variable, "value": value }),
        ),
        Command::RuleList => ("rule-list", json!({})),
        Command::RuleInfo { index } => ("rule-info", json!({ "index": index })),
        Command::RuleAdd {
            action,
            index,
            servers,
            channels,
            origins,
            plugins,
            events,
        } => (
            "rule-add",
            json!({
                "action": action,
                "index": index,
                "servers": servers,
                "channels": channels,
                "origins": origins,
                "plugins": plugins,
                "events": events,
            }),
        ),
        Command::RuleEdit {
            index,
            action,
            add_servers,
            remove_servers,
            add_channels,
            remove_channels,
            add_origins,
            remove_origins,
            add_plugins,
            remove_plugins,
            add_events,
            remove_events,
        } => (
            "rule-edit",
            json!({
                "index": index,
                "action": action,
                "add-servers": add_servers,
                "remove-servers": remove_servers,
                "add-channels": add_channels,
                "remove-channels": remove_channels,
                "add-origins": add_origins,
                "remove-origins": remove_origins,
                "add-plugins": add_plugins,
                "remove-plugins": remove_plugins,
                "add-events": add_events,
                "remove-events": remove_events,
            }),
        ),
        Command::RuleRemove { index } => ("rule-remove", json!({ "index": index })),
        Command::RuleMove { from, to } => ("rule-move", json!({ "from": from, "to": to })),
        Command::HookAdd { id, path } => ("hook-add", json!({ "id": id, "path": path })),
        Command::HookRemove { id } => ("hook-remove", json!({ "id": id })),
        Command::HookList => ("hook-list", json!({})),
    };

    let mut request = rest;
    request["command"] = json!(command);

    let response = match (&args.socket, &args.tcp) {
        (Some(path), None) => send(UnixStream::connect(path), &request),
        (None, Some(addr)) => send(TcpStream::connect(addr), &request),
        _ => {
            eprintln!("frippyctl: pass exactly one of --socket or --tcp");
            std::process::exit(2);
        }
    };

    match response {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap());
            if value.get("error").is_some() {
                if let Some(message) = value.get("message").and_then(Value::as_str) {
                    eprintln!("frippyctl: {message}");
                }
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("frippyctl: {e}");
            std::process::exit(2);
        }
    }
}

fn send<S: std::io::Read + std::io::Write>(
    stream: std::io::Result<S>,
    request: &Value,
) -> std::io::Result<Value> {
    let stream = stream?;
    let mut reader = BufReader::new(stream);

    // Drain the daemon's greeting line before sending the request.
    let mut greeting = String::new();
    reader.read_line(&mut greeting)?;

    let mut line = serde_json::to_string(request).expect("request always serializes");
    line.push('\n');
    reader.get_mut().write_all(line.as_bytes())?;

    let mut response = String::new();
    reader.read_line(&mut response)?;
    serde_json::from_str(&response).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
