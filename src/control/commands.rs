//! Command registry: one arm per control-protocol command, each
//! validating its request before mutating any registry. Every response is
//! a single JSON object echoing the `command` field, serialized to one
//! line by the caller.

use serde_json::{json, Value};

use crate::bot::BotHandle;
use crate::config::ServerConfig;
use crate::error::{FrippyError, HookError, PluginError, RuleError, ServerError};
use crate::irc::connection::{ctcp, frame_outbound};
use crate::rule::{Action, Rule};

fn err_response(command: &str, e: &FrippyError) -> String {
    let (code, category) = match e.category_and_code() {
        Some((category, code)) => (code, category.as_str().to_string()),
        None => (0, "bot".to_string()),
    };
    json!({
        "command": command,
        "error": code,
        "errorCategory": category,
        "message": e.to_string(),
    })
    .to_string()
}

fn ok(command: &str, mut payload: Value) -> String {
    payload["command"] = json!(command);
    payload.to_string()
}

fn str_field<'a>(rest: &'a Value, key: &str) -> Option<&'a str> {
    rest.get(key).and_then(Value::as_str)
}

fn usize_field(rest: &Value, key: &str) -> Option<usize> {
    rest.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

fn string_list(rest: &Value, key: &str) -> Vec<String> {
    rest.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

pub async fn dispatch(bot: &BotHandle, command: &str, rest: Value) -> String {
    let result = match command {
        "server-list" => Ok(json!({ "list": bot.borrow().server_ids() })),
        "server-info" => server_info(bot, &rest),
        "server-connect" => server_connect(bot, &rest),
        "server-disconnect" => server_disconnect(bot, &rest),
        "server-reconnect" => server_reconnect(bot, &rest),
        "server-join" => server_join(bot, &rest).await,
        "server-part" => server_part(bot, &rest).await,
        "server-kick" => server_kick(bot, &rest).await,
        "server-invite" => server_invite(bot, &rest).await,
        "server-topic" => server_topic(bot, &rest).await,
        "server-message" => server_message(bot, &rest, false).await,
        "server-me" => server_me(bot, &rest).await,
        "server-notice" => server_message(bot, &rest, true).await,
        "server-mode" => server_mode(bot, &rest).await,
        "server-nick" => server_nick(bot, &rest).await,
        "plugin-list" => Ok(json!({ "list": bot.borrow().plugins.ids() })),
        "plugin-info" => plugin_info(bot, &rest),
        "plugin-load" => plugin_load(bot, &rest),
        "plugin-unload" => plugin_unload(bot, &rest),
        "plugin-reload" => plugin_reload(bot, &rest),
        "plugin-config" => plugin_variables(bot, &rest, VarKind::Options),
        "plugin-template" => plugin_variables(bot, &rest, VarKind::Templates),
        "plugin-paths" => plugin_variables(bot, &rest, VarKind::Paths),
        "rule-list" => rule_list(bot),
        "rule-info" => rule_info(bot, &rest),
        "rule-add" => rule_add(bot, &rest),
        "rule-edit" => rule_edit(bot, &rest),
        "rule-remove" => rule_remove(bot, &rest),
        "rule-move" => rule_move(bot, &rest),
        "hook-list" => Ok(json!({ "list": bot.borrow().hooks.ids() })),
        "hook-add" => hook_add(bot, &rest),
        "hook-remove" => hook_remove(bot, &rest),
        _ => Err(crate::error::BotError::InvalidCommand.into()),
    };

    match result {
        Ok(body) => ok(command, body),
        Err(e) => err_response(command, &e),
    }
}

fn server_info(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let id = str_field(rest, "server").ok_or(ServerError::InvalidIdentifier)?;
    let b = bot.borrow();
    let slot = b.servers.get(id).ok_or(ServerError::NotFound)?;
    let state = slot.handle.borrow();
    Ok(json!({
        "hostname": state.hostname,
        "port": state.port,
        "nickname": state.current_nickname,
        "username": state.credentials.username,
        "realname": state.credentials.realname,
        "channels": state.channels.keys().collect::<Vec<_>>(),
    }))
}

fn server_connect(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let id = str_field(rest, "name").ok_or(ServerError::InvalidIdentifier)?;
    let hostname = str_field(rest, "host").ok_or(ServerError::InvalidHostname)?;
    let port = rest.get("port").and_then(Value::as_u64).unwrap_or(6667) as u16;
    let nickname = str_field(rest, "nickname").unwrap_or(id);

    let cfg = ServerConfig {
        id: id.to_string(),
        hostname: hostname.to_string(),
        port,
        tls: rest.get("ssl").and_then(Value::as_bool).unwrap_or(false),
        tls_verify: rest.get("sslVerify").and_then(Value::as_bool).unwrap_or(true),
        ipv4: rest.get("ipv4").and_then(Value::as_bool).unwrap_or(true),
        ipv6: rest.get("ipv6").and_then(Value::as_bool).unwrap_or(true),
        auto_rejoin: rest.get("autoRejoin").and_then(Value::as_bool).unwrap_or(true),
        join_invite: rest.get("joinInvite").and_then(Value::as_bool).unwrap_or(false),
        auto_reconnect: rest.get("autoReconnect").and_then(Value::as_bool).unwrap_or(true),
        nickname: nickname.to_string(),
        username: str_field(rest, "username").unwrap_or(nickname).to_string(),
        realname: str_field(rest, "realname").unwrap_or(nickname).to_string(),
        password: str_field(rest, "password").map(str::to_string),
        command_prefix: str_field(rest, "commandChar").unwrap_or("!").to_string(),
        ctcp_version: str_field(rest, "ctcpVersion").map(str::to_string),
        autojoin: Vec::new(),
    };

    bot.borrow_mut().add_server(&cfg)?;
    Ok(json!({}))
}

fn server_disconnect(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    match str_field(rest, "server") {
        Some(id) => bot.borrow_mut().remove_server(id)?,
        None => {
            let ids = bot.borrow().server_ids();
            for id in ids {
                bot.borrow_mut().remove_server(&id)?;
            }
        }
    }
    Ok(json!({}))
}

fn server_reconnect(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let ids = match str_field(rest, "server") {
        Some(id) => vec![id.to_string()],
        None => bot.borrow().server_ids(),
    };
    for id in &ids {
        bot.borrow_mut().request_reconnect(id)?;
    }
    Ok(json!({}))
}

async fn send_line(bot: &BotHandle, server: &str, line: String) -> Result<Value, FrippyError> {
    bot.borrow_mut().send_line(server, &line).await?;
    Ok(json!({}))
}

async fn server_join(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let server = str_field(rest, "server").ok_or(ServerError::InvalidIdentifier)?;
    let channel = str_field(rest, "channel").ok_or(ServerError::InvalidChannel)?;
    let line = match str_field(rest, "password") {
        Some(key) => format!("JOIN {channel} {key}\r\n"),
        None => format!("JOIN {channel}\r\n"),
    };
    send_line(bot, server, line).await
}

async fn server_part(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let server = str_field(rest, "server").ok_or(ServerError::InvalidIdentifier)?;
    let channel = str_field(rest, "channel").ok_or(ServerError::InvalidChannel)?;
    let line = match str_field(rest, "reason") {
        Some(reason) => format!("PART {channel} :{reason}\r\n"),
        None => format!("PART {channel}\r\n"),
    };
    send_line(bot, server, line).await
}

async fn server_kick(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let server = str_field(rest, "server").ok_or(ServerError::InvalidIdentifier)?;
    let channel = str_field(rest, "channel").ok_or(ServerError::InvalidChannel)?;
    let target = str_field(rest, "target").ok_or(ServerError::InvalidNickname)?;
    let reason = str_field(rest, "reason").unwrap_or("");
    send_line(bot, server, format!("KICK {channel} {target} :{reason}\r\n")).await
}

async fn server_invite(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let server = str_field(rest, "server").ok_or(ServerError::InvalidIdentifier)?;
    let channel = str_field(rest, "channel").ok_or(ServerError::InvalidChannel)?;
    let target = str_field(rest, "target").ok_or(ServerError::InvalidNickname)?;
    send_line(bot, server, format!("INVITE {target} {channel}\r\n")).await
}

async fn server_topic(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let server = str_field(rest, "server").ok_or(ServerError::InvalidIdentifier)?;
    let channel = str_field(rest, "channel").ok_or(ServerError::InvalidChannel)?;
    let topic = str_field(rest, "topic").ok_or(ServerError::InvalidMessage)?;
    for line in frame_outbound("TOPIC", channel, topic) {
        bot.borrow_mut().send_line(server, &line).await?;
    }
    Ok(json!({}))
}

async fn server_message(bot: &BotHandle, rest: &Value, notice: bool) -> Result<Value, FrippyError> {
    let server = str_field(rest, "server").ok_or(ServerError::InvalidIdentifier)?;
    let target = str_field(rest, "target").ok_or(ServerError::InvalidChannel)?;
    let message = str_field(rest, "message").ok_or(ServerError::InvalidMessage)?;
    let verb = if notice { "NOTICE" } else { "PRIVMSG" };
    for line in frame_outbound(verb, target, message) {
        bot.borrow_mut().send_line(server, &line).await?;
    }
    Ok(json!({}))
}

async fn server_me(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let server = str_field(rest, "server").ok_or(ServerError::InvalidIdentifier)?;
    let target = str_field(rest, "target").ok_or(ServerError::InvalidChannel)?;
    let message = str_field(rest, "message").ok_or(ServerError::InvalidMessage)?;
    let action = ctcp::encode("ACTION", Some(message));
    for line in frame_outbound("PRIVMSG", target, &action) {
        bot.borrow_mut().send_line(server, &line).await?;
    }
    Ok(json!({}))
}

async fn server_mode(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let server = str_field(rest, "server").ok_or(ServerError::InvalidIdentifier)?;
    let channel = str_field(rest, "channel").ok_or(ServerError::InvalidChannel)?;
    let mode = str_field(rest, "mode").ok_or(ServerError::InvalidMode)?;
    let args = str_field(rest, "args");
    let line = match args {
        Some(a) => format!("MODE {channel} {mode} {a}\r\n"),
        None => format!("MODE {channel} {mode}\r\n"),
    };
    send_line(bot, server, line).await
}

async fn server_nick(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let server = str_field(rest, "server").ok_or(ServerError::InvalidIdentifier)?;
    let nickname = str_field(rest, "nickname").ok_or(ServerError::InvalidNickname)?;
    send_line(bot, server, format!("NICK {nickname}\r\n")).await
}

fn plugin_info(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let id = str_field(rest, "plugin").ok_or(PluginError::InvalidIdentifier)?;
    let info = bot.borrow().plugins.info(id)?;
    Ok(json!({
        "name": info.name,
        "author": info.author,
        "license": info.license,
        "summary": info.summary,
        "version": info.version,
    }))
}

fn plugin_load(_bot: &BotHandle, _rest: &Value) -> Result<Value, FrippyError> {
    // Native plugin loading goes through `crate::plugin::native::load`, which
    // is `unsafe` (it `dlopen`s an operator-supplied path) and is wired up
    // from configuration at startup rather than from an unauthenticated
    // control-socket request.
    Err(PluginError::ExecError.into())
}

fn plugin_unload(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let id = str_field(rest, "plugin").ok_or(PluginError::InvalidIdentifier)?;
    bot.borrow_mut().unload_plugin(id)?;
    Ok(json!({}))
}

fn plugin_reload(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let id = str_field(rest, "plugin").ok_or(PluginError::InvalidIdentifier)?;
    bot.borrow_mut().reload_plugin(id)?;
    Ok(json!({}))
}

enum VarKind {
    Options,
    Templates,
    Paths,
}

/// `plugin-config`/`plugin-template`/`plugin-paths` share one dispatch
/// shape: no `variable` returns every key under `variables`; a `variable`
/// with no `value` returns just that key (empty string if unset, never an
/// error); both `variable` and `value` sets it and returns an empty
/// success payload. Unknown keys are still stored, only logged once.
fn plugin_variables(bot: &BotHandle, rest: &Value, kind: VarKind) -> Result<Value, FrippyError> {
    let id = str_field(rest, "plugin").ok_or(PluginError::InvalidIdentifier)?;
    let variable = str_field(rest, "variable");
    let value = str_field(rest, "value");

    let mut bot = bot.borrow_mut();
    let known_keys: Vec<String> = match kind {
        VarKind::Options => bot.plugins.options_mut(id)?.keys().cloned().collect(),
        VarKind::Templates => bot.plugins.templates_mut(id)?.keys().cloned().collect(),
        VarKind::Paths => bot.plugins.paths_mut(id)?.keys().cloned().collect(),
    };

    match (variable, value) {
        (None, _) => {
            let variables = match kind {
                VarKind::Options => json!(*bot.plugins.options_mut(id)?),
                VarKind::Templates => json!(*bot.plugins.templates_mut(id)?),
                VarKind::Paths => {
                    let paths = bot.plugins.paths_mut(id)?;
                    let as_strings: std::collections::HashMap<String, String> =
                        paths.iter().map(|(k, v)| (k.clone(), v.display().to_string())).collect();
                    json!(as_strings)
                }
            };
            Ok(json!({ "variables": variables }))
        }
        (Some(key), None) => {
            let found = match kind {
                VarKind::Options => bot.plugins.options_mut(id)?.get(key).cloned().unwrap_or_default(),
                VarKind::Templates => bot.plugins.templates_mut(id)?.get(key).cloned().unwrap_or_default(),
                VarKind::Paths => bot
                    .plugins
                    .paths_mut(id)?
                    .get(key)
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            };
            Ok(json!({ "variables": { key: found } }))
        }
        (Some(key), Some(val)) => {
            if !known_keys.iter().any(|k| k == key) {
                tracing::warn!(plugin = id, variable = key, "setting previously unknown variable");
            }
            match kind {
                VarKind::Options => {
                    bot.plugins.options_mut(id)?.insert(key.to_string(), val.to_string());
                }
                VarKind::Templates => {
                    bot.plugins.templates_mut(id)?.insert(key.to_string(), val.to_string());
                }
                VarKind::Paths => {
                    bot.plugins
                        .paths_mut(id)?
                        .insert(key.to_string(), std::path::PathBuf::from(val));
                }
            }
            Ok(json!({}))
        }
    }
}

fn parse_action(rest: &Value) -> Result<Action, FrippyError> {
    let raw = str_field(rest, "action").ok_or(RuleError::InvalidAction)?;
    Action::parse(raw).ok_or_else(|| RuleError::InvalidAction.into())
}

fn rule_json(rule: &Rule) -> Value {
    json!({
        "action": rule.action.as_str(),
        "servers": rule.servers.iter().collect::<Vec<_>>(),
        "channels": rule.channels.iter().collect::<Vec<_>>(),
        "origins": rule.origins.iter().collect::<Vec<_>>(),
        "plugins": rule.plugins.iter().collect::<Vec<_>>(),
        "events": rule.events.iter().collect::<Vec<_>>(),
    })
}

fn rule_info(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let index = usize_field(rest, "index").ok_or(RuleError::InvalidIndex)?;
    let b = bot.borrow();
    let rule = b.rules.get(index)?;
    Ok(rule_json(rule))
}

fn rule_list(bot: &BotHandle) -> Result<Value, FrippyError> {
    let b = bot.borrow();
    let list: Vec<Value> = b.rules.iter().map(rule_json).collect();
    Ok(json!({ "list": list }))
}

fn rule_add(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let action = parse_action(rest)?;
    let mut rule = Rule::new(action);
    for s in string_list(rest, "servers") {
        rule.servers.insert(&s);
    }
    for c in string_list(rest, "channels") {
        rule.channels.insert(&c);
    }
    for o in string_list(rest, "origins") {
        rule.origins.insert(&o);
    }
    for p in string_list(rest, "plugins") {
        rule.plugins.insert(&p);
    }
    for e in string_list(rest, "events") {
        rule.events.insert(&e);
    }

    let mut bot = bot.borrow_mut();
    let index = match usize_field(rest, "index") {
        Some(i) => {
            bot.rules.insert_at(i, rule)?;
            i
        }
        None => bot.rules.add_at_end(rule),
    };
    Ok(json!({ "index": index }))
}

/// `rule-edit`'s update algorithm: apply every `remove-<set>` entry, then
/// every `add-<set>` entry, to a *copy* of the stored rule, and only swap
/// the copy in once every field parses, so a bad `action` value leaves the
/// stored rule untouched.
fn rule_edit(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let index = usize_field(rest, "index").ok_or(RuleError::InvalidIndex)?;
    let mut bot = bot.borrow_mut();
    let mut rule = bot.rules.get(index)?.clone();

    if let Some(raw) = str_field(rest, "action") {
        rule.action = Action::parse(raw).ok_or(RuleError::InvalidAction)?;
    }

    for (set, field) in [
        (&mut rule.servers, "servers"),
        (&mut rule.channels, "channels"),
        (&mut rule.origins, "origins"),
        (&mut rule.plugins, "plugins"),
        (&mut rule.events, "events"),
    ] {
        for v in string_list(rest, &format!("remove-{field}")) {
            set.remove(&v);
        }
    }
    for (set, field) in [
        (&mut rule.servers, "servers"),
        (&mut rule.channels, "channels"),
        (&mut rule.origins, "origins"),
        (&mut rule.plugins, "plugins"),
        (&mut rule.events, "events"),
    ] {
        for v in string_list(rest, &format!("add-{field}")) {
            set.insert(&v);
        }
    }

    bot.rules.replace_at(index, rule)?;
    Ok(json!({}))
}

fn rule_remove(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let index = usize_field(rest, "index").ok_or(RuleError::InvalidIndex)?;
    bot.borrow_mut().rules.remove_at(index)?;
    Ok(json!({}))
}

fn rule_move(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let from = usize_field(rest, "from").ok_or(RuleError::InvalidIndex)?;
    let to = usize_field(rest, "to").ok_or(RuleError::InvalidIndex)?;
    bot.borrow_mut().rules.move_rule(from, to)?;
    Ok(json!({}))
}

fn hook_add(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let id = str_field(rest, "id").ok_or(HookError::InvalidIdentifier)?;
    let path = str_field(rest, "path").ok_or(HookError::InvalidPath)?;
    bot.borrow_mut().hooks.add(id, std::path::PathBuf::from(path))?;
    Ok(json!({}))
}

fn hook_remove(bot: &BotHandle, rest: &Value) -> Result<Value, FrippyError> {
    let id = str_field(rest, "id").ok_or(HookError::InvalidIdentifier)?;
    bot.borrow_mut().hooks.remove(id)?;
    Ok(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Bot;
    use std::collections::HashMap;

    #[tokio::test]
    async fn server_connect_then_list_round_trips() {
        let bot = Bot::new();
        let response = dispatch(
            &bot,
            "server-connect",
            json!({ "name": "local", "host": "irc.example.org", "nickname": "frippy" }),
        )
        .await;
        assert!(!response.contains("\"error\""), "{response}");

        let response = dispatch(&bot, "server-list", json!({})).await;
        let value: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["list"], json!(["local"]));
    }

    #[tokio::test]
    async fn rule_add_move_remove_round_trips() {
        let bot = Bot::new();
        dispatch(&bot, "rule-add", json!({ "action": "drop", "servers": ["s1"] }))
            .await;
        dispatch(&bot, "rule-add", json!({ "action": "accept", "channels": ["#c"] }))
            .await;

        let response = dispatch(&bot, "rule-list", json!({})).await;
        let value: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["list"].as_array().unwrap().len(), 2);
        assert_eq!(value["list"][0]["action"], "drop");
        assert_eq!(value["list"][1]["action"], "accept");

        dispatch(&bot, "rule-move", json!({ "from": 0, "to": 1 })).await;
        let response = dispatch(&bot, "rule-list", json!({})).await;
        let value: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["list"][0]["action"], "accept");
        assert_eq!(value["list"][1]["action"], "drop");

        dispatch(&bot, "rule-remove", json!({ "index": 0 })).await;
        let response = dispatch(&bot, "rule-list", json!({})).await;
        let value: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["list"].as_array().unwrap().len(), 1);
        assert_eq!(value["list"][0]["action"], "drop");
    }

    #[tokio::test]
    async fn rule_edit_leaves_rule_untouched_on_invalid_action() {
        let bot = Bot::new();
        dispatch(&bot, "rule-add", json!({ "action": "drop", "servers": ["s1"] })).await;

        let response = dispatch(&bot, "rule-edit", json!({ "index": 0, "action": "sideways" })).await;
        assert!(response.contains("\"error\""));
        assert_eq!(bot.borrow().rules.get(0).unwrap().action, Action::Drop);

        dispatch(
            &bot,
            "rule-edit",
            json!({ "index": 0, "add-channels": ["#staff"], "remove-servers": ["s1"] }),
        )
        .await;
        let rule = bot.borrow().rules.get(0).unwrap().clone();
        assert!(rule.channels.matches("#staff"));
        assert!(rule.servers.is_empty());
    }

    #[tokio::test]
    async fn plugin_config_get_all_get_one_and_set() {
        struct Noop;
        impl crate::plugin::Plugin for Noop {}

        let bot = Bot::new();
        let mut options = HashMap::new();
        options.insert("greeting".to_string(), "hi".to_string());
        bot.borrow_mut()
            .plugins
            .load("greeter", Box::new(Noop), options, HashMap::new(), HashMap::new())
            .unwrap();

        let response = dispatch(&bot, "plugin-config", json!({ "plugin": "greeter" })).await;
        let value: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["variables"]["greeting"], "hi");

        let response = dispatch(
            &bot,
            "plugin-config",
            json!({ "plugin": "greeter", "variable": "greeting" }),
        )
        .await;
        let value: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["variables"]["greeting"], "hi");

        dispatch(
            &bot,
            "plugin-config",
            json!({ "plugin": "greeter", "variable": "greeting", "value": "hey" }),
        )
        .await;
        assert_eq!(
            bot.borrow_mut().plugins.options_mut("greeter").unwrap().get("greeting"),
            Some(&"hey".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_command_reports_bot_error() {
        let bot = Bot::new();
        let response = dispatch(&bot, "not-a-real-command", json!({})).await;
        assert!(response.contains("\"errorCategory\":\"bot\""));
    }
}
