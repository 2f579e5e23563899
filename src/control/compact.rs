//! Compact (ASCII) control protocol variant: one command per line,
//! space-separated tokens, replies start with `OK` or `ERROR`. Only the
//! subset of commands spec.md names for this variant is supported;
//! everything else goes through the JSON variant in [`super`].

use serde_json::{json, Value};

use crate::bot::BotHandle;

use super::commands;

pub async fn handle_line(bot: &BotHandle, line: &str) -> String {
    let mut tokens = line.trim().splitn(2, char::is_whitespace);
    let command = match tokens.next() {
        Some(c) if !c.is_empty() => c,
        _ => return "ERROR empty command".to_string(),
    };
    let rest = tokens.next().unwrap_or("").trim_start();

    let Some(request) = build_request(command, rest) else {
        return format!("ERROR unsupported command: {command}");
    };

    let response = commands::dispatch(bot, command, request).await;
    to_compact(command, &response)
}

fn build_request(command: &str, rest: &str) -> Option<Value> {
    match command {
        "server-list" => Some(json!({})),
        "server-disconnect" => Some(json!({ "server": rest.split_whitespace().next() })),
        "server-part" => {
            let mut it = rest.splitn(3, char::is_whitespace);
            let server = it.next().filter(|s| !s.is_empty())?;
            let channel = it.next()?;
            let reason = it.next();
            Some(json!({ "server": server, "channel": channel, "reason": reason }))
        }
        "server-topic" => {
            let mut it = rest.splitn(3, char::is_whitespace);
            let server = it.next().filter(|s| !s.is_empty())?;
            let channel = it.next()?;
            let topic = it.next()?;
            Some(json!({ "server": server, "channel": channel, "topic": topic }))
        }
        "server-message" | "server-me" | "server-notice" => {
            let mut it = rest.splitn(3, char::is_whitespace);
            let server = it.next().filter(|s| !s.is_empty())?;
            let target = it.next()?;
            let message = it.next()?;
            Some(json!({ "server": server, "target": target, "message": message }))
        }
        "server-mode" => {
            let mut it = rest.splitn(4, char::is_whitespace);
            let server = it.next().filter(|s| !s.is_empty())?;
            let channel = it.next()?;
            let mode = it.next()?;
            let args = it.next();
            Some(json!({ "server": server, "channel": channel, "mode": mode, "args": args }))
        }
        "server-nick" => {
            let mut it = rest.splitn(2, char::is_whitespace);
            let server = it.next().filter(|s| !s.is_empty())?;
            let nickname = it.next()?;
            Some(json!({ "server": server, "nickname": nickname }))
        }
        _ => None,
    }
}

fn to_compact(command: &str, response: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(response) else {
        return "ERROR malformed response".to_string();
    };

    if let Some(message) = value.get("message").and_then(Value::as_str) {
        if value.get("error").is_some() {
            return format!("ERROR {message}");
        }
    }

    if command == "server-list" {
        let list: Vec<String> = value
            .get("list")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        return format!("OK {}", list.join(" "));
    }

    "OK".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_message() {
        let req = build_request("server-message", "local #chan hello there").unwrap();
        assert_eq!(req["server"], "local");
        assert_eq!(req["target"], "#chan");
        assert_eq!(req["message"], "hello there");
    }

    #[test]
    fn rejects_unsupported_command() {
        assert!(build_request("rule-add", "x").is_none());
    }

    #[test]
    fn formats_ok_with_list() {
        assert_eq!(
            to_compact("server-list", r#"{"command":"server-list","list":["a","b"]}"#),
            "OK a b"
        );
    }

    #[test]
    fn formats_error() {
        assert_eq!(
            to_compact(
                "server-part",
                r#"{"command":"server-part","error":1,"errorCategory":"server","message":"server not found"}"#
            ),
            "ERROR server not found"
        );
    }
}
