//! Looks up the Unicode name and UTF-8 encoding of the first character in
//! a `!unicode <char>` command.

use crate::error::Result;
use crate::irc::event::EventKind;
use crate::plugin::{Plugin, PluginContext};

#[derive(Default, Debug)]
pub struct Unicode;

impl Unicode {
    pub fn new() -> Unicode {
        Unicode
    }

    fn format_response(&self, content: &str) -> Option<String> {
        let character = content.chars().next()?;

        let mut buf = [0; 4];
        let bytes: Vec<String> = character
            .encode_utf8(&mut buf)
            .as_bytes()
            .iter()
            .map(|b| format!("{:#x}", b))
            .collect();

        let name = unicode_names2::name(character)
            .map(|n| n.to_string().to_lowercase())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        Some(if bytes.len() > 1 {
            format!(
                "{character} is '{name}' | UTF-8: {0:#x} ({0}), Bytes: [{1}]",
                character as u32,
                bytes.join(",")
            )
        } else {
            format!("{character} is '{name}' | UTF-8: {0:#x} ({0})", character as u32)
        })
    }
}

impl Plugin for Unicode {
    fn handle_command(&mut self, ctx: &PluginContext, event: &crate::irc::event::Event) -> Result<()> {
        let EventKind::Command(cmd) = &event.kind else {
            return Ok(());
        };
        let server = event.server_id();
        let target = &cmd.channel;

        let reply = cmd
            .tokens
            .iter()
            .find(|t| !t.is_empty())
            .and_then(|t| self.format_response(t))
            .unwrap_or_else(|| "No non-space character was found.".to_string());

        ctx.say(&server, target, reply);
        Ok(())
    }
}
