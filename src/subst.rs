//! Template substitution engine (`#{keyword}`, `${ENV}`, `@{color}`,
//! date formatting and attribute escapes).
//!
//! `subst` is a pure function: it never touches the filesystem or network,
//! and shell substitution (`$(cmd)`) is gated behind [`Context::allow_shell`]
//! which defaults to `false`. Unknown tokens pass through verbatim.

use std::collections::HashMap;
use std::process::Command;

use chrono::{DateTime, Local};

/// IRC mIRC-style color codes in the fixed palette the control protocol and
/// templates are allowed to reference by name.
const PALETTE: &[(&str, u8)] = &[
    ("white", 0),
    ("black", 1),
    ("blue", 2),
    ("green", 3),
    ("red", 4),
    ("brown", 5),
    ("purple", 6),
    ("orange", 7),
    ("yellow", 8),
    ("light-green", 9),
    ("teal", 10),
    ("cyan", 11),
    ("light-blue", 12),
    ("pink", 13),
    ("grey", 14),
    ("light-grey", 15),
];

fn color_code(name: &str) -> Option<u8> {
    PALETTE
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, c)| *c)
}

/// Everything a call to [`subst`] can draw on.
#[derive(Clone, Debug, Default)]
pub struct Context {
    pub keywords: HashMap<String, String>,
    pub time: Option<DateTime<Local>>,
    allow_env: bool,
    allow_shell: bool,
    allow_colors: bool,
}

impl Context {
    pub fn new() -> Self {
        Context {
            keywords: HashMap::new(),
            time: None,
            allow_env: true,
            allow_shell: false,
            allow_colors: true,
        }
    }

    pub fn with_keyword(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keywords.insert(key.into(), value.into());
        self
    }

    pub fn allow_shell(mut self, allow: bool) -> Self {
        self.allow_shell = allow;
        self
    }

    pub fn allow_env(mut self, allow: bool) -> Self {
        self.allow_env = allow;
        self
    }

    pub fn allow_colors(mut self, allow: bool) -> Self {
        self.allow_colors = allow;
        self
    }

    fn now(&self) -> DateTime<Local> {
        self.time.unwrap_or_else(Local::now)
    }
}

/// Expands every recognized token in `template` against `ctx`.
///
/// Output is not bounded here; callers writing onto a fixed-size IRC line
/// truncate silently afterwards (spec requirement: "truncation is
/// silent").
pub fn subst(template: &str, ctx: &Context) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    let bytes = template.as_bytes();

    while let Some((i, c)) = chars.next() {
        match c {
            '#' if bytes.get(i + 1) == Some(&b'#') => {
                out.push('#');
                chars.next();
            }
            '$' if bytes.get(i + 1) == Some(&b'$') => {
                out.push('$');
                chars.next();
            }
            '@' if bytes.get(i + 1) == Some(&b'@') => {
                out.push('@');
                chars.next();
            }
            '#' if bytes.get(i + 1) == Some(&b'{') => {
                if let Some(end) = find_close(template, i + 2) {
                    let inner = &template[i + 2..end];
                    out.push_str(&expand_hash(inner, ctx));
                    advance_to(&mut chars, end);
                } else {
                    out.push('#');
                }
            }
            '$' if bytes.get(i + 1) == Some(&b'{') => {
                if let Some(end) = find_close(template, i + 2) {
                    let inner = &template[i + 2..end];
                    if ctx.allow_env {
                        out.push_str(&std::env::var(inner).unwrap_or_default());
                    }
                    advance_to(&mut chars, end);
                } else {
                    out.push('$');
                }
            }
            '$' if bytes.get(i + 1) == Some(&b'(') => {
                if let Some(end) = find_matching(template, i + 2, '(', ')') {
                    let inner = &template[i + 2..end];
                    if ctx.allow_shell {
                        out.push_str(&run_shell(inner));
                    }
                    advance_to(&mut chars, end);
                } else {
                    out.push('$');
                }
            }
            '@' if bytes.get(i + 1) == Some(&b'{') => {
                if let Some(end) = find_close(template, i + 2) {
                    let inner = &template[i + 2..end];
                    if ctx.allow_colors {
                        out.push_str(&expand_color(inner));
                    }
                    advance_to(&mut chars, end);
                } else {
                    out.push('@');
                }
            }
            '@' if matches!(bytes.get(i + 1), Some(b'b') | Some(b'i') | Some(b'u') | Some(b'o')) =>
            {
                let attr = bytes[i + 1];
                out.push(attribute_char(attr));
                chars.next();
            }
            _ => out.push(c),
        }
    }

    out
}

fn attribute_char(attr: u8) -> char {
    match attr {
        b'b' => '\u{02}',
        b'i' => '\u{1D}',
        b'u' => '\u{1F}',
        b'o' => '\u{0F}',
        _ => unreachable!(),
    }
}

fn expand_hash(inner: &str, ctx: &Context) -> String {
    if let Some(fmt) = inner.strip_prefix("date:") {
        return ctx.now().format(fmt).to_string();
    }
    ctx.keywords.get(inner).cloned().unwrap_or_default()
}

fn expand_color(inner: &str) -> String {
    let mut parts = inner.splitn(2, ',');
    let fg = parts.next().unwrap_or("");
    let bg = parts.next();

    let Some(fg_code) = color_code(fg) else {
        return format!("@{{{inner}}}");
    };

    match bg.and_then(color_code) {
        Some(bg_code) => format!("\u{03}{:02},{:02}", fg_code, bg_code),
        None => format!("\u{03}{:02}", fg_code),
    }
}

fn run_shell(command: &str) -> String {
    Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .output()
        .ok()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim_end().to_string())
        .unwrap_or_default()
}

/// Finds the `}` closing a `#{`/`${`/`@{` token, starting the search at
/// `from` (the byte index right after the opening brace).
fn find_close(s: &str, from: usize) -> Option<usize> {
    s[from..].find('}').map(|o| from + o)
}

fn find_matching(s: &str, from: usize, _open: char, close: char) -> Option<usize> {
    s[from..].find(close).map(|o| from + o)
}

/// Advances `chars` (a peekable char_indices iterator) past byte offset
/// `end`, consuming the closing delimiter too.
fn advance_to(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, end: usize) {
    while let Some(&(idx, _)) = chars.peek() {
        if idx <= end {
            chars.next();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_escapes() {
        assert_eq!(subst("##", &Context::new()), "#");
        assert_eq!(subst("$$", &Context::new()), "$");
        assert_eq!(subst("@@", &Context::new()), "@");
    }

    #[test]
    fn keyword_lookup() {
        let ctx = Context::new().with_keyword("x", "y");
        assert_eq!(subst("#{x}", &ctx), "y");
        assert_eq!(subst("#{x}", &Context::new()), "");
    }

    #[test]
    fn unknown_tokens_pass_through() {
        assert_eq!(subst("hello %world%", &Context::new()), "hello %world%");
        assert_eq!(subst("#{unclosed", &Context::new()), "#{unclosed");
    }

    #[test]
    fn env_lookup_disabled_by_default_is_still_allowed_but_gated() {
        std::env::set_var("FRIPPY_TEST_VAR", "hi");
        let ctx = Context::new();
        assert_eq!(subst("${FRIPPY_TEST_VAR}", &ctx), "hi");
        let ctx = ctx.allow_env(false);
        assert_eq!(subst("${FRIPPY_TEST_VAR}", &ctx), "");
    }

    #[test]
    fn shell_disabled_by_default() {
        let ctx = Context::new();
        assert_eq!(subst("$(echo hi)", &ctx), "");
        let ctx = ctx.allow_shell(true);
        assert_eq!(subst("$(echo hi)", &ctx), "hi");
    }

    #[test]
    fn color_escape() {
        let ctx = Context::new();
        assert_eq!(subst("@{red}", &ctx), "\u{03}04");
        assert_eq!(subst("@{red,black}", &ctx), "\u{03}04,01");
        assert_eq!(subst("@{notacolor}", &ctx), "@{notacolor}");
    }

    #[test]
    fn attribute_escapes() {
        assert_eq!(subst("@b", &Context::new()), "\u{02}");
        assert_eq!(subst("@i", &Context::new()), "\u{1D}");
        assert_eq!(subst("@u", &Context::new()), "\u{1F}");
        assert_eq!(subst("@o", &Context::new()), "\u{0F}");
    }

    #[test]
    fn date_format() {
        use chrono::TimeZone;
        let ctx = Context {
            time: Some(Local.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap()),
            ..Context::new()
        };
        assert_eq!(subst("#{date:%Y-%m-%d}", &ctx), "2026-07-28");
    }
}
