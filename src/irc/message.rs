//! Line framing and parsing: turns a raw IRC line into a [`Message`].
//!
//! Parsing uses `nom`, following the combinator style of the reference
//! protocol library this crate's IRC layer is grounded on, but produces
//! owned `String`s (events outlive the line buffer they were parsed from
//! and are never mutated after construction, so there is no benefit to
//! zero-copy borrowing here).

use nom::bytes::complete::{take_till, take_while1};
use nom::character::complete::{char, space0, space1};
use nom::combinator::opt;
use nom::sequence::preceded;
use nom::IResult;

use crate::limits;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Prefix {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl Prefix {
    pub fn parse(raw: &str) -> Prefix {
        // nick[!user][@host]
        let (rest, host) = match raw.split_once('@') {
            Some((rest, host)) => (rest, Some(host.to_string())),
            None => (raw, None),
        };
        let (nick, user) = match rest.split_once('!') {
            Some((nick, user)) => (nick.to_string(), Some(user.to_string())),
            None => (rest.to_string(), None),
        };
        Prefix { nick, user, host }
    }

    pub fn full(&self) -> String {
        let mut s = self.nick.clone();
        if let Some(u) = &self.user {
            s.push('!');
            s.push_str(u);
        }
        if let Some(h) = &self.host {
            s.push('@');
            s.push_str(h);
        }
        s
    }
}

/// A parsed verb: either a textual command (`PRIVMSG`) or a 3-digit
/// numeric reply (`001`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Verb(String),
    Numeric(u16),
}

impl Command {
    fn parse(raw: &str) -> Command {
        if raw.len() == 3 && raw.bytes().all(|b| b.is_ascii_digit()) {
            Command::Numeric(raw.parse().unwrap_or(0))
        } else {
            Command::Verb(raw.to_ascii_uppercase())
        }
    }

    pub fn is_verb(&self, verb: &str) -> bool {
        matches!(self, Command::Verb(v) if v == verb)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub prefix: Option<Prefix>,
    pub command: Command,
    pub args: Vec<String>,
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("missing command")]
    MissingCommand,
    #[error("line exceeds {0} bytes")]
    TooLong(usize),
}

fn parse_tags(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_till(|c| c == ' '))(input)
}

fn parse_prefix(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c: char| c != ' '))(input)
}

fn parse_verb(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric())(input)
}

fn parse_params(input: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing.to_string());
            break;
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        params.push(rest[..end].to_string());
        rest = &rest[end..];
        if params.len() >= limits::ARGS_MAX {
            break;
        }
    }

    params
}

impl Message {
    /// Parses one line, already stripped of its trailing CRLF/LF.
    ///
    /// Leading IRCv3 `@tags` are recognized and discarded (Open Question:
    /// this crate does not interpret message tags, consistent with "not a
    /// full IRCv3 implementation").
    pub fn parse(line: &str) -> Result<Message, ParseError> {
        if line.is_empty() {
            return Err(ParseError::Empty);
        }
        if line.len() > limits::MESSAGE_LEN {
            return Err(ParseError::TooLong(limits::MESSAGE_LEN));
        }

        let (input, _tags) = opt(parse_tags)(line).unwrap_or((line, None));
        let (input, _) = space0::<_, nom::error::Error<&str>>(input).unwrap_or((input, ""));
        let (input, prefix) = opt(parse_prefix)(input).unwrap_or((input, None));
        let (input, _) = space0::<_, nom::error::Error<&str>>(input).unwrap_or((input, ""));
        let (input, _) = opt(space1::<_, nom::error::Error<&str>>)(input).unwrap_or((input, None));

        let (input, verb) =
            parse_verb(input.trim_start()).map_err(|_: nom::Err<nom::error::Error<&str>>| ParseError::MissingCommand)?;

        let args = parse_params(input);

        Ok(Message {
            prefix: prefix.map(Prefix::parse),
            command: Command::parse(verb),
            args,
        })
    }

    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.as_ref().map(|p| p.nick.as_str())
    }

    /// Serializes to one CRLF-terminated wire line, without checking
    /// length (see [`crate::irc::connection::frame_outbound`] for the
    /// 512-byte/split behavior required by the protocol).
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(p) = &self.prefix {
            out.push(':');
            out.push_str(&p.full());
            out.push(' ');
        }
        match &self.command {
            Command::Verb(v) => out.push_str(v),
            Command::Numeric(n) => out.push_str(&format!("{:03}", n)),
        }
        for (i, arg) in self.args.iter().enumerate() {
            out.push(' ');
            let needs_colon = i == self.args.len() - 1 && (arg.contains(' ') || arg.starts_with(':') || arg.is_empty());
            if needs_colon {
                out.push(':');
            }
            out.push_str(arg);
        }
        out.push_str("\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_welcome() {
        let m = Message::parse(":irc.example.org 001 nick :Welcome").unwrap();
        assert_eq!(m.command, Command::Numeric(1));
        assert_eq!(m.args, vec!["nick", "Welcome"]);
        assert_eq!(m.prefix.unwrap().nick, "irc.example.org");
    }

    #[test]
    fn parses_privmsg_with_full_prefix() {
        let m = Message::parse(":jean!u@h PRIVMSG #staff :hello there").unwrap();
        assert_eq!(m.command, Command::Verb("PRIVMSG".into()));
        assert_eq!(m.args, vec!["#staff", "hello there"]);
        let prefix = m.prefix.unwrap();
        assert_eq!(prefix.nick, "jean");
        assert_eq!(prefix.user.as_deref(), Some("u"));
        assert_eq!(prefix.host.as_deref(), Some("h"));
    }

    #[test]
    fn no_prefix() {
        let m = Message::parse("PING :server").unwrap();
        assert_eq!(m.command, Command::Verb("PING".into()));
        assert_eq!(m.args, vec!["server"]);
        assert!(m.prefix.is_none());
    }

    #[test]
    fn ircv3_tags_are_skipped() {
        let m = Message::parse("@time=2021-01-01T00:00:00Z;msgid=x :nick!u@h PRIVMSG #c :hi").unwrap();
        assert_eq!(m.args, vec!["#c", "hi"]);
        assert_eq!(m.prefix.unwrap().nick, "nick");
    }

    #[test]
    fn empty_line_errors() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
    }

    #[test]
    fn to_wire_round_trips() {
        let msg = Message {
            prefix: None,
            command: Command::Verb("PRIVMSG".into()),
            args: vec!["#c".into(), "hello world".into()],
        };
        assert_eq!(msg.to_wire(), "PRIVMSG #c :hello world\r\n");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn token_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-zA-Z0-9_#]{1,12}").unwrap()
    }

    fn trailing_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("[^\r\n\0]{0,40}").unwrap()
    }

    fn verb_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("[A-Z]{3,10}").unwrap()
    }

    /// Args always end with the trailing (colon-eligible) param: a middle
    /// token containing a space would get split on reparse since only the
    /// last arg is colon-quoted by `to_wire`.
    fn message_strategy() -> impl Strategy<Value = Message> {
        (verb_strategy(), prop::collection::vec(token_strategy(), 0..3), trailing_strategy()).prop_map(
            |(verb, mut middle, trailing)| {
                middle.push(trailing);
                Message {
                    prefix: None,
                    command: Command::Verb(verb),
                    args: middle,
                }
            },
        )
    }

    proptest! {
        #[test]
        fn wire_round_trips_through_parse(msg in message_strategy()) {
            let wire = msg.to_wire();
            let line = wire.trim_end_matches("\r\n");
            let parsed = Message::parse(line).expect("serialized message should reparse");
            prop_assert_eq!(parsed.command, msg.command);
            prop_assert_eq!(parsed.args, msg.args);
        }

        #[test]
        fn parse_never_panics_on_arbitrary_lines(line in "[^\r\n]{0,200}") {
            let _ = Message::parse(&line);
        }
    }
}
