//! Turns a parsed [`Message`] into an [`EventKind`] plus any lines that
//! must be sent straight back to the server (PONG, CTCP replies, the
//! nick-retry on 433), mutating the server's channel/nickname bookkeeping
//! along the way.

use crate::irc::connection::{ctcp, Channel, ConnectionState, ServerState};
use crate::irc::event::{
    ConnectEvent, EventKind, InviteEvent, JoinEvent, KickEvent, MeEvent, MessageEvent, ModeEvent,
    NamesEvent, NickEvent, NoticeEvent, Origin, PartEvent, TopicEvent, WhoisEvent,
};
use crate::irc::message::{Command, Message};
use crate::limits;

/// Most dispatch arms produce at most one event, but QUIT must synthesize
/// one part per channel the quitting user shared with the bot, so this
/// carries a list rather than a single `Option`.
#[derive(Default)]
pub struct DispatchResult {
    pub events: Vec<EventKind>,
    pub outbound: Vec<String>,
}

impl DispatchResult {
    fn event(kind: EventKind) -> Self {
        DispatchResult {
            events: vec![kind],
            outbound: Vec::new(),
        }
    }

    fn events(events: Vec<EventKind>) -> Self {
        DispatchResult {
            events,
            outbound: Vec::new(),
        }
    }

    fn outbound(lines: Vec<String>) -> Self {
        DispatchResult {
            events: Vec::new(),
            outbound: lines,
        }
    }

    fn none() -> Self {
        DispatchResult::default()
    }
}

fn origin_of(msg: &Message) -> Origin {
    match &msg.prefix {
        Some(p) => Origin {
            nick: p.nick.clone(),
            user: p.user.clone(),
            host: p.host.clone(),
        },
        None => Origin {
            nick: String::new(),
            user: None,
            host: None,
        },
    }
}

fn reply_channel(state: &ServerState, target: &str, origin: &Origin) -> String {
    if state.isupport.is_channel(target) {
        target.to_string()
    } else {
        origin.nick.clone()
    }
}

fn forget_user_everywhere(state: &mut ServerState, nick: &str) {
    let folded = state.isupport.casemapping().to_lower(nick);
    for chan in state.channels.values_mut() {
        chan.users.retain(|u, _| state_lower_ne(&folded, u));
    }
}

fn state_lower_ne(folded_target: &str, candidate: &str) -> bool {
    // callers have already casefolded `folded_target`; casefold candidate
    // with the same ascii rule (channel membership keys are stored
    // casefolded at insertion time already in this module).
    candidate != folded_target
}

fn rename_user_everywhere(state: &mut ServerState, old: &str, new: &str) {
    let casemapping = state.isupport.casemapping();
    let old_folded = casemapping.to_lower(old);
    for chan in state.channels.values_mut() {
        if let Some(modes) = chan.users.remove(&old_folded) {
            chan.users.insert(casemapping.to_lower(new), modes);
        }
    }
}

/// Classifies one `MODE` line's flags+params against the server's
/// `CHANMODES`/`PREFIX` ISUPPORT tokens. Only the first parameterized
/// flag is reported, matching [`crate::irc::event::ModeEvent`]'s shape.
fn classify_mode(state: &ServerState, mode: &str, params: &[String]) -> (Option<String>, Option<String>, Option<String>) {
    let chanmodes = state.isupport.chanmodes();
    let groups: Vec<&str> = chanmodes.split(',').collect();
    let list_modes = groups.first().copied().unwrap_or("");
    let prefix_modes: String = state.isupport.prefix_map().iter().map(|(m, _)| *m).collect();

    let mut params = params.iter();
    for c in mode.chars() {
        if c == '+' || c == '-' {
            continue;
        }
        let Some(param) = params.next() else {
            continue;
        };
        if prefix_modes.contains(c) {
            return (None, Some(param.clone()), None);
        }
        if list_modes.contains(c) {
            return (None, None, Some(param.clone()));
        }
        if c == 'l' {
            return (Some(param.clone()), None, None);
        }
        return (None, None, Some(param.clone()));
    }
    (None, None, None)
}

/// Dispatches one inbound message against `state`, mutating channel and
/// nickname bookkeeping and returning the resulting plugin event (if any)
/// together with any lines that must be written straight back.
pub fn dispatch(state: &mut ServerState, msg: &Message) -> DispatchResult {
    match &msg.command {
        Command::Numeric(1) => {
            if let Some(nick) = msg.args.first() {
                state.current_nickname = nick.clone();
            }
            state.state = ConnectionState::Connected;
            let joins: Vec<String> = state
                .autojoin
                .iter()
                .map(|chan| match &chan.key {
                    Some(key) => format!("JOIN {} {key}\r\n", chan.name),
                    None => format!("JOIN {}\r\n", chan.name),
                })
                .collect();
            DispatchResult {
                events: vec![EventKind::Connect(ConnectEvent {})],
                outbound: joins,
            }
        }
        Command::Numeric(5) => {
            state.isupport.apply(&msg.args);
            DispatchResult::none()
        }
        Command::Numeric(433) => {
            let mut next = state.current_nickname.clone();
            next.push('_');
            next.truncate(limits::NICKNAME_LEN);
            state.current_nickname = next.clone();
            DispatchResult::outbound(vec![format!("NICK {next}\r\n")])
        }
        Command::Numeric(353) => {
            // RPL_NAMREPLY: <nick> <chantype> <channel> :<names...>
            let Some(channel) = msg.args.get(2) else {
                return DispatchResult::none();
            };
            let Some(names_raw) = msg.args.get(3) else {
                return DispatchResult::none();
            };
            let prefix_marks: Vec<(char, char)> = state.isupport.prefix_map();
            let entry = state.names_buffer.entry(channel.clone()).or_default();
            for token in names_raw.split_whitespace() {
                let mut modes = Vec::new();
                let mut rest = token;
                while let Some(&(m, mark)) = prefix_marks.iter().find(|(_, mk)| rest.starts_with(*mk)) {
                    modes.push(m);
                    rest = &rest[mark.len_utf8()..];
                }
                entry.push((rest.to_string(), modes));
            }
            DispatchResult::none()
        }
        Command::Numeric(366) => {
            let Some(channel) = msg.args.get(1) else {
                return DispatchResult::none();
            };
            let names = state.names_buffer.remove(channel).unwrap_or_default();
            let casemapping = state.isupport.casemapping();
            let chan = state
                .channels
                .entry(channel.clone())
                .or_insert_with(|| Channel {
                    name: channel.clone(),
                    key: None,
                    joined: true,
                    users: std::collections::HashMap::new(),
                });
            for (nick, modes) in &names {
                chan.users.insert(casemapping.to_lower(nick), modes.clone());
            }
            DispatchResult::event(EventKind::Names(NamesEvent {
                channel: channel.clone(),
                names,
            }))
        }
        Command::Numeric(332) => {
            let Some(channel) = msg.args.get(1).cloned() else {
                return DispatchResult::none();
            };
            let topic = msg.args.get(2).cloned().unwrap_or_default();
            let origin = origin_of(msg);
            DispatchResult::event(EventKind::Topic(TopicEvent { origin, channel, topic }))
        }
        Command::Numeric(311) => {
            let Some(nick) = msg.args.get(1).cloned() else {
                return DispatchResult::none();
            };
            let entry = state.whois_buffer.entry(nick.clone()).or_insert_with(|| WhoisEvent {
                nickname: nick.clone(),
                ..Default::default()
            });
            entry.username = msg.args.get(2).cloned();
            entry.hostname = msg.args.get(3).cloned();
            entry.realname = msg.args.get(5).cloned();
            DispatchResult::none()
        }
        Command::Numeric(318) => {
            let Some(nick) = msg.args.get(1) else {
                return DispatchResult::none();
            };
            match state.whois_buffer.remove(nick) {
                Some(event) => DispatchResult::event(EventKind::Whois(event)),
                None => DispatchResult::none(),
            }
        }
        Command::Numeric(n) => {
            let _ = n;
            DispatchResult::none()
        }
        Command::Verb(verb) if verb == "PING" => {
            let token = msg.args.first().cloned().unwrap_or_default();
            DispatchResult::outbound(vec![format!("PONG :{token}\r\n")])
        }
        Command::Verb(verb) if verb == "JOIN" => {
            let Some(channel) = msg.args.first().cloned() else {
                return DispatchResult::none();
            };
            let origin = origin_of(msg);
            let casemapping = state.isupport.casemapping();
            if casemapping.eq(&origin.nick, &state.current_nickname) {
                state.channels.entry(channel.clone()).or_insert_with(|| Channel {
                    name: channel.clone(),
                    key: None,
                    joined: true,
                    users: std::collections::HashMap::new(),
                });
            } else if let Some(chan) = state.channels.get_mut(&channel) {
                chan.users.insert(casemapping.to_lower(&origin.nick), Vec::new());
            }
            DispatchResult::event(EventKind::Join(JoinEvent { origin, channel }))
        }
        Command::Verb(verb) if verb == "PART" => {
            let Some(channel) = msg.args.first().cloned() else {
                return DispatchResult::none();
            };
            let reason = msg.args.get(1).cloned();
            let origin = origin_of(msg);
            let casemapping = state.isupport.casemapping();
            if casemapping.eq(&origin.nick, &state.current_nickname) {
                state.channels.remove(&channel);
            } else if let Some(chan) = state.channels.get_mut(&channel) {
                chan.users.remove(&casemapping.to_lower(&origin.nick));
            }
            DispatchResult::event(EventKind::Part(PartEvent { origin, channel, reason }))
        }
        Command::Verb(verb) if verb == "KICK" => {
            let Some(channel) = msg.args.first().cloned() else {
                return DispatchResult::none();
            };
            let Some(target) = msg.args.get(1).cloned() else {
                return DispatchResult::none();
            };
            let reason = msg.args.get(2).cloned().unwrap_or_default();
            let origin = origin_of(msg);
            let casemapping = state.isupport.casemapping();
            if casemapping.eq(&target, &state.current_nickname) {
                state.channels.remove(&channel);
            } else if let Some(chan) = state.channels.get_mut(&channel) {
                chan.users.remove(&casemapping.to_lower(&target));
            }
            DispatchResult::event(EventKind::Kick(KickEvent {
                origin,
                channel,
                target,
                reason,
            }))
        }
        Command::Verb(verb) if verb == "QUIT" => {
            let origin = origin_of(msg);
            let reason = msg.args.first().cloned();
            let folded = state.isupport.casemapping().to_lower(&origin.nick);
            let parts: Vec<EventKind> = state
                .channels
                .values()
                .filter(|chan| chan.users.keys().any(|u| *u == folded))
                .map(|chan| {
                    EventKind::Part(PartEvent {
                        origin: origin.clone(),
                        channel: chan.name.clone(),
                        reason: reason.clone(),
                    })
                })
                .collect();
            forget_user_everywhere(state, &origin.nick);
            DispatchResult::events(parts)
        }
        Command::Verb(verb) if verb == "NICK" => {
            let Some(new_nick) = msg.args.first().cloned() else {
                return DispatchResult::none();
            };
            let origin = origin_of(msg);
            if state.isupport.casemapping().eq(&origin.nick, &state.current_nickname) {
                state.current_nickname = new_nick.clone();
            }
            rename_user_everywhere(state, &origin.nick, &new_nick);
            DispatchResult::event(EventKind::Nick(NickEvent { origin, nickname: new_nick }))
        }
        Command::Verb(verb) if verb == "TOPIC" => {
            let Some(channel) = msg.args.first().cloned() else {
                return DispatchResult::none();
            };
            let topic = msg.args.get(1).cloned().unwrap_or_default();
            let origin = origin_of(msg);
            DispatchResult::event(EventKind::Topic(TopicEvent { origin, channel, topic }))
        }
        Command::Verb(verb) if verb == "INVITE" => {
            let Some(target) = msg.args.first().cloned() else {
                return DispatchResult::none();
            };
            let Some(channel) = msg.args.get(1).cloned() else {
                return DispatchResult::none();
            };
            let origin = origin_of(msg);
            let outbound = if state.options.join_invite {
                vec![format!("JOIN {channel}\r\n")]
            } else {
                Vec::new()
            };
            DispatchResult {
                events: vec![EventKind::Invite(InviteEvent { origin, channel, target })],
                outbound,
            }
        }
        Command::Verb(verb) if verb == "MODE" => {
            let Some(target) = msg.args.first().cloned() else {
                return DispatchResult::none();
            };
            if !state.isupport.is_channel(&target) {
                return DispatchResult::none();
            }
            let Some(mode) = msg.args.get(1).cloned() else {
                return DispatchResult::none();
            };
            let params = msg.args.get(2..).unwrap_or(&[]).to_vec();
            let (limit, user, mask) = classify_mode(state, &mode, &params);
            let origin = origin_of(msg);
            DispatchResult::event(EventKind::Mode(ModeEvent {
                origin,
                channel: target,
                mode,
                limit,
                user,
                mask,
            }))
        }
        Command::Verb(verb) if verb == "NOTICE" => {
            let Some(target) = msg.args.first().cloned() else {
                return DispatchResult::none();
            };
            let message = msg.args.get(1).cloned().unwrap_or_default();
            let origin = origin_of(msg);
            let channel = reply_channel(state, &target, &origin);
            DispatchResult::event(EventKind::Notice(NoticeEvent { origin, channel, message }))
        }
        Command::Verb(verb) if verb == "PRIVMSG" => dispatch_privmsg(state, msg),
        _ => DispatchResult::none(),
    }
}

fn dispatch_privmsg(state: &mut ServerState, msg: &Message) -> DispatchResult {
    let Some(target) = msg.args.first().cloned() else {
        return DispatchResult::none();
    };
    let text = msg.args.get(1).cloned().unwrap_or_default();
    let origin = origin_of(msg);
    let channel = reply_channel(state, &target, &origin);

    if let Some(action) = ctcp::action_text(&text) {
        return DispatchResult::event(EventKind::Me(MeEvent {
            origin,
            channel,
            message: action,
        }));
    }

    if let Some((cmd, args)) = ctcp::decode(&text) {
        let reply_target = origin.nick.clone();
        let reply = match cmd.as_str() {
            "VERSION" => Some(ctcp::encode("VERSION", Some(&state.ctcp_version))),
            "SOURCE" => Some(ctcp::encode("SOURCE", Some(&state.ctcp_source))),
            "PING" => Some(ctcp::encode("PING", args.as_deref())),
            "TIME" => Some(ctcp::encode(
                "TIME",
                Some(&chrono::Local::now().to_rfc2822()),
            )),
            _ => None,
        };
        return match reply {
            Some(body) => DispatchResult::outbound(vec![format!("NOTICE {reply_target} :{body}\r\n")]),
            None => DispatchResult::none(),
        };
    }

    DispatchResult::event(EventKind::Message(MessageEvent { origin, channel, message: text }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::connection::ServerState;

    fn server() -> crate::irc::connection::ServerHandle {
        let handle = ServerState::new("test", "irc.example.org", 6667);
        handle.borrow_mut().current_nickname = "frippy".to_string();
        handle
    }

    #[test]
    fn welcome_sets_nickname_and_connected() {
        let handle = server();
        let msg = Message::parse(":irc.example.org 001 frippybot :Welcome").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &msg);
        assert!(matches!(result.events.as_slice(), [EventKind::Connect(_)]));
        assert_eq!(handle.borrow().current_nickname, "frippybot");
        assert_eq!(handle.borrow().state, ConnectionState::Connected);
    }

    #[test]
    fn welcome_joins_autojoin_channels() {
        let handle = server();
        handle.borrow_mut().autojoin = vec![
            crate::irc::connection::AutoJoinChannel { name: "#lobby".to_string(), key: None },
            crate::irc::connection::AutoJoinChannel {
                name: "#staff".to_string(),
                key: Some("secret".to_string()),
            },
        ];
        let msg = Message::parse(":irc.example.org 001 frippybot :Welcome").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &msg);
        assert_eq!(
            result.outbound,
            vec!["JOIN #lobby\r\n".to_string(), "JOIN #staff secret\r\n".to_string()]
        );
    }

    #[test]
    fn ping_replies_with_pong() {
        let handle = server();
        let msg = Message::parse("PING :token").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &msg);
        assert!(result.events.is_empty());
        assert_eq!(result.outbound, vec!["PONG :token\r\n".to_string()]);
    }

    #[test]
    fn privmsg_to_channel_is_message_event() {
        let handle = server();
        handle.borrow_mut().isupport.apply(&["CHANTYPES=#".to_string()]);
        let msg = Message::parse(":jean!u@h PRIVMSG #staff :hello").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &msg);
        match result.events.into_iter().next() {
            Some(EventKind::Message(e)) => {
                assert_eq!(e.channel, "#staff");
                assert_eq!(e.message, "hello");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn ctcp_action_becomes_me_event() {
        let handle = server();
        handle.borrow_mut().isupport.apply(&["CHANTYPES=#".to_string()]);
        let msg = Message::parse(":jean!u@h PRIVMSG #staff :\u{1}ACTION waves\u{1}").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &msg);
        match result.events.into_iter().next() {
            Some(EventKind::Me(e)) => assert_eq!(e.message, "waves"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn ctcp_version_replies_without_event() {
        let handle = server();
        let msg = Message::parse(":jean!u@h PRIVMSG frippy :\u{1}VERSION\u{1}").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &msg);
        assert!(result.events.is_empty());
        assert_eq!(result.outbound.len(), 1);
        assert!(result.outbound[0].starts_with("NOTICE jean :\u{1}VERSION"));
    }

    #[test]
    fn invite_joins_when_join_invite_flag_set() {
        let handle = server();
        handle.borrow_mut().options.join_invite = true;
        let msg = Message::parse(":jean!u@h INVITE frippy #staff").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &msg);
        assert!(matches!(result.events.as_slice(), [EventKind::Invite(_)]));
        assert_eq!(result.outbound, vec!["JOIN #staff\r\n".to_string()]);
    }

    #[test]
    fn invite_does_not_join_without_flag() {
        let handle = server();
        let msg = Message::parse(":jean!u@h INVITE frippy #staff").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &msg);
        assert!(result.outbound.is_empty());
    }

    #[test]
    fn quit_synthesizes_a_part_per_shared_channel() {
        let handle = server();
        handle.borrow_mut().isupport.apply(&["CHANTYPES=#".to_string()]);
        for chan in ["#a", "#b"] {
            let join = Message::parse(&format!(":jean!u@h JOIN {chan}")).unwrap();
            dispatch(&mut handle.borrow_mut(), &join);
            let self_join = Message::parse(&format!(":frippy!u@h JOIN {chan}")).unwrap();
            dispatch(&mut handle.borrow_mut(), &self_join);
            let rejoin = Message::parse(&format!(":jean!u@h JOIN {chan}")).unwrap();
            dispatch(&mut handle.borrow_mut(), &rejoin);
        }

        let quit = Message::parse(":jean!u@h QUIT :gone").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &quit);
        assert_eq!(result.events.len(), 2);
        for event in &result.events {
            assert!(matches!(event, EventKind::Part(_)));
        }
        assert!(!handle.borrow().channels["#a"].users.contains_key("jean"));
        assert!(!handle.borrow().channels["#b"].users.contains_key("jean"));
    }

    #[test]
    fn nickname_conflict_appends_underscore() {
        let handle = server();
        let msg = Message::parse(":irc.example.org 433 * frippy :Nickname is already in use").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &msg);
        assert_eq!(result.outbound, vec!["NICK frippy_\r\n".to_string()]);
        assert_eq!(handle.borrow().current_nickname, "frippy_");
    }

    #[test]
    fn join_and_part_track_membership() {
        let handle = server();
        handle.borrow_mut().isupport.apply(&["CHANTYPES=#".to_string()]);
        let join = Message::parse(":jean!u@h JOIN #staff").unwrap();
        dispatch(&mut handle.borrow_mut(), &join);
        assert!(handle.borrow().channels.get("#staff").is_none());

        let self_join = Message::parse(":frippy!u@h JOIN #staff").unwrap();
        dispatch(&mut handle.borrow_mut(), &self_join);
        assert!(handle.borrow().channels.contains_key("#staff"));

        dispatch(&mut handle.borrow_mut(), &join);
        assert!(handle.borrow().channels["#staff"].users.contains_key("jean"));

        let part = Message::parse(":jean!u@h PART #staff :bye").unwrap();
        let result = dispatch(&mut handle.borrow_mut(), &part);
        assert!(matches!(result.events.as_slice(), [EventKind::Part(_)]));
        assert!(!handle.borrow().channels["#staff"].users.contains_key("jean"));
    }
}
