//! The tagged event union protocol lines are parsed into and dispatched
//! through the rule/plugin/hook pipeline. Constructed once by the
//! protocol parser, never mutated afterwards.

use std::rc::Rc;

use crate::irc::connection::ServerHandle;

/// `nick!user@host`, or just the nick when the server omitted the rest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Origin {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl Origin {
    pub fn full(&self) -> String {
        match (&self.user, &self.host) {
            (Some(u), Some(h)) => format!("{}!{}@{}", self.nick, u, h),
            _ => self.nick.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectEvent {}

#[derive(Clone, Debug)]
pub struct DisconnectEvent {}

#[derive(Clone, Debug)]
pub struct InviteEvent {
    pub origin: Origin,
    pub channel: String,
    pub target: String,
}

#[derive(Clone, Debug)]
pub struct JoinEvent {
    pub origin: Origin,
    pub channel: String,
}

#[derive(Clone, Debug)]
pub struct KickEvent {
    pub origin: Origin,
    pub channel: String,
    pub target: String,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct MessageEvent {
    pub origin: Origin,
    pub channel: String,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct MeEvent {
    pub origin: Origin,
    pub channel: String,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct ModeEvent {
    pub origin: Origin,
    pub channel: String,
    pub mode: String,
    pub limit: Option<String>,
    pub user: Option<String>,
    pub mask: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NamesEvent {
    pub channel: String,
    pub names: Vec<(String, Vec<char>)>,
}

#[derive(Clone, Debug)]
pub struct NickEvent {
    pub origin: Origin,
    pub nickname: String,
}

#[derive(Clone, Debug)]
pub struct NoticeEvent {
    pub origin: Origin,
    pub channel: String,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct PartEvent {
    pub origin: Origin,
    pub channel: String,
    pub reason: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TopicEvent {
    pub origin: Origin,
    pub channel: String,
    pub topic: String,
}

#[derive(Clone, Debug, Default)]
pub struct WhoisEvent {
    pub nickname: String,
    pub username: Option<String>,
    pub hostname: Option<String>,
    pub realname: Option<String>,
}

/// A `MessageEvent` that was recognized as directed to a plugin (prefix
/// followed by that plugin's id).
#[derive(Clone, Debug)]
pub struct CommandEvent {
    pub origin: Origin,
    pub channel: String,
    pub plugin: String,
    pub tokens: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum EventKind {
    Connect(ConnectEvent),
    Disconnect(DisconnectEvent),
    Invite(InviteEvent),
    Join(JoinEvent),
    Kick(KickEvent),
    Message(MessageEvent),
    Me(MeEvent),
    Mode(ModeEvent),
    Names(NamesEvent),
    Nick(NickEvent),
    Notice(NoticeEvent),
    Part(PartEvent),
    Topic(TopicEvent),
    Whois(WhoisEvent),
    Command(CommandEvent),
}

impl EventKind {
    /// The event-name string rules and hooks match against
    /// (`onConnect`, `onMessage`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connect(_) => "onConnect",
            EventKind::Disconnect(_) => "onDisconnect",
            EventKind::Invite(_) => "onInvite",
            EventKind::Join(_) => "onJoin",
            EventKind::Kick(_) => "onKick",
            EventKind::Message(_) => "onMessage",
            EventKind::Me(_) => "onMe",
            EventKind::Mode(_) => "onMode",
            EventKind::Names(_) => "onNames",
            EventKind::Nick(_) => "onNick",
            EventKind::Notice(_) => "onNotice",
            EventKind::Part(_) => "onPart",
            EventKind::Topic(_) => "onTopic",
            EventKind::Whois(_) => "onWhois",
            EventKind::Command(_) => "onCommand",
        }
    }

    /// The channel this event is scoped to, if any (used by the rule
    /// engine's candidate tuple). Commands/queries without a channel use
    /// an empty string, which only matches rules with an empty channel set.
    pub fn channel(&self) -> &str {
        match self {
            EventKind::Invite(e) => &e.channel,
            EventKind::Join(e) => &e.channel,
            EventKind::Kick(e) => &e.channel,
            EventKind::Message(e) => &e.channel,
            EventKind::Me(e) => &e.channel,
            EventKind::Mode(e) => &e.channel,
            EventKind::Names(e) => &e.channel,
            EventKind::Notice(e) => &e.channel,
            EventKind::Part(e) => &e.channel,
            EventKind::Topic(e) => &e.channel,
            EventKind::Command(e) => &e.channel,
            EventKind::Connect(_)
            | EventKind::Disconnect(_)
            | EventKind::Nick(_)
            | EventKind::Whois(_) => "",
        }
    }

    pub fn origin_nick(&self) -> &str {
        match self {
            EventKind::Invite(e) => &e.origin.nick,
            EventKind::Join(e) => &e.origin.nick,
            EventKind::Kick(e) => &e.origin.nick,
            EventKind::Message(e) => &e.origin.nick,
            EventKind::Me(e) => &e.origin.nick,
            EventKind::Mode(e) => &e.origin.nick,
            EventKind::Nick(e) => &e.origin.nick,
            EventKind::Notice(e) => &e.origin.nick,
            EventKind::Part(e) => &e.origin.nick,
            EventKind::Topic(e) => &e.origin.nick,
            EventKind::Command(e) => &e.origin.nick,
            EventKind::Whois(e) => &e.nickname,
            EventKind::Names(_) | EventKind::Connect(_) | EventKind::Disconnect(_) => "",
        }
    }

    /// `argv[1..]` for the hook invocation, per the external interface's
    /// hook argv table.
    pub fn hook_args(&self) -> Vec<String> {
        match self {
            EventKind::Connect(_) | EventKind::Disconnect(_) => vec![],
            EventKind::Invite(e) => vec![e.origin.full(), e.channel.clone(), e.target.clone()],
            EventKind::Join(e) => vec![e.origin.full(), e.channel.clone()],
            EventKind::Kick(e) => vec![
                e.origin.full(),
                e.channel.clone(),
                e.target.clone(),
                e.reason.clone(),
            ],
            EventKind::Message(e) => vec![e.origin.full(), e.channel.clone(), e.message.clone()],
            EventKind::Me(e) => vec![e.origin.full(), e.channel.clone(), e.message.clone()],
            EventKind::Mode(e) => vec![
                e.origin.full(),
                e.channel.clone(),
                e.mode.clone(),
                e.limit.clone().unwrap_or_default(),
                e.user.clone().unwrap_or_default(),
                e.mask.clone().unwrap_or_default(),
            ],
            EventKind::Nick(e) => vec![e.origin.full(), e.nickname.clone()],
            EventKind::Notice(e) => vec![e.origin.full(), e.channel.clone(), e.message.clone()],
            EventKind::Part(e) => vec![
                e.origin.full(),
                e.channel.clone(),
                e.reason.clone().unwrap_or_default(),
            ],
            EventKind::Topic(e) => vec![e.origin.full(), e.channel.clone(), e.topic.clone()],
            EventKind::Whois(_) | EventKind::Names(_) | EventKind::Command(_) => vec![],
        }
    }
}

/// A fully constructed event: the server it arrived on plus the parsed
/// variant. `server` is an `Rc` so an event already queued for plugin
/// dispatch keeps the server alive even if a command removes it from the
/// bot's registry mid-pipeline.
#[derive(Clone, Debug)]
pub struct Event {
    pub server: ServerHandle,
    pub kind: EventKind,
}

impl Event {
    pub fn new(server: ServerHandle, kind: EventKind) -> Self {
        Event { server, kind }
    }

    pub fn server_id(&self) -> String {
        self.server.borrow().id.clone()
    }
}

pub type SharedEvent = Rc<Event>;
