//! Crate-wide error types.
//!
//! One enum per control-protocol error category from the external
//! interface, each carrying the small integer code the control transport
//! serializes back to the client, plus a top level [`FrippyError`] used at
//! the callback and `main` boundaries.

use thiserror::Error;

/// One of the categories a control-protocol error response is tagged with.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ErrorCategory {
    Server,
    Plugin,
    Rule,
    Hook,
    Bot,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Server => "server",
            ErrorCategory::Plugin => "plugin",
            ErrorCategory::Rule => "rule",
            ErrorCategory::Hook => "hook",
            ErrorCategory::Bot => "bot",
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
pub enum ServerError {
    #[error("invalid server identifier")]
    InvalidIdentifier,
    #[error("invalid hostname")]
    InvalidHostname,
    #[error("invalid port")]
    InvalidPort,
    #[error("invalid channel")]
    InvalidChannel,
    #[error("invalid nickname")]
    InvalidNickname,
    #[error("invalid mode")]
    InvalidMode,
    #[error("invalid message")]
    InvalidMessage,
    #[error("invalid password")]
    InvalidPassword,
    #[error("server not found")]
    NotFound,
    #[error("server already exists")]
    AlreadyExists,
    #[error("ssl support is disabled")]
    SslDisabled,
}

impl ServerError {
    pub fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
pub enum PluginError {
    #[error("invalid plugin identifier")]
    InvalidIdentifier,
    #[error("plugin not found")]
    NotFound,
    #[error("plugin already exists")]
    AlreadyExists,
    #[error("plugin execution error")]
    ExecError,
}

impl PluginError {
    pub fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
pub enum RuleError {
    #[error("invalid rule index")]
    InvalidIndex,
    #[error("invalid rule action")]
    InvalidAction,
}

impl RuleError {
    pub fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
pub enum HookError {
    #[error("invalid hook identifier")]
    InvalidIdentifier,
    #[error("invalid hook path")]
    InvalidPath,
    #[error("hook already exists")]
    AlreadyExists,
    #[error("hook not found")]
    NotFound,
}

impl HookError {
    pub fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
pub enum BotError {
    #[error("invalid command")]
    InvalidCommand,
    #[error("incomplete request")]
    IncompleteMessage,
    #[error("internal error")]
    Internal,
}

impl BotError {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// The crate-wide error type. Every category above converts into this via
/// `#[from]`; `main` and the control dispatch loop are the only callers
/// that need to look past the `Display` impl.
#[derive(Debug, Error)]
pub enum FrippyError {
    #[error("server error: {0}")]
    Server(#[from] ServerError),
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),
    #[error("rule error: {0}")]
    Rule(#[from] RuleError),
    #[error("hook error: {0}")]
    Hook(#[from] HookError),
    #[error("bot error: {0}")]
    Bot(#[from] BotError),
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FrippyError {
    /// The `(category, code)` pair this error serializes to on the
    /// control transport.
    pub fn category_and_code(&self) -> Option<(ErrorCategory, u32)> {
        match self {
            FrippyError::Server(e) => Some((ErrorCategory::Server, e.code())),
            FrippyError::Plugin(e) => Some((ErrorCategory::Plugin, e.code())),
            FrippyError::Rule(e) => Some((ErrorCategory::Rule, e.code())),
            FrippyError::Hook(e) => Some((ErrorCategory::Hook, e.code())),
            FrippyError::Bot(e) => Some((ErrorCategory::Bot, e.code())),
            FrippyError::Connection(_) | FrippyError::Other(_) => None,
        }
    }
}

/// Logs a [`FrippyError`] the way the plugin-callback boundary does: one
/// line, with the failing operation named. A bad plugin must not crash the
/// bot, so every callback site routes its error here instead of
/// propagating.
pub fn log_error(context: &str, e: &FrippyError) {
    tracing::error!(%context, error = %e, "operation failed");
}

pub type Result<T> = std::result::Result<T, FrippyError>;
