//! Numeric limits for the IRC protocol and control transport. Kept as
//! named constants rather than magic numbers scattered through
//! connection and protocol code.

/// Maximum nickname length.
pub const NICKNAME_LEN: usize = 32;
/// Maximum username length.
pub const USERNAME_LEN: usize = 32;
/// Maximum realname length.
pub const REALNAME_LEN: usize = 64;
/// Maximum channel name length.
pub const CHANNEL_LEN: usize = 64;
/// Maximum password length.
pub const PASSWORD_LEN: usize = 64;
/// Maximum CTCP version/source answer length.
pub const CTCP_LEN: usize = 64;
/// Maximum command prefix length.
pub const PREFIX_LEN: usize = 4;
/// Maximum charset name length.
pub const CHARSET_LEN: usize = 16;
/// Maximum casemapping name length.
pub const CASEMAPPING_LEN: usize = 16;
/// Official IRC line length, CRLF included.
pub const MESSAGE_LEN: usize = 512;
/// Maximum number of parsed arguments per line.
pub const ARGS_MAX: usize = 32;
/// Maximum hostname length.
pub const HOST_LEN: usize = 64;
/// Network input/output buffer size.
pub const BUF_LEN: usize = 128_000;
/// Maximum server/plugin/hook identifier length.
pub const ID_LEN: usize = 16;
/// Maximum length of a rule's space-separated value list, as surfaced
/// through the control protocol.
pub const RULE_LEN: usize = 1024;

/// Connect timeout for a new IRC connection.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Idle time before a keepalive PING is sent.
pub const PING_IDLE_SECS: u64 = 120;
/// Idle time before a connection is considered dead.
pub const TIMEOUT_SECS: u64 = 300;
/// Initial reconnect backoff.
pub const BACKOFF_INITIAL_SECS: u64 = 1;
/// Reconnect backoff cap.
pub const BACKOFF_MAX_SECS: u64 = 30;
/// Control session inbound buffer cap.
pub const CONTROL_SESSION_BUF_CAP: usize = 128 * 1024;
/// Control session outbound queue cap before the session is dropped.
pub const CONTROL_SESSION_QUEUE_CAP: usize = 1024 * 1024;
/// Default hook kill deadline before SIGKILL follows SIGTERM.
pub const HOOK_KILL_GRACE_SECS: u64 = 5;
/// Default hook execution deadline.
pub const HOOK_DEFAULT_TIMEOUT_SECS: u64 = 30;
