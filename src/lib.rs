//! Frippy is an extensible IRC bot daemon: a single-threaded event loop
//! connects to one or more IRC servers, runs inbound events through a
//! rule engine and a plugin pipeline, and exposes a local control socket
//! for runtime administration.
//!
//! The daemon binary is `frippyd`; `frippyctl` is the control-socket CLI
//! client. This crate is their shared implementation.
//!
//! # Logging
//! Frippy uses the [tracing](https://docs.rs/tracing) crate; see
//! [`logging::init`] for how the daemon wires it up.

pub mod bot;
pub mod config;
pub mod control;
pub mod error;
pub mod hook;
pub mod irc;
pub mod limits;
pub mod logging;
pub mod plugin;
pub mod plugins;
pub mod rule;
pub mod subst;
pub mod timer;

pub use bot::{Bot, BotHandle};
pub use config::Config;
pub use error::FrippyError;
