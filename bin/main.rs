//! `frippyd`: loads the configuration, wires up logging, and runs the
//! bot's single-threaded event loop until a termination signal arrives.

use std::path::PathBuf;

use clap::Parser;
use frippy::bot;
use frippy::config::{Config, ControlBindConfig};
use frippy::control::{self, Bind};
use frippy::logging;
use frippy::plugin::native;
use frippy::plugins::unicode::Unicode;

#[derive(Parser)]
#[command(name = "frippyd", version, about = "An extensible IRC bot daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/frippy/frippy.toml")]
    config: PathBuf,
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("frippyd: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = logging::init(&config.logging);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(config));
}

async fn run(config: Config) {
    let bot = bot::Bot::from_config(&config);

    bot.borrow_mut()
        .plugins
        .load("unicode", Box::new(Unicode::new()), Default::default(), Default::default(), Default::default())
        .expect("built-in plugin load never fails");

    load_configured_plugins(&bot, &config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let (control_shutdown_tx, control_shutdown_rx) = tokio::sync::mpsc::channel(1);

    if let Some(bind_cfg) = &config.control {
        let bind = match bind_cfg {
            ControlBindConfig::Unix { path } => Bind::Unix(path.clone()),
            ControlBindConfig::Tcp { host, port } => Bind::Tcp(host.clone(), *port),
        };
        let control_bot = bot.clone();
        tokio::task::spawn_local(async move {
            if let Err(e) = control::serve(bind, control_bot, control_shutdown_rx).await {
                tracing::error!(error = %e, "control listener stopped");
            }
        });
    }

    tokio::task::spawn_local(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(()).await;
        let _ = control_shutdown_tx.send(()).await;
    });

    bot::run(bot, shutdown_rx).await;
    tracing::info!("frippyd shutting down");
}

/// Loads every `[plugin.<id>]` entry from the config: one with a `path`
/// is `dlopen`ed as a native plugin; one without is assumed to name a
/// built-in already loaded above, and just has its options/templates
/// applied. A path that fails to load is a configuration error, so the
/// daemon exits rather than starting with a plugin silently missing.
fn load_configured_plugins(bot: &bot::BotHandle, config: &Config) {
    for plugin_cfg in &config.plugins {
        match &plugin_cfg.path {
            Some(path) => {
                // SAFETY: `path` comes from an operator-controlled config
                // file, the same trust boundary `native::load`'s contract
                // requires.
                let loaded = unsafe { native::load(path) };
                let (plugin, library) = match loaded {
                    Ok(loaded) => loaded,
                    Err(e) => {
                        eprintln!("frippyd: failed to load plugin '{}' from {}: {e}", plugin_cfg.id, path.display());
                        std::process::exit(1);
                    }
                };
                bot.borrow_mut()
                    .plugins
                    .load_native(plugin_cfg.id.clone(), plugin, library, plugin_cfg.options.clone(), plugin_cfg.templates.clone(), Default::default())
                    .unwrap_or_else(|e| {
                        eprintln!("frippyd: failed to register plugin '{}': {e}", plugin_cfg.id);
                        std::process::exit(1);
                    });
            }
            None => {
                let mut b = bot.borrow_mut();
                let Ok(options) = b.plugins.options_mut(&plugin_cfg.id) else {
                    eprintln!("frippyd: plugin '{}' has no path and is not a built-in", plugin_cfg.id);
                    std::process::exit(1);
                };
                options.extend(plugin_cfg.options.clone());
                let templates = b.plugins.templates_mut(&plugin_cfg.id).expect("just found above");
                templates.extend(plugin_cfg.templates.clone());
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");

    tokio::select! {
        _ = sigint.recv() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sighup.recv() => tracing::info!("received SIGHUP"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
