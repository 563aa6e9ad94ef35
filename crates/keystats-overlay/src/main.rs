//! KeyStats overlay entry point.
//!
//! Captures global keyboard and mouse input, keeps live press statistics, and
//! serves them to a browser overlay (e.g. an OBS browser source) over plain
//! HTTP and a server-sent event stream.
//!
//! # Usage
//!
//! ```text
//! keystats-overlay [OPTIONS]
//!
//! Options:
//!   --config <PATH>    Config file [default: platform config dir]
//!   --port   <PORT>    HTTP port, overrides the config file
//!   --layout <PATH>    Layout JSON file, overrides the configured layout name
//!   --no-mouse         Do not capture mouse buttons
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable          | Description                     |
//! |-------------------|---------------------------------|
//! | `KEYSTATS_PORT`   | Same as `--port`                |
//! | `KEYSTATS_LAYOUT` | Same as `--layout`              |
//! | `RUST_LOG`        | `tracing` filter, overrides `general.log_level` |
//!
//! # Architecture overview
//!
//! ```text
//! OS hooks (keyboard, mouse)      ── hook threads
//!       │ try_send
//!       ▼
//! edge pump ──▶ StatsHandle ◀── stats ticker (100 ms)
//!                   │
//!                   ▼
//! BroadcastServer  GET /, /query, /events   (push every 16 ms)
//! ```

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use keystats_core::{KeyLayout, SourceKind};
use keystats_overlay::application::capture_supervisor::CaptureSupervisor;
use keystats_overlay::application::layout_slot::LayoutSlot;
use keystats_overlay::application::pipeline::{run_edge_pump, run_stats_ticker};
use keystats_overlay::application::stats_handle::StatsHandle;
use keystats_overlay::infrastructure::diagnostics::{
    describe_conflict, find_port_owner, Platform, SystemCommandRunner,
};
use keystats_overlay::infrastructure::http::{BroadcastServer, ServerSettings};
use keystats_overlay::infrastructure::input_capture::{capture_channel, platform_source, InputSource};
use keystats_overlay::infrastructure::storage::config::{self, AppConfig, ConfigError};
use keystats_overlay::infrastructure::storage::layout_file::{builtin_layout, resolve_layout_path};

/// Substring that identifies another instance of this program in a process list.
const APP_NAME: &str = "keystats";

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Live keystroke statistics overlay.
#[derive(Debug, Parser)]
#[command(
    name = "keystats-overlay",
    about = "Global input statistics served to a browser overlay",
    version
)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// HTTP port.  Overrides `server.port`.
    #[arg(long, env = "KEYSTATS_PORT")]
    port: Option<u16>,

    /// Layout JSON file.  Overrides `general.layout`.
    #[arg(long, value_name = "PATH", env = "KEYSTATS_LAYOUT")]
    layout: Option<PathBuf>,

    /// Capture the keyboard only.
    #[arg(long)]
    no_mouse: bool,
}

impl Cli {
    /// Applies the command-line overrides on top of the file configuration.
    fn apply_to(&self, cfg: &mut AppConfig) {
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if self.no_mouse {
            cfg.capture.mouse = false;
        }
    }

    /// Config file path: `--config`, else the platform default.
    fn config_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config::config_file_path(),
        }
    }
}

// ── Start-up helpers ──────────────────────────────────────────────────────────

/// Loads the configuration.  Errors are returned alongside the defaults so
/// they can be logged once tracing is up.
fn load_config(cli: &Cli) -> (AppConfig, Option<String>) {
    let loaded = cli.config_path().and_then(|path| config::load_or_init(&path));
    match loaded {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e.to_string())),
    }
}

/// Resolves, loads, and applies the start-up layout.
///
/// Falls back to the compiled-in layout of the same name, then to an empty
/// layout that accepts every code.
fn install_layout(cfg: &AppConfig, explicit: Option<&Path>, slot: &LayoutSlot, stats: &StatsHandle) {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));
    let config_dir = config::config_dir().ok();
    let name = &cfg.general.layout;

    if let Some(path) = resolve_layout_path(explicit, name, exe_dir.as_deref(), config_dir.as_deref()) {
        match slot.reload_from(&path, stats) {
            Ok(_) => {
                info!("layout loaded from {}", path.display());
                return;
            }
            Err(e) => warn!("layout file unusable: {e}"),
        }
    }

    match builtin_layout(name) {
        Some(layout) => slot.apply(layout, stats),
        None => {
            warn!("no layout named '{name}' found; accepting every key code");
            slot.apply(KeyLayout::empty(), stats);
        }
    }
}

/// Logs who holds the port.
fn report_port_conflict(port: u16) {
    let owner = find_port_owner(Platform::current(), &SystemCommandRunner, port);
    let conflict = describe_conflict(port, owner, APP_NAME);
    error!("{conflict}");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Configuration ─────────────────────────────────────────────────────────
    let (mut cfg, config_error) = load_config(&cli);
    cli.apply_to(&mut cfg);

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.general.log_level)),
        )
        .init();

    if let Some(e) = config_error {
        warn!("using default configuration: {e}");
    }
    cfg.validate().context("invalid configuration")?;

    info!("KeyStats overlay v{} starting", env!("CARGO_PKG_VERSION"));

    // ── Engine and layout ─────────────────────────────────────────────────────
    let stats = StatsHandle::new(cfg.stats_config());
    let layout = LayoutSlot::default();
    install_layout(&cfg, cli.layout.as_deref(), &layout, &stats);

    // ── HTTP server ───────────────────────────────────────────────────────────
    let settings = ServerSettings {
        push_interval: cfg.push_interval(),
        display: cfg.display_metrics(),
        style: cfg.page_style(),
        ..ServerSettings::default()
    };
    let server = BroadcastServer::new(stats.clone(), layout.clone(), settings);
    let bind_addr = cfg.bind_addr()?;
    if let Err(e) = server.start(bind_addr).await {
        if e.is_addr_in_use() {
            report_port_conflict(bind_addr.port());
        }
        return Err(e).context("HTTP server failed to start");
    }

    // ── Input capture ─────────────────────────────────────────────────────────
    let (sender, signals) = capture_channel(cfg.capture.queue_capacity);
    let mut sources: Vec<Arc<dyn InputSource>> = Vec::new();
    if cfg.capture.keyboard {
        sources.push(platform_source(SourceKind::Keyboard, sender.clone()));
    }
    if cfg.capture.mouse {
        sources.push(platform_source(SourceKind::Mouse, sender.clone()));
    }
    let supervisor = CaptureSupervisor::new(sources);
    supervisor.start_all();

    let pump = tokio::spawn(run_edge_pump(signals, stats.clone()));

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let ticker = tokio::spawn(run_stats_ticker(
        stats.clone(),
        cfg.tick_interval(),
        Arc::clone(&running),
    ));

    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    supervisor.stop_all();
    drop(supervisor);
    server.stop();

    let dropped = sender.dropped();
    let closed = sender.saw_closed_channel();
    drop(sender);
    if dropped > 0 {
        warn!("{dropped} input edge(s) dropped because the queue was full");
    }
    if closed {
        warn!("capture channel closed early; later input was discarded");
    }

    match tokio::time::timeout(Duration::from_secs(1), pump).await {
        Ok(Ok(summary)) => info!("processed {} input signal(s)", summary.signals),
        Ok(Err(e)) => warn!("edge pump task failed: {e}"),
        Err(_) => warn!("edge pump did not drain in time"),
    }
    let _ = ticker.await;

    info!(
        "KeyStats overlay stopped ({} presses recorded)",
        stats.snapshot().total_presses
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
