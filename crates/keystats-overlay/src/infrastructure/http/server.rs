//! Broadcast server: accept loop, per-connection handling, and the push tick.
//!
//! ```text
//! accept loop ──spawn──▶ handle_connection ──▶ page | query | 404  (write, close)
//!                                          └─▶ event stream      (register, stay open)
//! push loop (every 16 ms) ──▶ SubscriberRegistry::push ──▶ each stream's queue
//! ```
//!
//! The push loop encodes one frame per tick and hands the same bytes to every
//! subscriber.  It re-encodes only when the engine generation has moved, so
//! an idle overlay costs one `Arc` clone per subscriber per tick.
//!
//! `start` and `stop` are both idempotent.  `stop` ends the accept loop, the
//! push loop, and every open stream.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use keystats_core::{encode_query, encode_stream, event_stream_frame, DisplayMetrics};

use super::page::{render_page, PageStyle};
use super::request::{parse_request_line, route, Route};
use super::response::{self, EVENT_STREAM_HEAD};
use super::subscribers::{Frame, SubscriberRegistry, DEFAULT_SUBSCRIBER_QUEUE};
use crate::application::layout_slot::LayoutSlot;
use crate::application::pipeline::generation_channel;
use crate::application::stats_handle::StatsHandle;

/// Largest request head the server reads.  Anything past the request line is
/// ignored anyway.
const REQUEST_BUFFER: usize = 4096;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

impl ServerError {
    /// The port is held by another socket.
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, ServerError::Bind { source, .. } if source.kind() == std::io::ErrorKind::AddrInUse)
    }
}

/// Tuning for [`BroadcastServer`].
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Event-stream push cadence.
    pub push_interval: Duration,
    /// How long a new connection may take to send its request line.
    pub read_timeout: Duration,
    /// Frames queued per subscriber before it starts skipping.
    pub subscriber_queue: usize,
    /// Pixel metrics for the page when the layout has none of its own.
    pub display: DisplayMetrics,
    pub style: PageStyle,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            push_interval: Duration::from_millis(16),
            read_timeout: Duration::from_secs(5),
            subscriber_queue: DEFAULT_SUBSCRIBER_QUEUE,
            display: DisplayMetrics::default(),
            style: PageStyle::default(),
        }
    }
}

/// Everything a connection task needs, cheap to clone.
#[derive(Clone)]
struct Shared {
    stats: StatsHandle,
    layout: LayoutSlot,
    settings: Arc<ServerSettings>,
    subscribers: Arc<SubscriberRegistry>,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

pub struct BroadcastServer {
    shared: Shared,
    generation: watch::Receiver<u64>,
    running: Mutex<Option<Running>>,
}

impl BroadcastServer {
    pub fn new(stats: StatsHandle, layout: LayoutSlot, settings: ServerSettings) -> Self {
        let generation = generation_channel(&stats);
        let subscribers = Arc::new(SubscriberRegistry::new(settings.subscriber_queue));
        Self {
            shared: Shared {
                stats,
                layout,
                settings: Arc::new(settings),
                subscribers,
            },
            generation,
            running: Mutex::new(None),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds `addr` and starts serving.  Returns the bound address (useful
    /// with port 0).  On a running server, returns its address unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be bound.
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        if let Some(existing) = self.local_addr() {
            return Ok(existing);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let mut running = self.lock_running();
        if let Some(existing) = running.as_ref() {
            return Ok(existing.local_addr);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(listener, self.shared.clone(), shutdown_rx.clone()));
        tokio::spawn(push_loop(
            self.shared.clone(),
            self.generation.clone(),
            shutdown_rx,
        ));
        *running = Some(Running {
            local_addr,
            shutdown: shutdown_tx,
        });

        info!("HTTP server listening on http://{local_addr}");
        Ok(local_addr)
    }

    /// Stops accepting, stops pushing, and closes every stream.
    pub fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };
        running.shutdown.send_replace(true);
        self.shared.subscribers.clear();
        info!("HTTP server on {} stopped", running.local_addr);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Background loops ──────────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, shared: Shared, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!("connection from {peer}");
                    let shared = shared.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(handle_connection(stream, peer, shared, shutdown));
                }
                Err(e) => {
                    // Typically fd exhaustion; back off instead of spinning.
                    warn!("accept error: {e}");
                    sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
    debug!("accept loop stopped");
}

async fn push_loop(
    shared: Shared,
    mut generation: watch::Receiver<u64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(shared.settings.push_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cached: Option<Frame> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        if shared.subscribers.is_empty() {
            continue;
        }

        if cached.is_none() || generation.has_changed().unwrap_or(true) {
            let _ = generation.borrow_and_update();
            match encode_stream(&shared.stats.snapshot()) {
                Ok(json) => cached = Some(Frame::from(event_stream_frame(&json).into_bytes())),
                Err(e) => {
                    error!("failed to encode stats frame: {e}");
                    continue;
                }
            }
        }

        if let Some(frame) = &cached {
            let outcome = shared.subscribers.push(frame);
            if outcome.removed > 0 {
                debug!("{} subscriber(s) dropped", outcome.removed);
            }
        }
    }
    debug!("push loop stopped");
}

// ── Per-connection handling ───────────────────────────────────────────────────

async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    shared: Shared,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut buf = vec![0u8; REQUEST_BUFFER];
    let n = match timeout(shared.settings.read_timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            debug!("{peer}: read failed: {e}");
            return;
        }
        Err(_) => {
            debug!("{peer}: no request line received");
            return;
        }
    };

    let request = String::from_utf8_lossy(&buf[..n]);
    let Some(line) = parse_request_line(&request) else {
        debug!("{peer}: malformed request line, closing");
        return;
    };
    let target = route(line.path);
    debug!("{peer}: {} {} -> {target:?}", line.method, line.path);

    match target {
        Route::Page => {
            let layout = shared.layout.current();
            let html = render_page(&layout, shared.settings.display, &shared.settings.style);
            write_and_close(stream, &response::html(&html), peer).await;
        }
        Route::Query => {
            let body = match encode_query(&shared.stats.snapshot()) {
                Ok(json) => response::json(&json),
                Err(e) => {
                    error!("failed to encode stats: {e}");
                    response::internal_error()
                }
            };
            write_and_close(stream, &body, peer).await;
        }
        Route::Events => serve_event_stream(stream, peer, shared, shutdown).await,
        Route::NotFound => write_and_close(stream, &response::not_found(), peer).await,
    }
}

async fn write_and_close<S>(mut stream: S, bytes: &[u8], peer: SocketAddr)
where
    S: AsyncWrite + Unpin,
{
    let result = async {
        stream.write_all(bytes).await?;
        stream.flush().await?;
        stream.shutdown().await
    }
    .await;
    if let Err(e) = result {
        debug!("{peer}: write failed: {e}");
    }
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

async fn serve_event_stream<S>(
    stream: S,
    peer: SocketAddr,
    shared: Shared,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if *shutdown.borrow() {
        return;
    }

    let (mut reader, mut writer) = tokio::io::split(stream);
    let head = async {
        writer.write_all(EVENT_STREAM_HEAD).await?;
        writer.flush().await
    }
    .await;
    if let Err(e) = head {
        debug!("{peer}: event stream head failed: {e}");
        return;
    }

    let (id, mut frames) = shared.subscribers.register();
    debug!("{peer}: subscriber {id} added ({} open)", shared.subscribers.len());

    let mut scratch = [0u8; 256];
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                // A peer that stops reading stalls the write; stop must still win.
                let sent = tokio::select! {
                    sent = write_frame(&mut writer, &frame) => sent,
                    _ = shutdown.changed() => break,
                };
                if let Err(e) = sent {
                    debug!("{peer}: subscriber {id} write failed: {e}");
                    break;
                }
            }
            read = reader.read(&mut scratch) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
            _ = shutdown.changed() => break,
        }
    }

    shared.subscribers.remove(id);
    let _ = writer.shutdown().await;
    debug!("{peer}: subscriber {id} removed");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
