//! Persistent push connection with automatic reconnection.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request, header::COOKIE};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::ClientError;

const FRAME_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Waiting out the reconnect delay, or retrying after a drop.
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
            max_attempts: None,
            connect_timeout: Duration::from_millis(20_000),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt may follow `failures` consecutive failures.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures <= max)
    }
}

/// The single pending-reconnect handle. Scheduling while a timer is already
/// pending is a no-op.
#[derive(Debug)]
pub struct ReconnectTimer {
    delay: Duration,
    deadline: Option<Instant>,
    armed: u64,
}

impl ReconnectTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
            armed: 0,
        }
    }

    /// Arms the timer. Returns false if one was already pending.
    pub fn schedule(&mut self) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Instant::now() + self.delay);
        self.armed += 1;
        true
    }

    /// Resolves when the pending timer fires and disarms it. Never resolves
    /// while nothing is pending.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Timers armed over the channel's lifetime.
    pub fn armed_count(&self) -> u64 {
        self.armed
    }
}

/// Inbound push stream shared by every consumer of a page.
pub trait PushChannel: Send {
    /// Registers a new consumer of raw text frames.
    fn subscribe(&self) -> broadcast::Receiver<String>;

    /// Starts the connection loop if it is not already running.
    fn ensure_connected(&mut self);

    fn state(&self) -> watch::Receiver<ConnectionState>;

    fn close(&mut self);
}

pub struct WebSocketChannel {
    url: Url,
    cookie: Option<String>,
    policy: RetryPolicy,
    frames: broadcast::Sender<String>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketChannel {
    pub fn new(url: Url, cookie: Option<String>, policy: RetryPolicy) -> Self {
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            url,
            cookie,
            policy,
            frames,
            state: Arc::new(state),
            shutdown: None,
            task: None,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl PushChannel for WebSocketChannel {
    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.frames.subscribe()
    }

    fn ensure_connected(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let link = Link {
            url: self.url.clone(),
            cookie: self.cookie.clone(),
            policy: self.policy,
            frames: self.frames.clone(),
            state: self.state.clone(),
        };
        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(link.run(shutdown_rx)));
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if self.task.is_none() {
            self.state.send_replace(ConnectionState::Closed);
        }
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }
}

enum PumpExit {
    Dropped,
    Shutdown,
}

/// Everything the connection task owns.
struct Link {
    url: Url,
    cookie: Option<String>,
    policy: RetryPolicy,
    frames: broadcast::Sender<String>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Link {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = ReconnectTimer::new(self.policy.delay);
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.state.send_replace(if failures == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });

            let request = match self.request() {
                Ok(request) => request,
                Err(err) => {
                    error!("push channel request for {} is invalid: {err}", self.url);
                    break;
                }
            };

            match timeout(self.policy.connect_timeout, connect_async(request)).await {
                Ok(Ok((ws, _))) => {
                    timer.clear();
                    failures = 0;
                    self.state.send_replace(ConnectionState::Open);
                    info!("push channel connected to {}", self.url);
                    if let PumpExit::Shutdown = self.pump(ws, &mut shutdown).await {
                        break;
                    }
                    warn!("push channel to {} closed", self.url);
                }
                Ok(Err(err)) => warn!("push channel connect error: {err}"),
                Err(_) => warn!(
                    "push channel connect timed out after {:?}",
                    self.policy.connect_timeout
                ),
            }

            failures += 1;
            if !self.policy.allows(failures) {
                error!("push channel giving up after {failures} failed attempts");
                break;
            }
            self.state.send_replace(ConnectionState::Reconnecting);
            if timer.schedule() {
                debug!("reconnecting in {:?}", self.policy.delay);
            }
            tokio::select! {
                _ = timer.fired() => {}
                _ = shutdown.changed() => break,
            }
        }

        self.state.send_replace(ConnectionState::Closed);
    }

    fn request(&self) -> Result<Request<()>, ClientError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(cookie) = &self.cookie {
            request
                .headers_mut()
                .insert(COOKIE, HeaderValue::from_str(&format!("session={cookie}"))?);
        }
        Ok(request)
    }

    async fn pump(
        &self,
        mut ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PumpExit {
        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        // No subscribers is fine; the frame is simply dropped.
                        let _ = self.frames.send(text.as_str().to_owned());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(frame) => info!(
                                "push channel close: {} {}",
                                u16::from(frame.code),
                                frame.reason.as_str()
                            ),
                            None => info!("push channel close"),
                        }
                        return PumpExit::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("push channel read error: {err}");
                        return PumpExit::Dropped;
                    }
                    None => return PumpExit::Dropped,
                },
                _ = shutdown.changed() => {
                    let _ = ws.close(None).await;
                    return PumpExit::Shutdown;
                }
            }
        }
    }
}
