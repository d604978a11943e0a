//! Caching connector: keeps at most one live framed connection per target
//! address, hands out shared handles to concurrent callers and evicts
//! connections which stay idle past a configured threshold.
use crate::channel::{self, Channel};
use crate::protocol::{Request, Response};
use crate::settings::EndpointConfig;
use crate::{Error, Result};

use tracing::debug;

use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, Instant};

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A live request/response connection to one peer. The framed halves sit
/// behind an async lock so one exchange completes before the next starts.
pub struct Connection {
    target: SocketAddr,
    io: tokio::sync::Mutex<Io>,
    broken: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("broken", &self.broken)
            .finish()
    }
}

struct Io {
    sender: channel::Sender<Request, Response>,
    receiver: channel::Receiver<Request, Response>,
}

impl Connection {
    pub fn new(target: SocketAddr, channel: Channel<Request, Response>) -> Self {
        let (sender, receiver) = channel.split();
        Connection { target, io: tokio::sync::Mutex::new(Io { sender, receiver }), broken: AtomicBool::new(false) }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// A connection is marked broken on the first transport failure and is
    /// never handed out from the cache again.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Sends one request and waits for the peer's response, bounded by
    /// `deadline`.
    pub async fn request(&self, request: Request, deadline: Duration) -> Result<Response> {
        let mut io = self.io.lock().await;
        let exchange = async {
            io.sender.send(request).await?;
            let response = io.receiver.recv().await?;
            Ok::<Option<Response>, channel::Error>(response)
        };
        match timeout(deadline, exchange).await {
            Err(_) => {
                self.broken.store(true, Ordering::SeqCst);
                Err(Error::Timeout { target: self.target })
            }
            Ok(Err(err)) => {
                self.broken.store(true, Ordering::SeqCst);
                Err(err.into())
            }
            Ok(Ok(None)) => {
                self.broken.store(true, Ordering::SeqCst);
                Err(Error::ConnectionFailed {
                    target: self.target,
                    reason: "connection closed by peer".to_string(),
                })
            }
            Ok(Ok(Some(response))) => Ok(response),
        }
    }
}

/// Future type that can be safely held across `.await` boundaries.
type SafeFuture<Out> = Pin<Box<dyn Send + Future<Output = Out>>>;

type DialOutput = SafeFuture<Result<Connection>>;

/// Transport seam: produces a fresh [`Connection`] to a target. Hosts with
/// TLS credentials install their own dialer; the crate ships plain TCP.
pub trait Dialer: Send + Sync {
    fn dial(&self, target: SocketAddr) -> DialOutput;
}

pub struct TcpDialer {}

impl TcpDialer {
    pub fn new() -> Arc<dyn Dialer> {
        Arc::new(TcpDialer {})
    }
}

impl Dialer for TcpDialer {
    fn dial(&self, target: SocketAddr) -> DialOutput {
        Box::pin(async move {
            match Channel::connect(&target).await {
                Ok(channel) => Ok(Connection::new(target, channel)),
                Err(channel::Error::IO(err)) => {
                    Err(Error::ConnectionFailed { target, reason: err.to_string() })
                }
                Err(channel::Error::Closed) => {
                    Err(Error::ConnectionFailed { target, reason: "closed".to_string() })
                }
            }
        })
    }
}

struct CacheEntry {
    conn: Arc<Connection>,
    refs: usize,
    released_at: Instant,
}

/// Per-target slot. The async lock makes concurrent dials to one target
/// converge on a single connection instead of racing.
struct TargetSlot {
    state: tokio::sync::Mutex<Option<CacheEntry>>,
}

impl TargetSlot {
    fn new() -> Self {
        TargetSlot { state: tokio::sync::Mutex::new(None) }
    }
}

pub struct CachingConnector {
    dialer: Arc<dyn Dialer>,
    dial_timeout: Duration,
    idle_timeout: Duration,
    conns: Mutex<HashMap<SocketAddr, Arc<TargetSlot>>>,
    closed: AtomicBool,
    shutdown: tokio::sync::Notify,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CachingConnector {
    /// Creates the connector and starts its idle sweep task. Must be called
    /// from within a tokio runtime.
    pub fn new(dialer: Arc<dyn Dialer>, config: &dyn EndpointConfig) -> Arc<CachingConnector> {
        let connector = Arc::new(CachingConnector {
            dialer,
            dial_timeout: config.dial_timeout(),
            idle_timeout: config.idle_timeout(),
            conns: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown: tokio::sync::Notify::new(),
            sweeper: Mutex::new(None),
        });
        connector.start_sweeper(config.sweep_interval());
        connector
    }

    fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let connector = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match timeout(interval, connector.shutdown.notified()).await {
                    Ok(()) => break,
                    Err(_elapsed) => connector.sweep().await,
                }
            }
        });
        *self.sweeper.lock().unwrap() = Some(handle);
    }

    /// Returns the cached connection for `target` or dials a new one under
    /// the configured dial timeout.
    pub async fn dial(&self, target: SocketAddr) -> Result<Arc<Connection>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let slot = {
            let mut conns = self.conns.lock().unwrap();
            conns.entry(target).or_insert_with(|| Arc::new(TargetSlot::new())).clone()
        };
        let mut state = slot.state.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        if let Some(entry) = state.as_mut() {
            if !entry.conn.is_broken() {
                entry.refs += 1;
                debug!("connection cache hit for {:?}", target);
                return Ok(entry.conn.clone());
            }
            // The old connection failed; shut it down before replacing it.
            *state = None;
        }
        let conn = match timeout(self.dial_timeout, self.dialer.dial(target)).await {
            Ok(Ok(conn)) => Arc::new(conn),
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) => return Err(Error::Timeout { target }),
        };
        debug!("dialled {:?}", target);
        *state =
            Some(CacheEntry { conn: conn.clone(), refs: 1, released_at: Instant::now() });
        Ok(conn)
    }

    /// Hands a connection back to the cache and timestamps it for the idle
    /// sweep.
    pub async fn release(&self, conn: &Arc<Connection>) {
        let slot = { self.conns.lock().unwrap().get(&conn.target()).cloned() };
        if let Some(slot) = slot {
            let mut state = slot.state.lock().await;
            if let Some(entry) = state.as_mut() {
                if Arc::ptr_eq(&entry.conn, conn) {
                    entry.refs = entry.refs.saturating_sub(1);
                    entry.released_at = Instant::now();
                }
            }
        }
    }

    async fn sweep(&self) {
        let slots: Vec<(SocketAddr, Arc<TargetSlot>)> = {
            let conns = self.conns.lock().unwrap();
            conns.iter().map(|(target, slot)| (*target, slot.clone())).collect()
        };
        for (target, slot) in slots {
            // A slot locked by an in-flight dial is skipped until next cycle.
            if let Ok(mut state) = slot.state.try_lock() {
                let evict = match state.as_ref() {
                    Some(entry) => {
                        entry.refs == 0
                            && (entry.conn.is_broken()
                                || entry.released_at.elapsed() >= self.idle_timeout)
                    }
                    None => false,
                };
                if evict {
                    debug!("evicting idle connection to {:?}", target);
                    *state = None;
                }
            }
        }
    }

    /// Closes all cached connections and stops the sweep task. Subsequent
    /// dials fail with [`Error::Closed`]; calling `close` again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();
        let handle = self.sweeper.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let slots: Vec<Arc<TargetSlot>> = {
            let mut conns = self.conns.lock().unwrap();
            conns.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            let mut state = slot.state.lock().await;
            *state = None;
        }
    }
}
