//! # Outbound Connection Pools
//!
//! One [`ConnectionPool`] per remote `host:port`, holding up to `pool_size`
//! long-lived TCP connections that are opened lazily and reused.
//!
//! ## Ordering
//!
//! Every destination path is pinned to one connection slot of the pool, so all
//! frames for one actor travel on the same socket and the remote listener reads
//! them in write order. Within a path a [`Turnstile`] decides that order: a sender
//! takes a ticket synchronously (the order of `tell` calls is the order of
//! tickets), waits until its number is served, writes, and releases. Paths pinned
//! to different slots proceed concurrently.
//!
//! ## Failure and idleness
//!
//! A connection whose write failed is dropped and its slot reconnects on next
//! use. A background sweep closes pools that have been quiet for longer than the idle
//! timeout, sending the close sentinel on each of their connections.

use crate::error::TransportError;
use crate::remote::codec::close_frame;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub(crate) struct PoolSettings {
    pub(crate) size: usize,
    pub(crate) connect_retries: u32,
    pub(crate) idle_timeout: Duration,
    pub(crate) idle_check_interval: Duration,
}

// ---- per-path FIFO --------------------------------------------------------

struct Lane {
    next: u64,
    serving: watch::Sender<u64>,
    holders: usize,
    abandoned: BTreeSet<u64>,
}

/// Per-path ticket queues. A lane exists only while someone holds a ticket for it.
#[derive(Clone, Default)]
pub(crate) struct Turnstile {
    lanes: Arc<Mutex<HashMap<String, Lane>>>,
}

pub(crate) struct Ticket {
    turnstile: Turnstile,
    path: String,
    number: u64,
    turn: watch::Receiver<u64>,
}

impl Turnstile {
    pub(crate) fn take(&self, path: &str) -> Ticket {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        let lane = lanes.entry(path.to_string()).or_insert_with(|| Lane {
            next: 0,
            serving: watch::channel(0).0,
            holders: 0,
            abandoned: BTreeSet::new(),
        });
        let number = lane.next;
        lane.next += 1;
        lane.holders += 1;
        Ticket {
            turnstile: self.clone(),
            path: path.to_string(),
            number,
            turn: lane.serving.subscribe(),
        }
    }

    /// Number of paths with outstanding tickets.
    pub(crate) fn active(&self) -> usize {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, path: &str, number: u64) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(lane) = lanes.get_mut(path) else {
            return;
        };
        lane.holders -= 1;
        if *lane.serving.borrow() == number {
            let mut next = number + 1;
            while lane.abandoned.remove(&next) {
                next += 1;
            }
            lane.serving.send_replace(next);
        } else {
            // Gave up before its turn; skip it when the turn comes.
            lane.abandoned.insert(number);
        }
        if lane.holders == 0 {
            lanes.remove(path);
        }
    }
}

impl Ticket {
    pub(crate) async fn wait_turn(&mut self) {
        let number = self.number;
        // The lane outlives every ticket holder, so the sender cannot be gone here.
        let _ = self.turn.wait_for(|serving| *serving >= number).await;
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.turnstile.release(&self.path, self.number);
    }
}

// ---- pool -----------------------------------------------------------------

struct Connection {
    id: u64,
    stream: TcpStream,
}

pub(crate) struct ConnectionPool {
    host: String,
    slots: Vec<AsyncMutex<Option<Connection>>>,
    lanes: Turnstile,
    last_used: Mutex<Instant>,
    next_id: AtomicU64,
    connect_retries: u32,
    closed: AtomicBool,
}

impl ConnectionPool {
    fn new(host: String, settings: &PoolSettings) -> Self {
        ConnectionPool {
            host,
            slots: (0..settings.size.max(1))
                .map(|_| AsyncMutex::new(None))
                .collect(),
            lanes: Turnstile::default(),
            last_used: Mutex::new(Instant::now()),
            next_id: AtomicU64::new(0),
            connect_retries: settings.connect_retries.max(1),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn ticket(&self, path: &str) -> Ticket {
        self.lanes.take(path)
    }

    fn slot_for(&self, path: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        (hasher.finish() % self.slots.len() as u64) as usize
    }

    /// Writes one frame once `ticket` is served.
    pub(crate) async fn deliver(&self, mut ticket: Ticket, frame: Bytes) -> Result<(), TransportError> {
        ticket.wait_turn().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::PoolClosed);
        }
        let mut slot = self.slots[self.slot_for(&ticket.path)].lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::PoolClosed);
        }
        if slot.is_none() {
            *slot = Some(self.connect().await?);
        }
        let Some(connection) = slot.as_mut() else {
            return Err(TransportError::PoolClosed);
        };
        self.touch();

        if let Err(e) = connection.stream.write_all(&frame).await {
            warn!(host = %self.host, connection = connection.id, error = %e, "Write failed, discarding connection");
            *slot = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn connect(&self) -> Result<Connection, TransportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match TcpStream::connect(&self.host).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    debug!(host = %self.host, connection = id, "Connected");
                    return Ok(Connection { id, stream });
                }
                Err(e) if attempt < self.connect_retries => {
                    warn!(host = %self.host, attempt, error = %e, "Connect failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(e) => {
                    error!(host = %self.host, attempts = attempt, error = %e, "Connect failed");
                    return Err(TransportError::ConnectFailed {
                        host: self.host.clone(),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn is_idle(&self, timeout: Duration) -> bool {
        let quiet = self
            .last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            >= timeout;
        quiet && self.lanes.active() == 0
    }

    /// Sends the close sentinel on every open connection and refuses new work.
    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for slot in &self.slots {
            if let Some(mut connection) = slot.lock().await.take() {
                let _ = connection.stream.write_all(&close_frame()).await;
                let _ = connection.stream.shutdown().await;
            }
        }
        debug!(host = %self.host, "Pool closed");
    }
}

// ---- manager --------------------------------------------------------------

/// All outbound pools of one actor system.
pub(crate) struct ConnectionManager {
    pools: Arc<DashMap<String, Arc<ConnectionPool>>>,
    settings: PoolSettings,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub(crate) fn new(settings: PoolSettings) -> Self {
        ConnectionManager {
            pools: Arc::new(DashMap::new()),
            settings,
            sweeper: Mutex::new(None),
        }
    }

    /// The pool for `host` plus a ticket for `path`. The ticket is taken under the
    /// map entry lock, so the sweeper never removes a pool between the two.
    fn checkout(&self, host: &str, path: &str) -> (Arc<ConnectionPool>, Ticket) {
        let pool = self
            .pools
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(ConnectionPool::new(host.to_string(), &self.settings)));
        let ticket = pool.ticket(path);
        (pool.clone(), ticket)
    }

    #[cfg(test)]
    pub(crate) fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Queues a frame for `path` on `host` and returns immediately. The place in
    /// line is taken before returning.
    pub(crate) fn post(&self, host: &str, path: &str, frame: Bytes) {
        self.ensure_sweeper();
        let (pool, ticket) = self.checkout(host, path);
        let path = path.to_string();
        tokio::spawn(async move {
            if let Err(e) = pool.deliver(ticket, frame).await {
                error!(host = %pool.host, path = %path, error = %e, "Remote delivery failed");
            }
        });
    }

    /// Writes a frame for `path` on `host` and waits for the write to finish.
    pub(crate) async fn send(&self, host: &str, path: &str, frame: Bytes) -> Result<(), TransportError> {
        self.ensure_sweeper();
        let (pool, ticket) = self.checkout(host, path);
        pool.deliver(ticket, frame).await
    }

    fn ensure_sweeper(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_some() {
            return;
        }
        let pools = self.pools.clone();
        let timeout = self.settings.idle_timeout;
        let every = self.settings.idle_check_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep(&pools, timeout).await;
            }
        }));
    }

    /// Closes every pool. Used on system stop.
    pub(crate) async fn shutdown(&self) {
        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
        let hosts: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        for host in hosts {
            if let Some((_, pool)) = self.pools.remove(&host) {
                pool.close().await;
            }
        }
    }
}

/// Closes and forgets every pool idle for `timeout`. Idleness is checked again
/// under the entry lock, so a pool that just handed out a ticket stays.
async fn sweep(pools: &DashMap<String, Arc<ConnectionPool>>, timeout: Duration) {
    let stale: Vec<String> = pools
        .iter()
        .filter(|entry| entry.value().is_idle(timeout))
        .map(|entry| entry.key().clone())
        .collect();
    for host in stale {
        if let Some((_, pool)) = pools.remove_if(&host, |_, pool| pool.is_idle(timeout)) {
            info!(host = %host, "Closing idle connection pool");
            pool.close().await;
        }
    }
}
