//! Connection pooling.
//!
//! [`ConnectionManager`] leases [`Session`]s over connections dialled by a [`StoreBackend`]:
//!
//! - at most `max_pool_size` sessions are leased at once; further `acquire` calls wait up to
//!   `acquire_timeout` and then fail with [`DocumentStoreError::PoolExhausted`],
//! - `min_pool_size` connections are dialled when the pool opens,
//! - released connections go back to an idle list and are reused most-recent first,
//! - connections released mid-transaction or after a transport failure are closed instead,
//! - with `max_idle_time` set, a background reaper closes connections that stayed idle too long
//!   while keeping `min_pool_size` open.
//!
//! Lifecycle events are logged at debug level under the `docflow::pool` target and, if configured,
//! delivered to a [`PoolMonitor`].

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::{
    backend::{StoreBackend, StoreConnection},
    config::PoolConfig,
    error::{DocumentStoreError, DocumentStoreResult},
};

const REAPER_MIN_INTERVAL: Duration = Duration::from_millis(5);

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Released while a transaction was still open.
    Transaction,
    /// The connection reported a transport failure.
    Unhealthy,
    /// Idle longer than `max_idle_time`.
    Idle,
    /// The pool was closed.
    PoolClosed,
}

/// Why an acquire failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetFailure {
    Timeout,
    PoolClosed,
    ConnectionError,
}

/// A pool lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    PoolCreated { min_pool_size: usize, max_pool_size: usize },
    ConnectionCreated { connection_id: u64 },
    GetSucceeded { connection_id: u64, waited: Duration },
    GetFailed { reason: GetFailure, waited: Duration },
    ConnectionReturned { connection_id: u64 },
    ConnectionClosed { connection_id: u64, reason: CloseReason },
    PoolClosed,
}

/// Receives pool lifecycle events. Called synchronously on the task that caused the event, so it
/// should not block.
pub trait PoolMonitor: Send + Sync {
    fn on_event(&self, event: &PoolEvent);
}

impl<F> PoolMonitor for F
where
    F: Fn(&PoolEvent) + Send + Sync,
{
    fn on_event(&self, event: &PoolEvent) {
        self(event)
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently open, leased or idle.
    pub open: usize,
    pub idle: usize,
    pub leased: usize,
    pub max_pool_size: usize,
}

struct PooledConnection {
    id: u64,
    inner: Box<dyn StoreConnection>,
    idle_since: Instant,
}

/// Bounded pool of store connections.
pub struct ConnectionManager {
    backend: Arc<dyn StoreBackend>,
    min_pool_size: usize,
    max_pool_size: usize,
    acquire_timeout: Duration,
    max_idle_time: Option<Duration>,
    monitor: Option<Arc<dyn PoolMonitor>>,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<PooledConnection>>,
    open: AtomicUsize,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("backend", &self.backend)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionManager {
    /// Opens a pool, dialling `min_pool_size` connections up front.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Configuration`] for invalid bounds, or the backend's error if
    /// an initial connection cannot be dialled.
    pub async fn open(
        backend: Arc<dyn StoreBackend>,
        config: &PoolConfig,
    ) -> DocumentStoreResult<Arc<Self>> {
        config.validate()?;

        let manager = Arc::new(Self {
            backend,
            min_pool_size: config.min_pool_size,
            max_pool_size: config.max_pool_size,
            acquire_timeout: config.acquire_timeout,
            max_idle_time: config.max_idle_time,
            monitor: config.monitor.clone(),
            permits: Arc::new(Semaphore::new(config.max_pool_size)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_pool_size)),
            open: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        manager.emit(PoolEvent::PoolCreated {
            min_pool_size: config.min_pool_size,
            max_pool_size: config.max_pool_size,
        });

        for _ in 0..config.min_pool_size {
            match manager.dial().await {
                Ok(connection) => manager.idle.lock().push_back(connection),
                Err(err) => {
                    let dialled = manager.idle.lock().drain(..).collect::<Vec<_>>();
                    for connection in dialled {
                        manager.close_connection(connection, CloseReason::PoolClosed).await;
                    }
                    return Err(err);
                }
            }
        }

        if let Some(max_idle_time) = manager.max_idle_time {
            spawn_reaper(Arc::downgrade(&manager), max_idle_time);
        }

        Ok(manager)
    }

    /// Leases a session, waiting up to the configured acquire timeout.
    ///
    /// Dropping the returned future abandons the wait without leasing anything.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::PoolExhausted`] if no connection became free in time
    /// - [`DocumentStoreError::Closed`] if the pool is or gets closed
    /// - the backend's error if a new connection cannot be dialled
    pub async fn acquire(self: &Arc<Self>) -> DocumentStoreResult<Session> {
        if self.is_closed() {
            return Err(DocumentStoreError::Closed);
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                self.emit(PoolEvent::GetFailed {
                    reason: GetFailure::PoolClosed,
                    waited: started.elapsed(),
                });
                return Err(DocumentStoreError::Closed);
            }
            Err(_) => {
                self.emit(PoolEvent::GetFailed {
                    reason: GetFailure::Timeout,
                    waited: started.elapsed(),
                });
                return Err(DocumentStoreError::PoolExhausted(self.acquire_timeout));
            }
        };

        let connection = match self.take_idle() {
            Some(connection) => connection,
            None => match self.dial().await {
                Ok(connection) => connection,
                Err(err) => {
                    self.emit(PoolEvent::GetFailed {
                        reason: GetFailure::ConnectionError,
                        waited: started.elapsed(),
                    });
                    return Err(err);
                }
            },
        };

        self.emit(PoolEvent::GetSucceeded {
            connection_id: connection.id,
            waited: started.elapsed(),
        });

        Ok(Session {
            connection: Some(connection),
            pool: self.clone(),
            _permit: permit,
        })
    }

    /// Closes idle connections, denies waiting and future acquires, and shuts the backend down.
    ///
    /// Leased sessions stay usable until released; their connections are then closed rather than
    /// pooled. Closing twice is a no-op.
    pub async fn close(&self) -> DocumentStoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.permits.close();

        let drained = self.idle.lock().drain(..).collect::<Vec<_>>();
        for connection in drained {
            self.close_connection(connection, CloseReason::PoolClosed).await;
        }

        self.emit(PoolEvent::PoolClosed);
        self.backend.shutdown().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PoolStatus {
        let open = self.open.load(Ordering::SeqCst);
        let idle = self.idle.lock().len();

        PoolStatus {
            open,
            idle,
            leased: open.saturating_sub(idle),
            max_pool_size: self.max_pool_size,
        }
    }

    async fn dial(&self) -> DocumentStoreResult<PooledConnection> {
        let inner = self.backend.connect().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);
        self.emit(PoolEvent::ConnectionCreated { connection_id: id });

        Ok(PooledConnection { id, inner, idle_since: Instant::now() })
    }

    fn take_idle(&self) -> Option<PooledConnection> {
        loop {
            let connection = self.idle.lock().pop_back()?;
            if connection.inner.is_healthy() {
                return Some(connection);
            }
            self.retire(connection, CloseReason::Unhealthy);
        }
    }

    fn give_back(&self, mut connection: PooledConnection) {
        let reason = if self.is_closed() {
            Some(CloseReason::PoolClosed)
        } else if connection.inner.in_transaction() {
            Some(CloseReason::Transaction)
        } else if !connection.inner.is_healthy() {
            Some(CloseReason::Unhealthy)
        } else {
            None
        };

        match reason {
            Some(reason) => self.retire(connection, reason),
            None => {
                let id = connection.id;
                connection.idle_since = Instant::now();
                self.idle.lock().push_back(connection);
                self.emit(PoolEvent::ConnectionReturned { connection_id: id });
            }
        }
    }

    /// Closes a connection from a synchronous context.
    fn retire(&self, connection: PooledConnection, reason: CloseReason) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.emit(PoolEvent::ConnectionClosed { connection_id: connection.id, reason });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(shut(connection));
        }
    }

    async fn close_connection(&self, connection: PooledConnection, reason: CloseReason) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.emit(PoolEvent::ConnectionClosed { connection_id: connection.id, reason });
        shut(connection).await;
    }

    /// Closes idle connections older than `max_idle_time`, oldest first, keeping `min_pool_size`.
    async fn reap(&self, max_idle_time: Duration) {
        let expired = {
            let mut idle = self.idle.lock();
            let mut open = self.open.load(Ordering::SeqCst);
            let mut expired = Vec::new();

            while open > self.min_pool_size
                && idle
                    .front()
                    .is_some_and(|connection| connection.idle_since.elapsed() >= max_idle_time)
            {
                if let Some(connection) = idle.pop_front() {
                    expired.push(connection);
                    open -= 1;
                }
            }

            expired
        };

        for connection in expired {
            self.close_connection(connection, CloseReason::Idle).await;
        }
    }

    fn emit(&self, event: PoolEvent) {
        debug!(target: "docflow::pool", ?event, "pool event");
        if let Some(monitor) = &self.monitor {
            monitor.on_event(&event);
        }
    }
}

async fn shut(mut connection: PooledConnection) {
    if connection.inner.in_transaction() {
        if let Err(err) = connection.inner.abort_transaction().await {
            warn!(target: "docflow::pool", connection_id = connection.id, %err, "abort on close failed");
        }
    }
    if let Err(err) = connection.inner.close().await {
        warn!(target: "docflow::pool", connection_id = connection.id, %err, "close failed");
    }
}

fn spawn_reaper(pool: Weak<ConnectionManager>, max_idle_time: Duration) {
    let period = (max_idle_time / 2).max(REAPER_MIN_INTERVAL);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(pool) = pool.upgrade() else {
                break;
            };
            if pool.is_closed() {
                break;
            }
            pool.reap(max_idle_time).await;
        }
    });
}

/// A leased connection.
///
/// Operations on one session are serialized by `&mut self`. The connection goes back to the pool
/// when the session is released or dropped; either happens exactly once.
pub struct Session {
    connection: Option<PooledConnection>,
    pool: Arc<ConnectionManager>,
    _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection.as_ref().map(|connection| connection.id))
            .finish()
    }
}

impl Session {
    /// The pool-assigned connection id.
    pub fn id(&self) -> u64 {
        self.connection.as_ref().map_or(0, |connection| connection.id)
    }

    /// Returns the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Closed`] if the session was already released.
    pub fn connection(&mut self) -> DocumentStoreResult<&mut Box<dyn StoreConnection>> {
        match self.connection.as_mut() {
            Some(connection) => Ok(&mut connection.inner),
            None => Err(DocumentStoreError::Closed),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.inner.in_transaction())
    }

    /// Returns the connection to the pool.
    pub fn release(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.give_back(connection);
        }
    }
}
