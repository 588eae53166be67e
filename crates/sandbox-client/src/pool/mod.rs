//! Connection pool for managing backend connections.
//!
//! The pool is an explicit instance, not a global. It initializes itself on
//! the first `acquire()` (or eagerly via `initialize()`), grows in steps of
//! `increment` connections up to `max_connections`, and hands each connection
//! to exactly one borrower at a time through a [`PooledConnection`] guard.
//! Dropping the guard returns the connection. Connections that are broken,
//! expired or still inside a transaction are discarded instead of reused.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use sandbox_sql::StatementKind;

use crate::backend::{Backend, BackendConnection, QueryResult};
use crate::error::{BackendError, BackendResult, ClientError, ClientResult};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections to maintain.
    pub min_connections: usize,
    /// Maximum number of connections.
    pub max_connections: usize,
    /// How many connections to open when the pool has to grow.
    pub increment: usize,
    /// How long to wait for a connection.
    pub acquire_timeout: Duration,
    /// How long a connection can be idle before being closed.
    pub idle_timeout: Duration,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            increment: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

impl PoolConfig {
    /// Creates a new pool configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum connections.
    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the maximum connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the growth increment.
    pub fn increment(mut self, increment: usize) -> Self {
        self.increment = increment;
        self
    }

    /// Sets the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the max lifetime.
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        if self.min_connections > self.max_connections {
            return Err(ClientError::InvalidConfig(
                "min_connections cannot be greater than max_connections".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ClientError::InvalidConfig(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if self.increment == 0 {
            return Err(ClientError::InvalidConfig(
                "increment must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A connection owned by the pool.
struct ManagedConnection {
    /// The backend connection.
    conn: Box<dyn BackendConnection>,
    /// When the connection was created.
    created_at: Instant,
    /// When the connection was last used.
    last_used: Instant,
    /// Number of times this connection has been lent out.
    use_count: u64,
    /// Set when a borrower saw a connection-level failure.
    broken: bool,
}

impl ManagedConnection {
    fn new(conn: Box<dyn BackendConnection>) -> Self {
        let now = Instant::now();
        Self {
            conn,
            created_at: now,
            last_used: now,
            use_count: 0,
            broken: false,
        }
    }

    fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() > idle_timeout
    }

    fn mark_used(&mut self) {
        self.last_used = Instant::now();
        self.use_count += 1;
    }

    fn observe<T>(&mut self, result: &BackendResult<T>) {
        if matches!(result, Err(e) if e.is_connection()) {
            self.broken = true;
        }
    }

    /// Returns why this connection must not be reused, if anything.
    fn discard_reason(&self, max_lifetime: Duration) -> Option<&'static str> {
        if self.broken || !self.conn.is_connected() {
            Some("broken")
        } else if self.conn.in_transaction() {
            Some("open transaction")
        } else if self.is_expired(max_lifetime) {
            Some("expired")
        } else {
            None
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    /// Total connections created.
    pub connections_created: u64,
    /// Total connections closed.
    pub connections_closed: u64,
    /// Total acquisitions.
    pub acquisitions: u64,
    /// Total releases.
    pub releases: u64,
    /// Acquisition timeouts.
    pub timeouts: u64,
    /// Connections discarded on release instead of reused.
    pub discarded: u64,
    /// Current pool size.
    pub current_size: usize,
    /// Current idle connections.
    pub idle_connections: usize,
    /// Current active connections.
    pub active_connections: usize,
}

/// Shared pool state.
struct PoolState {
    /// Available connections.
    available: VecDeque<ManagedConnection>,
    /// Whether the pool is closed.
    closed: bool,
}

/// Slots in `current_size` claimed for connections not yet opened.
///
/// Unused slots are given back on drop, including when the acquiring future
/// is cancelled mid-connect.
struct SlotReservation<'a> {
    size: &'a AtomicUsize,
    remaining: usize,
}

impl SlotReservation<'_> {
    fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.remaining > 0 {
            self.size.fetch_sub(self.remaining, Ordering::AcqRel);
        }
    }
}

/// A bounded pool of backend connections.
pub struct ConnectionPool {
    /// Backend that opens connections.
    backend: Arc<dyn Backend>,
    /// Pool configuration.
    config: PoolConfig,
    /// Pool state.
    state: Mutex<PoolState>,
    /// Semaphore bounding checked-out connections.
    semaphore: Arc<Semaphore>,
    /// Set once the minimum connections are open.
    initialized: OnceCell<()>,
    /// Statistics.
    stats: Mutex<PoolStats>,
    /// Open connections plus reserved slots.
    current_size: AtomicUsize,
}

impl ConnectionPool {
    /// Creates a new connection pool. No connection is opened yet.
    pub fn new(backend: Arc<dyn Backend>, config: PoolConfig) -> ClientResult<Self> {
        config.validate()?;

        Ok(Self {
            backend,
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                closed: false,
            }),
            initialized: OnceCell::new(),
            stats: Mutex::new(PoolStats::default()),
            current_size: AtomicUsize::new(0),
            config,
        })
    }

    /// Creates a pool with default configuration.
    pub fn with_defaults(backend: Arc<dyn Backend>) -> ClientResult<Self> {
        Self::new(backend, PoolConfig::default())
    }

    /// Opens the minimum connections if that has not happened yet.
    ///
    /// A failed initialization is retried by the next call.
    pub async fn initialize(&self) -> ClientResult<()> {
        self.initialized
            .get_or_try_init(|| self.open_min_connections())
            .await
            .map(|_| ())
    }

    /// Acquires a connection from the pool.
    pub async fn acquire(&self) -> ClientResult<PooledConnection<'_>> {
        if self.is_closed() {
            return Err(ClientError::PoolClosed);
        }
        self.initialize().await?;

        let timeout = self.config.acquire_timeout;
        let (permit, conn) = match tokio::time::timeout(timeout, self.checkout()).await {
            Ok(result) => result?,
            Err(_) => {
                self.stats.lock().timeouts += 1;
                warn!(timeout_ms = timeout.as_millis() as u64, "timed out waiting for a connection");
                return Err(ClientError::PoolTimeout(timeout.as_millis() as u64));
            }
        };

        {
            let mut stats = self.stats.lock();
            stats.acquisitions += 1;
            stats.active_connections += 1;
        }

        Ok(PooledConnection {
            pool: self,
            connection: Some(conn),
            _permit: permit,
        })
    }

    /// Returns a connection to the pool, or discards it.
    fn release(&self, mut conn: ManagedConnection) {
        conn.mark_used();

        let reason = conn.discard_reason(self.config.max_lifetime);
        let discarded = {
            let mut state = self.state.lock();
            match reason {
                None if !state.closed => {
                    state.available.push_back(conn);
                    None
                }
                None => Some(conn),
                Some(_) => Some(conn),
            }
        };

        let kept = discarded.is_none();
        if let Some(conn) = discarded {
            match reason {
                Some(reason @ ("broken" | "open transaction")) => {
                    warn!(reason, "discarding connection instead of returning it to the pool")
                }
                Some(reason) => debug!(reason, "discarding connection"),
                None => debug!("pool closed, discarding returned connection"),
            }
            self.close_connection(conn);
        }

        // Update all stats in a single lock acquisition
        let mut stats = self.stats.lock();
        stats.releases += 1;
        if !kept {
            stats.discarded += 1;
        }
        stats.active_connections = stats.active_connections.saturating_sub(1);
    }

    /// Returns pool statistics.
    pub fn stats(&self) -> PoolStats {
        let mut stats = self.stats.lock().clone();
        stats.current_size = self.current_size.load(Ordering::Acquire);
        stats.idle_connections = self.state.lock().available.len();
        stats
    }

    /// Returns the current pool size.
    pub fn size(&self) -> usize {
        self.current_size.load(Ordering::Acquire)
    }

    /// Returns the number of available connections.
    pub fn available(&self) -> usize {
        self.state.lock().available.len()
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Closes the pool and all idle connections.
    ///
    /// Borrowed connections are discarded when their guards drop.
    pub async fn close(&self) {
        self.semaphore.close();
        let connections = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.available)
        };

        let count = connections.len();
        for conn in connections {
            self.close_connection(conn);
        }
        info!(backend = self.backend.name(), closed = count, "connection pool closed");
    }

    /// Returns true if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    async fn open_min_connections(&self) -> ClientResult<()> {
        let wanted = self.config.min_connections;
        let mut reservation = self.reserve_slots(wanted);
        let mut opened = Vec::with_capacity(reservation.remaining);

        while reservation.remaining > 0 {
            match self.create_connection().await {
                Ok(conn) => {
                    reservation.consume();
                    opened.push(conn);
                }
                Err(e) => {
                    for conn in opened {
                        self.close_connection(conn);
                    }
                    warn!(backend = self.backend.name(), error = %e, "connection pool initialization failed");
                    return Err(ClientError::Initialization(e.to_string()));
                }
            }
        }

        let count = opened.len();
        self.state.lock().available.extend(opened);
        info!(
            backend = self.backend.name(),
            connections = count,
            max_connections = self.config.max_connections,
            "connection pool initialized"
        );
        Ok(())
    }

    async fn checkout(&self) -> ClientResult<(OwnedSemaphorePermit, ManagedConnection)> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ClientError::PoolClosed)?;
        let conn = self.get_or_create_connection().await?;
        Ok((permit, conn))
    }

    /// Gets an existing connection or grows the pool.
    async fn get_or_create_connection(&self) -> ClientResult<ManagedConnection> {
        loop {
            if let Some(conn) = self.take_idle() {
                return Ok(conn);
            }

            let mut reservation = self.reserve_slots(self.config.increment);
            if reservation.remaining > 0 {
                let first = self.create_connection().await?;
                reservation.consume();

                // Extra connections from the increment go to the idle queue.
                while reservation.remaining > 0 {
                    match self.create_connection().await {
                        Ok(conn) => {
                            reservation.consume();
                            self.state.lock().available.push_back(conn);
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to open extra pool connection");
                            break;
                        }
                    }
                }
                return Ok(first);
            }

            // Every slot is reserved by another task that is still opening
            // connections; one of them will land in the idle queue.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Pops a valid idle connection, closing stale ones.
    fn take_idle(&self) -> Option<ManagedConnection> {
        let mut stale = Vec::new();
        let found = {
            let mut state = self.state.lock();
            let mut found = None;
            while let Some(conn) = state.available.pop_front() {
                if conn.is_expired(self.config.max_lifetime)
                    || conn.is_idle(self.config.idle_timeout)
                    || !conn.conn.is_connected()
                {
                    stale.push(conn);
                    continue;
                }
                found = Some(conn);
                break;
            }
            found
        };

        for conn in stale {
            debug!("closing stale idle connection");
            self.close_connection(conn);
        }
        found
    }

    /// Claims up to `wanted` slots without exceeding `max_connections`.
    fn reserve_slots(&self, wanted: usize) -> SlotReservation<'_> {
        let max = self.config.max_connections;
        let mut current = self.current_size.load(Ordering::Acquire);
        loop {
            let granted = wanted.min(max.saturating_sub(current));
            if granted == 0 {
                return SlotReservation {
                    size: &self.current_size,
                    remaining: 0,
                };
            }
            match self.current_size.compare_exchange_weak(
                current,
                current + granted,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return SlotReservation {
                        size: &self.current_size,
                        remaining: granted,
                    }
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Opens a new connection. The caller holds a reserved slot for it.
    async fn create_connection(&self) -> BackendResult<ManagedConnection> {
        let conn = self.backend.connect().await?;
        self.stats.lock().connections_created += 1;
        debug!(backend = self.backend.name(), "opened pool connection");
        Ok(ManagedConnection::new(conn))
    }

    /// Closes a connection.
    fn close_connection(&self, conn: ManagedConnection) {
        drop(conn);
        self.current_size.fetch_sub(1, Ordering::AcqRel);
        self.stats.lock().connections_closed += 1;
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("backend", &self.backend.name())
            .field("max_connections", &self.config.max_connections)
            .field("current_size", &self.size())
            .field("available", &self.available())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A connection borrowed from the pool.
///
/// When dropped, the connection is returned to the pool, or discarded if it
/// is broken or still inside a transaction.
pub struct PooledConnection<'a> {
    /// Reference to the pool.
    pool: &'a ConnectionPool,
    /// The connection.
    connection: Option<ManagedConnection>,
    /// Semaphore permit.
    _permit: OwnedSemaphorePermit,
}

impl<'a> PooledConnection<'a> {
    fn managed(&mut self) -> BackendResult<&mut ManagedConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| BackendError::connection("connection already released"))
    }

    /// Executes one statement.
    pub async fn execute(
        &mut self,
        sql: &str,
        kind: StatementKind,
        max_rows: usize,
    ) -> BackendResult<QueryResult> {
        let managed = self.managed()?;
        let result = managed.conn.execute(sql, kind, max_rows).await;
        managed.observe(&result);
        result
    }

    /// Starts a transaction.
    pub async fn begin(&mut self) -> BackendResult<()> {
        let managed = self.managed()?;
        let result = managed.conn.begin().await;
        managed.observe(&result);
        result
    }

    /// Commits the current transaction.
    pub async fn commit(&mut self) -> BackendResult<()> {
        let managed = self.managed()?;
        let result = managed.conn.commit().await;
        managed.observe(&result);
        result
    }

    /// Rolls back the current transaction.
    pub async fn rollback(&mut self) -> BackendResult<()> {
        let managed = self.managed()?;
        let result = managed.conn.rollback().await;
        managed.observe(&result);
        result
    }

    /// Checks a statement without executing it.
    pub async fn parse_only(&mut self, sql: &str) -> BackendResult<()> {
        let managed = self.managed()?;
        let result = managed.conn.parse_only(sql).await;
        managed.observe(&result);
        result
    }

    /// Returns true while a transaction is open on this connection.
    pub fn in_transaction(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.conn.in_transaction())
    }

    /// Marks the connection as unusable so it is discarded on release.
    pub fn mark_broken(&mut self) {
        if let Some(conn) = self.connection.as_mut() {
            conn.broken = true;
        }
    }

    /// Returns true if the connection has been marked unusable.
    pub fn is_broken(&self) -> bool {
        self.connection
            .as_ref()
            .map_or(true, |c| c.broken || !c.conn.is_connected())
    }

    /// Returns how long the connection has been alive.
    pub fn connection_age(&self) -> Duration {
        self.connection
            .as_ref()
            .map(|c| c.created_at.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Returns how many times this connection has been used.
    pub fn use_count(&self) -> u64 {
        self.connection.as_ref().map(|c| c.use_count).unwrap_or(0)
    }
}

impl<'a> Drop for PooledConnection<'a> {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.pool.release(conn);
        }
    }
}

impl<'a> std::fmt::Debug for PooledConnection<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection_age", &self.connection_age())
            .field("use_count", &self.use_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendCapabilities;
    use async_trait::async_trait;
    use sandbox_sql::SplitOptions;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Default)]
    struct MockBackend {
        refuse: AtomicBool,
        connects: AtomicUsize,
    }

    struct MockConnection {
        in_transaction: bool,
    }

    #[async_trait]
    impl BackendConnection for MockConnection {
        async fn execute(
            &mut self,
            sql: &str,
            _kind: StatementKind,
            _max_rows: usize,
        ) -> BackendResult<QueryResult> {
            if sql == "DISCONNECT" {
                return Err(BackendError::connection("server closed the connection"));
            }
            Ok(QueryResult::empty())
        }

        async fn begin(&mut self) -> BackendResult<()> {
            self.in_transaction = true;
            Ok(())
        }

        async fn commit(&mut self) -> BackendResult<()> {
            self.in_transaction = false;
            Ok(())
        }

        async fn rollback(&mut self) -> BackendResult<()> {
            self.in_transaction = false;
            Ok(())
        }

        async fn parse_only(&mut self, _sql: &str) -> BackendResult<()> {
            Ok(())
        }

        async fn ping(&mut self) -> BackendResult<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn in_transaction(&self) -> bool {
            self.in_transaction
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities::default()
        }

        fn split_options(&self) -> SplitOptions {
            SplitOptions::default()
        }

        async fn connect(&self) -> BackendResult<Box<dyn BackendConnection>> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(BackendError::connection("connection refused"));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                in_transaction: false,
            }))
        }
    }

    fn pool_with(config: PoolConfig) -> (Arc<MockBackend>, ConnectionPool) {
        let backend = Arc::new(MockBackend::default());
        let pool = ConnectionPool::new(backend.clone(), config).unwrap();
        (backend, pool)
    }

    #[test]
    fn test_pool_config() {
        let config = PoolConfig::new()
            .min_connections(2)
            .max_connections(10)
            .increment(2)
            .acquire_timeout(Duration::from_secs(5));

        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.increment, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_invalid() {
        assert!(PoolConfig::new()
            .min_connections(20)
            .max_connections(10)
            .validate()
            .is_err());
        assert!(PoolConfig::new()
            .min_connections(0)
            .max_connections(0)
            .validate()
            .is_err());
        assert!(PoolConfig::new().increment(0).validate().is_err());
    }

    #[tokio::test]
    async fn test_pool_is_lazy() {
        let (backend, pool) = pool_with(PoolConfig::new().min_connections(2));
        assert_eq!(pool.size(), 0);
        assert_eq!(backend.connects.load(Ordering::SeqCst), 0);
        assert!(!pool.is_closed());

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.available(), 1);
        drop(conn);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_acquire_release() {
        let (_, pool) = pool_with(PoolConfig::new().acquire_timeout(Duration::from_millis(100)));

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().active_connections, 1);
        drop(conn);

        assert_eq!(pool.available(), 1);
        let stats = pool.stats();
        assert_eq!(stats.connections_created, 1);
        assert_eq!(stats.acquisitions, 1);
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.active_connections, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_timeout_when_exhausted() {
        let config = PoolConfig::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_millis(50));
        let (_, pool) = pool_with(config);

        let _c1 = pool.acquire().await.unwrap();
        let _c2 = pool.acquire().await.unwrap();
        let result = pool.acquire().await;

        assert!(matches!(result, Err(ClientError::PoolTimeout(50))));
        assert_eq!(pool.stats().timeouts, 1);
        assert_eq!(pool.size(), 2);
    }

    #[tokio::test]
    async fn test_pool_grows_by_increment() {
        let config = PoolConfig::new()
            .min_connections(1)
            .max_connections(3)
            .increment(5);
        let (_, pool) = pool_with(config);

        let _c1 = pool.acquire().await.unwrap();
        assert_eq!(pool.size(), 1);

        // No idle connection left: grow, capped at max_connections.
        let _c2 = pool.acquire().await.unwrap();
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_pool_discards_broken_connections() {
        let (_, pool) = pool_with(PoolConfig::new());

        let mut conn = pool.acquire().await.unwrap();
        let err = conn
            .execute("DISCONNECT", StatementKind::Other, 0)
            .await
            .unwrap_err();
        assert!(err.is_connection());
        assert!(conn.is_broken());
        drop(conn);

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.stats().discarded, 1);

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        drop(conn);
        assert_eq!(pool.stats().discarded, 2);
    }

    #[tokio::test]
    async fn test_pool_discards_connections_in_transaction() {
        let (_, pool) = pool_with(PoolConfig::new());

        let mut conn = pool.acquire().await.unwrap();
        conn.begin().await.unwrap();
        assert!(conn.in_transaction());
        drop(conn);

        assert_eq!(pool.available(), 0);
        assert_eq!(pool.size(), 0);

        let mut conn = pool.acquire().await.unwrap();
        conn.begin().await.unwrap();
        conn.commit().await.unwrap();
        drop(conn);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_pool_close() {
        let (_, pool) = pool_with(PoolConfig::default());
        pool.initialize().await.unwrap();

        let held = pool.acquire().await.unwrap();
        pool.close().await;
        assert!(pool.is_closed());

        let result = pool.acquire().await;
        assert!(matches!(result, Err(ClientError::PoolClosed)));

        drop(held);
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_pool_initialization_failure_is_retried() {
        let (backend, pool) = pool_with(PoolConfig::new().min_connections(2));
        backend.refuse.store(true, Ordering::SeqCst);

        let result = pool.acquire().await;
        assert!(matches!(result, Err(ClientError::Initialization(_))));
        assert_eq!(pool.size(), 0);

        backend.refuse.store(false, Ordering::SeqCst);
        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.size(), 2);
        drop(conn);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_never_exceeds_max() {
        let config = PoolConfig::new()
            .min_connections(1)
            .max_connections(3)
            .increment(2)
            .acquire_timeout(Duration::from_secs(5));
        let (backend, pool) = pool_with(config);
        let pool = Arc::new(pool);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let conn = pool.acquire().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(pool.size() <= 3);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                drop(conn);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(backend.connects.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.stats().acquisitions, 16);
    }
}
