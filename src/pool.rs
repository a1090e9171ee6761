//! the process-wide connection pool.
//!
//! one pool instance serves every session in the process; it maps conninfo
//! strings to ordered sequences of connections, bounded per conninfo.
//! acquisition reuses, creates, and finally steals: a saturated pool scans
//! idle owners in id rotation so no single owner is starved.

use core::time::Duration;

use std::{collections::HashMap, sync::Arc, time::Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::{
    connection::{Connection, Reservation},
    error::{Error, PoolError},
    protocol::{Connector, WireConnector},
    session::SessionShared,
};

/// default per-conninfo connection cap.
pub const DEFAULT_MAX_CONNECTIONS: usize = 20;

// connections beyond this index are scanned for reaping on acquisition
const REAP_WATERMARK: usize = 4;

const STEAL_SCAN_PAUSE: Duration = Duration::from_millis(10);

/// configuration for [`ConnectionPool::init`].
pub struct PoolOptions {
    max_connections: usize,
    connector: Arc<dyn Connector>,
}

impl PoolOptions {
    pub fn new() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connector: Arc::new(WireConnector),
        }
    }

    /// cap the number of connections per conninfo.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// replace the transport factory. tests use this to run against an
    /// in-process driver.
    pub fn connector<C>(mut self, connector: C) -> Self
    where
        C: Connector,
    {
        self.connector = Arc::new(connector);
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new()
    }
}

struct PoolState {
    pools: HashMap<Box<str>, Vec<Arc<Connection>>>,
    last_stolen_id: String,
}

/// the pool singleton. created by [`ConnectionPool::init`], torn down by
/// [`ConnectionPool::destroy`]; after teardown every session operation fails
/// with [`PoolError::NotInitialized`].
pub struct ConnectionPool {
    state: Mutex<PoolState>,
    condvar: Condvar,
    max_connections: usize,
    connector: Arc<dyn Connector>,
}

static INSTANCE: Lazy<Mutex<Option<Arc<ConnectionPool>>>> = Lazy::new(|| Mutex::new(None));

impl ConnectionPool {
    /// initialise the singleton. idempotent: a second call leaves the
    /// existing instance untouched.
    pub fn init(options: PoolOptions) -> Result<(), Error> {
        let mut instance = INSTANCE.lock();
        if instance.is_none() {
            *instance = Some(Arc::new(ConnectionPool {
                state: Mutex::new(PoolState {
                    pools: HashMap::new(),
                    last_stolen_id: String::new(),
                }),
                condvar: Condvar::new(),
                max_connections: options.max_connections,
                connector: options.connector,
            }));
        }
        Ok(())
    }

    /// initialise with defaults.
    pub fn init_default() -> Result<(), Error> {
        Self::init(PoolOptions::new())
    }

    /// tear the singleton down, closing every connection.
    pub fn destroy() {
        let instance = INSTANCE.lock().take();
        if let Some(pool) = instance {
            let mut state = pool.state.lock();
            for (_, conns) in state.pools.drain() {
                for conn in conns {
                    if let Some(owner) = conn.owner() {
                        owner.forget_connection(&conn);
                    }
                    debug!(conn = %conn.id(), "closing connection on pool teardown");
                    conn.close();
                }
            }
        }
    }

    pub(crate) fn instance() -> Result<Arc<ConnectionPool>, Error> {
        INSTANCE.lock().clone().ok_or_else(|| PoolError::NotInitialized.into())
    }

    /// wake acquirers blocked in the stealing phase. called whenever a
    /// reservation is released.
    pub(crate) fn notify_all() {
        if let Some(pool) = INSTANCE.lock().clone() {
            pool.condvar.notify_all();
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// number of connections currently locked by tasks for this conninfo.
    pub fn opened_connection_count(&self, conninfo: &str) -> usize {
        let state = self.state.lock();
        state
            .pools
            .get(conninfo)
            .map(|conns| conns.iter().filter(|c| c.reservation() == 1).count())
            .unwrap_or(0)
    }

    /// acquire a connection for `session`, waiting up to `timeout` in the
    /// stealing phase. `None` waits forever.
    pub(crate) fn acquire(
        &self,
        session: &Arc<SessionShared>,
        conninfo: &str,
        timeout: Option<Duration>,
    ) -> Result<Reservation, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);

        let conn = {
            let mut state = self.state.lock();
            loop {
                if let Some(conn) = self.try_assign(&mut state, session, conninfo) {
                    break conn;
                }

                // saturated; wait for a release or scan again shortly
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    let opened = state
                        .pools
                        .get(conninfo)
                        .map(|conns| conns.iter().filter(|c| c.reservation() == 1).count())
                        .unwrap_or(0);
                    return Err(PoolError::Exhausted { opened }.into());
                }
                self.condvar.wait_for(&mut state, STEAL_SCAN_PAUSE);
            }
        };

        // the backend session is established outside the pool mutex; the
        // connection is already ours, nobody else can touch it.
        let reservation = Reservation::adopt(conn.clone())?;
        if let Err(e) = conn.open() {
            session.forget_connection(&conn);
            conn.clear_owner();
            return Err(e);
        }
        session.remember_connection(&conn);
        Ok(reservation)
    }

    /// one pass of the acquisition algorithm under the pool mutex.
    fn try_assign(
        &self,
        state: &mut PoolState,
        session: &Arc<SessionShared>,
        conninfo: &str,
    ) -> Option<Arc<Connection>> {
        // the session's cached connection first, when it still owns it
        if let Some(conn) = session.cached_connection() {
            if conn.is_owned_by(session) && conn.try_lock() {
                return Some(conn);
            }
            session.forget_connection(&conn);
        }

        let conns = state.pools.entry(Box::from(conninfo)).or_default();

        // reap dead connections from the tail
        if conns.len() > REAP_WATERMARK {
            for i in (REAP_WATERMARK + 1..conns.len()).rev() {
                if conns[i].is_dead() {
                    let conn = conns.remove(i);
                    if let Some(owner) = conn.owner() {
                        owner.forget_connection(&conn);
                    }
                    debug!(
                        conn = %conn.id(),
                        count = conns.len(),
                        "releasing connection because it's dead"
                    );
                    conn.close();
                }
            }
        }

        // create the first connection
        if conns.is_empty() {
            let conn = Arc::new(Connection::new(conninfo, self.connector.clone()));
            conns.push(conn.clone());
            debug!(conn = %conn.id(), count = conns.len(), "connection created");
            if conn.try_lock() {
                conn.set_owner(session);
                return Some(conn);
            }
        }

        // reuse a free connection
        for conn in conns.iter() {
            if conn.try_lock() {
                // taking a free connection away from an idle owner
                if let Some(owner) = conn.owner() {
                    if !Arc::ptr_eq(&owner, session) {
                        owner.forget_connection(conn);
                    }
                }
                conn.set_owner(session);
                return Some(conn.clone());
            }
        }

        // room for one more
        if conns.len() < self.max_connections {
            let conn = Arc::new(Connection::new(conninfo, self.connector.clone()));
            conns.push(conn.clone());
            debug!(conn = %conn.id(), count = conns.len(), "connection created");
            if conn.try_lock() {
                conn.set_owner(session);
                return Some(conn);
            }
        }

        // stealing phase: rotate past the last stolen id so every owner is
        // eventually considered
        let last_stolen = state.last_stolen_id.clone();
        let rotation = conns
            .iter()
            .filter(|c| c.id() > last_stolen.as_str())
            .chain(conns.iter().filter(|c| c.id() <= last_stolen.as_str()));

        for conn in rotation {
            if conn.can_be_stolen() {
                if let Some(victim) = conn.owner() {
                    victim.forget_connection(conn);
                }
                conn.set_owner(session);
                conn.reserve();
                state.last_stolen_id = conn.id().to_string();
                debug!(conn = %conn.id(), count = conns.len(), "connection was stolen");
                return Some(conn.clone());
            }
        }

        None
    }
}
