//! a pooled backend connection: reservation state, transaction primitives
//! and the scoped [`Reservation`] guard.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use std::{
    sync::{Arc, Weak},
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{error, trace};

use super::{
    error::{Error, StateError},
    pool::ConnectionPool,
    protocol::{Connector, Driver, QueryResult, ResultStatus},
    session::SessionShared,
};

// reservation states; transitions inside one acquisition are monotonic 2→1→0
const FREE: u8 = 0;
const LOCKED: u8 = 1;
const RESERVED: u8 = 2;

/// connections untouched for this long while free and outside a transaction
/// are reaped on the next pool acquisition.
const DEAD_AFTER: Duration = Duration::from_secs(15);

const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

pub struct Connection {
    id: Box<str>,
    conninfo: Box<str>,
    res: AtomicU8,
    in_transaction: AtomicBool,
    last_touch: Mutex<Instant>,
    owner: Mutex<Weak<SessionShared>>,
    driver: Mutex<Option<Box<dyn Driver>>>,
    connector: Arc<dyn Connector>,
}

impl Connection {
    pub(crate) fn new(conninfo: &str, connector: Arc<dyn Connector>) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string().into_boxed_str(),
            conninfo: Box::from(conninfo),
            res: AtomicU8::new(FREE),
            in_transaction: AtomicBool::new(false),
            last_touch: Mutex::new(Instant::now()),
            owner: Mutex::new(Weak::new()),
            driver: Mutex::new(None),
            connector,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn touch(&self) {
        *self.last_touch.lock() = Instant::now();
    }

    /// establish the backend session if there is none, replacing a dead one.
    pub(crate) fn open(&self) -> Result<(), Error> {
        self.touch();
        let mut driver = self.driver.lock();
        if let Some(drv) = driver.as_mut() {
            if drv.is_healthy() {
                return Ok(());
            }
            drv.close();
            *driver = None;
            self.in_transaction.store(false, Ordering::SeqCst);
        }
        *driver = Some(self.connector.connect(&self.conninfo, DEFAULT_OPEN_TIMEOUT)?);
        Ok(())
    }

    pub(crate) fn close(&self) {
        self.touch();
        if let Some(mut drv) = self.driver.lock().take() {
            drv.close();
        }
        self.in_transaction.store(false, Ordering::SeqCst);
    }

    /// run a closure against the open wire driver.
    pub(crate) fn with_driver<R>(&self, f: impl FnOnce(&mut dyn Driver) -> Result<R, Error>) -> Result<R, Error> {
        let mut driver = self.driver.lock();
        let drv = driver.as_mut().ok_or(crate::error::ConnectionError::Closed)?;
        f(drv.as_mut())
    }

    /// a server parameter captured at startup, e.g. `lc_monetary`.
    pub(crate) fn server_parameter(&self, name: &str) -> Option<String> {
        self.driver.lock().as_ref().and_then(|drv| drv.parameter(name))
    }

    pub(crate) fn try_lock(&self) -> bool {
        let locked = self
            .res
            .compare_exchange(FREE, LOCKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if locked {
            self.touch();
            trace!(conn = %self.id, "connection lock acquired");
        }
        locked
    }

    pub(crate) fn reserve(&self) {
        self.res.store(RESERVED, Ordering::Release);
        self.touch();
    }

    pub(crate) fn start_work(&self) -> Result<(), Error> {
        let mut state = self.res.load(Ordering::Acquire);
        loop {
            if state == LOCKED {
                return Err(StateError::AlreadyLocked.into());
            }
            match self
                .res
                .compare_exchange(state, LOCKED, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => state = actual,
            }
        }
        self.touch();
        Ok(())
    }

    pub(crate) fn stop_work(&self) {
        self.res.store(FREE, Ordering::Release);
        self.touch();
    }

    pub(crate) fn reservation(&self) -> u8 {
        self.res.load(Ordering::Acquire)
    }

    pub(crate) fn running(&self) -> bool {
        self.reservation() != FREE
    }

    pub(crate) fn can_be_stolen(&self) -> bool {
        !self.in_transaction() && self.reservation() == FREE
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    pub(crate) fn is_dead(&self) -> bool {
        if self.in_transaction() || self.reservation() != FREE {
            return false;
        }
        self.last_touch.lock().elapsed() > DEAD_AFTER
    }

    pub(crate) fn owner(&self) -> Option<Arc<SessionShared>> {
        self.owner.lock().upgrade()
    }

    pub(crate) fn set_owner(&self, owner: &Arc<SessionShared>) {
        *self.owner.lock() = Arc::downgrade(owner);
    }

    pub(crate) fn clear_owner(&self) {
        *self.owner.lock() = Weak::new();
    }

    pub(crate) fn is_owned_by(&self, session: &Arc<SessionShared>) -> bool {
        self.owner
            .lock()
            .upgrade()
            .is_some_and(|owner| Arc::ptr_eq(&owner, session))
    }

    pub(crate) fn begin_transaction(&self) -> Result<(), Error> {
        if self.in_transaction() {
            return Err(StateError::AlreadyInTransaction.into());
        }
        self.open()?;
        self.exec_inline("BEGIN")?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn commit_transaction(&self) -> Result<(), Error> {
        self.touch();
        if !self.in_transaction() {
            return Err(StateError::NotInTransaction.into());
        }
        self.exec_inline("COMMIT")?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn rollback_transaction(&self) -> Result<(), Error> {
        self.touch();
        if !self.in_transaction() {
            return Err(StateError::NotInTransaction.into());
        }
        self.exec_inline("ROLLBACK")?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// `name` must already be identifier-escaped.
    pub(crate) fn set_savepoint(&self, name: &str) -> Result<(), Error> {
        self.savepoint_command("SAVEPOINT ", name)
    }

    pub(crate) fn release_savepoint(&self, name: &str) -> Result<(), Error> {
        self.savepoint_command("RELEASE SAVEPOINT ", name)
    }

    pub(crate) fn rollback_savepoint(&self, name: &str) -> Result<(), Error> {
        self.savepoint_command("ROLLBACK TO SAVEPOINT ", name)
    }

    fn savepoint_command(&self, prefix: &str, name: &str) -> Result<(), Error> {
        self.touch();
        if !self.in_transaction() {
            return Err(StateError::NotInTransaction.into());
        }
        let mut sql = String::with_capacity(prefix.len() + name.len());
        sql.push_str(prefix);
        sql.push_str(name);
        self.exec_inline(&sql)
    }

    /// run one simple-protocol statement to completion on the calling
    /// thread, polling the non-blocking socket.
    pub(crate) fn exec_inline(&self, sql: &str) -> Result<(), Error> {
        self.with_driver(|drv| drv.send_simple(sql))?;
        let mut last = None;
        loop {
            let busy = self.with_driver(|drv| {
                drv.poll_flush()?;
                drv.consume_input()?;
                if drv.is_busy() {
                    return Ok(true);
                }
                while let Some(res) = drv.take_result()? {
                    last = Some(res);
                }
                Ok(false)
            })?;
            if !busy {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        match last {
            Some(res) => check_result_status(res).map(drop),
            None => Ok(()),
        }
    }
}

/// map a fatal result to its server error, pass everything else through.
pub(crate) fn check_result_status(res: QueryResult) -> Result<QueryResult, Error> {
    match res.status() {
        ResultStatus::Fatal => Err(res
            .into_error()
            .map(Error::from)
            .unwrap_or_else(Error::unexpected)),
        _ => Ok(res),
    }
}

struct ReservationInner {
    conn: Arc<Connection>,
}

impl Drop for ReservationInner {
    fn drop(&mut self) {
        // a transaction still open here leaked: roll it back before the
        // connection goes back to the pool.
        if self.conn.in_transaction() {
            if let Err(e) = self.conn.rollback_transaction() {
                error!(conn = %self.conn.id(), "failed to roll back leaked transaction: {e}");
                self.conn.close();
            }
        }
        self.conn.stop_work();
        trace!(conn = %self.conn.id(), "connection lock released");
        ConnectionPool::notify_all();
    }
}

/// a scoped right to use a [`Connection`]. cloning shares the scope; when
/// the last clone drops the connection returns to the pool in the free
/// state and any leaked transaction is rolled back.
#[derive(Clone)]
pub struct Reservation {
    inner: Arc<ReservationInner>,
}

impl Reservation {
    /// wrap a connection the pool has already locked (reservation 1) or
    /// reserved (reservation 2); either way it ends up locked.
    pub(crate) fn adopt(conn: Arc<Connection>) -> Result<Self, Error> {
        if conn.reservation() == RESERVED {
            conn.start_work()?;
        }
        Ok(Self {
            inner: Arc::new(ReservationInner { conn }),
        })
    }

    pub(crate) fn connection(&self) -> &Arc<Connection> {
        &self.inner.conn
    }
}

impl core::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reservation")
            .field("conn", &self.inner.conn.id())
            .finish()
    }
}
