//! the client-visible database handle.
//!
//! a session owns one strand and leases connections from the process pool.
//! every query family comes in a synchronous flavour returning the value and
//! an asynchronous flavour taking a completion callback; callbacks run on
//! the session's strand, so completions are serialised per session and
//! delivered in enqueue order.

use core::time::Duration;

use std::{
    sync::Arc,
    thread,
    time::Instant,
};

use parking_lot::Mutex;

use super::{
    connection::{check_result_status, Connection, Reservation},
    error::{Error, StateError},
    large_object::LargeObject,
    pool::ConnectionPool,
    protocol::{QueryResult, ResultStatus},
    queue::{EventQueue, Strand},
    reader::Reader,
    row::Row,
    split::split_queries,
    statement::PreparedStatement,
    table::Table,
    task::ConnectionTask,
    types::{Format, FromSqlOwned, MoneyLocale, Parameters, Type},
};

/// default time limit for acquiring a connection.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct SessionShared {
    conninfo: Box<str>,
    strand: Strand,
    conn: Mutex<Option<Arc<Connection>>>,
    lock: Mutex<Option<Reservation>>,
}

impl SessionShared {
    pub(crate) fn conninfo(&self) -> &str {
        &self.conninfo
    }

    pub(crate) fn strand(&self) -> &Strand {
        &self.strand
    }

    pub(crate) fn cached_connection(&self) -> Option<Arc<Connection>> {
        self.conn.lock().clone()
    }

    pub(crate) fn remember_connection(&self, conn: &Arc<Connection>) {
        *self.conn.lock() = Some(conn.clone());
    }

    /// clear the back-reference, but only while it still points at `conn`.
    pub(crate) fn forget_connection(&self, conn: &Arc<Connection>) {
        let mut cached = self.conn.lock();
        if cached.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
            *cached = None;
        }
    }

    pub(crate) fn txn_lock(&self) -> Option<Reservation> {
        self.lock.lock().clone()
    }

    fn working(&self) -> bool {
        self.cached_connection().is_some_and(|conn| conn.running())
    }

    fn in_transaction(&self) -> bool {
        self.cached_connection().is_some_and(|conn| conn.in_transaction())
    }

    /// the synchronous-mode bridge: run this session's own queued tasks,
    /// one at a time with short sleeps, until the strand is empty or the
    /// session goes idle.
    fn wait_for_sync(&self) {
        while self.working() && !self.strand.is_empty() {
            self.strand.run_one();
            thread::sleep(Duration::from_micros(10));
        }
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        self.lock.get_mut().take();
        if let Some(conn) = self.conn.get_mut().take() {
            conn.clear_owner();
            ConnectionPool::notify_all();
        }
    }
}

/// a database session handle.
///
/// # Examples
/// ```no_run
/// use strand_postgres::{pool::ConnectionPool, types::Parameters, Session};
///
/// # fn main() -> Result<(), strand_postgres::Error> {
/// ConnectionPool::init_default()?;
///
/// let session = Session::open("host=localhost user=postgres dbname=postgres");
/// let count: i64 = session.query_value("select count(*) from pg_class", Parameters::new())?;
/// assert!(count > 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// open a session with a fresh strand on the default event queue.
    pub fn open(conninfo: &str) -> Session {
        Self::open_on(EventQueue::default_queue().new_strand(), conninfo)
    }

    /// open a session reusing an existing strand.
    pub fn open_on(strand: Strand, conninfo: &str) -> Session {
        Session {
            shared: Arc::new(SessionShared {
                conninfo: Box::from(conninfo),
                strand,
                conn: Mutex::new(None),
                lock: Mutex::new(None),
            }),
        }
    }

    pub fn conninfo(&self) -> &str {
        self.shared.conninfo()
    }

    pub fn strand(&self) -> &Strand {
        self.shared.strand()
    }

    /// true while a task of this session holds its connection.
    pub fn working(&self) -> bool {
        self.shared.working()
    }

    pub fn in_transaction(&self) -> bool {
        self.shared.in_transaction()
    }

    /// release the underlying connection back to the pool. always
    /// synchronous; a leaked transaction is rolled back by the dropped
    /// reservation.
    pub fn close(&self) {
        self.shared.lock.lock().take();
        if let Some(conn) = self.shared.conn.lock().take() {
            conn.clear_owner();
        }
        ConnectionPool::notify_all();
    }

    /// synchronously acquire and open a connection, waiting up to `timeout`
    /// (`None` waits forever).
    pub fn open_connection(&self, timeout: Option<Duration>) -> Result<Reservation, Error> {
        self.shared.wait_for_sync();
        acquire_connection(&self.shared, timeout)
    }

    /// asynchronously acquire a connection. while the pool is exhausted the
    /// connect task requeues itself so other strands can progress; past
    /// `timeout` it completes with a timeout error.
    pub fn open_connection_async<F>(&self, timeout: Duration, cb: F)
    where
        F: FnOnce(Result<Reservation, Error>) + Send + 'static,
    {
        let task = ConnectionTask::connect(self.shared.clone(), Instant::now() + timeout, Box::new(cb));
        self.shared.strand.push_back(Box::new(task));
    }

    // ------------------------------------------------------------------
    // query families

    /// run a statement and return the number of rows it affected.
    pub fn execute(&self, sql: &str, params: Parameters) -> Result<u64, Error> {
        self.run_query_sync(sql, params, Format::Binary).and_then(process_execute)
    }

    pub fn execute_async<F>(&self, sql: &str, params: Parameters, cb: F)
    where
        F: FnOnce(Result<u64, Error>) + Send + 'static,
    {
        self.enqueue_query(sql, params, move |res| cb(res.and_then(process_execute)));
    }

    /// run a query and materialise the whole result set.
    pub fn query(&self, sql: &str, params: Parameters) -> Result<Table, Error> {
        self.run_query_sync(sql, params, Format::Binary).and_then(process_table)
    }

    pub fn query_async<F>(&self, sql: &str, params: Parameters, cb: F)
    where
        F: FnOnce(Result<Table, Error>) + Send + 'static,
    {
        self.enqueue_query(sql, params, move |res| cb(res.and_then(process_table)));
    }

    /// run a query and return its first row, if any.
    pub fn query_single(&self, sql: &str, params: Parameters) -> Result<Option<Row>, Error> {
        self.run_query_sync(sql, params, Format::Binary).and_then(process_single)
    }

    pub fn query_single_async<F>(&self, sql: &str, params: Parameters, cb: F)
    where
        F: FnOnce(Result<Option<Row>, Error>) + Send + 'static,
    {
        self.enqueue_query(sql, params, move |res| cb(res.and_then(process_single)));
    }

    /// run a query and decode the first column of its first row.
    pub fn query_value<T>(&self, sql: &str, params: Parameters) -> Result<T, Error>
    where
        T: FromSqlOwned,
    {
        self.run_query_sync(sql, params, Format::Binary).and_then(process_value)
    }

    pub fn query_value_async<T, F>(&self, sql: &str, params: Parameters, cb: F)
    where
        T: FromSqlOwned,
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.enqueue_query(sql, params, move |res| cb(res.and_then(process_value)));
    }

    /// run a query in single-row mode and return a streaming [`Reader`].
    pub fn query_reader(&self, sql: &str, params: Parameters) -> Result<Reader, Error> {
        self.shared.wait_for_sync();
        let reservation = acquire_connection(&self.shared, Some(DEFAULT_TIMEOUT))?;
        let task = ConnectionTask::query_inline(
            self.shared.clone(),
            sql,
            params,
            Format::Binary,
            Instant::now() + DEFAULT_TIMEOUT,
        )
        .with_reservation(reservation)
        .single_row();
        Ok(Reader::new(task, self.shared.strand.clone()))
    }

    /// asynchronous reader open: the callback receives the reader once a
    /// connection is acquired; rows are then pulled with
    /// [`Reader::next_async`].
    pub fn query_reader_async<F>(&self, sql: &str, params: Parameters, cb: F)
    where
        F: FnOnce(Result<Reader, Error>) + Send + 'static,
    {
        let shared = self.shared.clone();
        let sql = sql.to_string();
        let strand = self.shared.strand.clone();
        self.open_connection_async(DEFAULT_TIMEOUT, move |res| match res {
            Ok(reservation) => {
                let task = ConnectionTask::query_inline(
                    shared.clone(),
                    &sql,
                    params,
                    Format::Binary,
                    Instant::now() + DEFAULT_TIMEOUT,
                )
                .with_reservation(reservation)
                .single_row();
                cb(Ok(Reader::new(task, strand)));
            }
            Err(e) => cb(Err(e)),
        });
    }

    // ------------------------------------------------------------------
    // transactions and savepoints

    /// synchronously start a transaction, pinning the connection for its
    /// whole lifetime.
    pub fn begin(&self) -> Result<(), Error> {
        self.shared.wait_for_sync();
        begin_on(&self.shared)
    }

    pub fn begin_async<F>(&self, cb: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let shared = self.shared.clone();
        self.shared.strand.spawn(move || cb(begin_on(&shared)));
    }

    /// synchronously commit the current transaction.
    pub fn commit(&self) -> Result<(), Error> {
        self.shared.wait_for_sync();
        commit_on(&self.shared)
    }

    pub fn commit_async<F>(&self, cb: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let shared = self.shared.clone();
        self.shared.strand.spawn(move || cb(commit_on(&shared)));
    }

    /// synchronously roll the current transaction back.
    pub fn rollback(&self) -> Result<(), Error> {
        self.shared.wait_for_sync();
        rollback_on(&self.shared)
    }

    pub fn rollback_async<F>(&self, cb: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let shared = self.shared.clone();
        self.shared.strand.spawn(move || cb(rollback_on(&shared)));
    }

    /// set a savepoint inside the current transaction. the name is
    /// identifier-escaped here at the boundary.
    pub fn set_savepoint(&self, name: &str) -> Result<(), Error> {
        self.savepoint_op(name, Connection::set_savepoint)
    }

    pub fn set_savepoint_async<F>(&self, name: &str, cb: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        self.savepoint_op_async(name, Connection::set_savepoint, cb)
    }

    pub fn release_savepoint(&self, name: &str) -> Result<(), Error> {
        self.savepoint_op(name, Connection::release_savepoint)
    }

    pub fn release_savepoint_async<F>(&self, name: &str, cb: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        self.savepoint_op_async(name, Connection::release_savepoint, cb)
    }

    pub fn rollback_savepoint(&self, name: &str) -> Result<(), Error> {
        self.savepoint_op(name, Connection::rollback_savepoint)
    }

    pub fn rollback_savepoint_async<F>(&self, name: &str, cb: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        self.savepoint_op_async(name, Connection::rollback_savepoint, cb)
    }

    fn savepoint_op(&self, name: &str, op: fn(&Connection, &str) -> Result<(), Error>) -> Result<(), Error> {
        self.shared.wait_for_sync();
        savepoint_on(&self.shared, name, op)
    }

    fn savepoint_op_async<F>(&self, name: &str, op: fn(&Connection, &str) -> Result<(), Error>, cb: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let shared = self.shared.clone();
        let name = name.to_string();
        self.shared.strand.spawn(move || cb(savepoint_on(&shared, &name, op)));
    }

    // ------------------------------------------------------------------
    // scripts

    /// split `sql` into statements and run them one by one inside a
    /// transaction, opening one locally when none is active. empty and
    /// non-fatal statuses do not abort the batch.
    pub fn exec_queries(&self, sql: &str) -> Result<(), Error> {
        self.shared.wait_for_sync();
        exec_queries_on(&self.shared, sql)
    }

    /// asynchronous flavour of [`Session::exec_queries`]: the statement
    /// list runs as one strand task with the same semantics.
    pub fn exec_queries_async<F>(&self, sql: &str, cb: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let shared = self.shared.clone();
        let sql = sql.to_string();
        self.shared.strand.spawn(move || cb(exec_queries_on(&shared, &sql)));
    }

    // ------------------------------------------------------------------
    // prepared statements

    /// create (or look up) a named prepared statement. when a statement of
    /// that name already exists server-side the call simply hands back a
    /// handle to it.
    pub fn prepare(&self, name: &str, sql: &str, auto_deallocate: bool, types: &[Type]) -> Result<PreparedStatement, Error> {
        self.shared.wait_for_sync();

        let mut params = Parameters::new();
        params.push(&name)?;
        let exists: bool = self.query_value(
            "select exists(select 1 from pg_prepared_statements where name = $1)",
            params,
        )?;
        if exists {
            return Ok(PreparedStatement::new(self.clone(), name, auto_deallocate));
        }

        let reservation = acquire_connection(&self.shared, Some(DEFAULT_TIMEOUT))?;
        let mut task = ConnectionTask::prepare_inline(
            self.shared.clone(),
            name,
            sql,
            types.to_vec(),
            Instant::now() + DEFAULT_TIMEOUT,
        )
        .with_reservation(reservation);
        let result = task.run_to_completion()?;
        finish_result(result)?;
        Ok(PreparedStatement::new(self.clone(), name, auto_deallocate))
    }

    pub fn prepare_async<F>(&self, name: &str, sql: &str, auto_deallocate: bool, types: &[Type], cb: F)
    where
        F: FnOnce(Result<PreparedStatement, Error>) + Send + 'static,
    {
        let session = self.clone();
        let name_owned = name.to_string();
        let task = ConnectionTask::prepare(
            self.shared.clone(),
            name,
            sql,
            types.to_vec(),
            Instant::now() + DEFAULT_TIMEOUT,
            Box::new(move |res| {
                cb(res
                    .and_then(finish_result)
                    .map(|()| PreparedStatement::new(session, &name_owned, auto_deallocate)))
            }),
        );
        self.shared.strand.push_back(Box::new(task));
    }

    /// synchronously delete a prepared statement by name.
    pub fn deallocate_prepared(&self, name: &str) -> Result<(), Error> {
        let name = escape_identifier(name)?;
        self.execute(&format!("DEALLOCATE PREPARE {name}"), Parameters::new())
            .map(drop)
    }

    pub fn deallocate_prepared_async<F>(&self, name: &str, cb: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let name = match escape_identifier(name) {
            Ok(name) => name,
            Err(e) => {
                self.shared.strand.spawn(move || cb(Err(e)));
                return;
            }
        };
        self.execute_async(&format!("DEALLOCATE PREPARE {name}"), Parameters::new(), move |res| {
            cb(res.map(drop))
        });
    }

    // ------------------------------------------------------------------
    // large objects

    /// create a new server-side large object and return its handle.
    pub fn create_lo(&self) -> Result<LargeObject, Error> {
        let mut params = Parameters::new();
        params.push(&-1_i32)?;
        let oid: u32 = self.query_value("select lo_creat($1)", params)?;
        Ok(self.get_lo(oid))
    }

    /// handle for an existing large object oid.
    pub fn get_lo(&self, oid: u32) -> LargeObject {
        LargeObject::new(self.clone(), oid)
    }

    /// formatting rules derived from the server's `lc_monetary` setting,
    /// falling back to the C locale when the server has not reported one.
    pub fn money_locale(&self) -> MoneyLocale {
        self.shared
            .cached_connection()
            .and_then(|conn| conn.server_parameter("lc_monetary"))
            .map(|name| MoneyLocale::from_lc_monetary(&name))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------

    fn run_query_sync(&self, sql: &str, params: Parameters, format: Format) -> Result<QueryResult, Error> {
        self.shared.wait_for_sync();
        let reservation = acquire_connection(&self.shared, Some(DEFAULT_TIMEOUT))?;
        let mut task = ConnectionTask::query_inline(
            self.shared.clone(),
            sql,
            params,
            format,
            Instant::now() + DEFAULT_TIMEOUT,
        )
        .with_reservation(reservation);
        let result = task.run_to_completion()?;
        result.ok_or_else(Error::unexpected)
    }

    fn enqueue_query<F>(&self, sql: &str, params: Parameters, cb: F)
    where
        F: FnOnce(Result<QueryResult, Error>) + Send + 'static,
    {
        let task = ConnectionTask::query(
            self.shared.clone(),
            sql,
            params,
            Format::Binary,
            Instant::now() + DEFAULT_TIMEOUT,
            Box::new(move |res| cb(res.and_then(|r| r.ok_or_else(Error::unexpected)))),
        );
        self.shared.strand.push_back(Box::new(task));
    }

    pub(crate) fn run_prepared_sync(&self, name: &str, params: Parameters, format: Format) -> Result<QueryResult, Error> {
        self.shared.wait_for_sync();
        let reservation = acquire_connection(&self.shared, Some(DEFAULT_TIMEOUT))?;
        let mut task = ConnectionTask::query_prepared_inline(
            self.shared.clone(),
            name,
            params,
            format,
            Instant::now() + DEFAULT_TIMEOUT,
        )
        .with_reservation(reservation);
        let result = task.run_to_completion()?;
        result.ok_or_else(Error::unexpected)
    }

    pub(crate) fn enqueue_prepared<F>(&self, name: &str, params: Parameters, cb: F)
    where
        F: FnOnce(Result<QueryResult, Error>) + Send + 'static,
    {
        let task = ConnectionTask::query_prepared(
            self.shared.clone(),
            name,
            params,
            Format::Binary,
            Instant::now() + DEFAULT_TIMEOUT,
            Box::new(move |res| cb(res.and_then(|r| r.ok_or_else(Error::unexpected)))),
        );
        self.shared.strand.push_back(Box::new(task));
    }

    pub(crate) fn open_reader_prepared(&self, name: &str, params: Parameters) -> Result<Reader, Error> {
        self.shared.wait_for_sync();
        let reservation = acquire_connection(&self.shared, Some(DEFAULT_TIMEOUT))?;
        let task = ConnectionTask::query_prepared_inline(
            self.shared.clone(),
            name,
            params,
            Format::Binary,
            Instant::now() + DEFAULT_TIMEOUT,
        )
        .with_reservation(reservation)
        .single_row();
        Ok(Reader::new(task, self.shared.strand.clone()))
    }
}

/// synchronously acquire (or reuse) a connection for a session.
fn acquire_connection(shared: &Arc<SessionShared>, timeout: Option<Duration>) -> Result<Reservation, Error> {
    if let Some(lock) = shared.txn_lock() {
        return Ok(lock);
    }
    ConnectionPool::instance()?.acquire(shared, shared.conninfo(), timeout)
}

fn begin_on(shared: &Arc<SessionShared>) -> Result<(), Error> {
    if shared.in_transaction() {
        return Err(StateError::AlreadyInTransaction.into());
    }
    let lock = acquire_connection(shared, Some(DEFAULT_TIMEOUT))?;
    lock.connection().begin_transaction()?;
    *shared.lock.lock() = Some(lock);
    Ok(())
}

fn commit_on(shared: &Arc<SessionShared>) -> Result<(), Error> {
    let lock = shared.lock.lock().take().ok_or(StateError::NotInTransaction)?;
    lock.connection().commit_transaction()
}

fn rollback_on(shared: &Arc<SessionShared>) -> Result<(), Error> {
    let lock = shared.lock.lock().take().ok_or(StateError::NotInTransaction)?;
    lock.connection().rollback_transaction()
}

fn savepoint_on(
    shared: &Arc<SessionShared>,
    name: &str,
    op: fn(&Connection, &str) -> Result<(), Error>,
) -> Result<(), Error> {
    let lock = shared.txn_lock().ok_or(StateError::NotInTransaction)?;
    let name = escape_identifier(name)?;
    op(lock.connection(), &name)
}

fn exec_queries_on(shared: &Arc<SessionShared>, sql: &str) -> Result<(), Error> {
    let local_txn = !shared.in_transaction();
    if local_txn {
        begin_on(shared)?;
    }

    let run = || -> Result<(), Error> {
        let lock = acquire_connection(shared, Some(DEFAULT_TIMEOUT))?;
        for query in split_queries(sql) {
            lock.connection().exec_inline(&query)?;
        }
        Ok(())
    };

    match run() {
        Ok(()) => {
            if local_txn {
                commit_on(shared)?;
            }
            Ok(())
        }
        Err(e) => {
            if local_txn {
                let _ = rollback_on(shared);
            }
            Err(e)
        }
    }
}

/// double-quote an identifier, doubling embedded quotes. an embedded NUL
/// cannot be represented and is rejected.
pub(crate) fn escape_identifier(name: &str) -> Result<String, Error> {
    if name.contains('\0') {
        return Err(StateError::InvalidIdentifier.into());
    }
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for c in name.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    Ok(out)
}

pub(crate) fn process_execute(res: QueryResult) -> Result<u64, Error> {
    let res = check_result_status(res)?;
    match res.status() {
        ResultStatus::EmptyQuery => Ok(0),
        _ => Ok(res.rows_affected()),
    }
}

pub(crate) fn process_table(res: QueryResult) -> Result<Table, Error> {
    let res = check_result_status(res)?;
    let columns = res.columns_arc();
    Ok(Table::new(columns, res.into_rows()))
}

pub(crate) fn process_single(res: QueryResult) -> Result<Option<Row>, Error> {
    let res = check_result_status(res)?;
    Ok(res.into_rows().into_iter().next())
}

pub(crate) fn process_value<T>(res: QueryResult) -> Result<T, Error>
where
    T: FromSqlOwned,
{
    let res = check_result_status(res)?;
    let row = res.into_rows().into_iter().next().ok_or(StateError::NoRows)?;
    row.try_get(0)
}

fn finish_result(res: Option<QueryResult>) -> Result<(), Error> {
    match res {
        Some(res) => check_result_status(res).map(drop),
        None => Ok(()),
    }
}
