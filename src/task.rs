//! the connection task: one enqueued unit of work driving a single command
//! through the wire protocol without ever blocking on the socket.

use core::time::Duration;

use std::{
    sync::Arc,
    thread,
    time::Instant,
};

use super::{
    connection::Reservation,
    error::{Error, StateError, TimedOut},
    pool::ConnectionPool,
    protocol::QueryResult,
    queue::{Outcome, Task},
    session::SessionShared,
    types::{Format, Parameters, Type},
};

/// pool wait per acquisition attempt; exhaustion requeues the task instead
/// of surfacing, so other strands can make progress.
const ACQUIRE_SLICE: Duration = Duration::from_millis(1);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    None,
    Connect,
    Query,
    Prepare,
    QueryPrepared,
    Cancel,
    Sent,
}

/// what a single non-blocking step of the state machine produced.
pub(crate) enum TaskStep {
    /// waiting on the socket or the pool.
    Pending,
    /// one result drained off the wire.
    Result(QueryResult),
    /// the command is fully drained.
    Done,
}

pub(crate) enum TaskCallback {
    /// completion with the final (or only) result.
    Result(Box<dyn FnOnce(Result<Option<QueryResult>, Error>) + Send>),
    /// completion of a connect command with the acquired reservation.
    Lock(Box<dyn FnOnce(Result<Reservation, Error>) + Send>),
}

pub(crate) struct ConnectionTask {
    session: Arc<SessionShared>,
    command: Command,
    name: String,
    sql: String,
    params: Parameters,
    types: Vec<Type>,
    format: Format,
    single_row: bool,
    deadline: Instant,
    completed: bool,
    reservation: Option<Reservation>,
    last: Option<QueryResult>,
    callback: Option<TaskCallback>,
}

impl ConnectionTask {
    fn new(session: Arc<SessionShared>, deadline: Instant) -> Self {
        Self {
            session,
            command: Command::None,
            name: String::new(),
            sql: String::new(),
            params: Parameters::new(),
            types: Vec::new(),
            format: Format::Binary,
            single_row: false,
            deadline,
            completed: false,
            reservation: None,
            last: None,
            callback: None,
        }
    }

    pub(crate) fn connect(
        session: Arc<SessionShared>,
        deadline: Instant,
        cb: Box<dyn FnOnce(Result<Reservation, Error>) + Send>,
    ) -> Self {
        let mut task = Self::new(session, deadline);
        task.command = Command::Connect;
        task.callback = Some(TaskCallback::Lock(cb));
        task
    }

    pub(crate) fn query(
        session: Arc<SessionShared>,
        sql: &str,
        params: Parameters,
        format: Format,
        deadline: Instant,
        cb: Box<dyn FnOnce(Result<Option<QueryResult>, Error>) + Send>,
    ) -> Self {
        let mut task = Self::new(session, deadline);
        task.command = Command::Query;
        task.sql = sql.to_string();
        task.params = params;
        task.format = format;
        task.callback = Some(TaskCallback::Result(cb));
        task
    }

    pub(crate) fn prepare(
        session: Arc<SessionShared>,
        name: &str,
        sql: &str,
        types: Vec<Type>,
        deadline: Instant,
        cb: Box<dyn FnOnce(Result<Option<QueryResult>, Error>) + Send>,
    ) -> Self {
        let mut task = Self::new(session, deadline);
        task.command = Command::Prepare;
        task.name = name.to_string();
        task.sql = sql.to_string();
        task.types = types;
        task.callback = Some(TaskCallback::Result(cb));
        task
    }

    pub(crate) fn query_prepared(
        session: Arc<SessionShared>,
        name: &str,
        params: Parameters,
        format: Format,
        deadline: Instant,
        cb: Box<dyn FnOnce(Result<Option<QueryResult>, Error>) + Send>,
    ) -> Self {
        let mut task = Self::new(session, deadline);
        task.command = Command::QueryPrepared;
        task.name = name.to_string();
        task.params = params;
        task.format = format;
        task.callback = Some(TaskCallback::Result(cb));
        task
    }

    /// a task created for inline driving: the reservation is supplied up
    /// front and results are pulled with [`ConnectionTask::step`].
    pub(crate) fn with_reservation(mut self, reservation: Reservation) -> Self {
        self.reservation = Some(reservation);
        self
    }

    /// build a synchronous (callback-less) query task.
    pub(crate) fn query_inline(
        session: Arc<SessionShared>,
        sql: &str,
        params: Parameters,
        format: Format,
        deadline: Instant,
    ) -> Self {
        let mut task = Self::new(session, deadline);
        task.command = Command::Query;
        task.sql = sql.to_string();
        task.params = params;
        task.format = format;
        task
    }

    pub(crate) fn prepare_inline(
        session: Arc<SessionShared>,
        name: &str,
        sql: &str,
        types: Vec<Type>,
        deadline: Instant,
    ) -> Self {
        let mut task = Self::new(session, deadline);
        task.command = Command::Prepare;
        task.name = name.to_string();
        task.sql = sql.to_string();
        task.types = types;
        task
    }

    pub(crate) fn query_prepared_inline(
        session: Arc<SessionShared>,
        name: &str,
        params: Parameters,
        format: Format,
        deadline: Instant,
    ) -> Self {
        let mut task = Self::new(session, deadline);
        task.command = Command::QueryPrepared;
        task.name = name.to_string();
        task.params = params;
        task.format = format;
        task
    }

    /// put the command into single-row mode before it is sent.
    pub(crate) fn single_row(mut self) -> Self {
        self.single_row = true;
        self
    }

    pub(crate) fn completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn is_sent(&self) -> bool {
        matches!(self.command, Command::Sent)
    }

    /// redirect an in-flight command to an out-of-band cancel.
    pub(crate) fn cancel(&mut self) -> Result<(), Error> {
        if self.command != Command::Sent || self.completed {
            return Err(StateError::NoCommandInProgress.into());
        }
        self.command = Command::Cancel;
        Ok(())
    }

    /// acquire a connection when none is held yet. `Ok(false)` means the
    /// pool is momentarily exhausted and the task should be retried.
    fn ensure_reservation(&mut self) -> Result<bool, Error> {
        if self.reservation.is_some() {
            return Ok(true);
        }

        // an open transaction pins its reservation for every operation
        if let Some(lock) = self.session.txn_lock() {
            self.reservation = Some(lock);
            return Ok(true);
        }

        if Instant::now() >= self.deadline {
            return Err(TimedOut.into());
        }

        match ConnectionPool::instance()?.acquire(&self.session, self.session.conninfo(), Some(ACQUIRE_SLICE)) {
            Ok(reservation) => {
                self.reservation = Some(reservation);
                Ok(true)
            }
            Err(e) if e.is_pool_exhausted() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn send(&mut self) -> Result<(), Error> {
        let conn = self
            .reservation
            .as_ref()
            .expect("send requires an acquired reservation")
            .connection()
            .clone();
        conn.touch();
        let command = self.command;
        let single_row = self.single_row;
        conn.with_driver(|drv| {
            match command {
                Command::Query => drv.send_query(&self.sql, &self.params, self.format)?,
                Command::Prepare => drv.send_prepare(&self.name, &self.sql, &self.types)?,
                Command::QueryPrepared => drv.send_query_prepared(&self.name, &self.params, self.format)?,
                _ => unreachable!("send called outside a send command"),
            }
            if single_row {
                drv.set_single_row_mode();
            }
            Ok(())
        })?;
        self.command = Command::Sent;
        Ok(())
    }

    /// one non-blocking turn of the state machine.
    pub(crate) fn step(&mut self) -> Result<TaskStep, Error> {
        match self.command {
            Command::None => Ok(TaskStep::Done),
            Command::Connect => match self.ensure_reservation()? {
                true => Ok(TaskStep::Done),
                false => Ok(TaskStep::Pending),
            },
            Command::Query | Command::Prepare | Command::QueryPrepared => {
                if !self.ensure_reservation()? {
                    return Ok(TaskStep::Pending);
                }
                self.send()?;
                Ok(TaskStep::Pending)
            }
            Command::Cancel => {
                let conn = match self.reservation.as_ref() {
                    Some(r) => r.connection().clone(),
                    None => return Ok(TaskStep::Done),
                };
                conn.with_driver(|drv| drv.cancel())?;
                self.command = Command::Sent;
                Ok(TaskStep::Pending)
            }
            Command::Sent => {
                let conn = self
                    .reservation
                    .as_ref()
                    .expect("sent command holds a reservation")
                    .connection()
                    .clone();
                conn.with_driver(|drv| {
                    if !drv.poll_flush()? {
                        return Ok(TaskStep::Pending);
                    }
                    drv.consume_input()?;
                    if drv.is_busy() {
                        return Ok(TaskStep::Pending);
                    }
                    match drv.take_result()? {
                        Some(result) => Ok(TaskStep::Result(result)),
                        None => Ok(TaskStep::Done),
                    }
                })
                .map(|step| {
                    if matches!(step, TaskStep::Done) {
                        self.completed = true;
                        self.reservation = None;
                    }
                    step
                })
            }
        }
    }

    /// drive the task on the calling thread, polling the socket with short
    /// sleeps, and return the last result of the command.
    pub(crate) fn run_to_completion(&mut self) -> Result<Option<QueryResult>, Error> {
        loop {
            match self.step() {
                Ok(TaskStep::Pending) => thread::sleep(Duration::from_millis(1)),
                Ok(TaskStep::Result(result)) => self.last = Some(result),
                Ok(TaskStep::Done) => return Ok(self.last.take()),
                Err(e) => {
                    self.completed = true;
                    self.reservation = None;
                    return Err(e);
                }
            }
        }
    }

    fn deliver(&mut self, result: Result<Option<QueryResult>, Error>) {
        match self.callback.take() {
            Some(TaskCallback::Result(cb)) => cb(result),
            Some(TaskCallback::Lock(cb)) => {
                let lock = self.reservation.take();
                cb(result.and_then(|_| lock.ok_or_else(Error::unexpected)));
            }
            None => {}
        }
    }
}

impl Task for ConnectionTask {
    fn run(&mut self) -> Outcome {
        if self.completed {
            return Outcome::Complete;
        }

        // connect tasks complete with the reservation itself
        if self.command == Command::Connect {
            return match self.step() {
                Ok(TaskStep::Pending) => Outcome::Requeue,
                Ok(_) => {
                    self.completed = true;
                    self.deliver(Ok(None));
                    Outcome::Complete
                }
                Err(e) => {
                    self.completed = true;
                    self.deliver(Err(e));
                    Outcome::Complete
                }
            };
        }

        loop {
            match self.step() {
                Ok(TaskStep::Pending) => return Outcome::Requeue,
                Ok(TaskStep::Result(result)) => self.last = Some(result),
                Ok(TaskStep::Done) => {
                    self.completed = true;
                    let last = self.last.take();
                    self.deliver(Ok(last));
                    return Outcome::Complete;
                }
                Err(e) => {
                    self.completed = true;
                    self.reservation = None;
                    self.deliver(Err(e));
                    return Outcome::Complete;
                }
            }
        }
    }
}
