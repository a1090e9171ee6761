//! library error types. typed errors are reached through runtime downcast.

pub use postgres_types::{WasNull, WrongType};

use core::{
    convert::Infallible,
    fmt,
    ops::{Deref, DerefMut},
};

use std::{error, io};

use fallible_iterator::FallibleIterator;
use postgres_protocol::message::backend::ErrorFields;

/// public facing error type. providing basic format and display based error handling.
///
/// for typed based error handling runtime type cast is needed with the help of other
/// public error types offered by this module.
///
/// # Example
/// ```rust
/// use strand_postgres::error::{Error, PoolError};
///
/// fn is_pool_exhausted(e: &Error) -> bool {
///     matches!(e.downcast_ref::<PoolError>(), Some(PoolError::Exhausted { .. }))
/// }
/// ```
pub struct Error(Box<dyn error::Error + Send + Sync>);

impl Error {
    pub(crate) fn unexpected() -> Self {
        Self(Box::new(UnexpectedMessage))
    }

    /// true when the error originates from the pool failing to hand out a connection
    /// before the requested timeout.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self.downcast_ref::<PoolError>(), Some(PoolError::Exhausted { .. }))
    }
}

impl Deref for Error {
    type Target = dyn error::Error + Send + Sync;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl DerefMut for Error {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0.source()
    }
}

impl From<Infallible> for Error {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self(Box::new(e))
    }
}

impl From<WrongType> for Error {
    fn from(e: WrongType) -> Self {
        Self(Box::new(e))
    }
}

/// boxed error produced by the binary codec when a wire value fails a structural check.
pub type FromSqlError = Box<dyn error::Error + Send + Sync>;

impl From<FromSqlError> for Error {
    fn from(e: FromSqlError) -> Self {
        Self(e)
    }
}

/// connection level failures: the handshake, the transport or the peer went away.
#[derive(Debug)]
pub enum ConnectionError {
    /// server rejected the startup exchange or the socket could not be established.
    Handshake(String),
    /// peer closed the connection while it was still in use.
    Closed,
    /// tls was required but could not be negotiated.
    Tls(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake(msg) => write!(f, "connection handshake failed: {msg}"),
            Self::Closed => f.write_str("connection closed by peer"),
            Self::Tls(msg) => write!(f, "tls negotiation failed: {msg}"),
        }
    }
}

impl error::Error for ConnectionError {}

impl From<ConnectionError> for Error {
    fn from(e: ConnectionError) -> Self {
        Self(Box::new(e))
    }
}

/// pool level failures.
#[derive(Debug)]
pub enum PoolError {
    /// no connection could be acquired or stolen before the timeout expired.
    /// `opened` carries the number of connections locked at the time of failure.
    Exhausted { opened: usize },
    /// [`ConnectionPool::init`] was never called or [`ConnectionPool::destroy`] already ran.
    ///
    /// [`ConnectionPool::init`]: crate::pool::ConnectionPool::init
    /// [`ConnectionPool::destroy`]: crate::pool::ConnectionPool::destroy
    NotInitialized,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { opened } => write!(
                f,
                "unable to assign a connection because max connection count reached, connection count is '{opened}'"
            ),
            Self::NotInitialized => f.write_str("connection pool is not initialized"),
        }
    }
}

impl error::Error for PoolError {}

impl From<PoolError> for Error {
    fn from(e: PoolError) -> Self {
        Self(Box::new(e))
    }
}

/// conninfo string could not be parsed.
#[derive(Debug)]
pub enum ConfigError {
    EmptyHost,
    InvalidPort,
    InvalidValue(&'static str),
    MissingUserName,
    MissingPassWord,
    UnexpectedEof,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyHost => f.write_str("no host found in conninfo"),
            Self::InvalidPort => f.write_str("invalid port in conninfo"),
            Self::InvalidValue(key) => write!(f, "invalid value for conninfo key '{key}'"),
            Self::MissingUserName => f.write_str("username is missing for authentication"),
            Self::MissingPassWord => f.write_str("password is missing for authentication"),
            Self::UnexpectedEof => f.write_str("unexpected end of conninfo input"),
        }
    }
}

impl error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self(Box::new(e))
    }
}

/// an operation was attempted against an object in the wrong state.
#[derive(Debug, PartialEq, Eq)]
pub enum StateError {
    /// `begin` while a transaction is already open.
    AlreadyInTransaction,
    /// `commit`/`rollback`/savepoint operation without an open transaction.
    NotInTransaction,
    /// `next` on a closed reader.
    ReaderClosed,
    /// large object operation on a closed handle.
    LargeObjectClosed,
    /// `open` on an already open large object, or `unlink` on an open one.
    LargeObjectOpen,
    /// identifier contains bytes that cannot be escaped (embedded NUL).
    InvalidIdentifier,
    /// the connection is already locked by a running task.
    AlreadyLocked,
    /// `cancel` redirected a task that has no command in progress.
    NoCommandInProgress,
    /// scalar query produced no rows.
    NoRows,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInTransaction => f.write_str("already in a transaction"),
            Self::NotInTransaction => f.write_str("not in a transaction"),
            Self::ReaderClosed => f.write_str("the reader is closed"),
            Self::LargeObjectClosed => f.write_str("large object is closed"),
            Self::LargeObjectOpen => f.write_str("large object is already open"),
            Self::InvalidIdentifier => f.write_str("invalid identifier"),
            Self::AlreadyLocked => f.write_str("unable to lock the connection because it's already locked"),
            Self::NoCommandInProgress => f.write_str("no command in progress"),
            Self::NoRows => f.write_str("no records in the query result"),
        }
    }
}

impl error::Error for StateError {}

impl From<StateError> for Error {
    fn from(e: StateError) -> Self {
        Self(Box::new(e))
    }
}

pub struct InvalidColumnIndex(pub String);

impl fmt::Debug for InvalidColumnIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidColumnIndex").finish()
    }
}

impl fmt::Display for InvalidColumnIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid column index: {}", self.0)
    }
}

impl error::Error for InvalidColumnIndex {}

impl From<InvalidColumnIndex> for Error {
    fn from(e: InvalidColumnIndex) -> Self {
        Self(Box::new(e))
    }
}

/// a connect task ran past its deadline.
#[derive(Debug)]
pub struct TimedOut;

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection request has timed out")
    }
}

impl error::Error for TimedOut {}

impl From<TimedOut> for Error {
    fn from(e: TimedOut) -> Self {
        Self(Box::new(e))
    }
}

/// an in-flight command was cancelled and the cancellation acknowledged.
#[derive(Debug)]
pub struct Canceled;

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("command was canceled")
    }
}

impl error::Error for Canceled {}

impl From<Canceled> for Error {
    fn from(e: Canceled) -> Self {
        Self(Box::new(e))
    }
}

#[derive(Debug)]
pub struct UnexpectedMessage;

impl fmt::Display for UnexpectedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unexpected message from database")
    }
}

impl error::Error for UnexpectedMessage {}

#[cold]
#[inline(never)]
pub(crate) fn unexpected_eof_err() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "zero byte read. remote close connection unexpectedly",
    )
}

/// A Postgres error or notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    severity: String,
    code: String,
    message: String,
    detail: Option<String>,
    hint: Option<String>,
    position: Option<u32>,
    where_: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    column: Option<String>,
    datatype: Option<String>,
    constraint: Option<String>,
    file: Option<String>,
    line: Option<u32>,
    routine: Option<String>,
}

impl DbError {
    /// build an error by hand. custom [`Connector`] implementations use this
    /// to surface fabricated server errors; values parsed off the wire come
    /// through the driver instead.
    ///
    /// [`Connector`]: crate::protocol::Connector
    pub fn new(severity: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> DbError {
        DbError {
            severity: severity.into(),
            code: code.into(),
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
            where_: None,
            schema: None,
            table: None,
            column: None,
            datatype: None,
            constraint: None,
            file: None,
            line: None,
            routine: None,
        }
    }

    #[cold]
    #[inline(never)]
    pub(crate) fn parse(fields: &mut ErrorFields<'_>) -> io::Result<DbError> {
        let mut severity = None;
        let mut code = None;
        let mut message = None;
        let mut detail = None;
        let mut hint = None;
        let mut position = None;
        let mut where_ = None;
        let mut schema = None;
        let mut table = None;
        let mut column = None;
        let mut datatype = None;
        let mut constraint = None;
        let mut file = None;
        let mut line = None;
        let mut routine = None;

        while let Some(field) = fields.next()? {
            let value = String::from_utf8_lossy(field.value_bytes());
            match field.type_() {
                b'S' => severity = Some(value.into_owned()),
                b'C' => code = Some(value.into_owned()),
                b'M' => message = Some(value.into_owned()),
                b'D' => detail = Some(value.into_owned()),
                b'H' => hint = Some(value.into_owned()),
                b'P' => {
                    position = Some(value.parse::<u32>().map_err(|_| {
                        io::Error::new(io::ErrorKind::InvalidInput, "`P` field did not contain an integer")
                    })?);
                }
                b'W' => where_ = Some(value.into_owned()),
                b's' => schema = Some(value.into_owned()),
                b't' => table = Some(value.into_owned()),
                b'c' => column = Some(value.into_owned()),
                b'd' => datatype = Some(value.into_owned()),
                b'n' => constraint = Some(value.into_owned()),
                b'F' => file = Some(value.into_owned()),
                b'L' => {
                    line = Some(value.parse::<u32>().map_err(|_| {
                        io::Error::new(io::ErrorKind::InvalidInput, "`L` field did not contain an integer")
                    })?);
                }
                b'R' => routine = Some(value.into_owned()),
                _ => {}
            }
        }

        Ok(DbError {
            severity: severity.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "`S` field missing"))?,
            code: code.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "`C` field missing"))?,
            message: message.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "`M` field missing"))?,
            detail,
            hint,
            position,
            where_,
            schema,
            table,
            column,
            datatype,
            constraint,
            file,
            line,
            routine,
        })
    }

    /// The field contents are ERROR, FATAL, or PANIC, or a localized
    /// translation of one of these.
    pub fn severity(&self) -> &str {
        &self.severity
    }

    /// The SQLSTATE code for the error.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// An optional secondary error message carrying more detail about the problem.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// An optional suggestion what to do about the problem.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// An optional error cursor position into the original query string.
    pub fn position(&self) -> Option<u32> {
        self.position
    }

    /// An indication of the context in which the error occurred.
    pub fn where_(&self) -> Option<&str> {
        self.where_.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn datatype(&self) -> Option<&str> {
        self.datatype.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// The file name of the source-code location where the error was reported.
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// The line number of the source-code location where the error was reported.
    pub fn line(&self) -> Option<u32> {
        self.line
    }

    /// The name of the source-code routine reporting the error.
    pub fn routine(&self) -> Option<&str> {
        self.routine.as_deref()
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: {}", self.severity, self.message)?;
        if let Some(detail) = &self.detail {
            write!(fmt, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(fmt, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

impl error::Error for DbError {}

impl From<DbError> for Error {
    fn from(e: DbError) -> Self {
        Self(Box::new(e))
    }
}
