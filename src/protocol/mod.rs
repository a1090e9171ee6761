//! the wire driver: v3 frontend/backend protocol over a non-blocking socket.
//!
//! the [`Driver`] trait is the seam between the pool and the transport. the
//! default implementation speaks the binary protocol over tcp (with optional
//! tls); tests substitute an in-process implementation through a custom
//! [`Connector`].

mod auth;
mod message;

use core::time::Duration;

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Instant,
};

use bytes::{Buf, Bytes, BytesMut};
use postgres_protocol::message::{backend, frontend};

use super::{
    column::Column,
    config::{Config, SslMode},
    error::{ConfigError, ConnectionError, DbError, Error, unexpected_eof_err},
    row::Row,
    types::{Format, Parameters, Type},
};

use self::message::Assembler;

/// libpq-style result status, one per statement in a command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResultStatus {
    /// a statement that returns no rows completed.
    CommandOk,
    /// a row-returning statement completed; all rows are present.
    TuplesOk,
    /// one row of a single-row-mode stream.
    SingleTuple,
    /// the statement was empty.
    EmptyQuery,
    /// the server reported a fatal result status.
    Fatal,
}

/// one result set produced by the backend.
pub struct QueryResult {
    columns: Arc<[Column]>,
    rows: Vec<Row>,
    rows_affected: u64,
    status: ResultStatus,
    error: Option<DbError>,
}

impl QueryResult {
    /// a row-less completion, e.g. from an insert or a ddl statement.
    pub fn command(rows_affected: u64) -> Self {
        Self {
            columns: Arc::from(Vec::new()),
            rows: Vec::new(),
            rows_affected,
            status: ResultStatus::CommandOk,
            error: None,
        }
    }

    /// a materialised row-returning result. columns are given as
    /// `(name, type)` pairs; values are raw binary-format buffers.
    pub fn tuples<I>(columns: Vec<(String, Type)>, rows: I) -> Self
    where
        I: IntoIterator<Item = Vec<Option<Bytes>>>,
    {
        let columns: Arc<[Column]> = columns
            .into_iter()
            .enumerate()
            .map(|(idx, (name, ty))| Column::new(&name, ty, idx, Format::Binary))
            .collect::<Vec<_>>()
            .into();
        let rows = rows
            .into_iter()
            .map(|values| Row::from_values(columns.clone(), values))
            .collect::<Vec<_>>();
        Self {
            rows_affected: rows.len() as u64,
            columns,
            rows,
            status: ResultStatus::TuplesOk,
            error: None,
        }
    }

    /// one row of a single-row-mode stream.
    pub fn single_tuple(columns: Vec<(String, Type)>, values: Vec<Option<Bytes>>) -> Self {
        let mut res = Self::tuples(columns, [values]);
        res.status = ResultStatus::SingleTuple;
        res
    }

    pub fn empty_query() -> Self {
        let mut res = Self::command(0);
        res.status = ResultStatus::EmptyQuery;
        res
    }

    pub fn fatal(error: DbError) -> Self {
        Self {
            columns: Arc::from(Vec::new()),
            rows: Vec::new(),
            rows_affected: 0,
            status: ResultStatus::Fatal,
            error: Some(error),
        }
    }

    pub(crate) fn from_parts(columns: Arc<[Column]>, rows: Vec<Row>, rows_affected: u64, status: ResultStatus) -> Self {
        Self {
            columns,
            rows,
            rows_affected,
            status,
            error: None,
        }
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn columns_arc(&self) -> Arc<[Column]> {
        self.columns.clone()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn error(&self) -> Option<&DbError> {
        self.error.as_ref()
    }

    /// turn a fatal status into its [`DbError`].
    pub fn into_error(self) -> Option<DbError> {
        self.error
    }
}

impl core::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueryResult")
            .field("status", &self.status)
            .field("rows", &self.rows.len())
            .finish()
    }
}

/// the native protocol driver behind one connection.
///
/// the send methods buffer a command; [`Driver::poll_flush`] and
/// [`Driver::consume_input`] never block, reporting progress the way the
/// task engine expects: a busy driver means "requeue and come back".
pub trait Driver: Send {
    /// buffer an extended-protocol query on the unnamed statement.
    fn send_query(&mut self, sql: &str, params: &Parameters, format: Format) -> Result<(), Error>;

    /// buffer creation of a named prepared statement.
    fn send_prepare(&mut self, name: &str, sql: &str, types: &[Type]) -> Result<(), Error>;

    /// buffer a bind-and-execute of a named prepared statement.
    fn send_query_prepared(&mut self, name: &str, params: &Parameters, format: Format) -> Result<(), Error>;

    /// buffer a simple-protocol query (results arrive in text format).
    fn send_simple(&mut self, sql: &str) -> Result<(), Error>;

    /// deliver each row of the current command as its own result.
    fn set_single_row_mode(&mut self);

    /// write buffered bytes; `Ok(true)` when the buffer drained.
    fn poll_flush(&mut self) -> Result<bool, Error>;

    /// read whatever the socket has without blocking.
    fn consume_input(&mut self) -> Result<(), Error>;

    /// true while no complete result is available and the command is not done.
    fn is_busy(&self) -> bool;

    /// pop the next result; `None` once the current command fully drained.
    fn take_result(&mut self) -> Result<Option<QueryResult>, Error>;

    /// out-of-band cancel request for the in-flight command.
    fn cancel(&mut self) -> Result<(), Error>;

    /// a server parameter reported at startup (e.g. `lc_monetary`).
    fn parameter(&self, name: &str) -> Option<String>;

    /// false once the transport failed or the peer went away.
    fn is_healthy(&self) -> bool;

    /// terminate the session and drop the transport.
    fn close(&mut self);
}

/// factory for [`Driver`] instances, the pool's connection seam.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, conninfo: &str, timeout: Duration) -> Result<Box<dyn Driver>, Error>;
}

/// the default connector: parse the conninfo and open a [`WireDriver`].
pub(crate) struct WireConnector;

impl Connector for WireConnector {
    fn connect(&self, conninfo: &str, timeout: Duration) -> Result<Box<dyn Driver>, Error> {
        WireDriver::connect(conninfo, timeout).map(|drv| Box::new(drv) as _)
    }
}

enum RawIo {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl RawIo {
    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(io) => io,
            #[cfg(feature = "tls")]
            Self::Tls(io) => io.get_ref(),
        }
    }

    fn set_nonblocking(&self, on: bool) -> io::Result<()> {
        self.tcp().set_nonblocking(on)
    }

    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.tcp().set_read_timeout(timeout)?;
        self.tcp().set_write_timeout(timeout)
    }

    #[cfg(feature = "tls")]
    fn tls_server_end_point(&self) -> Option<Vec<u8>> {
        use sha2::{Digest, Sha256};

        match self {
            Self::Tls(io) => {
                let cert = io.peer_certificate().ok().flatten()?;
                let der = cert.to_der().ok()?;
                Some(Sha256::digest(der).to_vec())
            }
            _ => None,
        }
    }

    #[cfg(not(feature = "tls"))]
    fn tls_server_end_point(&self) -> Option<Vec<u8>> {
        None
    }
}

impl Read for RawIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(io) => io.read(buf),
            #[cfg(feature = "tls")]
            Self::Tls(io) => io.read(buf),
        }
    }
}

impl Write for RawIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(io) => io.write(buf),
            #[cfg(feature = "tls")]
            Self::Tls(io) => io.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(io) => io.flush(),
            #[cfg(feature = "tls")]
            Self::Tls(io) => io.flush(),
        }
    }
}

/// default tcp/tls implementation of [`Driver`].
pub(crate) struct WireDriver {
    io: RawIo,
    read_buf: BytesMut,
    write_buf: BytesMut,
    assembler: Assembler,
    cancel: Option<(SocketAddr, i32, i32)>,
    healthy: bool,
}

impl WireDriver {
    /// blocking connect and handshake, bounded by `timeout`. the socket is
    /// switched to non-blocking mode once the session is ready.
    pub(crate) fn connect(conninfo: &str, timeout: Duration) -> Result<Self, Error> {
        let cfg: Config = conninfo.parse()?;
        if cfg.get_hosts().is_empty() {
            return Err(ConfigError::EmptyHost.into());
        }

        let timeout = cfg.get_connect_timeout().unwrap_or(timeout);
        let deadline = Instant::now() + timeout;

        let mut last = None;
        for (idx, host) in cfg.get_hosts().iter().enumerate() {
            let port = cfg.port_for(idx);
            match Self::connect_host(host, port, &cfg, deadline) {
                Ok(drv) => return Ok(drv),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap())
    }

    fn connect_host(host: &str, port: u16, cfg: &Config, deadline: Instant) -> Result<Self, Error> {
        let mut last = None;
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| ConnectionError::Handshake(format!("{host}:{port}: {e}")))?;

        for addr in addrs {
            match Self::connect_addr(addr, cfg, deadline) {
                Ok(drv) => return Ok(drv),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(|| ConnectionError::Handshake(format!("no address found for {host}")).into()))
    }

    fn connect_addr(addr: SocketAddr, cfg: &Config, deadline: Instant) -> Result<Self, Error> {
        let remaining = |what: &str| -> Result<Duration, Error> {
            deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
                .ok_or_else(|| ConnectionError::Handshake(format!("timed out before {what}")).into())
        };

        let stream = TcpStream::connect_timeout(&addr, remaining("socket connect")?)
            .map_err(|e| ConnectionError::Handshake(format!("{addr}: {e}")))?;
        stream.set_nodelay(true).map_err(Error::from)?;

        let io = negotiate_ssl(stream, addr, cfg, remaining("tls negotiation")?)?;
        io.set_io_timeout(Some(remaining("authentication")?))?;

        let mut drv = Self {
            io,
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_buf: BytesMut::with_capacity(8 * 1024),
            assembler: Assembler::new(),
            cancel: None,
            healthy: true,
        };

        auth::authenticate(&mut drv.io, &mut drv.read_buf, cfg)?;

        // drain the startup stream: parameters, backend key data, ready
        loop {
            match drv.recv_blocking()? {
                backend::Message::ReadyForQuery(_) => break,
                msg @ (backend::Message::ParameterStatus(_)
                | backend::Message::BackendKeyData(_)
                | backend::Message::NoticeResponse(_)) => drv.assembler.handle(msg)?,
                backend::Message::ErrorResponse(body) => return Err(DbError::parse(&mut body.fields())?.into()),
                _ => return Err(Error::unexpected()),
            }
        }

        drv.cancel = Some((addr, drv.assembler.backend_id(), drv.assembler.backend_key()));

        drv.io.set_io_timeout(None)?;
        drv.io.set_nonblocking(true)?;
        Ok(drv)
    }

    fn recv_blocking(&mut self) -> Result<backend::Message, Error> {
        loop {
            if let Some(msg) = backend::Message::parse(&mut self.read_buf)? {
                return Ok(msg);
            }
            let mut chunk = [0u8; 8 * 1024];
            match self.io.read(&mut chunk) {
                Ok(0) => return Err(unexpected_eof_err().into()),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) => return Err(ConnectionError::Handshake(e.to_string()).into()),
            }
        }
    }

    fn check_healthy(&self) -> Result<(), Error> {
        if self.healthy {
            Ok(())
        } else {
            Err(ConnectionError::Closed.into())
        }
    }

    fn fail<T>(&mut self, e: impl Into<Error>) -> Result<T, Error> {
        self.healthy = false;
        Err(e.into())
    }
}

#[cfg(not(feature = "tls"))]
fn negotiate_ssl(stream: TcpStream, _addr: SocketAddr, cfg: &Config, _timeout: Duration) -> Result<RawIo, Error> {
    match cfg.get_ssl_mode() {
        SslMode::Require => Err(ConnectionError::Tls(String::from("tls feature is not enabled")).into()),
        _ => Ok(RawIo::Plain(stream)),
    }
}

#[cfg(feature = "tls")]
fn negotiate_ssl(mut stream: TcpStream, addr: SocketAddr, cfg: &Config, timeout: Duration) -> Result<RawIo, Error> {
    if cfg.get_ssl_mode() == SslMode::Disable {
        return Ok(RawIo::Plain(stream));
    }

    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut buf = BytesMut::new();
    frontend::ssl_request(&mut buf);
    stream.write_all(&buf).map_err(|e| ConnectionError::Tls(e.to_string()))?;

    let mut answer = [0u8; 1];
    stream.read_exact(&mut answer).map_err(|e| ConnectionError::Tls(e.to_string()))?;

    if answer[0] != b'S' {
        return match cfg.get_ssl_mode() {
            SslMode::Require => Err(ConnectionError::Tls(String::from("server refused tls")).into()),
            _ => Ok(RawIo::Plain(stream)),
        };
    }

    let connector = native_tls::TlsConnector::builder()
        // `require` matches libpq: the channel is encrypted but the
        // certificate chain is not verified.
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| ConnectionError::Tls(e.to_string()))?;

    let domain = match addr {
        SocketAddr::V4(v4) => v4.ip().to_string(),
        SocketAddr::V6(v6) => v6.ip().to_string(),
    };

    match connector.connect(&domain, stream) {
        Ok(io) => Ok(RawIo::Tls(Box::new(io))),
        Err(e) => Err(ConnectionError::Tls(e.to_string()).into()),
    }
}

impl Driver for WireDriver {
    fn send_query(&mut self, sql: &str, params: &Parameters, format: Format) -> Result<(), Error> {
        self.check_healthy()?;
        self.assembler.reset_for_send();
        let buf = &mut self.write_buf;
        frontend::parse("", sql, params.oids(), buf).map_err(Error::from)?;
        encode_bind("", params, format, buf)?;
        frontend::describe(b'P', "", buf)?;
        frontend::execute("", 0, buf)?;
        frontend::sync(buf);
        Ok(())
    }

    fn send_prepare(&mut self, name: &str, sql: &str, types: &[Type]) -> Result<(), Error> {
        self.check_healthy()?;
        self.assembler.reset_for_send();
        let buf = &mut self.write_buf;
        frontend::parse(name, sql, types.iter().map(Type::oid), buf)?;
        frontend::sync(buf);
        Ok(())
    }

    fn send_query_prepared(&mut self, name: &str, params: &Parameters, format: Format) -> Result<(), Error> {
        self.check_healthy()?;
        self.assembler.reset_for_send();
        let buf = &mut self.write_buf;
        encode_bind(name, params, format, buf)?;
        frontend::describe(b'P', "", buf)?;
        frontend::execute("", 0, buf)?;
        frontend::sync(buf);
        Ok(())
    }

    fn send_simple(&mut self, sql: &str) -> Result<(), Error> {
        self.check_healthy()?;
        self.assembler.reset_for_send();
        frontend::query(sql, &mut self.write_buf)?;
        Ok(())
    }

    fn set_single_row_mode(&mut self) {
        self.assembler.set_single_row();
    }

    fn poll_flush(&mut self) -> Result<bool, Error> {
        self.check_healthy()?;
        while !self.write_buf.is_empty() {
            match self.io.write(&self.write_buf) {
                Ok(0) => return self.fail(Error::from(unexpected_eof_err())),
                Ok(n) => self.write_buf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return self.fail(e),
            }
        }
        match self.io.flush() {
            Ok(()) => Ok(true),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => self.fail(e),
        }
    }

    fn consume_input(&mut self) -> Result<(), Error> {
        self.check_healthy()?;
        let mut chunk = [0u8; 16 * 1024];
        loop {
            match self.io.read(&mut chunk) {
                Ok(0) => return self.fail(ConnectionError::Closed),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return self.fail(e),
            }
        }

        loop {
            match backend::Message::parse(&mut self.read_buf) {
                Ok(Some(msg)) => self.assembler.handle(msg)?,
                Ok(None) => break,
                Err(e) => return self.fail(e),
            }
        }
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.assembler.is_busy()
    }

    fn take_result(&mut self) -> Result<Option<QueryResult>, Error> {
        self.check_healthy()?;
        Ok(self.assembler.take_result())
    }

    fn cancel(&mut self) -> Result<(), Error> {
        let (addr, id, key) = self.cancel.ok_or_else(Error::unexpected)?;
        let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5))?;
        let mut buf = BytesMut::new();
        frontend::cancel_request(id, key, &mut buf);
        stream.write_all(&buf)?;
        let _ = stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    fn parameter(&self, name: &str) -> Option<String> {
        self.assembler.parameter(name)
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn close(&mut self) {
        if self.healthy {
            let mut buf = BytesMut::new();
            frontend::terminate(&mut buf);
            let _ = self.io.write(&buf);
        }
        self.healthy = false;
    }
}

fn encode_bind(stmt: &str, params: &Parameters, format: Format, buf: &mut BytesMut) -> Result<(), Error> {
    frontend::bind(
        "",
        stmt,
        params.formats().map(|f| f as i16),
        params.values(),
        |value, buf| match value {
            Some(value) => {
                buf.extend_from_slice(value);
                Ok(postgres_protocol::IsNull::No)
            }
            None => Ok(postgres_protocol::IsNull::Yes),
        },
        Some(format as i16),
        buf,
    )
    .map_err(|e| match e {
        frontend::BindError::Conversion(e) => Error::from(e),
        frontend::BindError::Serialization(e) => Error::from(e),
    })
}
