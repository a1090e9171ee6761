//! server-side large object handles.
//!
//! large objects are only valid inside a transaction, so [`LargeObject::open`]
//! begins a local one when none is active; [`LargeObject::close`] commits it
//! and an error on the way rolls it back. a transaction the caller already
//! opened is adopted instead: the access runs inside it and `close` leaves it
//! open for the caller to finish. all calls go through the server's `lo_*`
//! functions over the session's own query machinery.

use bytes::Bytes;

use super::{
    error::{Error, StateError},
    session::Session,
    types::Parameters,
};

// open flags from the server's large object interface
const INV_WRITE: i32 = 0x0002_0000;
const INV_READ: i32 = 0x0004_0000;

/// how a large object is opened.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoMode {
    Read,
    Write,
    ReadWrite,
}

impl LoMode {
    fn flags(self) -> i32 {
        match self {
            Self::Read => INV_READ,
            Self::Write => INV_WRITE,
            Self::ReadWrite => INV_READ | INV_WRITE,
        }
    }
}

/// origin for [`LargeObject::seek`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoWhence {
    Start = 0,
    Current = 1,
    End = 2,
}

/// a handle to one server-side binary large object.
pub struct LargeObject {
    session: Session,
    oid: u32,
    fd: Option<i32>,
    opened_read: bool,
    opened_write: bool,
    local_txn: bool,
}

impl LargeObject {
    pub(crate) fn new(session: Session, oid: u32) -> Self {
        Self {
            session,
            oid,
            fd: None,
            opened_read: false,
            opened_write: false,
            local_txn: false,
        }
    }

    pub fn oid(&self) -> u32 {
        self.oid
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    pub fn opened_read(&self) -> bool {
        self.opened_read
    }

    pub fn opened_write(&self) -> bool {
        self.opened_write
    }

    /// open the object, beginning a local transaction when none is active.
    /// an already-active transaction is adopted: the object lives inside it
    /// and [`LargeObject::close`] will not commit it.
    pub fn open(&mut self, mode: LoMode) -> Result<(), Error> {
        if self.is_open() {
            return Err(StateError::LargeObjectOpen.into());
        }

        let local_txn = !self.session.in_transaction();
        if local_txn {
            self.session.begin()?;
        }

        let mut params = Parameters::new();
        params.push(&self.oid)?.push(&mode.flags())?;
        match self.session.query_value::<i32>("select lo_open($1, $2)", params) {
            Ok(fd) if fd >= 0 => {
                self.fd = Some(fd);
                self.local_txn = local_txn;
                self.opened_read = matches!(mode, LoMode::Read | LoMode::ReadWrite);
                self.opened_write = matches!(mode, LoMode::Write | LoMode::ReadWrite);
                Ok(())
            }
            Ok(_) => {
                if local_txn {
                    let _ = self.session.rollback();
                }
                Err(StateError::LargeObjectClosed.into())
            }
            Err(e) => {
                if local_txn {
                    let _ = self.session.rollback();
                }
                Err(e)
            }
        }
    }

    /// read up to `len` bytes from the current position.
    pub fn read(&mut self, len: i32) -> Result<Bytes, Error> {
        let fd = self.fd.ok_or(StateError::LargeObjectClosed)?;
        let mut params = Parameters::new();
        params.push(&fd)?.push(&len)?;
        self.guarded(|session| session.query_value("select loread($1, $2)", params))
    }

    /// write `data` at the current position, returning the byte count.
    pub fn write(&mut self, data: &[u8]) -> Result<i32, Error> {
        let fd = self.fd.ok_or(StateError::LargeObjectClosed)?;
        let mut params = Parameters::new();
        params.push(&fd)?.push(&data)?;
        self.guarded(|session| session.query_value("select lowrite($1, $2)", params))
    }

    /// current position within the object.
    pub fn tell(&mut self) -> Result<i64, Error> {
        let fd = self.fd.ok_or(StateError::LargeObjectClosed)?;
        let mut params = Parameters::new();
        params.push(&fd)?;
        self.guarded(|session| session.query_value("select lo_tell64($1)", params))
    }

    /// reposition, returning the new offset.
    pub fn seek(&mut self, offset: i64, whence: LoWhence) -> Result<i64, Error> {
        let fd = self.fd.ok_or(StateError::LargeObjectClosed)?;
        let mut params = Parameters::new();
        params.push(&fd)?.push(&offset)?.push(&(whence as i32))?;
        self.guarded(|session| session.query_value("select lo_lseek64($1, $2, $3)", params))
    }

    /// truncate or extend the object to `size` bytes.
    pub fn resize(&mut self, size: i64) -> Result<(), Error> {
        let fd = self.fd.ok_or(StateError::LargeObjectClosed)?;
        let mut params = Parameters::new();
        params.push(&fd)?.push(&size)?;
        self.guarded(|session| {
            session
                .query_value::<i32>("select lo_truncate64($1, $2)", params)
                .map(drop)
        })
    }

    /// close the descriptor, committing a locally opened transaction.
    pub fn close(&mut self) -> Result<(), Error> {
        let fd = self.fd.take().ok_or(StateError::LargeObjectClosed)?;
        self.opened_read = false;
        self.opened_write = false;
        let local_txn = self.local_txn;
        self.local_txn = false;

        let mut params = Parameters::new();
        params.push(&fd)?;
        match self.session.query_value::<i32>("select lo_close($1)", params) {
            Ok(_) => {
                if local_txn {
                    self.session.commit()?;
                }
                Ok(())
            }
            Err(e) => {
                if local_txn {
                    let _ = self.session.rollback();
                }
                Err(e)
            }
        }
    }

    /// delete the object. the handle must be closed first.
    pub fn unlink(&mut self) -> Result<(), Error> {
        if self.is_open() {
            return Err(StateError::LargeObjectOpen.into());
        }
        let mut params = Parameters::new();
        params.push(&self.oid)?;
        self.session
            .query_value::<i32>("select lo_unlink($1)", params)
            .map(drop)
    }

    /// run an operation; a failure inside a locally opened transaction
    /// rolls it back and closes the handle.
    fn guarded<T>(&mut self, op: impl FnOnce(&Session) -> Result<T, Error>) -> Result<T, Error> {
        match op(&self.session) {
            Ok(value) => Ok(value),
            Err(e) => {
                if self.local_txn {
                    let _ = self.session.rollback();
                    self.local_txn = false;
                    self.fd = None;
                    self.opened_read = false;
                    self.opened_write = false;
                }
                Err(e)
            }
        }
    }
}

impl Drop for LargeObject {
    fn drop(&mut self) {
        if self.is_open() {
            let _ = self.close();
        }
    }
}
