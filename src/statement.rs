//! prepared-statement handles.

use super::{
    error::Error,
    reader::Reader,
    row::Row,
    session::Session,
    table::Table,
    types::{Format, FromSqlOwned, Parameters},
};

/// a handle to a named server-side prepared statement.
///
/// created by [`Session::prepare`]. with `auto_deallocate` the statement is
/// deallocated (best effort) when the handle drops, the same way a guarded
/// statement cancels itself.
pub struct PreparedStatement {
    session: Session,
    name: String,
    auto_deallocate: bool,
}

impl PreparedStatement {
    pub(crate) fn new(session: Session, name: &str, auto_deallocate: bool) -> Self {
        Self {
            session,
            name: name.to_string(),
            auto_deallocate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// run the statement, returning the number of rows affected.
    pub fn execute(&self, params: Parameters) -> Result<u64, Error> {
        self.session
            .run_prepared_sync(&self.name, params, Format::Binary)
            .and_then(super::session::process_execute)
    }

    pub fn execute_async<F>(&self, params: Parameters, cb: F)
    where
        F: FnOnce(Result<u64, Error>) + Send + 'static,
    {
        self.session
            .enqueue_prepared(&self.name, params, move |res| {
                cb(res.and_then(super::session::process_execute))
            });
    }

    /// run the statement and materialise the result set.
    pub fn query(&self, params: Parameters) -> Result<Table, Error> {
        self.session
            .run_prepared_sync(&self.name, params, Format::Binary)
            .and_then(super::session::process_table)
    }

    pub fn query_async<F>(&self, params: Parameters, cb: F)
    where
        F: FnOnce(Result<Table, Error>) + Send + 'static,
    {
        self.session
            .enqueue_prepared(&self.name, params, move |res| {
                cb(res.and_then(super::session::process_table))
            });
    }

    /// run the statement and return its first row, if any.
    pub fn query_single(&self, params: Parameters) -> Result<Option<Row>, Error> {
        self.session
            .run_prepared_sync(&self.name, params, Format::Binary)
            .and_then(super::session::process_single)
    }

    pub fn query_single_async<F>(&self, params: Parameters, cb: F)
    where
        F: FnOnce(Result<Option<Row>, Error>) + Send + 'static,
    {
        self.session
            .enqueue_prepared(&self.name, params, move |res| {
                cb(res.and_then(super::session::process_single))
            });
    }

    /// run the statement and decode the first column of its first row.
    pub fn query_value<T>(&self, params: Parameters) -> Result<T, Error>
    where
        T: FromSqlOwned,
    {
        self.session
            .run_prepared_sync(&self.name, params, Format::Binary)
            .and_then(super::session::process_value)
    }

    pub fn query_value_async<T, F>(&self, params: Parameters, cb: F)
    where
        T: FromSqlOwned,
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.session
            .enqueue_prepared(&self.name, params, move |res| {
                cb(res.and_then(super::session::process_value))
            });
    }

    /// run the statement in single-row mode, returning a streaming reader.
    pub fn query_reader(&self, params: Parameters) -> Result<Reader, Error> {
        self.session.open_reader_prepared(&self.name, params)
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        if self.auto_deallocate {
            self.session.deallocate_prepared_async(&self.name, |_| {});
        }
    }
}
