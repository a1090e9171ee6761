//! single-row streaming cursor.
//!
//! the reader wraps a connection task running in single-row mode, so rows
//! stream without a server-side cursor and therefore without requiring a
//! transaction. in exchange a reader cannot be paused indefinitely: it is
//! either drained to the end or cancelled by [`Reader::close`] (or drop).

use core::time::Duration;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use parking_lot::Mutex;
use tracing::warn;

use super::{
    column::Column,
    connection::check_result_status,
    error::{Error, StateError},
    queue::{Outcome, Strand, Task},
    row::Row,
    task::{ConnectionTask, TaskStep},
};

struct ReaderShared {
    task: Mutex<ConnectionTask>,
    columns: Mutex<Option<Arc<[Column]>>>,
    closed: AtomicBool,
}

impl ReaderShared {
    /// one non-blocking pull: a row, end-of-stream, or not-ready-yet.
    fn poll_row(&self) -> Result<Option<Option<Row>>, Error> {
        let mut task = self.task.lock();
        match task.step()? {
            TaskStep::Pending => Ok(None),
            TaskStep::Result(result) => {
                let result = check_result_status(result)?;
                self.columns.lock().get_or_insert_with(|| result.columns_arc());
                match result.into_rows().into_iter().next() {
                    // the terminal zero-row result of the stream; keep
                    // draining until the command is done
                    None => Ok(None),
                    Some(row) => Ok(Some(Some(row))),
                }
            }
            TaskStep::Done => {
                self.closed.store(true, Ordering::SeqCst);
                Ok(Some(None))
            }
        }
    }

    /// cancel whatever is in flight and drain the connection.
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut task = self.task.lock();
        if task.completed() {
            return;
        }
        if task.is_sent() {
            if let Err(e) = task.cancel() {
                warn!("unable to cancel streaming query: {e}");
            }
            if let Err(e) = task.run_to_completion() {
                warn!("error draining cancelled streaming query: {e}");
            }
        }
        // a never-sent task holds nothing on the wire; dropping the task's
        // reservation is enough
    }
}

/// a streaming cursor over a single-row-mode query.
pub struct Reader {
    shared: Arc<ReaderShared>,
    strand: Strand,
}

impl Reader {
    pub(crate) fn new(task: ConnectionTask, strand: Strand) -> Self {
        Self {
            shared: Arc::new(ReaderShared {
                task: Mutex::new(task),
                columns: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
            strand,
        }
    }

    /// true once the stream ended, was closed, or failed terminally.
    pub fn closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// column descriptors, available after the first row arrived.
    pub fn columns(&self) -> Option<Arc<[Column]>> {
        self.shared.columns.lock().clone()
    }

    /// fetch the next row, blocking the calling thread on socket readiness.
    /// `None` signals end-of-stream, after which the reader is closed.
    pub fn next(&mut self) -> Result<Option<Row>, Error> {
        if self.closed() {
            return Err(StateError::ReaderClosed.into());
        }
        loop {
            match self.shared.poll_row()? {
                Some(row) => return Ok(row),
                None => {
                    if self.closed() {
                        return Ok(None);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// fetch the next row through the session strand; the callback receives
    /// `Ok(None)` exactly once at end-of-stream.
    pub fn next_async<F>(&self, cb: F)
    where
        F: FnOnce(Result<Option<Row>, Error>) + Send + 'static,
    {
        if self.closed() {
            self.strand.spawn(move || cb(Err(StateError::ReaderClosed.into())));
            return;
        }
        self.strand.push_back(Box::new(NextRowTask {
            shared: self.shared.clone(),
            cb: Some(Box::new(cb)),
        }));
    }

    /// cancel the stream and drain the connection. idempotent; `closed`
    /// flips exactly once.
    pub fn close(&mut self) {
        self.shared.shutdown();
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

struct NextRowTask {
    shared: Arc<ReaderShared>,
    cb: Option<Box<dyn FnOnce(Result<Option<Row>, Error>) + Send>>,
}

impl Task for NextRowTask {
    fn run(&mut self) -> Outcome {
        if self.shared.closed.load(Ordering::SeqCst) {
            if let Some(cb) = self.cb.take() {
                cb(Err(StateError::ReaderClosed.into()));
            }
            return Outcome::Complete;
        }
        match self.shared.poll_row() {
            Ok(Some(row)) => {
                if let Some(cb) = self.cb.take() {
                    cb(Ok(row));
                }
                Outcome::Complete
            }
            Ok(None) => {
                if self.shared.closed.load(Ordering::SeqCst) {
                    if let Some(cb) = self.cb.take() {
                        cb(Ok(None));
                    }
                    return Outcome::Complete;
                }
                Outcome::Requeue
            }
            Err(e) => {
                if let Some(cb) = self.cb.take() {
                    cb(Err(e));
                }
                Outcome::Complete
            }
        }
    }
}
