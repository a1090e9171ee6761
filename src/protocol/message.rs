//! backend message pump: result assembly, parameter tracking, notice routing.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use fallible_iterator::FallibleIterator;
use postgres_protocol::message::backend;
use tracing::{debug, error, info, trace, warn};

use crate::{
    column::Column,
    error::{DbError, Error},
    row::Row,
    types::{Format, Kind, Type},
};

use super::{QueryResult, ResultStatus};

/// assembles backend messages into libpq-shaped results for one command at a
/// time.
pub(crate) struct Assembler {
    pending: std::collections::VecDeque<QueryResult>,
    columns: Option<Arc<[Column]>>,
    rows: Vec<Row>,
    produced: bool,
    done: bool,
    single_row: bool,
    backend_id: i32,
    backend_key: i32,
    parameters: HashMap<String, String>,
}

impl Assembler {
    pub(crate) fn new() -> Self {
        Self {
            pending: std::collections::VecDeque::new(),
            columns: None,
            rows: Vec::new(),
            produced: false,
            done: true,
            single_row: false,
            backend_id: 0,
            backend_key: 0,
            parameters: HashMap::new(),
        }
    }

    pub(crate) fn reset_for_send(&mut self) {
        self.pending.clear();
        self.columns = None;
        self.rows.clear();
        self.produced = false;
        self.done = false;
        self.single_row = false;
    }

    pub(crate) fn set_single_row(&mut self) {
        self.single_row = true;
    }

    /// no complete result buffered and the command has not drained yet.
    pub(crate) fn is_busy(&self) -> bool {
        self.pending.is_empty() && !self.done
    }

    pub(crate) fn take_result(&mut self) -> Option<QueryResult> {
        self.pending.pop_front()
    }

    pub(crate) fn backend_id(&self) -> i32 {
        self.backend_id
    }

    pub(crate) fn backend_key(&self) -> i32 {
        self.backend_key
    }

    pub(crate) fn parameter(&self, name: &str) -> Option<String> {
        self.parameters.get(name).cloned()
    }

    pub(crate) fn handle(&mut self, msg: backend::Message) -> Result<(), Error> {
        match msg {
            backend::Message::RowDescription(body) => {
                let mut columns = Vec::new();
                let mut fields = body.fields();
                let mut idx = 0;
                while let Some(field) = fields.next()? {
                    let ty = Type::from_oid(field.type_oid()).unwrap_or_else(|| {
                        Type::new(String::from("unknown"), field.type_oid(), Kind::Simple, String::new())
                    });
                    columns.push(Column::new(field.name(), ty, idx, Format::from_wire(field.format())));
                    idx += 1;
                }
                self.columns = Some(Arc::from(columns));
                self.rows.clear();
            }
            backend::Message::DataRow(body) => {
                let columns = self.columns.clone().ok_or_else(Error::unexpected)?;
                let mut ranges = Vec::with_capacity(columns.len());
                let mut iter = body.ranges();
                while let Some(range) = iter.next()? {
                    ranges.push(range);
                }
                let row = Row::new(columns.clone(), Bytes::copy_from_slice(body.buffer()), ranges);
                if self.single_row {
                    self.produce(QueryResult::from_parts(columns, vec![row], 1, ResultStatus::SingleTuple));
                } else {
                    self.rows.push(row);
                }
            }
            backend::Message::CommandComplete(body) => {
                let rows_affected = body
                    .tag()?
                    .rsplit(' ')
                    .next()
                    .and_then(|count| count.parse().ok())
                    .unwrap_or(0);
                let result = match self.columns.take() {
                    Some(columns) => {
                        let rows = std::mem::take(&mut self.rows);
                        QueryResult::from_parts(columns, rows, rows_affected, ResultStatus::TuplesOk)
                    }
                    None => QueryResult::command(rows_affected),
                };
                self.produce(result);
            }
            backend::Message::EmptyQueryResponse => {
                self.columns = None;
                self.produce(QueryResult::empty_query());
            }
            backend::Message::ErrorResponse(body) => {
                self.columns = None;
                self.rows.clear();
                let db = DbError::parse(&mut body.fields())?;
                self.produce(QueryResult::fatal(db));
            }
            backend::Message::ReadyForQuery(_) => {
                // a command that produced nothing (e.g. a bare prepare)
                // still yields one ok result, the way libpq reports it.
                if !self.produced {
                    self.produce(QueryResult::command(0));
                }
                self.done = true;
            }
            backend::Message::NoticeResponse(body) => route_notice(&body)?,
            backend::Message::ParameterStatus(body) => {
                let name = body.name()?.to_string();
                let value = body.value()?.to_string();
                self.parameters.insert(name, value);
            }
            backend::Message::BackendKeyData(body) => {
                self.backend_id = body.process_id();
                self.backend_key = body.secret_key();
            }
            backend::Message::NotificationResponse(body) => {
                debug!(
                    channel = body.channel()?,
                    payload = body.message()?,
                    "asynchronous notification"
                );
            }
            backend::Message::ParseComplete
            | backend::Message::BindComplete
            | backend::Message::CloseComplete
            | backend::Message::NoData
            | backend::Message::ParameterDescription(_)
            | backend::Message::PortalSuspended => {}
            _ => return Err(Error::unexpected()),
        }
        Ok(())
    }

    fn produce(&mut self, result: QueryResult) {
        self.produced = true;
        self.pending.push_back(result);
    }
}

/// route a server notice to the logger by its leading severity token.
fn route_notice(body: &backend::NoticeResponseBody) -> Result<(), Error> {
    let mut severity = String::new();
    let mut message = String::new();
    let mut fields = body.fields();
    while let Some(field) = fields.next()? {
        match field.type_() {
            b'S' => severity = String::from_utf8_lossy(field.value_bytes()).into_owned(),
            b'M' => message = String::from_utf8_lossy(field.value_bytes()).into_owned(),
            _ => {}
        }
    }

    let line = format!("{severity}: {message}");
    match severity.as_str() {
        s if s.starts_with("DEBUG") => trace!("{line}"),
        "LOG" => debug!("{line}"),
        "INFO" => info!("{line}"),
        "NOTICE" | "WARNING" => warn!("{line}"),
        "EXCEPTION" => error!("{line}"),
        _ => warn!("{line}"),
    }
    Ok(())
}
