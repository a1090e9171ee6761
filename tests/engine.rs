//! pool, strand, session and reader behaviour against an in-process driver.
//!
//! the pool singleton is process wide, so every test here runs serially and
//! registers its script under its own conninfo key.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, OnceLock},
    thread,
    time::Duration,
};

use bytes::Bytes;
use serial_test::serial;

use strand_postgres::{
    error::{DbError, Error, PoolError, StateError},
    pool::{ConnectionPool, PoolOptions},
    protocol::{Connector, Driver, QueryResult},
    types::{Format, Parameters, Type},
    EventQueue, Session,
};

// ---------------------------------------------------------------------------
// scripted driver

#[derive(Clone)]
enum Resp {
    Command(u64),
    Tuples(Vec<(String, Type)>, Vec<Vec<Option<Bytes>>>),
    Single(Vec<(String, Type)>, Vec<Option<Bytes>>),
    Fatal(String),
}

impl Resp {
    fn materialize(self) -> QueryResult {
        match self {
            Resp::Command(n) => QueryResult::command(n),
            Resp::Tuples(cols, rows) => QueryResult::tuples(cols, rows),
            Resp::Single(cols, row) => QueryResult::single_tuple(cols, row),
            Resp::Fatal(message) => QueryResult::fatal(DbError::new("ERROR", "42601", message)),
        }
    }
}

type Responder = Arc<dyn Fn(&str) -> Vec<Resp> + Send + Sync>;

#[derive(Clone)]
struct Script {
    responder: Responder,
    log: Arc<Mutex<Vec<String>>>,
}

fn registry() -> &'static Mutex<HashMap<String, Script>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Script>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// register a responder for one conninfo key and hand back its command log.
fn register<F>(conninfo: &str, responder: F) -> Arc<Mutex<Vec<String>>>
where
    F: Fn(&str) -> Vec<Resp> + Send + Sync + 'static,
{
    let log = Arc::new(Mutex::new(Vec::new()));
    registry().lock().unwrap().insert(
        conninfo.to_string(),
        Script {
            responder: Arc::new(responder),
            log: log.clone(),
        },
    );
    log
}

fn default_responder(sql: &str) -> Vec<Resp> {
    if sql.starts_with("select exists(select 1 from pg_prepared_statements") {
        return vec![Resp::Tuples(
            vec![(String::from("exists"), Type::BOOL)],
            vec![vec![Some(Bytes::from_static(&[0]))]],
        )];
    }
    vec![Resp::Command(0)]
}

struct MockDriver {
    script: Script,
    queue: VecDeque<Resp>,
    healthy: bool,
}

impl MockDriver {
    fn respond(&mut self, tag: &str, sql: &str) {
        self.script.log.lock().unwrap().push(format!("{tag}:{sql}"));
        self.queue = (self.script.responder)(sql).into();
    }
}

impl Driver for MockDriver {
    fn send_query(&mut self, sql: &str, _params: &Parameters, _format: Format) -> Result<(), Error> {
        self.respond("query", sql);
        Ok(())
    }

    fn send_prepare(&mut self, name: &str, sql: &str, _types: &[Type]) -> Result<(), Error> {
        let line = format!("{name}={sql}");
        self.respond("prepare", &line);
        Ok(())
    }

    fn send_query_prepared(&mut self, name: &str, _params: &Parameters, _format: Format) -> Result<(), Error> {
        self.respond("exec", name);
        Ok(())
    }

    fn send_simple(&mut self, sql: &str) -> Result<(), Error> {
        self.respond("simple", sql);
        Ok(())
    }

    fn set_single_row_mode(&mut self) {
        // explode buffered row sets the way the server streams them
        let mut exploded = VecDeque::new();
        for resp in self.queue.drain(..) {
            match resp {
                Resp::Tuples(cols, rows) => {
                    for row in rows {
                        exploded.push_back(Resp::Single(cols.clone(), row));
                    }
                    exploded.push_back(Resp::Tuples(cols, Vec::new()));
                }
                other => exploded.push_back(other),
            }
        }
        self.queue = exploded;
    }

    fn poll_flush(&mut self) -> Result<bool, Error> {
        Ok(true)
    }

    fn consume_input(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn take_result(&mut self) -> Result<Option<QueryResult>, Error> {
        Ok(self.queue.pop_front().map(Resp::materialize))
    }

    fn cancel(&mut self) -> Result<(), Error> {
        self.script.log.lock().unwrap().push(String::from("cancel"));
        Ok(())
    }

    fn parameter(&self, name: &str) -> Option<String> {
        (name == "lc_monetary").then(|| String::from("C"))
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn close(&mut self) {
        self.healthy = false;
    }
}

struct MockConnector;

impl Connector for MockConnector {
    fn connect(&self, conninfo: &str, _timeout: Duration) -> Result<Box<dyn Driver>, Error> {
        let script = registry().lock().unwrap().get(conninfo).cloned().unwrap_or_else(|| Script {
            responder: Arc::new(default_responder),
            log: Arc::new(Mutex::new(Vec::new())),
        });
        Ok(Box::new(MockDriver {
            script,
            queue: VecDeque::new(),
            healthy: true,
        }))
    }
}

fn ensure_pool() {
    ConnectionPool::init(PoolOptions::new().max_connections(2).connector(MockConnector)).unwrap();
}

fn int4(v: i32) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(&v.to_be_bytes()))
}

fn int8(v: i64) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(&v.to_be_bytes()))
}

fn text(v: &str) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(v.as_bytes()))
}

// ---------------------------------------------------------------------------

#[test]
#[serial]
fn execute_and_query_families() {
    ensure_pool();
    let log = register("mock://families", |sql| {
        if sql.starts_with("insert") {
            vec![Resp::Command(5)]
        } else if sql.starts_with("select count") {
            vec![Resp::Tuples(
                vec![(String::from("count"), Type::INT8)],
                vec![vec![int8(5)]],
            )]
        } else if sql.starts_with("select id, value") {
            vec![Resp::Tuples(
                vec![(String::from("id"), Type::INT4), (String::from("value"), Type::TEXT)],
                vec![
                    vec![int4(1), text("val0")],
                    vec![int4(2), text("val1")],
                ],
            )]
        } else {
            default_responder(sql)
        }
    });

    let session = Session::open("mock://families");

    let affected = session.execute("insert into t(value) values ($1)", Parameters::new()).unwrap();
    assert_eq!(affected, 5);

    let count: i64 = session.query_value("select count(*) from t", Parameters::new()).unwrap();
    assert_eq!(count, 5);

    let table = session.query("select id, value from t order by id", Parameters::new()).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table[0].get::<i32>("id"), 1);
    assert_eq!(table[1].get::<&str>("value"), "val1");

    let row = session.query_single("select id, value from t order by id", Parameters::new()).unwrap();
    assert_eq!(row.unwrap().get::<i32>(0), 1);

    let none = session.query_single("select 1 where false", Parameters::new()).unwrap();
    assert!(none.is_none());

    // scalar query against an empty result is an error, not a default
    let err = session
        .query_value::<i64>("select 1 where false", Parameters::new())
        .unwrap_err();
    assert_eq!(err.downcast_ref::<StateError>(), Some(&StateError::NoRows));

    let sent = log.lock().unwrap();
    assert!(sent.iter().any(|line| line.starts_with("query:insert")));
}

#[test]
#[serial]
fn server_error_surfaces() {
    ensure_pool();
    register("mock://failing", |sql| {
        if sql.starts_with("select boom") {
            vec![Resp::Fatal(String::from("syntax error at or near \"boom\""))]
        } else {
            default_responder(sql)
        }
    });

    let session = Session::open("mock://failing");
    let err = session.query("select boom", Parameters::new()).unwrap_err();
    let db = err.downcast_ref::<DbError>().expect("server error expected");
    assert_eq!(db.code(), "42601");
    assert!(db.message().contains("boom"));
}

#[test]
#[serial]
fn async_callbacks_run_on_strand_in_order() {
    ensure_pool();
    register("mock://async", |sql| {
        if sql.starts_with("select 1") {
            vec![Resp::Tuples(
                vec![(String::from("v"), Type::INT4)],
                vec![vec![int4(1)]],
            )]
        } else if sql.starts_with("select 2") {
            vec![Resp::Tuples(
                vec![(String::from("v"), Type::INT4)],
                vec![vec![int4(2)]],
            )]
        } else {
            default_responder(sql)
        }
    });

    let queue = EventQueue::new();
    let session = Session::open_on(queue.new_strand(), "mock://async");

    let order = Arc::new(Mutex::new(Vec::new()));

    let o = order.clone();
    session.query_value_async::<i32, _>("select 1", Parameters::new(), move |res| {
        o.lock().unwrap().push(res.unwrap());
    });
    let o = order.clone();
    session.query_value_async::<i32, _>("select 2", Parameters::new(), move |res| {
        o.lock().unwrap().push(res.unwrap());
    });

    queue.run();

    // completions are delivered in enqueue order
    assert_eq!(*order.lock().unwrap(), [1, 2]);
    assert!(session.strand().is_empty());
}

#[test]
#[serial]
fn transaction_discipline() {
    ensure_pool();
    let log = register("mock://txn", default_responder);

    let session = Session::open("mock://txn");
    assert!(!session.in_transaction());

    // savepoints require an open transaction
    let err = session.set_savepoint("sp1").unwrap_err();
    assert_eq!(err.downcast_ref::<StateError>(), Some(&StateError::NotInTransaction));

    session.begin().unwrap();
    assert!(session.in_transaction());

    // begin-inside-transaction is a state error
    let err = session.begin().unwrap_err();
    assert_eq!(err.downcast_ref::<StateError>(), Some(&StateError::AlreadyInTransaction));

    session.set_savepoint("sp 1").unwrap();
    session.release_savepoint("sp 1").unwrap();
    session.set_savepoint("sp2").unwrap();
    session.rollback_savepoint("sp2").unwrap();

    session.commit().unwrap();
    assert!(!session.in_transaction());

    // after commit the session holds no transaction lock
    let err = session.commit().unwrap_err();
    assert_eq!(err.downcast_ref::<StateError>(), Some(&StateError::NotInTransaction));

    session.begin().unwrap();
    session.rollback().unwrap();
    assert!(!session.in_transaction());

    let sent = log.lock().unwrap();
    let expected = [
        "simple:BEGIN",
        "simple:SAVEPOINT \"sp 1\"",
        "simple:RELEASE SAVEPOINT \"sp 1\"",
        "simple:SAVEPOINT \"sp2\"",
        "simple:ROLLBACK TO SAVEPOINT \"sp2\"",
        "simple:COMMIT",
        "simple:BEGIN",
        "simple:ROLLBACK",
    ];
    assert_eq!(*sent, expected);
}

#[test]
#[serial]
fn exec_queries_splits_and_wraps_in_transaction() {
    ensure_pool();
    let log = register("mock://script", default_responder);

    let session = Session::open("mock://script");
    session
        .exec_queries("create table a(i int); -- comment\ninsert into a values (1);; insert into a values (2)")
        .unwrap();

    let sent = log.lock().unwrap();
    let expected = [
        "simple:BEGIN",
        "simple:create table a(i int)",
        "simple:insert into a values (1)",
        "simple:insert into a values (2)",
        "simple:COMMIT",
    ];
    assert_eq!(*sent, expected);
}

#[test]
#[serial]
fn exec_queries_aborts_and_rolls_back_on_error() {
    ensure_pool();
    let log = register("mock://script-err", |sql| {
        if sql.starts_with("boom") {
            vec![Resp::Fatal(String::from("no such table"))]
        } else {
            default_responder(sql)
        }
    });

    let session = Session::open("mock://script-err");
    let err = session.exec_queries("insert into a values (1); boom; insert into a values (2)");
    assert!(err.is_err());

    let sent = log.lock().unwrap();
    let expected = [
        "simple:BEGIN",
        "simple:insert into a values (1)",
        "simple:boom",
        "simple:ROLLBACK",
    ];
    assert_eq!(*sent, expected);
    assert!(!session.in_transaction());
}

#[test]
#[serial]
fn async_exec_queries_matches_sync_semantics() {
    ensure_pool();
    let log = register("mock://script-async", default_responder);

    let queue = EventQueue::new();
    let session = Session::open_on(queue.new_strand(), "mock://script-async");

    let done = Arc::new(Mutex::new(None));
    let d = done.clone();
    session.exec_queries_async("select 1; select 2", move |res| {
        *d.lock().unwrap() = Some(res.is_ok());
    });
    queue.run();

    assert_eq!(*done.lock().unwrap(), Some(true));
    let sent = log.lock().unwrap();
    assert_eq!(
        *sent,
        ["simple:BEGIN", "simple:select 1", "simple:select 2", "simple:COMMIT"]
    );
}

#[test]
#[serial]
fn reader_streams_and_close_cancels() {
    ensure_pool();
    let log = register("mock://reader", |sql| {
        if sql.starts_with("select * from t") {
            vec![Resp::Tuples(
                vec![(String::from("id"), Type::INT4)],
                (1..=5).map(|id| vec![int4(id)]).collect(),
            )]
        } else {
            default_responder(sql)
        }
    });

    let session = Session::open("mock://reader");
    let mut reader = session.query_reader("select * from t order by id", Parameters::new()).unwrap();

    for expect in 1..=3 {
        let row = reader.next().unwrap().expect("row expected");
        assert_eq!(row.get::<i32>(0), expect);
    }

    reader.close();
    assert!(reader.closed());

    let err = reader.next().unwrap_err();
    assert_eq!(err.downcast_ref::<StateError>(), Some(&StateError::ReaderClosed));

    // closing mid-stream issued an out-of-band cancel
    assert!(log.lock().unwrap().iter().any(|line| line == "cancel"));
}

#[test]
#[serial]
fn reader_end_of_stream_closes_once() {
    ensure_pool();
    register("mock://reader-end", |sql| {
        if sql.starts_with("select") {
            vec![Resp::Tuples(
                vec![(String::from("id"), Type::INT4)],
                vec![vec![int4(7)]],
            )]
        } else {
            default_responder(sql)
        }
    });

    let session = Session::open("mock://reader-end");
    let mut reader = session.query_reader("select id from t", Parameters::new()).unwrap();

    assert_eq!(reader.next().unwrap().unwrap().get::<i32>(0), 7);
    assert!(reader.next().unwrap().is_none());
    assert!(reader.closed());
    assert!(reader.next().is_err());
}

#[test]
#[serial]
fn prepared_statement_lifecycle() {
    ensure_pool();
    let log = register("mock://prepared", |sql| {
        if sql.starts_with("select exists(select 1 from pg_prepared_statements") {
            vec![Resp::Tuples(
                vec![(String::from("exists"), Type::BOOL)],
                vec![vec![Some(Bytes::from_static(&[0]))]],
            )]
        } else if sql == "abc" {
            vec![Resp::Tuples(
                vec![(String::from("a"), Type::INT8), (String::from("b"), Type::TEXT)],
                vec![vec![int8(64), text("test")]],
            )]
        } else {
            default_responder(sql)
        }
    });

    let session = Session::open("mock://prepared");
    let stmt = session
        .prepare("abc", "select $1 a, $2 b", false, &[Type::INT8, Type::TEXT])
        .unwrap();
    assert_eq!(stmt.name(), "abc");

    let mut params = Parameters::new();
    params.push(&64_i64).unwrap().push(&"test").unwrap();
    let row = stmt.query_single(params).unwrap().unwrap();
    assert_eq!(row.get::<i64>("a"), 64);
    assert_eq!(row.get::<&str>("b"), "test");

    session.deallocate_prepared("abc").unwrap();

    let sent = log.lock().unwrap();
    assert!(sent.iter().any(|line| line == "prepare:abc=select $1 a, $2 b"));
    assert!(sent.iter().any(|line| line == "exec:abc"));
    assert!(sent.iter().any(|line| line == "query:DEALLOCATE PREPARE \"abc\""));
}

#[test]
#[serial]
fn prepare_short_circuits_on_existing_statement() {
    ensure_pool();
    let log = register("mock://prepared-existing", |sql| {
        if sql.starts_with("select exists(select 1 from pg_prepared_statements") {
            vec![Resp::Tuples(
                vec![(String::from("exists"), Type::BOOL)],
                vec![vec![Some(Bytes::from_static(&[1]))]],
            )]
        } else {
            default_responder(sql)
        }
    });

    let session = Session::open("mock://prepared-existing");
    let _stmt = session.prepare("known", "select 1", false, &[]).unwrap();

    let sent = log.lock().unwrap();
    assert!(!sent.iter().any(|line| line.starts_with("prepare:")));
}

#[test]
#[serial]
fn auto_deallocate_on_drop() {
    ensure_pool();
    let log = register("mock://prepared-auto", default_responder);

    let queue = EventQueue::new();
    let session = Session::open_on(queue.new_strand(), "mock://prepared-auto");

    let stmt = session.prepare("tmp", "select 1", true, &[]).unwrap();
    drop(stmt);
    queue.run();

    let sent = log.lock().unwrap();
    assert!(sent.iter().any(|line| line == "query:DEALLOCATE PREPARE \"tmp\""));
}

#[test]
#[serial]
fn stealing_under_saturation() {
    ensure_pool();
    register("mock://steal", default_responder);

    let a = Session::open("mock://steal");
    let b = Session::open("mock://steal");
    let c = Session::open("mock://steal");

    // pin both pool slots inside transactions
    a.begin().unwrap();
    b.begin().unwrap();

    // a transaction-pinned connection is never stolen; the acquire times
    // out carrying the locked count
    let err = c
        .open_connection(Some(Duration::from_millis(500)))
        .unwrap_err();
    match err.downcast_ref::<PoolError>() {
        Some(PoolError::Exhausted { opened }) => assert_eq!(*opened, 2),
        other => panic!("expected pool exhaustion, got {other:?}"),
    }
    assert!(err.to_string().contains("'2'"));

    // once an owner goes idle its connection is fair game
    a.commit().unwrap();
    let reservation = c.open_connection(Some(Duration::from_millis(500))).unwrap();
    drop(reservation);

    let affected = c.execute("select 1", Parameters::new()).unwrap();
    assert_eq!(affected, 0);

    b.rollback().unwrap();
}

#[test]
#[serial]
fn connect_task_requeues_until_capacity_frees() {
    ensure_pool();
    register("mock://steal-async", default_responder);

    let queue = EventQueue::new();
    let a = Session::open_on(queue.new_strand(), "mock://steal-async");
    let b = Session::open_on(queue.new_strand(), "mock://steal-async");
    let c = Session::open_on(queue.new_strand(), "mock://steal-async");

    a.begin().unwrap();
    b.begin().unwrap();

    let got = Arc::new(Mutex::new(None));
    let g = got.clone();
    c.open_connection_async(Duration::from_secs(5), move |res| {
        *g.lock().unwrap() = Some(res.map(drop));
    });

    // the connect task keeps requeueing while the pool is exhausted
    for _ in 0..10 {
        queue.run_one();
    }
    assert!(got.lock().unwrap().is_none());

    // free a slot and drive the strand to completion
    a.commit().unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while got.lock().unwrap().is_none() {
        if !queue.run_one() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(std::time::Instant::now() < deadline, "connect task never completed");
    }
    assert!(matches!(*got.lock().unwrap(), Some(Ok(()))));

    b.rollback().unwrap();
}

#[test]
#[serial]
fn pool_destroy_fails_operations_deterministically() {
    ensure_pool();
    register("mock://teardown", default_responder);

    let session = Session::open("mock://teardown");
    session.execute("select 1", Parameters::new()).unwrap();

    ConnectionPool::destroy();

    let err = session.execute("select 1", Parameters::new()).unwrap_err();
    assert!(matches!(err.downcast_ref::<PoolError>(), Some(PoolError::NotInitialized)));

    // restore the pool for the remaining tests
    ensure_pool();
}

#[test]
#[serial]
fn large_object_lifecycle() {
    ensure_pool();
    let payload = Arc::new(Mutex::new(Vec::<u8>::new()));
    let store = payload.clone();
    let log = register("mock://lo", move |sql| {
        if sql.starts_with("select lo_creat") {
            vec![Resp::Tuples(
                vec![(String::from("lo_creat"), Type::OID)],
                vec![vec![Some(Bytes::copy_from_slice(&7777_u32.to_be_bytes()))]],
            )]
        } else if sql.starts_with("select lo_open") {
            vec![Resp::Tuples(
                vec![(String::from("lo_open"), Type::INT4)],
                vec![vec![int4(0)]],
            )]
        } else if sql.starts_with("select lowrite") {
            vec![Resp::Tuples(
                vec![(String::from("lowrite"), Type::INT4)],
                vec![vec![int4(4)]],
            )]
        } else if sql.starts_with("select loread") {
            vec![Resp::Tuples(
                vec![(String::from("loread"), Type::BYTEA)],
                vec![vec![Some(Bytes::copy_from_slice(&store.lock().unwrap()))]],
            )]
        } else if sql.starts_with("select lo_close") || sql.starts_with("select lo_unlink") {
            vec![Resp::Tuples(
                vec![(String::from("r"), Type::INT4)],
                vec![vec![int4(0)]],
            )]
        } else {
            default_responder(sql)
        }
    });
    *payload.lock().unwrap() = vec![0xde, 0xad, 0xbe, 0xef];

    let session = Session::open("mock://lo");

    let mut lo = session.create_lo().unwrap();
    assert_eq!(lo.oid(), 7777);
    assert!(!lo.is_open());

    lo.open(strand_postgres::LoMode::Write).unwrap();
    assert!(lo.is_open());
    assert!(lo.opened_write());

    // open wraps the access in a locally begun transaction
    assert!(session.in_transaction());

    let err = lo.open(strand_postgres::LoMode::Read).unwrap_err();
    assert_eq!(err.downcast_ref::<StateError>(), Some(&StateError::LargeObjectOpen));

    assert_eq!(lo.write(&[0xde, 0xad, 0xbe, 0xef]).unwrap(), 4);
    lo.close().unwrap();
    assert!(!session.in_transaction());

    lo.open(strand_postgres::LoMode::Read).unwrap();
    let bytes = lo.read(4).unwrap();
    assert_eq!(&bytes[..], [0xde, 0xad, 0xbe, 0xef]);
    lo.close().unwrap();

    lo.unlink().unwrap();

    let sent = log.lock().unwrap();
    assert!(sent.iter().any(|line| line.starts_with("query:select lo_creat")));
    assert!(sent.iter().filter(|line| *line == "simple:BEGIN").count() >= 2);
    assert!(sent.iter().filter(|line| *line == "simple:COMMIT").count() >= 2);
}

#[test]
#[serial]
fn large_object_adopts_active_transaction() {
    ensure_pool();
    let log = register("mock://lo-txn", |sql| {
        if sql.starts_with("select lo_open") || sql.starts_with("select lo_close") {
            vec![Resp::Tuples(
                vec![(String::from("r"), Type::INT4)],
                vec![vec![int4(0)]],
            )]
        } else {
            default_responder(sql)
        }
    });

    let session = Session::open("mock://lo-txn");
    session.begin().unwrap();

    let mut lo = session.get_lo(4242);
    lo.open(strand_postgres::LoMode::Write).unwrap();
    lo.close().unwrap();

    // the caller's transaction was adopted, not committed underneath it
    assert!(session.in_transaction());
    session.commit().unwrap();

    let sent = log.lock().unwrap();
    assert_eq!(sent.iter().filter(|line| *line == "simple:BEGIN").count(), 1);
    assert_eq!(sent.iter().filter(|line| *line == "simple:COMMIT").count(), 1);
    assert_eq!(sent.last().map(String::as_str), Some("simple:COMMIT"));
}

#[test]
#[serial]
fn read_on_closed_large_object_fails() {
    ensure_pool();
    register("mock://lo-closed", default_responder);

    let session = Session::open("mock://lo-closed");
    let mut lo = session.get_lo(42);
    for err in [
        lo.read(1).unwrap_err(),
        lo.write(&[1]).unwrap_err(),
        lo.tell().unwrap_err(),
        lo.close().unwrap_err(),
    ] {
        assert_eq!(err.downcast_ref::<StateError>(), Some(&StateError::LargeObjectClosed));
    }
}
