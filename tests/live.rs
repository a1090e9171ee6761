//! end-to-end scenarios against a real server.
//!
//! these run only when `STRAND_PG_TEST_DSN` points at a database, e.g.
//! `STRAND_PG_TEST_DSN="host=localhost user=postgres password=postgres" cargo test`

use std::time::Duration;

use serial_test::serial;
use uuid::Uuid;

use strand_postgres::{
    error::PoolError,
    pool::{ConnectionPool, PoolOptions},
    types::{Parameters, Type},
    LoMode, Session,
};

fn dsn() -> Option<String> {
    std::env::var("STRAND_PG_TEST_DSN").ok()
}

fn setup(max_connections: usize) -> Option<Session> {
    let dsn = dsn()?;
    ConnectionPool::destroy();
    ConnectionPool::init(PoolOptions::new().max_connections(max_connections)).unwrap();
    Some(Session::open(&dsn))
}

fn fresh_table(session: &Session) {
    session.exec_queries(
        "drop table if exists strand_pg_test; \
         create table strand_pg_test(id serial primary key, value text);",
    )
    .unwrap();
}

#[test]
#[serial]
fn scalar_round_trip() {
    let Some(session) = setup(20) else { return };
    fresh_table(&session);

    for i in 0..5 {
        let mut params = Parameters::new();
        params.push(&format!("val{i}")).unwrap();
        session
            .execute("insert into strand_pg_test(value) values ($1)", params)
            .unwrap();
    }

    let count: i64 = session
        .query_value("select count(*) from strand_pg_test", Parameters::new())
        .unwrap();
    assert_eq!(count, 5);
}

#[test]
#[serial]
fn parameter_echo() {
    let Some(session) = setup(20) else { return };

    let id = Uuid::parse_str("6be8d93c-e458-11e8-bd0e-1c872c561fcc").unwrap();
    let mut params = Parameters::new();
    params.push(&id).unwrap();
    let back: Uuid = session.query_value("select $1::uuid", params).unwrap();
    assert_eq!(back, id);
}

#[test]
#[serial]
fn streaming_reader_with_mid_stream_close() {
    let Some(session) = setup(20) else { return };
    fresh_table(&session);

    for i in 0..5 {
        let mut params = Parameters::new();
        params.push(&format!("val{i}")).unwrap();
        session
            .execute("insert into strand_pg_test(value) values ($1)", params)
            .unwrap();
    }

    let mut reader = session
        .query_reader("select * from strand_pg_test order by id", Parameters::new())
        .unwrap();

    for expect in 1..=3 {
        let row = reader.next().unwrap().expect("row expected");
        assert_eq!(row.get::<i32>("id"), expect);
    }

    reader.close();
    assert!(reader.closed());
    assert!(reader.next().is_err());

    // the connection stays usable after the cancel drained it
    let one: i32 = session.query_value("select 1", Parameters::new()).unwrap();
    assert_eq!(one, 1);
}

#[test]
#[serial]
fn prepared_handle_rebind() {
    let Some(session) = setup(20) else { return };

    let today = chrono::Local::now().date_naive();

    let stmt = session
        .prepare("abc", "select $1 a, $2 b", false, &[Type::INT8, Type::DATE])
        .unwrap();
    let mut params = Parameters::new();
    params.push(&64_i64).unwrap().push(&today).unwrap();
    let row = stmt.query_single(params).unwrap().unwrap();
    assert_eq!(row.get::<i64>("a"), 64);
    assert_eq!(row.get::<chrono::NaiveDate>("b"), today);
    drop(stmt);

    session.deallocate_prepared("abc").unwrap();

    let stmt = session
        .prepare("abc", "select $1 a, $2 b, $3 c", false, &[Type::INT8, Type::DATE, Type::TEXT])
        .unwrap();
    let mut params = Parameters::new();
    params.push(&64_i64).unwrap().push(&today).unwrap().push(&"test").unwrap();
    let row = stmt.query_single(params).unwrap().unwrap();
    assert_eq!(row.get::<i64>("a"), 64);
    assert_eq!(row.get::<chrono::NaiveDate>("b"), today);
    assert_eq!(row.get::<&str>("c"), "test");

    session.deallocate_prepared("abc").unwrap();
}

#[test]
#[serial]
fn stealing_under_saturation() {
    let Some(dsn) = dsn() else { return };
    ConnectionPool::destroy();
    ConnectionPool::init(PoolOptions::new().max_connections(2)).unwrap();

    let a = Session::open(&dsn);
    let b = Session::open(&dsn);
    let c = Session::open(&dsn);

    a.begin().unwrap();
    b.begin().unwrap();

    let err = c.open_connection(Some(Duration::from_millis(500))).unwrap_err();
    match err.downcast_ref::<PoolError>() {
        Some(PoolError::Exhausted { opened }) => assert_eq!(*opened, 2),
        other => panic!("expected pool exhaustion, got {other:?}"),
    }

    a.commit().unwrap();

    let one: i32 = c.query_value("select 1", Parameters::new()).unwrap();
    assert_eq!(one, 1);

    b.rollback().unwrap();
}

#[test]
#[serial]
fn begin_rollback_leaves_state_unchanged() {
    let Some(session) = setup(20) else { return };
    fresh_table(&session);

    session.begin().unwrap();
    let mut params = Parameters::new();
    params.push(&"inside").unwrap();
    session
        .execute("insert into strand_pg_test(value) values ($1)", params)
        .unwrap();
    session.rollback().unwrap();

    let count: i64 = session
        .query_value("select count(*) from strand_pg_test", Parameters::new())
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
#[serial]
fn large_object_lifecycle() {
    let Some(session) = setup(20) else { return };

    let mut lo = session.create_lo().unwrap();
    let oid = lo.oid();

    lo.open(LoMode::Write).unwrap();
    assert_eq!(lo.write(&[0xde, 0xad, 0xbe, 0xef]).unwrap(), 4);
    lo.close().unwrap();

    lo.open(LoMode::Read).unwrap();
    let bytes = lo.read(4).unwrap();
    assert_eq!(&bytes[..], [0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(lo.tell().unwrap(), 4);
    lo.close().unwrap();

    lo.unlink().unwrap();

    // the object is gone: a fresh handle cannot be opened
    let mut gone = session.get_lo(oid);
    assert!(gone.open(LoMode::Read).is_err());
    assert!(!session.in_transaction());
}

#[test]
#[serial]
fn money_uses_server_locale_parameter() {
    let Some(session) = setup(20) else { return };

    let m: strand_postgres::types::Money = session
        .query_value("select 12.54::money", Parameters::new())
        .unwrap();
    let locale = session.money_locale();
    assert_eq!(m.to_plain_string(&locale), "12.54");
}
