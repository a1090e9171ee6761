//! typed access through the row layer: values encoded with the codec come
//! back intact after passing through a result set.

use bytes::{Bytes, BytesMut};
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use strand_postgres::{
    protocol::QueryResult,
    types::{
        Format, IsNull, Json, MacAddr, Money, Numeric, Parameters, PgArray, PgRange, PgType, Point, RangeBound,
        ToSql, Type,
    },
};

fn encode<T>(value: &T) -> Option<Bytes>
where
    T: ToSql,
{
    encode_as(&T::pg_type(), value)
}

fn encode_as<T>(ty: &Type, value: &T) -> Option<Bytes>
where
    T: ToSql,
{
    let mut buf = BytesMut::new();
    match value.to_sql(ty, &mut buf).unwrap() {
        IsNull::No => Some(buf.freeze()),
        IsNull::Yes => None,
    }
}

#[test]
fn typed_row_round_trip() {
    let id = Uuid::parse_str("6be8d93c-e458-11e8-bd0e-1c872c561fcc").unwrap();
    let price: Numeric = "12.54".parse().unwrap();
    let cash: Money = "150.00".parse().unwrap();
    let born = NaiveDate::from_ymd_opt(1982, 7, 14).unwrap();
    let ids = vec![1_i32, 2, 3];
    let span = PgRange::new(RangeBound::Inclusive(1_i64), RangeBound::Exclusive(10_i64));
    let mac: MacAddr = "08:00:2b:01:02:03".parse().unwrap();
    let at = Point::new(1.5, -0.5);
    let meta = Json(serde_json::json!({"tags": ["a", "b"]}));

    let result = QueryResult::tuples(
        vec![
            (String::from("id"), Type::UUID),
            (String::from("price"), Type::NUMERIC),
            (String::from("cash"), Type::MONEY),
            (String::from("born"), Type::DATE),
            (String::from("ids"), Type::INT4_ARRAY),
            (String::from("span"), Type::INT8_RANGE),
            (String::from("mac"), Type::MACADDR),
            (String::from("at"), Type::POINT),
            (String::from("meta"), Type::JSONB),
            (String::from("gone"), Type::TEXT),
        ],
        vec![vec![
            encode(&id),
            encode(&price),
            encode(&cash),
            encode(&born),
            encode(&ids),
            encode(&span),
            encode(&mac),
            encode(&at),
            encode(&meta),
            None,
        ]],
    );

    let row = &result.rows()[0];
    assert_eq!(row.get::<Uuid>("id"), id);
    assert_eq!(row.get::<Numeric>("price"), price);
    assert_eq!(row.get::<Numeric>("price").to_string(), "12.54");
    assert_eq!(row.get::<Money>("cash"), cash);
    assert_eq!(row.get::<NaiveDate>("born"), born);
    assert_eq!(row.get::<Vec<i32>>("ids"), ids);
    assert_eq!(row.get::<PgRange<i64>>("span"), span);
    assert_eq!(row.get::<MacAddr>("mac"), mac);
    assert_eq!(row.get::<Point>("at"), at);
    assert_eq!(row.get::<Json>("meta"), meta);
    assert_eq!(row.get::<Option<String>>("gone"), None);
    assert!(row.is_null(9));
}

#[test]
fn option_encodes_as_null() {
    // null is length −1 on the wire, never an empty buffer
    assert_eq!(encode(&Option::<i32>::None), None);
    assert_eq!(encode(&Some(5_i32)).unwrap().len(), 4);

    let empty = encode(&String::new()).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn parameter_bundle_is_eager_and_typed() {
    let mut params = Parameters::new();
    params
        .push(&42_i32)
        .unwrap()
        .push(&Option::<String>::None)
        .unwrap()
        .push(&"text")
        .unwrap();
    assert_eq!(params.len(), 3);
    assert!(!params.is_empty());

    assert_eq!(
        params.oids().collect::<Vec<_>>(),
        [Type::INT4.oid(), Type::TEXT.oid(), Type::TEXT.oid()]
    );
    let values: Vec<_> = params.values().collect();
    assert_eq!(values[0], Some(&42_i32.to_be_bytes()[..]));
    assert_eq!(values[1], None);

    // binding a rust value as a different wire type
    let net: ipnet::IpNet = "10.0.0.0/8".parse().unwrap();
    params.push_as(Type::CIDR, &net).unwrap();
    assert_eq!(params.len(), 4);
}

#[test]
fn parameter_formats_per_value() {
    let mut params = Parameters::new();
    params.push(&7_i32).unwrap();
    params.push_text(Type::DATE, "2018-11-26");
    params.push_raw(Type::BYTEA, None, Format::Binary);

    // every parameter keeps its own format flag for the Bind message
    assert_eq!(
        params.formats().collect::<Vec<_>>(),
        [Format::Binary, Format::Text, Format::Binary]
    );
    assert_eq!(
        params.oids().collect::<Vec<_>>(),
        [Type::INT4.oid(), Type::DATE.oid(), Type::BYTEA.oid()]
    );

    let values: Vec<_> = params.values().collect();
    assert_eq!(values[1], Some(&b"2018-11-26"[..]));
    assert_eq!(values[2], None);
}

#[test]
fn array_dimension_round_trip_through_row() {
    let matrix = PgArray::with_dims(
        vec![
            strand_postgres::types::ArrayDim { len: 2, lower_bound: 1 },
            strand_postgres::types::ArrayDim { len: 2, lower_bound: 1 },
        ],
        vec![1_i64, 2, 3, 4],
    )
    .unwrap();

    let result = QueryResult::tuples(
        vec![(String::from("m"), Type::INT8_ARRAY)],
        vec![vec![encode(&matrix)]],
    );
    let row = &result.rows()[0];
    let back = row.get::<PgArray<i64>>("m");
    assert_eq!(back.dims().len(), 2);
    assert_eq!(back, matrix);
}

#[test]
fn time_of_day_keeps_microseconds() {
    let t = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap();
    let result = QueryResult::tuples(vec![(String::from("t"), Type::TIME)], vec![vec![encode(&t)]]);
    assert_eq!(result.rows()[0].get::<NaiveTime>(0), t);
}

#[test]
fn wrong_type_is_reported_not_mangled() {
    let result = QueryResult::tuples(
        vec![(String::from("v"), Type::INT4)],
        vec![vec![encode(&7_i32)]],
    );
    let row = &result.rows()[0];
    assert!(row.try_get::<String>("v").is_err());
    assert!(row.try_get::<i64>("v").is_err());
    assert_eq!(row.try_get::<i32>("v").unwrap(), 7);
}
