//! date, time, timestamp and interval codecs.
//!
//! the server counts from midnight 2000-01-01 at microsecond resolution;
//! conversion to and from chrono's calendar types happens here. the
//! `infinity` sentinels have no chrono representation and fail decoding.

use bytes::{BufMut, BytesMut};
use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::error::FromSqlError;

use super::{check_len, FromSql, IsNull, PgType, ToSql, Type};

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
}

fn base_datetime() -> NaiveDateTime {
    base_date().and_hms_opt(0, 0, 0).unwrap()
}

pub(crate) fn date_to_wire(date: &NaiveDate) -> Result<i32, FromSqlError> {
    i32::try_from((*date - base_date()).num_days()).map_err(|_| "date out of range".into())
}

pub(crate) fn date_from_wire(days: i32) -> Result<NaiveDate, FromSqlError> {
    if days == i32::MAX || days == i32::MIN {
        return Err("infinite date cannot be represented".into());
    }
    base_date()
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| "date out of range".into())
}

pub(crate) fn timestamp_to_wire(ts: &NaiveDateTime) -> Result<i64, FromSqlError> {
    (*ts - base_datetime())
        .num_microseconds()
        .ok_or_else(|| "timestamp out of range".into())
}

pub(crate) fn timestamp_from_wire(micros: i64) -> Result<NaiveDateTime, FromSqlError> {
    if micros == i64::MAX || micros == i64::MIN {
        return Err("infinite timestamp cannot be represented".into());
    }
    base_datetime()
        .checked_add_signed(Duration::microseconds(micros))
        .ok_or_else(|| "timestamp out of range".into())
}

fn time_to_wire(time: &NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * 1_000_000 + i64::from(time.nanosecond() / 1000)
}

fn time_from_wire(micros: i64) -> Result<NaiveTime, FromSqlError> {
    if !(0..86_400_000_000 + 1_000_000).contains(&micros) {
        return Err("time of day out of range".into());
    }
    let secs = (micros / 1_000_000) as u32;
    let nanos = ((micros % 1_000_000) * 1000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).ok_or_else(|| "time of day out of range".into())
}

impl PgType for NaiveDate {
    fn pg_type() -> Type {
        Type::DATE
    }

    fn pg_array_type() -> Type {
        Type::DATE_ARRAY
    }
}

impl ToSql for NaiveDate {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_i32(date_to_wire(self)?);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for NaiveDate {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::DATE
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 4)?;
        date_from_wire(BigEndian::read_i32(raw))
    }
}

impl PgType for NaiveTime {
    fn pg_type() -> Type {
        Type::TIME
    }

    fn pg_array_type() -> Type {
        Type::TIME_ARRAY
    }
}

impl ToSql for NaiveTime {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_i64(time_to_wire(self));
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for NaiveTime {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIME
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 8)?;
        time_from_wire(BigEndian::read_i64(raw))
    }
}

/// time of day with a fixed utc offset, the `timetz` type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimeTz {
    pub time: NaiveTime,
    pub offset: FixedOffset,
}

impl PgType for TimeTz {
    fn pg_type() -> Type {
        Type::TIMETZ
    }

    fn pg_array_type() -> Type {
        Type::TIMETZ_ARRAY
    }
}

impl ToSql for TimeTz {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_i64(time_to_wire(&self.time));
        // the wire counts seconds west of utc
        out.put_i32(-self.offset.local_minus_utc());
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for TimeTz {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIMETZ
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 12)?;
        let time = time_from_wire(BigEndian::read_i64(raw))?;
        let west = BigEndian::read_i32(&raw[8..]);
        let offset = FixedOffset::west_opt(west).ok_or("timetz offset out of range")?;
        Ok(TimeTz { time, offset })
    }
}

impl PgType for NaiveDateTime {
    fn pg_type() -> Type {
        Type::TIMESTAMP
    }

    fn pg_array_type() -> Type {
        Type::TIMESTAMP_ARRAY
    }
}

impl ToSql for NaiveDateTime {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_i64(timestamp_to_wire(self)?);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for NaiveDateTime {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIMESTAMP
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 8)?;
        timestamp_from_wire(BigEndian::read_i64(raw))
    }
}

impl PgType for DateTime<Utc> {
    fn pg_type() -> Type {
        Type::TIMESTAMPTZ
    }

    fn pg_array_type() -> Type {
        Type::TIMESTAMPTZ_ARRAY
    }
}

impl ToSql for DateTime<Utc> {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_i64(timestamp_to_wire(&self.naive_utc())?);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for DateTime<Utc> {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIMESTAMPTZ
    }

    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        NaiveDateTime::from_sql(ty, raw).map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
    }
}

/// the `interval` type: months, days and microseconds kept apart, the way the
/// server stores them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub microseconds: i64,
}

impl Interval {
    pub fn new(months: i32, days: i32, microseconds: i64) -> Self {
        Self {
            months,
            days,
            microseconds,
        }
    }
}

impl PgType for Interval {
    fn pg_type() -> Type {
        Type::INTERVAL
    }

    fn pg_array_type() -> Type {
        Type::INTERVAL_ARRAY
    }
}

impl ToSql for Interval {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_i64(self.microseconds);
        out.put_i32(self.days);
        out.put_i32(self.months);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Interval {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 16)?;
        Ok(Interval {
            microseconds: BigEndian::read_i64(raw),
            days: BigEndian::read_i32(&raw[8..]),
            months: BigEndian::read_i32(&raw[12..]),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip<T>(value: T) -> T
    where
        T: ToSql + for<'a> FromSql<'a>,
    {
        let mut buf = BytesMut::new();
        value.to_sql(&T::pg_type(), &mut buf).unwrap();
        T::from_sql(&T::pg_type(), &buf).unwrap()
    }

    #[test]
    fn date() {
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        let mut buf = BytesMut::new();
        epoch.to_sql(&Type::DATE, &mut buf).unwrap();
        assert_eq!(&buf[..], [0, 0, 0, 0]);

        let d = NaiveDate::from_ymd_opt(2018, 11, 26).unwrap();
        assert_eq!(round_trip(d), d);

        let before = NaiveDate::from_ymd_opt(1969, 7, 20).unwrap();
        assert_eq!(round_trip(before), before);

        assert!(NaiveDate::from_sql(&Type::DATE, &i32::MAX.to_be_bytes()).is_err());
    }

    #[test]
    fn time() {
        let t = NaiveTime::from_hms_micro_opt(10, 30, 5, 123_456).unwrap();
        assert_eq!(round_trip(t), t);

        let mut buf = BytesMut::new();
        NaiveTime::from_hms_opt(0, 0, 1).unwrap().to_sql(&Type::TIME, &mut buf).unwrap();
        assert_eq!(&buf[..], 1_000_000_i64.to_be_bytes());
    }

    #[test]
    fn time_tz() {
        let t = TimeTz {
            time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            offset: FixedOffset::east_opt(-5 * 3600).unwrap(),
        };
        assert_eq!(round_trip(t), t);

        let mut buf = BytesMut::new();
        t.to_sql(&Type::TIMETZ, &mut buf).unwrap();
        // seconds west of utc
        assert_eq!(&buf[8..], (5 * 3600_i32).to_be_bytes());
    }

    #[test]
    fn timestamp() {
        let ts = NaiveDate::from_ymd_opt(2018, 11, 26)
            .unwrap()
            .and_hms_micro_opt(10, 0, 0, 42)
            .unwrap();
        assert_eq!(round_trip(ts), ts);

        let tz: DateTime<Utc> = DateTime::from_naive_utc_and_offset(ts, Utc);
        assert_eq!(round_trip(tz), tz);

        assert!(NaiveDateTime::from_sql(&Type::TIMESTAMP, &i64::MAX.to_be_bytes()).is_err());
    }

    #[test]
    fn interval() {
        let iv = Interval::new(14, 3, 7_200_000_001);
        assert_eq!(round_trip(iv), iv);

        let mut buf = BytesMut::new();
        iv.to_sql(&Type::INTERVAL, &mut buf).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[8..12], 3_i32.to_be_bytes());
        assert_eq!(&buf[12..], 14_i32.to_be_bytes());
    }
}
