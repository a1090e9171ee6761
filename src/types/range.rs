//! range type codecs over int4, int8, numeric, timestamp, timestamptz and date.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::FromSqlError;

use super::{FromSql, FromSqlOwned, IsNull, Numeric, PgType, ToSql, Type};

const RANGE_EMPTY: u8 = 0x01;
const LB_INC: u8 = 0x02;
const UB_INC: u8 = 0x04;
const LB_INF: u8 = 0x08;
const UB_INF: u8 = 0x10;
const RESERVED: u8 = !(RANGE_EMPTY | LB_INC | UB_INC | LB_INF | UB_INF);

/// one side of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound<T> {
    Inclusive(T),
    Exclusive(T),
    Unbounded,
}

impl<T> RangeBound<T> {
    /// the bound value, when the side is bounded.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Inclusive(v) | Self::Exclusive(v) => Some(v),
            Self::Unbounded => None,
        }
    }
}

/// a range value. the empty range is distinct from any bounded one, exactly
/// as on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgRange<T> {
    lower: RangeBound<T>,
    upper: RangeBound<T>,
    empty: bool,
}

impl<T> PgRange<T> {
    pub fn new(lower: RangeBound<T>, upper: RangeBound<T>) -> Self {
        Self {
            lower,
            upper,
            empty: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            lower: RangeBound::Unbounded,
            upper: RangeBound::Unbounded,
            empty: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn lower(&self) -> &RangeBound<T> {
        &self.lower
    }

    pub fn upper(&self) -> &RangeBound<T> {
        &self.upper
    }
}

/// types usable as a range subtype, tying the element to its range type oid.
pub trait RangeElement: ToSql + FromSqlOwned {
    fn range_type() -> Type;
    fn range_array_type() -> Type;
}

macro_rules! range_element {
    ($ty:ty, $range:ident, $range_arr:ident) => {
        impl RangeElement for $ty {
            fn range_type() -> Type {
                Type::$range
            }

            fn range_array_type() -> Type {
                Type::$range_arr
            }
        }
    };
}

range_element!(i32, INT4_RANGE, INT4_RANGE_ARRAY);
range_element!(i64, INT8_RANGE, INT8_RANGE_ARRAY);
range_element!(Numeric, NUM_RANGE, NUM_RANGE_ARRAY);
range_element!(NaiveDateTime, TS_RANGE, TS_RANGE_ARRAY);
range_element!(DateTime<Utc>, TSTZ_RANGE, TSTZ_RANGE_ARRAY);
range_element!(NaiveDate, DATE_RANGE, DATE_RANGE_ARRAY);

impl<T> PgType for PgRange<T>
where
    T: RangeElement,
{
    fn pg_type() -> Type {
        T::range_type()
    }

    fn pg_array_type() -> Type {
        T::range_array_type()
    }
}

fn put_bound<T>(value: &T, out: &mut BytesMut) -> Result<(), FromSqlError>
where
    T: ToSql,
{
    let mut buf = BytesMut::new();
    match value.to_sql(&T::pg_type(), &mut buf)? {
        IsNull::No => {}
        IsNull::Yes => return Err("range bound cannot be null".into()),
    }
    out.put_i32(i32::try_from(buf.len()).map_err(|_| "range bound too large")?);
    out.put_slice(&buf);
    Ok(())
}

impl<T> ToSql for PgRange<T>
where
    T: RangeElement,
{
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        if self.empty {
            out.put_u8(RANGE_EMPTY);
            return Ok(IsNull::No);
        }

        let mut flags = 0;
        match &self.lower {
            RangeBound::Inclusive(_) => flags |= LB_INC,
            RangeBound::Exclusive(_) => {}
            RangeBound::Unbounded => flags |= LB_INF,
        }
        match &self.upper {
            RangeBound::Inclusive(_) => flags |= UB_INC,
            RangeBound::Exclusive(_) => {}
            RangeBound::Unbounded => flags |= UB_INF,
        }
        out.put_u8(flags);

        if let Some(value) = self.lower.value() {
            put_bound(value, out)?;
        }
        if let Some(value) = self.upper.value() {
            put_bound(value, out)?;
        }
        Ok(IsNull::No)
    }
}

fn read_bound<'a, T>(raw: &mut &'a [u8]) -> Result<T, FromSqlError>
where
    T: FromSql<'a> + PgType,
{
    if raw.len() < 4 {
        return Err("range buffer shorter than bound header".into());
    }
    let len = BigEndian::read_i32(raw);
    if len < 0 {
        return Err("null range bound on the wire".into());
    }
    let len = len as usize;
    if raw.len() < 4 + len {
        return Err("range buffer shorter than declared bound".into());
    }
    let value = T::from_sql(&T::pg_type(), &raw[4..4 + len])?;
    *raw = &raw[4 + len..];
    Ok(value)
}

impl<'a, T> FromSql<'a> for PgRange<T>
where
    T: RangeElement + PgType,
{
    fn accepts(ty: &Type) -> bool {
        *ty == T::range_type()
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        let (&flags, mut rest) = raw.split_first().ok_or("empty range buffer")?;
        if flags & RESERVED != 0 {
            return Err(format!("reserved range flag bits set: {flags:#04x}").into());
        }
        if flags & RANGE_EMPTY != 0 {
            if !rest.is_empty() {
                return Err("empty range carries bound bytes".into());
            }
            return Ok(Self::empty());
        }

        let lower = if flags & LB_INF != 0 {
            RangeBound::Unbounded
        } else {
            let value = read_bound::<T>(&mut rest)?;
            if flags & LB_INC != 0 {
                RangeBound::Inclusive(value)
            } else {
                RangeBound::Exclusive(value)
            }
        };
        let upper = if flags & UB_INF != 0 {
            RangeBound::Unbounded
        } else {
            let value = read_bound::<T>(&mut rest)?;
            if flags & UB_INC != 0 {
                RangeBound::Inclusive(value)
            } else {
                RangeBound::Exclusive(value)
            }
        };
        if !rest.is_empty() {
            return Err("trailing bytes after range bounds".into());
        }
        Ok(Self::new(lower, upper))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip<T>(range: PgRange<T>) -> PgRange<T>
    where
        T: RangeElement + core::fmt::Debug,
    {
        let mut buf = BytesMut::new();
        range.to_sql(&T::range_type(), &mut buf).unwrap();
        PgRange::<T>::from_sql(&T::range_type(), &buf).unwrap()
    }

    #[test]
    fn int4_range() {
        // '(,3)': unbounded below, exclusive above
        let r = PgRange::new(RangeBound::Unbounded, RangeBound::Exclusive(3_i32));
        assert_eq!(round_trip(r.clone()), r);

        let mut buf = BytesMut::new();
        r.to_sql(&Type::INT4_RANGE, &mut buf).unwrap();
        assert_eq!(&buf[..], [0x08, 0, 0, 0, 4, 0, 0, 0, 3]);
    }

    #[test]
    fn int8_range() {
        let r = PgRange::new(RangeBound::Inclusive(2_i64), RangeBound::Inclusive(2_i64));
        assert_eq!(round_trip(r.clone()), r);
    }

    #[test]
    fn numeric_range() {
        let two: Numeric = "2".parse().unwrap();
        let r = PgRange::new(RangeBound::Unbounded, RangeBound::Inclusive(two));
        assert_eq!(round_trip(r.clone()), r);
    }

    #[test]
    fn date_range() {
        let d = NaiveDate::from_ymd_opt(2018, 11, 26).unwrap();
        let r = PgRange::new(RangeBound::Inclusive(d), RangeBound::Unbounded);
        assert_eq!(round_trip(r.clone()), r);
    }

    #[test]
    fn timestamp_ranges() {
        let ts = NaiveDate::from_ymd_opt(2018, 11, 26).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let r = PgRange::new(RangeBound::Exclusive(ts), RangeBound::Unbounded);
        assert_eq!(round_trip(r.clone()), r);

        let tz: DateTime<Utc> = DateTime::from_naive_utc_and_offset(ts, Utc);
        let r = PgRange::new(RangeBound::Exclusive(tz), RangeBound::Unbounded);
        assert_eq!(round_trip(r.clone()), r);
    }

    #[test]
    fn empty_range() {
        let r = PgRange::<i32>::empty();
        assert!(r.is_empty());
        let mut buf = BytesMut::new();
        r.to_sql(&Type::INT4_RANGE, &mut buf).unwrap();
        assert_eq!(&buf[..], [0x01]);
        assert!(round_trip(r).is_empty());
    }

    #[test]
    fn reserved_flags() {
        assert!(PgRange::<i32>::from_sql(&Type::INT4_RANGE, &[0x20]).is_err());
        assert!(PgRange::<i32>::from_sql(&Type::INT4_RANGE, &[0x80]).is_err());
    }

    #[test]
    fn truncated() {
        // claims a bounded lower side but carries no bytes for it
        assert!(PgRange::<i32>::from_sql(&Type::INT4_RANGE, &[0x02]).is_err());
        assert!(PgRange::<i32>::from_sql(&Type::INT4_RANGE, &[0x02, 0, 0, 0, 4, 0]).is_err());
    }
}
