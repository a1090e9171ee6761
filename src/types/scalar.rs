//! bool, integer, float, text, bytea, oid, uuid and json codecs.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::FromSqlError;

use super::{check_len, FromSql, IsNull, PgType, ToSql, Type};

macro_rules! numeric_impl {
    ($ty:ty, $pg:ident, $pg_arr:ident, $put:ident, $read:ident, $len:expr) => {
        impl PgType for $ty {
            fn pg_type() -> Type {
                Type::$pg
            }

            fn pg_array_type() -> Type {
                Type::$pg_arr
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
                out.$put(*self);
                Ok(IsNull::No)
            }
        }

        impl<'a> FromSql<'a> for $ty {
            fn accepts(ty: &Type) -> bool {
                *ty == Type::$pg
            }

            fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
                check_len(raw, $len)?;
                Ok(BigEndian::$read(raw))
            }
        }
    };
}

numeric_impl!(i16, INT2, INT2_ARRAY, put_i16, read_i16, 2);
numeric_impl!(i32, INT4, INT4_ARRAY, put_i32, read_i32, 4);
numeric_impl!(i64, INT8, INT8_ARRAY, put_i64, read_i64, 8);
numeric_impl!(f32, FLOAT4, FLOAT4_ARRAY, put_f32, read_f32, 4);
numeric_impl!(f64, FLOAT8, FLOAT8_ARRAY, put_f64, read_f64, 8);

impl PgType for bool {
    fn pg_type() -> Type {
        Type::BOOL
    }

    fn pg_array_type() -> Type {
        Type::BOOL_ARRAY
    }
}

impl ToSql for bool {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_u8(*self as u8);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for bool {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::BOOL
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 1)?;
        Ok(raw[0] != 0)
    }
}

/// object identifier. `u32` binds and decodes as the `oid` type.
impl PgType for u32 {
    fn pg_type() -> Type {
        Type::OID
    }

    fn pg_array_type() -> Type {
        Type::OID_ARRAY
    }
}

impl ToSql for u32 {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_u32(*self);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for u32 {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::OID
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 4)?;
        Ok(BigEndian::read_u32(raw))
    }
}

fn accepts_text(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME || *ty == Type::UNKNOWN
}

impl PgType for str {
    fn pg_type() -> Type {
        Type::TEXT
    }

    fn pg_array_type() -> Type {
        Type::TEXT_ARRAY
    }
}

impl ToSql for str {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_slice(self.as_bytes());
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for &'a str {
    fn accepts(ty: &Type) -> bool {
        accepts_text(ty)
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        core::str::from_utf8(raw).map_err(Into::into)
    }
}

impl PgType for String {
    fn pg_type() -> Type {
        Type::TEXT
    }

    fn pg_array_type() -> Type {
        Type::TEXT_ARRAY
    }
}

impl ToSql for String {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        self.as_str().to_sql(ty, out)
    }
}

impl<'a> FromSql<'a> for String {
    fn accepts(ty: &Type) -> bool {
        accepts_text(ty)
    }

    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        <&str as FromSql>::from_sql(ty, raw).map(str::to_owned)
    }
}

impl PgType for [u8] {
    fn pg_type() -> Type {
        Type::BYTEA
    }

    fn pg_array_type() -> Type {
        Type::BYTEA_ARRAY
    }
}

impl ToSql for [u8] {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_slice(self);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for &'a [u8] {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::BYTEA
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        Ok(raw)
    }
}

/// owned bytea. `Vec<u8>` is not used here so that `Vec<T>` can stay the
/// uniform array mapping.
impl PgType for Bytes {
    fn pg_type() -> Type {
        Type::BYTEA
    }

    fn pg_array_type() -> Type {
        Type::BYTEA_ARRAY
    }
}

impl ToSql for Bytes {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_slice(self);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Bytes {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::BYTEA
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        Ok(Bytes::copy_from_slice(raw))
    }
}

impl PgType for Uuid {
    fn pg_type() -> Type {
        Type::UUID
    }

    fn pg_array_type() -> Type {
        Type::UUID_ARRAY
    }
}

impl ToSql for Uuid {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_slice(self.as_bytes());
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Uuid {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::UUID
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 16)?;
        Uuid::from_slice(raw).map_err(Into::into)
    }
}

/// json/jsonb value. both wire variants decode into the same representation;
/// encoding picks the jsonb framing (version byte 1) when bound as `jsonb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json(pub serde_json::Value);

impl PgType for Json {
    fn pg_type() -> Type {
        Type::JSONB
    }

    fn pg_array_type() -> Type {
        Type::JSONB_ARRAY
    }
}

impl ToSql for Json {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        if *ty == Type::JSONB {
            out.put_u8(1);
        }
        let raw = serde_json::to_vec(&self.0)?;
        out.put_slice(&raw);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Json {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::JSON || *ty == Type::JSONB
    }

    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        let raw = if *ty == Type::JSONB {
            let (&version, rest) = raw.split_first().ok_or("missing jsonb version byte")?;
            if version != 1 {
                return Err(format!("unsupported jsonb version {version}").into());
            }
            rest
        } else {
            raw
        };
        serde_json::from_slice(raw).map(Json).map_err(Into::into)
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
        match value.to_sql(&T::pg_type(), &mut buf).unwrap() {
            IsNull::No => T::from_sql(&T::pg_type(), &buf).unwrap(),
            IsNull::Yes => panic!("scalar encoded as null"),
        }
    }

    #[test]
    fn integers() {
        assert_eq!(round_trip(0x1234_i16), 0x1234);
        assert_eq!(round_trip(-42_i32), -42);
        assert_eq!(round_trip(i64::MIN), i64::MIN);

        let mut buf = BytesMut::new();
        1_i32.to_sql(&Type::INT4, &mut buf).unwrap();
        assert_eq!(&buf[..], [0, 0, 0, 1]);
    }

    #[test]
    fn floats() {
        assert_eq!(round_trip(1.5_f32), 1.5);
        assert_eq!(round_trip(-2.25_f64), -2.25);
    }

    #[test]
    fn boolean() {
        assert!(round_trip(true));
        assert!(!round_trip(false));
    }

    #[test]
    fn text() {
        assert_eq!(round_trip(String::from("héllo")), "héllo");
        assert!(<&str as FromSql>::from_sql(&Type::TEXT, &[0xff]).is_err());
    }

    #[test]
    fn bytea() {
        let raw = Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(round_trip(raw.clone()), raw);
        assert_eq!(<&[u8] as FromSql>::from_sql(&Type::BYTEA, &raw).unwrap(), &raw[..]);
    }

    #[test]
    fn uuid() {
        let id = Uuid::parse_str("6be8d93c-e458-11e8-bd0e-1c872c561fcc").unwrap();
        assert_eq!(round_trip(id), id);
        assert!(Uuid::from_sql(&Type::UUID, &[0; 4]).is_err());
    }

    #[test]
    fn json_variants() {
        let value = Json(serde_json::json!({"a": [1, 2, 3]}));

        let mut buf = BytesMut::new();
        value.to_sql(&Type::JSONB, &mut buf).unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(Json::from_sql(&Type::JSONB, &buf).unwrap(), value);

        let plain = serde_json::to_vec(&value.0).unwrap();
        assert_eq!(Json::from_sql(&Type::JSON, &plain).unwrap(), value);
    }

    #[test]
    fn short_buffer() {
        assert!(i32::from_sql(&Type::INT4, &[0, 0]).is_err());
        assert!(bool::from_sql(&Type::BOOL, &[]).is_err());
    }
}
