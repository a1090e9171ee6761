//! binary format conversion between rust values and postgres wire values.
//!
//! every supported type round-trips exactly: `decode(encode(v)) == v`. a null
//! value is always length −1 on the wire, never an empty buffer; decoding a
//! null into a non-[`Option`] type fails with [`WasNull`].
//!
//! [`WasNull`]: crate::error::WasNull

mod array;
mod geometric;
mod money;
mod net;
mod numeric;
mod range;
mod scalar;
mod time;

pub use postgres_types::{Kind, Oid, Type};

pub use self::{
    array::{ArrayDim, ArrayView, PgArray},
    geometric::{Circle, Line, LineSegment, Path, PgBox, Point, Polygon},
    money::{Money, MoneyLocale},
    net::{MacAddr, MacAddr8},
    numeric::Numeric,
    range::{PgRange, RangeBound, RangeElement},
    scalar::Json,
    time::{Interval, TimeTz},
};

use bytes::{Bytes, BytesMut};

use super::error::{Error, FromSqlError, WasNull};

/// wire representation of a value or result column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum Format {
    Text = 0,
    #[default]
    Binary = 1,
}

impl Format {
    pub(crate) fn from_wire(raw: i16) -> Format {
        if raw == 0 {
            Format::Text
        } else {
            Format::Binary
        }
    }
}

/// outcome of encoding a value: either bytes were written or the value is sql `NULL`.
pub enum IsNull {
    Yes,
    No,
}

/// the statically declared postgres type of a rust value, used to stamp
/// parameter oids at bind time.
pub trait PgType {
    /// the wire type values of this rust type bind as.
    fn pg_type() -> Type;

    /// the array type whose elements are [`PgType::pg_type`].
    fn pg_array_type() -> Type;
}

/// a value that can be encoded into the postgres binary format.
pub trait ToSql: PgType {
    /// encode `self` as a value of `ty` into `out`. the length header is
    /// written by the caller.
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError>;
}

/// a value that can be decoded from the postgres binary format.
pub trait FromSql<'a>: Sized {
    /// whether values of the given postgres type can decode into `Self`.
    fn accepts(ty: &Type) -> bool;

    /// decode from the raw non-null wire buffer.
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError>;

    /// decode a sql `NULL`.
    fn from_sql_null(_ty: &Type) -> Result<Self, FromSqlError> {
        Err(Box::new(WasNull))
    }

    fn from_sql_nullable(ty: &Type, raw: Option<&'a [u8]>) -> Result<Self, FromSqlError> {
        match raw {
            Some(raw) => Self::from_sql(ty, raw),
            None => Self::from_sql_null(ty),
        }
    }
}

/// a [`FromSql`] implementation that does not borrow from the row buffer.
pub trait FromSqlOwned: for<'a> FromSql<'a> {}

impl<T> FromSqlOwned for T where T: for<'a> FromSql<'a> {}

impl<T> PgType for Option<T>
where
    T: PgType,
{
    fn pg_type() -> Type {
        T::pg_type()
    }

    fn pg_array_type() -> Type {
        T::pg_array_type()
    }
}

impl<T> ToSql for Option<T>
where
    T: ToSql,
{
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        match self {
            Some(value) => value.to_sql(ty, out),
            None => Ok(IsNull::Yes),
        }
    }
}

impl<'a, T> FromSql<'a> for Option<T>
where
    T: FromSql<'a>,
{
    fn accepts(ty: &Type) -> bool {
        T::accepts(ty)
    }

    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        T::from_sql(ty, raw).map(Some)
    }

    fn from_sql_null(_: &Type) -> Result<Self, FromSqlError> {
        Ok(None)
    }
}

impl<T> PgType for &T
where
    T: PgType + ?Sized,
{
    fn pg_type() -> Type {
        T::pg_type()
    }

    fn pg_array_type() -> Type {
        T::pg_array_type()
    }
}

impl<T> ToSql for &T
where
    T: ToSql + ?Sized,
{
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        (**self).to_sql(ty, out)
    }
}

/// an ordered bundle of query parameters, encoded eagerly at bind time.
///
/// each pushed value carries its declared type oid, its raw wire image (the
/// length comes with the buffer, −1 for null) and its format flag, exactly
/// as they go out in the Bind message. the codec encodes binary; the text
/// format is available through [`Parameters::push_text`] for the cases where
/// the string form of a value is more convenient.
///
/// # Examples
/// ```rust
/// use strand_postgres::types::Parameters;
///
/// let mut p = Parameters::new();
/// p.push(&42_i32).unwrap().push(&"hello").unwrap();
/// assert_eq!(p.len(), 2);
/// ```
#[derive(Default)]
pub struct Parameters {
    types: Vec<Type>,
    values: Vec<Option<Bytes>>,
    formats: Vec<Format>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// encode a value and append it to the bundle, binding it as the type
    /// declared by [`PgType::pg_type`].
    pub fn push<T>(&mut self, value: &T) -> Result<&mut Self, Error>
    where
        T: ToSql,
    {
        self.push_as(T::pg_type(), value)
    }

    /// encode a value and append it, binding it as an explicit type (for
    /// example `cidr` where the rust value would default to `inet`).
    pub fn push_as<T>(&mut self, ty: Type, value: &T) -> Result<&mut Self, Error>
    where
        T: ToSql,
    {
        let mut buf = BytesMut::new();
        let value = match value.to_sql(&ty, &mut buf)? {
            IsNull::Yes => None,
            IsNull::No => Some(buf.freeze()),
        };
        self.push_raw(ty, value, Format::Binary);
        Ok(self)
    }

    /// append a value in the text wire format: the server parses the string
    /// rendering itself. useful where a literal is easier to produce than a
    /// binary image.
    pub fn push_text(&mut self, ty: Type, value: &str) -> &mut Self {
        self.push_raw(ty, Some(Bytes::copy_from_slice(value.as_bytes())), Format::Text)
    }

    /// append a pre-encoded raw parameter with an explicit type and format.
    pub fn push_raw(&mut self, ty: Type, value: Option<Bytes>, format: Format) -> &mut Self {
        self.types.push(ty);
        self.values.push(value);
        self.formats.push(format);
        self
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// the declared type oids, in bind order. available to custom
    /// [`Driver`] implementations.
    ///
    /// [`Driver`]: crate::protocol::Driver
    pub fn oids(&self) -> impl Iterator<Item = Oid> + '_ {
        self.types.iter().map(Type::oid)
    }

    /// the raw wire buffers, in bind order; `None` is sql `NULL`.
    pub fn values(&self) -> impl Iterator<Item = Option<&[u8]>> + '_ {
        self.values.iter().map(|v| v.as_deref())
    }

    /// the per-value format flags, in bind order.
    pub fn formats(&self) -> impl Iterator<Item = Format> + '_ {
        self.formats.iter().copied()
    }
}

impl Clone for Parameters {
    fn clone(&self) -> Self {
        Self {
            types: self.types.clone(),
            values: self.values.clone(),
            formats: self.formats.clone(),
        }
    }
}

impl core::fmt::Debug for Parameters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Parameters").field("types", &self.types).finish()
    }
}

pub(crate) fn check_len(raw: &[u8], expect: usize) -> Result<(), FromSqlError> {
    if raw.len() != expect {
        return Err(format!("invalid buffer length: expected {expect} bytes, got {}", raw.len()).into());
    }
    Ok(())
}
