//! homogeneous array codec with dimension preservation.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use crate::error::FromSqlError;

use super::{FromSql, FromSqlOwned, IsNull, Kind, Oid, PgType, ToSql, Type};

/// one array dimension: element count and lower bound index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArrayDim {
    pub len: i32,
    pub lower_bound: i32,
}

/// parsed array header, available before any element is decoded.
///
/// # Examples
/// ```rust
/// use strand_postgres::types::{ArrayView, PgArray, ToSql, Type};
///
/// let array = PgArray::from_vec(vec![1_i32, 2, 3]);
/// let mut buf = bytes::BytesMut::new();
/// array.to_sql(&Type::INT4_ARRAY, &mut buf).unwrap();
///
/// let view = ArrayView::parse(&buf).unwrap();
/// assert_eq!(view.dimensions(), 1);
/// assert_eq!(view.element_oid(), Type::INT4.oid());
/// ```
#[derive(Debug)]
pub struct ArrayView<'a> {
    element_oid: Oid,
    dims: Vec<ArrayDim>,
    elements: &'a [u8],
}

impl<'a> ArrayView<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self, FromSqlError> {
        if raw.len() < 12 {
            return Err("array buffer shorter than header".into());
        }
        let ndim = BigEndian::read_i32(raw);
        let _flags = BigEndian::read_i32(&raw[4..]);
        let element_oid = BigEndian::read_u32(&raw[8..]);

        if ndim < 0 {
            return Err("negative array dimension count".into());
        }
        let ndim = ndim as usize;
        if raw.len() < 12 + ndim * 8 {
            return Err("array buffer shorter than dimension headers".into());
        }

        let mut dims = Vec::with_capacity(ndim);
        for i in 0..ndim {
            let len = BigEndian::read_i32(&raw[12 + i * 8..]);
            let lower_bound = BigEndian::read_i32(&raw[16 + i * 8..]);
            if len < 0 {
                return Err("negative array dimension length".into());
            }
            dims.push(ArrayDim { len, lower_bound });
        }

        Ok(Self {
            element_oid,
            dims,
            elements: &raw[12 + ndim * 8..],
        })
    }

    /// number of dimensions. zero for the empty array.
    pub fn dimensions(&self) -> usize {
        self.dims.len()
    }

    pub fn element_oid(&self) -> Oid {
        self.element_oid
    }

    pub fn dims(&self) -> &[ArrayDim] {
        &self.dims
    }

    /// total element count across all dimensions.
    pub fn element_count(&self) -> Result<usize, FromSqlError> {
        let mut count = 1usize;
        for dim in &self.dims {
            count = count
                .checked_mul(dim.len as usize)
                .ok_or("array element count overflow")?;
        }
        if self.dims.is_empty() {
            return Ok(0);
        }
        Ok(count)
    }

    fn decode_elements<T>(&self, elem_ty: &Type) -> Result<Vec<T>, FromSqlError>
    where
        T: FromSqlOwned,
    {
        let expect = self.element_count()?;
        let mut elements = Vec::with_capacity(expect);
        let mut raw = self.elements;
        for _ in 0..expect {
            if raw.len() < 4 {
                return Err("array buffer shorter than element header".into());
            }
            let len = BigEndian::read_i32(raw);
            raw = &raw[4..];
            if len < 0 {
                elements.push(T::from_sql_null(elem_ty)?);
            } else {
                let len = len as usize;
                if raw.len() < len {
                    return Err("array buffer shorter than declared element".into());
                }
                elements.push(T::from_sql(elem_ty, &raw[..len])?);
                raw = &raw[len..];
            }
        }
        if !raw.is_empty() {
            return Err("trailing bytes after array elements".into());
        }
        Ok(elements)
    }
}

/// an array value with its dimensions preserved. elements are stored in row
/// major order, the server's layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgArray<T> {
    dims: Vec<ArrayDim>,
    elements: Vec<T>,
}

impl<T> PgArray<T> {
    /// a one dimensional array with the server's default lower bound of 1.
    pub fn from_vec(elements: Vec<T>) -> Self {
        let dims = if elements.is_empty() {
            Vec::new()
        } else {
            vec![ArrayDim {
                len: elements.len() as i32,
                lower_bound: 1,
            }]
        };
        Self { dims, elements }
    }

    pub fn with_dims(dims: Vec<ArrayDim>, elements: Vec<T>) -> Result<Self, FromSqlError> {
        let expect = dims.iter().try_fold(1usize, |acc, d| {
            acc.checked_mul(d.len as usize).ok_or("array element count overflow")
        })?;
        let expect = if dims.is_empty() { 0 } else { expect };
        if expect != elements.len() {
            return Err("array dimensions inconsistent with element count".into());
        }
        Ok(Self { dims, elements })
    }

    pub fn dims(&self) -> &[ArrayDim] {
        &self.dims
    }

    pub fn elements(&self) -> &[T] {
        &self.elements
    }

    pub fn into_vec(self) -> Vec<T> {
        self.elements
    }
}

impl<T> PgType for PgArray<T>
where
    T: PgType,
{
    fn pg_type() -> Type {
        T::pg_array_type()
    }

    fn pg_array_type() -> Type {
        T::pg_array_type()
    }
}

fn element_type<T>(ty: &Type) -> Type
where
    T: PgType,
{
    match ty.kind() {
        Kind::Array(inner) => inner.clone(),
        _ => T::pg_type(),
    }
}

fn encode_array<T>(ty: &Type, dims: &[ArrayDim], elements: &[T], out: &mut BytesMut) -> Result<(), FromSqlError>
where
    T: ToSql,
{
    let elem_ty = element_type::<T>(ty);

    out.put_i32(i32::try_from(dims.len()).map_err(|_| "array dimension count out of range")?);
    let flags_at = out.len();
    out.put_i32(0);
    out.put_u32(elem_ty.oid());
    for dim in dims {
        out.put_i32(dim.len);
        out.put_i32(dim.lower_bound);
    }

    let mut has_null = false;
    let mut buf = BytesMut::new();
    for element in elements {
        buf.clear();
        match element.to_sql(&elem_ty, &mut buf)? {
            IsNull::Yes => {
                has_null = true;
                out.put_i32(-1);
            }
            IsNull::No => {
                out.put_i32(i32::try_from(buf.len()).map_err(|_| "array element too large")?);
                out.put_slice(&buf);
            }
        }
    }

    if has_null {
        BigEndian::write_i32(&mut out[flags_at..flags_at + 4], 1);
    }
    Ok(())
}

impl<T> ToSql for PgArray<T>
where
    T: ToSql,
{
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        encode_array(ty, &self.dims, &self.elements, out)?;
        Ok(IsNull::No)
    }
}

impl<'a, T> FromSql<'a> for PgArray<T>
where
    T: FromSqlOwned + PgType,
{
    fn accepts(ty: &Type) -> bool {
        match ty.kind() {
            Kind::Array(inner) => T::accepts(inner),
            _ => false,
        }
    }

    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        let view = ArrayView::parse(raw)?;
        let elem_ty = element_type::<T>(ty);
        let elements = view.decode_elements(&elem_ty)?;
        Ok(Self {
            dims: view.dims,
            elements,
        })
    }
}

impl<T> PgType for Vec<T>
where
    T: PgType,
{
    fn pg_type() -> Type {
        T::pg_array_type()
    }

    fn pg_array_type() -> Type {
        T::pg_array_type()
    }
}

impl<T> ToSql for Vec<T>
where
    T: ToSql,
{
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        let dims = if self.is_empty() {
            Vec::new()
        } else {
            vec![ArrayDim {
                len: self.len() as i32,
                lower_bound: 1,
            }]
        };
        encode_array(ty, &dims, self, out)?;
        Ok(IsNull::No)
    }
}

/// one dimensional convenience decoding. multi dimensional values decode
/// through [`PgArray`], which keeps the dimension headers.
impl<'a, T> FromSql<'a> for Vec<T>
where
    T: FromSqlOwned + PgType,
{
    fn accepts(ty: &Type) -> bool {
        <PgArray<T> as FromSql>::accepts(ty)
    }

    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        let array = PgArray::<T>::from_sql(ty, raw)?;
        if array.dims().len() > 1 {
            return Err("multi dimensional array cannot decode into Vec".into());
        }
        Ok(array.into_vec())
    }
}
