//! geometric type codecs: point, line, lseg, box, path, polygon and circle.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use crate::error::FromSqlError;

use super::{check_len, FromSql, IsNull, PgType, ToSql, Type};

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

fn put_point(point: &Point, out: &mut BytesMut) {
    out.put_f64(point.x);
    out.put_f64(point.y);
}

fn read_point(raw: &[u8]) -> Point {
    Point {
        x: BigEndian::read_f64(raw),
        y: BigEndian::read_f64(&raw[8..]),
    }
}

impl PgType for Point {
    fn pg_type() -> Type {
        Type::POINT
    }

    fn pg_array_type() -> Type {
        Type::POINT_ARRAY
    }
}

impl ToSql for Point {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        put_point(self, out);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Point {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::POINT
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 16)?;
        Ok(read_point(raw))
    }
}

/// infinite line `ax + by + c = 0`.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl PgType for Line {
    fn pg_type() -> Type {
        Type::LINE
    }

    fn pg_array_type() -> Type {
        Type::LINE_ARRAY
    }
}

impl ToSql for Line {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_f64(self.a);
        out.put_f64(self.b);
        out.put_f64(self.c);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Line {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::LINE
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 24)?;
        Ok(Line {
            a: BigEndian::read_f64(raw),
            b: BigEndian::read_f64(&raw[8..]),
            c: BigEndian::read_f64(&raw[16..]),
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

impl PgType for LineSegment {
    fn pg_type() -> Type {
        Type::LSEG
    }

    fn pg_array_type() -> Type {
        Type::LSEG_ARRAY
    }
}

impl ToSql for LineSegment {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        put_point(&self.start, out);
        put_point(&self.end, out);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for LineSegment {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::LSEG
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 32)?;
        Ok(LineSegment {
            start: read_point(raw),
            end: read_point(&raw[16..]),
        })
    }
}

/// rectangle given by two opposite corners. the server normalises corner
/// order; the codec preserves whatever it is handed.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct PgBox {
    pub high: Point,
    pub low: Point,
}

impl PgType for PgBox {
    fn pg_type() -> Type {
        Type::BOX
    }

    fn pg_array_type() -> Type {
        Type::BOX_ARRAY
    }
}

impl ToSql for PgBox {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        put_point(&self.high, out);
        put_point(&self.low, out);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for PgBox {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::BOX
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 32)?;
        Ok(PgBox {
            high: read_point(raw),
            low: read_point(&raw[16..]),
        })
    }
}

/// open or closed sequence of points.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    pub closed: bool,
    pub points: Vec<Point>,
}

impl PgType for Path {
    fn pg_type() -> Type {
        Type::PATH
    }

    fn pg_array_type() -> Type {
        Type::PATH_ARRAY
    }
}

impl ToSql for Path {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_u8(self.closed as u8);
        out.put_i32(i32::try_from(self.points.len()).map_err(|_| "path point count out of range")?);
        for point in &self.points {
            put_point(point, out);
        }
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Path {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::PATH
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        if raw.len() < 5 {
            return Err("path buffer shorter than header".into());
        }
        let closed = match raw[0] {
            0 => false,
            1 => true,
            flag => return Err(format!("invalid path closed flag {flag}").into()),
        };
        let npts = BigEndian::read_i32(&raw[1..]);
        if npts < 0 {
            return Err("negative path point count".into());
        }
        if raw.len() != 5 + npts as usize * 16 {
            return Err("path buffer length inconsistent with point count".into());
        }
        let points = (0..npts as usize).map(|i| read_point(&raw[5 + i * 16..])).collect();
        Ok(Path { closed, points })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    pub points: Vec<Point>,
}

impl PgType for Polygon {
    fn pg_type() -> Type {
        Type::POLYGON
    }

    fn pg_array_type() -> Type {
        Type::POLYGON_ARRAY
    }
}

impl ToSql for Polygon {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_i32(i32::try_from(self.points.len()).map_err(|_| "polygon point count out of range")?);
        for point in &self.points {
            put_point(point, out);
        }
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Polygon {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::POLYGON
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        if raw.len() < 4 {
            return Err("polygon buffer shorter than header".into());
        }
        let npts = BigEndian::read_i32(raw);
        if npts < 0 {
            return Err("negative polygon point count".into());
        }
        if raw.len() != 4 + npts as usize * 16 {
            return Err("polygon buffer length inconsistent with point count".into());
        }
        let points = (0..npts as usize).map(|i| read_point(&raw[4 + i * 16..])).collect();
        Ok(Polygon { points })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
}

impl PgType for Circle {
    fn pg_type() -> Type {
        Type::CIRCLE
    }

    fn pg_array_type() -> Type {
        Type::CIRCLE_ARRAY
    }
}

impl ToSql for Circle {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        put_point(&self.center, out);
        out.put_f64(self.radius);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Circle {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::CIRCLE
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 24)?;
        Ok(Circle {
            center: read_point(raw),
            radius: BigEndian::read_f64(&raw[16..]),
        })
    }
}
