//! arbitrary-precision decimal matching the server's `numeric` type.

use core::{fmt, str::FromStr};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use crate::error::FromSqlError;

use super::{FromSql, IsNull, PgType, ToSql, Type};

const SIGN_POS: u16 = 0x0000;
const SIGN_NEG: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;

/// base-10000 decimal with explicit display scale.
///
/// the in-memory form mirrors the wire form exactly, so precision and scale
/// survive a round-trip and [`fmt::Display`] prints the server's canonical
/// text rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Numeric {
    digits: Vec<i16>,
    weight: i16,
    sign: u16,
    dscale: u16,
}

impl Numeric {
    pub fn nan() -> Self {
        Self {
            digits: Vec::new(),
            weight: 0,
            sign: SIGN_NAN,
            dscale: 0,
        }
    }

    pub fn zero() -> Self {
        Self {
            digits: Vec::new(),
            weight: 0,
            sign: SIGN_POS,
            dscale: 0,
        }
    }

    pub fn is_nan(&self) -> bool {
        self.sign == SIGN_NAN
    }

    pub fn is_negative(&self) -> bool {
        self.sign == SIGN_NEG
    }

    /// number of digits printed after the decimal point.
    pub fn scale(&self) -> u16 {
        self.dscale
    }

    /// construct from an integer scaled by `10^-scale`, e.g. `(1254, 2)` is `12.54`.
    pub fn from_scaled(value: i128, scale: u16) -> Self {
        let negative = value < 0;
        let digits = value.unsigned_abs().to_string();
        let scale = scale as usize;

        let (int_part, frac_part) = if digits.len() > scale {
            let split = digits.len() - scale;
            (digits[..split].to_string(), digits[split..].to_string())
        } else {
            (String::from("0"), format!("{digits:0>scale$}"))
        };

        let mut text = String::new();
        if negative {
            text.push('-');
        }
        text.push_str(&int_part);
        if scale > 0 {
            text.push('.');
            text.push_str(&frac_part);
        }
        text.parse().expect("scaled integer renders as a valid numeric literal")
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nan() {
            return f.write_str("NaN");
        }
        if self.sign == SIGN_NEG {
            f.write_str("-")?;
        }

        // digits before the decimal point
        if self.weight < 0 {
            f.write_str("0")?;
        } else {
            for i in 0..=self.weight as usize {
                let dig = self.digits.get(i).copied().unwrap_or(0);
                if i == 0 {
                    write!(f, "{dig}")?;
                } else {
                    write!(f, "{dig:04}")?;
                }
            }
        }

        // dscale digits after it
        if self.dscale > 0 {
            let mut frac = String::with_capacity(self.dscale as usize + 4);
            let groups = (self.dscale as usize + 3) / 4;
            for i in 0..groups {
                let idx = self.weight as isize + 1 + i as isize;
                let dig = if idx >= 0 {
                    self.digits.get(idx as usize).copied().unwrap_or(0)
                } else {
                    0
                };
                frac.push_str(&format!("{dig:04}"));
            }
            frac.truncate(self.dscale as usize);
            write!(f, ".{frac}")?;
        }

        Ok(())
    }
}

impl FromStr for Numeric {
    type Err = FromSqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("nan") {
            return Ok(Self::nan());
        }

        let (sign, s) = match s.strip_prefix('-') {
            Some(rest) => (SIGN_NEG, rest),
            None => (SIGN_POS, s.strip_prefix('+').unwrap_or(s)),
        };

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err("empty numeric literal".into());
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid numeric literal: {s:?}").into());
        }

        let dscale = u16::try_from(frac_part.len()).map_err(|_| "numeric scale out of range")?;

        // align both sides to base-10000 groups
        let mut aligned = String::new();
        for _ in 0..(4 - int_part.len() % 4) % 4 {
            aligned.push('0');
        }
        aligned.push_str(int_part);
        let int_groups = aligned.len() / 4;
        aligned.push_str(frac_part);
        while aligned.len() % 4 != 0 {
            aligned.push('0');
        }

        let mut digits = aligned
            .as_bytes()
            .chunks(4)
            .map(|c| {
                c.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
            })
            .collect::<Vec<_>>();
        let mut weight = int_groups as i16 - 1;

        // normalize the way the server does: no leading or trailing zero groups
        while digits.first() == Some(&0) {
            digits.remove(0);
            weight -= 1;
        }
        while digits.last() == Some(&0) {
            digits.pop();
        }
        if digits.is_empty() {
            return Ok(Self {
                digits,
                weight: 0,
                sign: SIGN_POS,
                dscale,
            });
        }

        Ok(Self {
            digits,
            weight,
            sign,
            dscale,
        })
    }
}

impl PgType for Numeric {
    fn pg_type() -> Type {
        Type::NUMERIC
    }

    fn pg_array_type() -> Type {
        Type::NUMERIC_ARRAY
    }
}

impl ToSql for Numeric {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_i16(i16::try_from(self.digits.len()).map_err(|_| "numeric digit count out of range")?);
        out.put_i16(self.weight);
        out.put_u16(self.sign);
        out.put_u16(self.dscale);
        for &dig in &self.digits {
            out.put_i16(dig);
        }
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Numeric {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        if raw.len() < 8 {
            return Err("numeric buffer shorter than header".into());
        }
        let ndigits = BigEndian::read_i16(&raw[0..2]);
        let weight = BigEndian::read_i16(&raw[2..4]);
        let sign = BigEndian::read_u16(&raw[4..6]);
        let dscale = BigEndian::read_u16(&raw[6..8]);

        if ndigits < 0 {
            return Err("negative numeric digit count".into());
        }
        if raw.len() != 8 + ndigits as usize * 2 {
            return Err("numeric buffer length inconsistent with digit count".into());
        }
        if sign != SIGN_POS && sign != SIGN_NEG && sign != SIGN_NAN {
            return Err(format!("invalid numeric sign {sign:#06x}").into());
        }
        if dscale > 0x3fff {
            return Err("numeric display scale out of range".into());
        }

        let mut digits = Vec::with_capacity(ndigits as usize);
        for i in 0..ndigits as usize {
            let dig = BigEndian::read_i16(&raw[8 + i * 2..]);
            if !(0..10000).contains(&dig) {
                return Err(format!("numeric digit {dig} out of range").into());
            }
            digits.push(dig);
        }

        Ok(Self {
            digits,
            weight,
            sign,
            dscale,
        })
    }
}
