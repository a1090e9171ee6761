//! fixed-precision `money` codec with locale-parameterised formatting.
//!
//! the wire value is a 64 bit integer scaled by the fractional digit count of
//! the server's `lc_monetary` locale. formatting therefore takes a
//! [`MoneyLocale`] parameter; sessions derive one from the server setting and
//! fall back to the C locale. the process locale is never consulted.

use core::{fmt, ops, str::FromStr};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use crate::error::FromSqlError;

use super::{check_len, FromSql, IsNull, Numeric, PgType, ToSql, Type};

/// formatting rules for one monetary locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoneyLocale {
    pub frac_digits: u16,
    pub decimal_point: char,
    pub thousands_sep: Option<char>,
    pub symbol: Option<String>,
}

impl MoneyLocale {
    /// the C locale: two fractional digits, a bare `.`, no grouping, no symbol.
    pub fn c() -> Self {
        Self {
            frac_digits: 2,
            decimal_point: '.',
            thousands_sep: None,
            symbol: None,
        }
    }

    /// build formatting rules from a server `lc_monetary` setting.
    /// unrecognised names fall back to the C locale.
    pub fn from_lc_monetary(name: &str) -> Self {
        let base = name.split('.').next().unwrap_or(name);
        match base {
            "en_US" | "en_CA" | "en_AU" | "en_NZ" => Self {
                frac_digits: 2,
                decimal_point: '.',
                thousands_sep: Some(','),
                symbol: Some(String::from("$")),
            },
            "en_GB" => Self {
                frac_digits: 2,
                decimal_point: '.',
                thousands_sep: Some(','),
                symbol: Some(String::from("£")),
            },
            "ja_JP" => Self {
                frac_digits: 0,
                decimal_point: '.',
                thousands_sep: Some(','),
                symbol: Some(String::from("¥")),
            },
            _ => Self::c(),
        }
    }
}

impl Default for MoneyLocale {
    fn default() -> Self {
        Self::c()
    }
}

/// a `money` value: a scaled 64 bit integer.
///
/// `Money::from_raw(1254)` is `12.54` under any two-fraction-digit locale.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// the scaled integer as stored on the wire.
    pub fn raw(self) -> i64 {
        self.0
    }

    /// convert to [`Numeric`] with the given fractional digit count.
    pub fn to_numeric(self, frac_digits: u16) -> Numeric {
        Numeric::from_scaled(self.0 as i128, frac_digits)
    }

    /// render under `locale`, without the currency symbol.
    pub fn to_plain_string(self, locale: &MoneyLocale) -> String {
        let digits = self.0.unsigned_abs().to_string();
        let frac = locale.frac_digits as usize;

        let (int_part, frac_part) = if digits.len() > frac {
            let split = digits.len() - frac;
            (digits[..split].to_string(), digits[split..].to_string())
        } else {
            (String::from("0"), format!("{digits:0>frac$}"))
        };

        let int_part = match locale.thousands_sep {
            Some(sep) => group_thousands(&int_part, sep),
            None => int_part,
        };

        let mut out = String::new();
        if self.0 < 0 {
            out.push('-');
        }
        out.push_str(&int_part);
        if frac > 0 {
            out.push(locale.decimal_point);
            out.push_str(&frac_part);
        }
        out
    }

    /// render under `locale`, including the currency symbol when it has one.
    pub fn format(self, locale: &MoneyLocale) -> String {
        let plain = self.to_plain_string(locale);
        match &locale.symbol {
            Some(symbol) => match plain.strip_prefix('-') {
                Some(rest) => format!("-{symbol}{rest}"),
                None => format!("{symbol}{plain}"),
            },
            None => plain,
        }
    }

    /// parse a plain decimal rendering under `locale`, ignoring the symbol
    /// and grouping separators.
    pub fn parse(s: &str, locale: &MoneyLocale) -> Result<Self, FromSqlError> {
        let mut cleaned = String::with_capacity(s.len());
        for c in s.chars() {
            if Some(c) == locale.thousands_sep || locale.symbol.as_deref().is_some_and(|sym| sym.contains(c)) {
                continue;
            }
            if c == locale.decimal_point {
                cleaned.push('.');
            } else {
                cleaned.push(c);
            }
        }

        let (int_part, frac_part) = match cleaned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (cleaned.as_str(), ""),
        };
        let frac = locale.frac_digits as usize;
        if frac_part.len() > frac {
            return Err(format!("too many fractional digits for money: {s:?}").into());
        }

        let (negative, int_part) = match int_part.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, int_part.strip_prefix('+').unwrap_or(int_part)),
        };
        if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid money literal: {s:?}").into());
        }

        let mut scaled = String::with_capacity(int_part.len() + frac);
        scaled.push_str(int_part);
        scaled.push_str(frac_part);
        for _ in frac_part.len()..frac {
            scaled.push('0');
        }

        let value = scaled.parse::<u64>().map_err(|_| format!("money out of range: {s:?}"))?;
        let value = if negative {
            (value as i128).checked_neg().and_then(|v| i64::try_from(v).ok())
        } else {
            i64::try_from(value).ok()
        };
        value.map(Money).ok_or_else(|| format!("money out of range: {s:?}").into())
    }
}

fn group_thousands(digits: &str, sep: char) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let len = digits.len();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_plain_string(&MoneyLocale::c()))
    }
}

impl FromStr for Money {
    type Err = FromSqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s, &MoneyLocale::c())
    }
}

impl ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl ops::Mul<i64> for Money {
    type Output = Money;

    fn mul(self, rhs: i64) -> Money {
        Money(self.0 * rhs)
    }
}

impl ops::Div<i64> for Money {
    type Output = Money;

    fn div(self, rhs: i64) -> Money {
        Money(self.0 / rhs)
    }
}

impl ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl PgType for Money {
    fn pg_type() -> Type {
        Type::MONEY
    }

    fn pg_array_type() -> Type {
        Type::MONEY_ARRAY
    }
}

impl ToSql for Money {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        out.put_i64(self.0);
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for Money {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::MONEY
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        check_len(raw, 8)?;
        Ok(Money(BigEndian::read_i64(raw)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn c_locale_rendering() {
        assert_eq!(Money::from_raw(1254).to_string(), "12.54");
        assert_eq!(Money::from_raw(-8).to_string(), "-0.08");
        assert_eq!(Money::from_raw(15000).to_string(), "150.00");
        assert_eq!(
            Money::from_raw(9223372036854775807).to_string(),
            "92233720368547758.07"
        );
    }

    #[test]
    fn locale_rendering() {
        let us = MoneyLocale::from_lc_monetary("en_US.UTF-8");
        assert_eq!(Money::from_raw(123456789).format(&us), "$1,234,567.89");
        assert_eq!(Money::from_raw(-1254).format(&us), "-$12.54");

        let jp = MoneyLocale::from_lc_monetary("ja_JP.UTF-8");
        assert_eq!(Money::from_raw(1500).format(&jp), "¥1,500");
    }

    #[test]
    fn parse() {
        assert_eq!("12.54".parse::<Money>().unwrap(), Money::from_raw(1254));
        assert_eq!("12.5".parse::<Money>().unwrap(), Money::from_raw(1250));
        assert_eq!("-92233720368547758.08".parse::<Money>().unwrap(), Money::from_raw(i64::MIN));
        assert!("12.545".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());

        let us = MoneyLocale::from_lc_monetary("en_US");
        assert_eq!(Money::parse("$1,234.50", &us).unwrap(), Money::from_raw(123450));
    }

    #[test]
    fn to_numeric() {
        let m = "12.54".parse::<Money>().unwrap();
        assert_eq!(m.to_numeric(2).to_string(), "12.54");
    }

    #[test]
    fn wire() {
        let m = Money::from_raw(1254);
        let mut buf = BytesMut::new();
        m.to_sql(&Type::MONEY, &mut buf).unwrap();
        assert_eq!(&buf[..], [0, 0, 0, 0, 0, 0, 0x04, 0xe6]);
        assert_eq!(Money::from_sql(&Type::MONEY, &buf).unwrap(), m);
        assert!(Money::from_sql(&Type::MONEY, &buf[..4]).is_err());
    }
}
