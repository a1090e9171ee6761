//! network address codecs: inet, cidr, macaddr and macaddr8.

use core::{fmt, str::FromStr};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::FromSqlError;

use super::{check_len, FromSql, IsNull, PgType, ToSql, Type};

// address family bytes from the server's inet_net implementation
const AF_INET: u8 = 2;
const AF_INET6: u8 = AF_INET + 1;

impl PgType for IpNet {
    fn pg_type() -> Type {
        Type::INET
    }

    fn pg_array_type() -> Type {
        Type::INET_ARRAY
    }
}

impl ToSql for IpNet {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
        let is_cidr = *ty == Type::CIDR;
        match self.addr() {
            IpAddr::V4(addr) => {
                out.put_u8(AF_INET);
                out.put_u8(self.prefix_len());
                out.put_u8(is_cidr as u8);
                out.put_u8(4);
                out.put_slice(&addr.octets());
            }
            IpAddr::V6(addr) => {
                out.put_u8(AF_INET6);
                out.put_u8(self.prefix_len());
                out.put_u8(is_cidr as u8);
                out.put_u8(16);
                out.put_slice(&addr.octets());
            }
        }
        Ok(IsNull::No)
    }
}

impl<'a> FromSql<'a> for IpNet {
    fn accepts(ty: &Type) -> bool {
        *ty == Type::INET || *ty == Type::CIDR
    }

    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
        if raw.len() < 4 {
            return Err("inet buffer shorter than header".into());
        }
        let family = raw[0];
        let bits = raw[1];
        let nb = raw[3] as usize;
        if raw.len() != 4 + nb {
            return Err("inet buffer length inconsistent with address size".into());
        }
        match (family, nb) {
            (AF_INET, 4) => {
                let addr = Ipv4Addr::new(raw[4], raw[5], raw[6], raw[7]);
                Ipv4Net::new(addr, bits).map(IpNet::V4).map_err(Into::into)
            }
            (AF_INET6, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&raw[4..]);
                Ipv6Net::new(Ipv6Addr::from(octets), bits).map(IpNet::V6).map_err(Into::into)
            }
            _ => Err(format!("invalid inet address family {family} with {nb} address bytes").into()),
        }
    }
}

macro_rules! mac_impl {
    ($name:ident, $len:expr, $pg:ident, $pg_arr:ident, $what:literal) => {
        #[doc = concat!("the `", $what, "` type: a raw ", stringify!($len), "-octet hardware address.")]
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for (i, byte) in self.0.iter().enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl FromStr for $name {
            type Err = FromSqlError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut octets = [0u8; $len];
                let mut parts = s.split(':');
                for octet in octets.iter_mut() {
                    let part = parts.next().ok_or_else(|| format!("invalid {}: {s:?}", $what))?;
                    *octet = u8::from_str_radix(part, 16).map_err(|_| format!("invalid {}: {s:?}", $what))?;
                }
                if parts.next().is_some() {
                    return Err(format!("invalid {}: {s:?}", $what).into());
                }
                Ok(Self(octets))
            }
        }

        impl PgType for $name {
            fn pg_type() -> Type {
                Type::$pg
            }

            fn pg_array_type() -> Type {
                Type::$pg_arr
            }
        }

        impl ToSql for $name {
            fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, FromSqlError> {
                out.put_slice(&self.0);
                Ok(IsNull::No)
            }
        }

        impl<'a> FromSql<'a> for $name {
            fn accepts(ty: &Type) -> bool {
                *ty == Type::$pg
            }

            fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, FromSqlError> {
                check_len(raw, $len)?;
                let mut octets = [0u8; $len];
                octets.copy_from_slice(raw);
                Ok(Self(octets))
            }
        }
    };
}

mac_impl!(MacAddr, 6, MACADDR, MACADDR_ARRAY, "macaddr");
mac_impl!(MacAddr8, 8, MACADDR8, MACADDR8_ARRAY, "macaddr8");

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inet_v4() {
        let net: IpNet = "192.168.12.1/24".parse().unwrap();
        let mut buf = BytesMut::new();
        net.to_sql(&Type::INET, &mut buf).unwrap();
        assert_eq!(&buf[..], [2, 24, 0, 4, 192, 168, 12, 1]);
        assert_eq!(IpNet::from_sql(&Type::INET, &buf).unwrap(), net);
    }

    #[test]
    fn cidr_flag() {
        let net: IpNet = "10.0.0.0/8".parse().unwrap();
        let mut buf = BytesMut::new();
        net.to_sql(&Type::CIDR, &mut buf).unwrap();
        assert_eq!(buf[2], 1);
        assert_eq!(IpNet::from_sql(&Type::CIDR, &buf).unwrap(), net);
    }

    #[test]
    fn inet_v6() {
        let net: IpNet = "2001:db8::1/64".parse().unwrap();
        let mut buf = BytesMut::new();
        net.to_sql(&Type::INET, &mut buf).unwrap();
        assert_eq!(buf[0], 3);
        assert_eq!(buf.len(), 20);
        assert_eq!(IpNet::from_sql(&Type::INET, &buf).unwrap(), net);
    }

    #[test]
    fn inet_structural() {
        // family byte says v4 but carries 16 address bytes
        let mut buf = BytesMut::new();
        "2001:db8::1/64".parse::<IpNet>().unwrap().to_sql(&Type::INET, &mut buf).unwrap();
        let mut raw = buf.to_vec();
        raw[0] = 2;
        assert!(IpNet::from_sql(&Type::INET, &raw).is_err());
        assert!(IpNet::from_sql(&Type::INET, &[2, 24]).is_err());
        // prefix longer than the address width
        assert!(IpNet::from_sql(&Type::INET, &[2, 33, 0, 4, 1, 2, 3, 4]).is_err());
    }

    #[test]
    fn mac() {
        let mac: MacAddr = "08:00:2b:01:02:03".parse().unwrap();
        let mut buf = BytesMut::new();
        mac.to_sql(&Type::MACADDR, &mut buf).unwrap();
        assert_eq!(&buf[..], [0x08, 0x00, 0x2b, 0x01, 0x02, 0x03]);
        assert_eq!(MacAddr::from_sql(&Type::MACADDR, &buf).unwrap(), mac);
        assert_eq!(mac.to_string(), "08:00:2b:01:02:03");
    }

    #[test]
    fn mac8() {
        let mac: MacAddr8 = "08:00:2b:01:02:03:04:05".parse().unwrap();
        let mut buf = BytesMut::new();
        mac.to_sql(&Type::MACADDR8, &mut buf).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(MacAddr8::from_sql(&Type::MACADDR8, &buf).unwrap(), mac);
        assert!(MacAddr8::from_sql(&Type::MACADDR8, &buf[..6]).is_err());
    }
}
