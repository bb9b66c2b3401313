// geoip-aggregator - IPv4 geolocation aggregation service
// Copyright (C) 2021  rumblefrog
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::GeoIpError;

/// An inclusive `[begin, end]` range over the 32-bit IPv4 address space,
/// derived from a CIDR string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ip4Range {
    pub begin: u32,
    pub end: u32,
}

impl Ip4Range {
    /// Parses `A.B.C.D/m`. Fails on malformed addresses, out-of-range
    /// prefix lengths, or anything that isn't IPv4.
    pub fn parse_cidr(s: &str) -> Result<Self, GeoIpError> {
        let (addr_part, prefix_part) = s
            .split_once('/')
            .ok_or_else(|| GeoIpError::InvalidCidr(s.to_string()))?;

        let addr = Ipv4Addr::from_str(addr_part)
            .map_err(|_| GeoIpError::InvalidCidr(s.to_string()))?;

        let prefix_len: u32 = prefix_part
            .parse()
            .map_err(|_| GeoIpError::InvalidCidr(s.to_string()))?;

        if prefix_len > 32 {
            return Err(GeoIpError::InvalidCidr(s.to_string()));
        }

        let mask: u32 = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len)
        };

        let begin = u32::from(addr) & mask;
        let end = begin | !mask;

        Ok(Ip4Range { begin, end })
    }
}

impl fmt::Display for Ip4Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            Ipv4Addr::from(self.begin),
            Ipv4Addr::from(self.end)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_cidr() {
        let r = Ip4Range::parse_cidr("10.0.0.0/24").unwrap();
        assert_eq!(r.begin, 0x0A00_0000);
        assert_eq!(r.end, 0x0A00_00FF);
        assert!(r.begin <= r.end);
    }

    #[test]
    fn end_minus_begin_matches_prefix() {
        for prefix in 0..=32u32 {
            let cidr = format!("192.168.0.0/{prefix}");
            let r = Ip4Range::parse_cidr(&cidr).unwrap();
            assert!(r.begin <= r.end);
            let size = u64::from(r.end) - u64::from(r.begin) + 1;
            assert_eq!(size, 1u64 << (32 - prefix));
        }
    }

    #[test]
    fn slash_32_is_a_single_address() {
        let r = Ip4Range::parse_cidr("8.8.8.8/32").unwrap();
        assert_eq!(r.begin, r.end);
    }

    #[test]
    fn rejects_ipv6() {
        assert!(Ip4Range::parse_cidr("::1/64").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(Ip4Range::parse_cidr("not-a-cidr").is_err());
        assert!(Ip4Range::parse_cidr("10.0.0.0/33").is_err());
        assert!(Ip4Range::parse_cidr("10.0.0.0").is_err());
    }
}
