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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoIpError {
    #[error("IO error {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error {0}")]
    CsvError(#[from] csv::Error),

    #[error("invalid CIDR {0}")]
    InvalidCidr(String),

    #[error("invalid IPv4 address {0}")]
    InvalidAddress(String),

    #[error("no city entry for geoId {0}")]
    CityNotFound(u32),

    #[error("no block range matches {0}")]
    NoMatch(String),

    #[error("unrecognized field name '{0}'")]
    UnknownField(String),

    #[error("unknown formatter type '{0}'")]
    UnknownFormatter(String),

    #[error("cannot parse integer value '{0}'")]
    InvalidInt(String),

    #[error("unrecognized STAT key '{0}'")]
    UnknownStatKey(String),
}

pub type GeoIpResult<T> = std::result::Result<T, GeoIpError>;
