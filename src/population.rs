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

use crate::error::{GeoIpError, GeoIpResult};

/// One accumulated `(country, city)` observation.
///
/// `name` is the composed key `"<country>: <city>"`. `lat`/`lon` are
/// captured from the first observation and never updated thereafter.
/// `group` is meaningless until a STAT report runs the clusterer.
#[derive(Debug, Clone)]
pub struct PopulationEntry {
    pub name: String,
    pub lat: f32,
    pub lon: f32,
    pub count: u64,
    pub group: usize,
}

/// Output field selector, as named in `--field-order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulationField {
    Name,
    Latitude,
    Longitude,
    Count,
    Group,
}

impl PopulationField {
    fn from_name(name: &str) -> GeoIpResult<Self> {
        match name {
            "name" => Ok(Self::Name),
            "latitude" | "lat" => Ok(Self::Latitude),
            "longitude" | "lon" => Ok(Self::Longitude),
            "count" | "pop" | "population" => Ok(Self::Count),
            "group" | "grp" => Ok(Self::Group),
            other => Err(GeoIpError::UnknownField(other.to_string())),
        }
    }

    pub fn canonical_name(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Latitude => "lat",
            Self::Longitude => "lon",
            Self::Count => "pop",
            Self::Group => "group",
        }
    }
}

/// Parses a comma-separated field list such as `"name,pop,lat,lon,group"`.
pub fn parse_field_order(spec: &str) -> GeoIpResult<Vec<PopulationField>> {
    spec.split(',')
        .map(|name| PopulationField::from_name(name.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        let order = parse_field_order("name, pop, latitude, lon, grp").unwrap();
        assert_eq!(
            order,
            vec![
                PopulationField::Name,
                PopulationField::Count,
                PopulationField::Latitude,
                PopulationField::Longitude,
                PopulationField::Group,
            ]
        );
    }

    #[test]
    fn rejects_unknown_field() {
        assert!(parse_field_order("name,bogus").is_err());
    }
}
