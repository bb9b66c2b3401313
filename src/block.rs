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

use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use crate::city::{CityEntry, CityIndex};
use crate::error::{GeoIpError, GeoIpResult};
use crate::ip4range::Ip4Range;

/// A CIDR block joined with its resolved city, if any.
#[derive(Debug, Clone, Default)]
pub struct BlockEntry {
    pub range: Ip4Range,
    pub geo_id: u32,
    pub lat: f32,
    pub lon: f32,
    pub city: CityEntry,
}

/// Begin-sorted block table. Ranges are assumed non-overlapping, which
/// the source CSV guarantees; `search` relies on that invariant and
/// does not independently verify the lower bound.
pub struct BlockIndex {
    entries: Vec<BlockEntry>,
}

impl BlockIndex {
    /// Parses the blocks CSV (header row skipped) and joins each
    /// surviving row against `cities`. Column 0 is the CIDR, column 1
    /// the GeoID, column 7 latitude, column 8 longitude. A row is
    /// skipped (and counted) if any of those four fields fails to
    /// parse. A city-join miss is logged but non-fatal; the entry
    /// keeps a default (empty) `CityEntry`.
    pub fn load<P: AsRef<Path>>(path: P, cities: &CityIndex) -> GeoIpResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;

        let mut entries = Vec::new();
        let mut ignored = 0usize;

        for result in reader.records() {
            let record = result?;

            let parsed = (|| -> Option<(Ip4Range, u32, f32, f32)> {
                let range = Ip4Range::parse_cidr(record.get(0)?).ok()?;
                let geo_id: u32 = record.get(1)?.parse().ok()?;
                let lat: f32 = record.get(7)?.parse().ok()?;
                let lon: f32 = record.get(8)?.parse().ok()?;
                Some((range, geo_id, lat, lon))
            })();

            let (range, geo_id, lat, lon) = match parsed {
                Some(v) => v,
                None => {
                    ignored += 1;
                    continue;
                }
            };

            entries.push(BlockEntry {
                range,
                geo_id,
                lat,
                lon,
                city: CityEntry::default(),
            });
        }

        info!(
            "block index: parsed {} entries, {} rows ignored",
            entries.len(),
            ignored
        );

        entries.sort_by_key(|e| e.range.begin);

        for entry in entries.iter_mut() {
            match cities.search(entry.geo_id) {
                Ok(city) => entry.city = city.clone(),
                Err(_) => warn!("no city entry for geoId {}", entry.geo_id),
            }
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the block covering `ip`. Finds the first entry with
    /// `range.end >= target` by binary search; does not additionally
    /// check `target >= range.begin`, relying on the non-overlapping
    /// property of the source data (a gap would surface the next
    /// higher range instead of a miss).
    pub fn search(&self, ip: &str) -> GeoIpResult<&BlockEntry> {
        let addr = Ipv4Addr::from_str(ip)
            .map_err(|_| GeoIpError::InvalidAddress(ip.to_string()))?;
        let target = u32::from(addr);

        let idx = self
            .entries
            .partition_point(|e| e.range.end < target);

        self.entries
            .get(idx)
            .ok_or_else(|| GeoIpError::NoMatch(ip.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(rows.join("\n").as_bytes()).unwrap();
        file
    }

    fn city_fixture() -> tempfile::NamedTempFile {
        let header = "geoname_id,a,b,c,country,d,e,f,g,h,name";
        let row = "5128581,,,,US,,,,,,New York";
        write_csv(&[header, row])
    }

    #[test]
    fn point_lookup_resolves_block_and_city() {
        let city_csv = city_fixture();
        let cities = CityIndex::load(city_csv.path()).unwrap();

        let header = "network,geoname_id,a,b,c,d,e,latitude,longitude";
        let row = "8.8.8.0/24,5128581,,,,,,40.7,-74.0";
        let block_csv = write_csv(&[header, row]);

        let blocks = BlockIndex::load(block_csv.path(), &cities).unwrap();

        let entry = blocks.search("8.8.8.8").unwrap();
        assert_eq!(entry.city.country, "US");
        assert_eq!(entry.city.name, "New York");
        assert_eq!(entry.lat, 40.7);
        assert_eq!(entry.lon, -74.0);
    }

    #[test]
    fn miss_above_all_ranges() {
        let city_csv = city_fixture();
        let cities = CityIndex::load(city_csv.path()).unwrap();

        let header = "network,geoname_id,a,b,c,d,e,latitude,longitude";
        let row = "8.8.8.0/24,5128581,,,,,,40.7,-74.0";
        let block_csv = write_csv(&[header, row]);

        let blocks = BlockIndex::load(block_csv.path(), &cities).unwrap();

        assert!(blocks.search("200.0.0.1").is_err());
    }

    #[test]
    fn join_miss_keeps_empty_city() {
        let city_csv = city_fixture();
        let cities = CityIndex::load(city_csv.path()).unwrap();

        let header = "network,geoname_id,a,b,c,d,e,latitude,longitude";
        let row = "1.2.3.0/24,999999,,,,,,0.0,0.0";
        let block_csv = write_csv(&[header, row]);

        let blocks = BlockIndex::load(block_csv.path(), &cities).unwrap();

        let entry = blocks.search("1.2.3.4").unwrap();
        assert_eq!(entry.city.country, "");
        assert_eq!(entry.city.name, "");
    }

    #[test]
    fn skips_rows_with_unparsable_fields() {
        let city_csv = city_fixture();
        let cities = CityIndex::load(city_csv.path()).unwrap();

        let header = "network,geoname_id,a,b,c,d,e,latitude,longitude";
        let bad_cidr = "not-a-cidr,5128581,,,,,,40.7,-74.0";
        let bad_geoid = "9.9.9.0/24,not-an-id,,,,,,40.7,-74.0";
        let good = "8.8.8.0/24,5128581,,,,,,40.7,-74.0";
        let block_csv = write_csv(&[header, bad_cidr, bad_geoid, good]);

        let blocks = BlockIndex::load(block_csv.path(), &cities).unwrap();
        assert_eq!(blocks.len(), 1);
    }
}
