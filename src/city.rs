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

use std::path::Path;

use crate::error::{GeoIpError, GeoIpResult};

/// A single city row from the GeoLite2 locations CSV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CityEntry {
    pub geo_id: u32,
    pub country: String,
    pub name: String,
}

/// GeoID-sorted city table, binary-searchable by `geo_id`.
pub struct CityIndex {
    entries: Vec<CityEntry>,
}

impl CityIndex {
    /// Parses the locations CSV (header row skipped). Column 0 is the
    /// GeoID, column 4 the country ISO code, column 10 the city name.
    /// Rows whose GeoID doesn't parse as u32 are skipped and counted;
    /// missing country/name are kept as empty strings.
    pub fn load<P: AsRef<Path>>(path: P) -> GeoIpResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;

        let mut entries = Vec::new();
        let mut ignored = 0usize;

        for result in reader.records() {
            let record = result?;

            let geo_id: u32 = match record.get(0).and_then(|s| s.parse().ok()) {
                Some(id) => id,
                None => {
                    ignored += 1;
                    continue;
                }
            };

            let country = record.get(4).unwrap_or("").to_string();
            let name = record.get(10).unwrap_or("").to_string();

            entries.push(CityEntry {
                geo_id,
                country,
                name,
            });
        }

        info!(
            "city index: parsed {} entries, {} rows ignored",
            entries.len(),
            ignored
        );

        entries.sort_by_key(|e| e.geo_id);

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact-match lookup by GeoID.
    pub fn search(&self, geo_id: u32) -> GeoIpResult<&CityEntry> {
        match self.entries.binary_search_by_key(&geo_id, |e| e.geo_id) {
            Ok(idx) => Ok(&self.entries[idx]),
            Err(_) => Err(GeoIpError::CityNotFound(geo_id)),
        }
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

    #[test]
    fn parses_and_searches_exact_geoid() {
        let header = "geoname_id,locale_code,continent_code,continent_name,country_iso_code,country_name,subdivision_1_iso_code,subdivision_1_name,subdivision_2_iso_code,subdivision_2_name,city_name,metro_code,time_zone,is_in_european_union";
        let row = "5128581,en,NA,North America,US,United States,NY,New York,,,New York,,America/New_York,0";
        let file = write_csv(&[header, row]);

        let idx = CityIndex::load(file.path()).unwrap();
        assert_eq!(idx.len(), 1);

        let e = idx.search(5128581).unwrap();
        assert_eq!(e.country, "US");
        assert_eq!(e.name, "New York");

        assert!(idx.search(1).is_err());
    }

    #[test]
    fn skips_rows_with_unparsable_geoid() {
        let header = "geoname_id,a,b,c,country,d,e,f,g,h,name";
        let bad = "not-a-number,,,,US,,,,,,New York";
        let good = "100,,,,US,,,,,,New York";
        let file = write_csv(&[header, bad, good]);

        let idx = CityIndex::load(file.path()).unwrap();
        assert_eq!(idx.len(), 1);
        assert!(idx.search(100).is_ok());
    }

    #[test]
    fn keeps_rows_with_empty_country_or_name() {
        let header = "geoname_id,a,b,c,country,d,e,f,g,h,name";
        let row = "7,,,,,,,,,,";
        let file = write_csv(&[header, row]);

        let idx = CityIndex::load(file.path()).unwrap();
        let e = idx.search(7).unwrap();
        assert_eq!(e.country, "");
        assert_eq!(e.name, "");
    }
}
