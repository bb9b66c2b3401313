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

use std::io::{self, Write};

use crate::error::{GeoIpError, GeoIpResult};
use crate::population::{parse_field_order, PopulationEntry, PopulationField};

/// Header + per-entry emission, consumed opaquely by the aggregator.
pub trait Formatter: Send + Sync {
    fn write_header(&self, out: &mut dyn Write) -> io::Result<()>;

    fn write_entry(&self, out: &mut dyn Write, entry: &PopulationEntry) -> io::Result<()>;
}

fn field_value(field: PopulationField, entry: &PopulationEntry) -> String {
    match field {
        PopulationField::Name => entry.name.clone(),
        PopulationField::Latitude => entry.lat.to_string(),
        PopulationField::Longitude => entry.lon.to_string(),
        PopulationField::Count => entry.count.to_string(),
        PopulationField::Group => entry.group.to_string(),
    }
}

pub struct CsvFormatter {
    field_order: Vec<PopulationField>,
}

impl CsvFormatter {
    pub fn new(field_order: Vec<PopulationField>) -> Self {
        Self { field_order }
    }
}

impl Formatter for CsvFormatter {
    fn write_header(&self, out: &mut dyn Write) -> io::Result<()> {
        let names: Vec<&str> = self
            .field_order
            .iter()
            .map(|f| f.canonical_name())
            .collect();
        writeln!(out, "{}", names.join(","))
    }

    fn write_entry(&self, out: &mut dyn Write, entry: &PopulationEntry) -> io::Result<()> {
        let fields: Vec<String> = self
            .field_order
            .iter()
            .map(|&f| {
                if f == PopulationField::Name {
                    format!("\"{}\"", entry.name)
                } else {
                    field_value(f, entry)
                }
            })
            .collect();
        writeln!(out, "{}", fields.join(","))
    }
}

pub struct TextFormatter {
    field_order: Vec<PopulationField>,
    separator: String,
}

impl TextFormatter {
    pub fn new(field_order: Vec<PopulationField>, separator: String) -> Self {
        Self {
            field_order,
            separator,
        }
    }
}

impl Formatter for TextFormatter {
    fn write_header(&self, out: &mut dyn Write) -> io::Result<()> {
        let names: Vec<&str> = self
            .field_order
            .iter()
            .map(|f| f.canonical_name())
            .collect();
        writeln!(out, "{}", names.join(&self.separator))
    }

    fn write_entry(&self, out: &mut dyn Write, entry: &PopulationEntry) -> io::Result<()> {
        let fields: Vec<String> = self
            .field_order
            .iter()
            .map(|&f| field_value(f, entry))
            .collect();
        writeln!(out, "{}", fields.join(&self.separator))
    }
}

/// Builds a formatter by name (`csv`, `text`, `txt`), parsing
/// `field_order` up front so a bad `--field-order`/`FORMAT=` value
/// fails before any output is produced.
pub fn new_formatter(
    kind: &str,
    field_order: &str,
    separator: &str,
) -> GeoIpResult<Box<dyn Formatter>> {
    let order = parse_field_order(field_order)?;

    match kind {
        "csv" => Ok(Box::new(CsvFormatter::new(order))),
        "text" | "txt" => Ok(Box::new(TextFormatter::new(order, separator.to_string()))),
        other => Err(GeoIpError::UnknownFormatter(other.to_string())),
    }
}

/// Test helper: renders the header followed by each entry into an
/// in-memory buffer for assertions against a formatter's output in
/// isolation. The live aggregator does not use this — it writes each
/// line straight to the request's sink so a slow reader stalls the
/// aggregator loop rather than just the formatting step (see
/// `Aggregator::serve_statistic`).
pub fn render_report(formatter: &dyn Formatter, entries: &[PopulationEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = formatter.write_header(&mut buf);
    for entry in entries {
        let _ = formatter.write_entry(&mut buf, entry);
    }
    buf
}
