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

use std::path::PathBuf;

use clap::Parser;

/// Resolve a stream of IPv4 addresses against a GeoLite2-style CSV
/// database, tally population per city, and report ranked/clustered
/// statistics.
#[derive(Parser, Debug)]
#[command(name = "geoip-aggregator", version)]
pub struct Cli {
    /// Directory containing the city and block CSV files.
    #[arg(short = 'd', long = "db-dir")]
    pub db_dir: PathBuf,

    /// City locations CSV filename, relative to --db-dir.
    #[arg(short = 'c', long = "city-file", default_value = "GeoLite2-City-Locations-en.csv")]
    pub city_file: String,

    /// Block (CIDR) CSV filename, relative to --db-dir.
    #[arg(short = 'b', long = "block-file", default_value = "GeoLite2-City-Blocks-IPv4.csv")]
    pub block_file: String,

    /// Read addresses from this file instead of standard input.
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Increase log verbosity (-v for info, -vv for debug).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Count entries with an unresolved country or city instead of
    /// dropping them.
    #[arg(short = 'U', long = "include-unknown")]
    pub include_unknown: bool,

    /// Print only the top N entries in a STAT report (negative = all).
    #[arg(short = 'l', long = "limit", default_value_t = 1000)]
    pub limit: i64,

    /// Output formatter: csv, text, or txt.
    #[arg(short = 't', long = "format", default_value = "csv")]
    pub format: String,

    /// Field separator for the text formatter.
    #[arg(short = 'f', long = "field-separator", default_value = "\t")]
    pub field_separator: String,

    /// Field order for report rows, drawn from name, pop, lat, lon, group.
    #[arg(short = 'o', long = "field-order", default_value = "name,pop,lat,lon,group")]
    pub field_order: String,

    /// Bind address for the TCP listener, e.g. 127.0.0.1:9000. When
    /// omitted, only the standard-input feeder runs.
    #[arg(short = 'T', long = "listen")]
    pub listen: Option<String>,

    /// Number of population-magnitude groups for clustering a report.
    #[arg(short = 'g', long = "groups", default_value_t = 5)]
    pub groups: usize,

    /// Maximum refinement rounds for the clusterer.
    #[arg(short = 'G', long = "iterations", default_value_t = 20)]
    pub iterations: usize,

    /// Kept for CLI-surface parity; this core has no downloader to
    /// clean up after, so this flag is currently a no-op.
    #[arg(short = 'n', long = "no-cleanup")]
    pub no_cleanup: bool,
}

impl Cli {
    pub fn city_path(&self) -> PathBuf {
        self.db_dir.join(&self.city_file)
    }

    pub fn block_path(&self) -> PathBuf {
        self.db_dir.join(&self.block_file)
    }
}
