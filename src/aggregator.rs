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

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::block::{BlockEntry, BlockIndex};
use crate::cluster::cluster;
use crate::error::GeoIpResult;
use crate::format::Formatter;
use crate::population::PopulationEntry;

/// Resolve a single address against the block index. On success, the
/// reply (if requested) is sent before the population map is touched.
pub struct LocationRequest {
    pub address: String,
    pub result: Option<oneshot::Sender<GeoIpResult<BlockEntry>>>,
}

/// Snapshot, rank, (optionally) cluster, and render the population
/// map straight into `sink` from inside the aggregator task, the way
/// the source writes its report to the connection from within the
/// single server goroutine: a slow reader on `sink` stalls every other
/// request until the write finishes. `done` hands `sink` back once
/// rendering completes, since callers (connection workers) keep using
/// it afterward.
pub struct StatisticRequest {
    pub limit: i64,
    pub groups: usize,
    pub max_iterations: usize,
    pub formatter: Arc<dyn Formatter>,
    pub sink: Box<dyn AsyncWrite + Send + Unpin>,
    pub done: oneshot::Sender<Box<dyn AsyncWrite + Send + Unpin>>,
}

pub struct ResetRequest;

pub enum Incoming {
    Location(LocationRequest),
    Statistic(StatisticRequest),
    Reset(ResetRequest),
}

/// The single writer of the population map. Owns it exclusively;
/// nothing outside `run` ever touches it.
pub struct Aggregator {
    block_index: Arc<BlockIndex>,
    include_unknown: bool,
    verbose: bool,
}

impl Aggregator {
    pub fn new(block_index: Arc<BlockIndex>, include_unknown: bool, verbose: bool) -> Self {
        Self {
            block_index,
            include_unknown,
            verbose,
        }
    }

    /// Drains `rx` until the channel closes (all senders dropped),
    /// serializing every mutation of the population map.
    pub async fn run(self, mut rx: mpsc::Receiver<Incoming>) {
        let mut population: BTreeMap<String, PopulationEntry> = BTreeMap::new();

        while let Some(message) = rx.recv().await {
            match message {
                Incoming::Location(req) => {
                    debug!("location request for {}", req.address);
                    self.serve_location(&mut population, req);
                }
                Incoming::Statistic(req) => {
                    debug!("statistic request (limit={}, groups={})", req.limit, req.groups);
                    Self::serve_statistic(&population, req).await;
                }
                Incoming::Reset(_) => {
                    info!("reset request: clearing {} population entries", population.len());
                    population.clear();
                }
            }
        }

        debug!("aggregator channel closed, exiting");
    }

    fn serve_location(
        &self,
        population: &mut BTreeMap<String, PopulationEntry>,
        req: LocationRequest,
    ) {
        let entry = match self.block_index.search(&req.address) {
            Ok(entry) => entry.clone(),
            Err(e) => {
                if self.verbose {
                    warn!("no entry for {}, ignored: {}", req.address, e);
                }
                if let Some(result) = req.result {
                    let _ = result.send(Err(e));
                }
                return;
            }
        };

        if let Some(result) = req.result {
            let _ = result.send(Ok(entry.clone()));
        }

        let mut country = entry.city.country.clone();
        let mut city = entry.city.name.clone();

        if !self.include_unknown && (country.is_empty() || city.is_empty()) {
            return;
        }

        if country.is_empty() {
            country = "UNKNOWN".to_string();
        }
        if city.is_empty() {
            city = "UNKNOWN".to_string();
        }

        let key = format!("{country}: {city}");

        population
            .entry(key.clone())
            .and_modify(|e| e.count += 1)
            .or_insert(PopulationEntry {
                name: key,
                lat: entry.lat,
                lon: entry.lon,
                count: 1,
                group: 0,
            });
    }

    /// Writes the report synchronously against `req.sink`, one
    /// `write_all` per line, `.await`ed from this single task. A slow
    /// reader on the other end blocks every other queued `Incoming`
    /// message for as long as the write takes, mirroring the source's
    /// single-goroutine report write.
    async fn serve_statistic(population: &BTreeMap<String, PopulationEntry>, req: StatisticRequest) {
        let mut entries: Vec<PopulationEntry> = population.values().cloned().collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count));

        let limit = if req.limit < 0 {
            entries.len()
        } else {
            (req.limit as usize).min(entries.len())
        };

        if req.groups > 0 && population.len() >= req.groups {
            cluster(&mut entries[..limit], req.groups, req.max_iterations);
        }

        info!("statistic report: {} of {} entries", limit, entries.len());

        let StatisticRequest {
            formatter,
            mut sink,
            done,
            ..
        } = req;

        let mut line = Vec::new();

        if formatter.write_header(&mut line).is_ok() {
            let _ = sink.write_all(&line).await;
        }

        for entry in &entries[..limit] {
            line.clear();
            if formatter.write_entry(&mut line, entry).is_ok() && sink.write_all(&line).await.is_err() {
                break;
            }
        }

        let _ = sink.flush().await;
        let _ = done.send(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::city::CityIndex;
    use crate::format::new_formatter;
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    fn write_csv(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(rows.join("\n").as_bytes()).unwrap();
        file
    }

    /// Sends a `StatisticRequest` over a `tokio::io::duplex` pair and
    /// collects everything the aggregator wrote to the sink half,
    /// the way a real connection worker would read it off the socket.
    async fn collect_report(
        tx: &mpsc::Sender<Incoming>,
        limit: i64,
        groups: usize,
        max_iterations: usize,
        formatter: Arc<dyn Formatter>,
    ) -> Vec<u8> {
        let (sink, mut reader) = tokio::io::duplex(4096);
        let (done_tx, done_rx) = oneshot::channel();

        tx.send(Incoming::Statistic(StatisticRequest {
            limit,
            groups,
            max_iterations,
            formatter,
            sink: Box::new(sink),
            done: done_tx,
        }))
        .await
        .unwrap();

        drop(done_rx.await.unwrap());

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    fn fixture_block_index(include_city: bool) -> Arc<BlockIndex> {
        let city_header = "geoname_id,a,b,c,country,d,e,f,g,h,name";
        let city_row = if include_city {
            "5128581,,,,US,,,,,,New York"
        } else {
            "5128581,,,,,,,,,,"
        };
        let city_csv = write_csv(&[city_header, city_row]);
        let cities = CityIndex::load(city_csv.path()).unwrap();

        let block_header = "network,geoname_id,a,b,c,d,e,latitude,longitude";
        let block_row = "8.8.8.0/24,5128581,,,,,,40.7,-74.0";
        let block_csv = write_csv(&[block_header, block_row]);

        Arc::new(BlockIndex::load(block_csv.path(), &cities).unwrap())
    }

    #[tokio::test]
    async fn accumulates_and_ranks_by_count() {
        let blocks = fixture_block_index(true);
        let agg = Aggregator::new(blocks, false, false);
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(agg.run(rx));

        for _ in 0..3 {
            tx.send(Incoming::Location(LocationRequest {
                address: "8.8.8.8".to_string(),
                result: None,
            }))
            .await
            .unwrap();
        }

        let formatter = Arc::<dyn Formatter>::from(new_formatter("csv", "name,pop", "\t").unwrap());
        let report = collect_report(&tx, -1, 0, 0, formatter).await;
        let text = String::from_utf8(report).unwrap();
        assert_eq!(text, "name,pop\n\"US: New York\",3\n");
    }

    #[tokio::test]
    async fn unknown_filtering_respects_include_unknown_flag() {
        let blocks = fixture_block_index(false);

        let agg = Aggregator::new(blocks.clone(), false, false);
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(agg.run(rx));

        tx.send(Incoming::Location(LocationRequest {
            address: "8.8.8.8".to_string(),
            result: None,
        }))
        .await
        .unwrap();

        let formatter = Arc::<dyn Formatter>::from(new_formatter("csv", "name,pop", "\t").unwrap());
        let report = collect_report(&tx, -1, 0, 0, formatter).await;
        assert_eq!(String::from_utf8(report).unwrap(), "name,pop\n");
    }

    #[tokio::test]
    async fn reset_clears_population() {
        let blocks = fixture_block_index(true);
        let agg = Aggregator::new(blocks, false, false);
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(agg.run(rx));

        tx.send(Incoming::Location(LocationRequest {
            address: "8.8.8.8".to_string(),
            result: None,
        }))
        .await
        .unwrap();

        tx.send(Incoming::Reset(ResetRequest)).await.unwrap();

        let formatter = Arc::<dyn Formatter>::from(new_formatter("csv", "name,pop", "\t").unwrap());
        let report = collect_report(&tx, -1, 0, 0, formatter).await;
        assert_eq!(String::from_utf8(report).unwrap(), "name,pop\n");
    }
}
