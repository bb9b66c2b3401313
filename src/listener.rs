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

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::aggregator::{Incoming, LocationRequest, ResetRequest, StatisticRequest};
use crate::error::{GeoIpError, GeoIpResult};
use crate::format::{new_formatter, Formatter};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// STAT defaults a connection worker falls back to absent an override,
/// and the knobs needed to rebuild a formatter for `FORMAT=`.
pub struct ReportDefaults {
    pub limit: i64,
    pub groups: usize,
    pub iterations: usize,
    field_order: String,
    field_separator: String,
    default_formatter: Arc<dyn Formatter>,
}

impl ReportDefaults {
    pub fn new(
        limit: i64,
        groups: usize,
        iterations: usize,
        format: &str,
        field_order: String,
        field_separator: String,
    ) -> GeoIpResult<Self> {
        let default_formatter = Arc::from(new_formatter(format, &field_order, &field_separator)?);

        Ok(Self {
            limit,
            groups,
            iterations,
            field_order,
            field_separator,
            default_formatter,
        })
    }

    fn formatter(&self, kind: &str) -> GeoIpResult<Arc<dyn Formatter>> {
        Ok(Arc::from(new_formatter(
            kind,
            &self.field_order,
            &self.field_separator,
        )?))
    }
}

/// Binds `bind_addr` and runs the accept loop until `quit` fires, then
/// drains every worker it spawned before returning.
pub async fn run_listener(
    bind_addr: String,
    incoming: mpsc::Sender<Incoming>,
    defaults: Arc<ReportDefaults>,
    mut quit: watch::Receiver<bool>,
) {
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", bind_addr, e);
            return;
        }
    };

    info!("listening on {}", bind_addr);

    let mut workers = JoinSet::new();

    loop {
        tokio::select! {
            _ = quit.changed() => {
                debug!("listener received shutdown signal");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!("peer connected: {}", addr);
                        let incoming = incoming.clone();
                        let defaults = defaults.clone();
                        workers.spawn(async move {
                            handle_connection(stream, addr, incoming, defaults).await;
                        });
                    }
                    Err(e) => warn!("accept failed: {}", e),
                }
            }
        }
    }

    debug!("listener draining {} worker(s)", workers.len());
    while workers.join_next().await.is_some() {}
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    incoming: mpsc::Sender<Incoming>,
    defaults: Arc<ReportDefaults>,
) {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
    let mut line = String::new();

    loop {
        line.clear();

        let read = match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("read error from {}: {}", addr, e);
                break;
            }
            Err(_) => {
                debug!("idle timeout for {}", addr);
                break;
            }
        };

        if read == 0 {
            break;
        }

        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }

        if let Some(rest) = cmd.strip_prefix('!').or_else(|| cmd.strip_prefix('.')) {
            if !handle_command(rest, &incoming, &defaults, &mut writer).await {
                break;
            }
            continue;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = incoming
            .send(Incoming::Location(LocationRequest {
                address: cmd.to_string(),
                result: Some(reply_tx),
            }))
            .await;

        if sent.is_err() {
            break;
        }

        let (country, city) = match reply_rx.await {
            Ok(Ok(entry)) => (entry.city.country, entry.city.name),
            _ => (String::new(), String::new()),
        };

        let country = if country.is_empty() { "UNKNOWN" } else { &country };
        let city = if city.is_empty() { "UNKNOWN" } else { &city };

        if writer
            .write_all(format!("{country}:{city}\n").as_bytes())
            .await
            .is_err()
        {
            break;
        }
    }
}

/// Handles one `!`/`.`-prefixed command. Returns `false` when the
/// worker should close the connection (`QUIT`).
async fn handle_command(
    args: &str,
    incoming: &mpsc::Sender<Incoming>,
    defaults: &Arc<ReportDefaults>,
    writer: &mut Box<dyn AsyncWrite + Send + Unpin>,
) -> bool {
    let mut tokens = args.split_whitespace();
    let cmd = match tokens.next() {
        Some(cmd) => cmd,
        None => return true,
    };

    match cmd.to_uppercase().as_str() {
        "QUIT" => false,
        "STAT" => {
            match parse_stat_settings(tokens, defaults) {
                Ok(settings) => {
                    // The aggregator writes the report straight to this
                    // connection's socket from inside its own task, so a
                    // slow reader here stalls every other queued request
                    // for as long as the write takes (matches the source's
                    // single-goroutine report write). The sink is handed
                    // back through `done` once writing completes.
                    let sink = std::mem::replace(writer, Box::new(tokio::io::sink()));
                    let (done_tx, done_rx) = oneshot::channel();

                    let sent = incoming
                        .send(Incoming::Statistic(StatisticRequest {
                            limit: settings.limit,
                            groups: settings.groups,
                            max_iterations: settings.max_iterations,
                            formatter: settings.formatter,
                            sink,
                            done: done_tx,
                        }))
                        .await;

                    if sent.is_err() {
                        return false;
                    }

                    match done_rx.await {
                        Ok(returned) => *writer = returned,
                        Err(_) => return false,
                    }
                }
                Err(e) => warn!("bad STAT command: {}", e),
            }
            true
        }
        "RESET" => {
            let _ = incoming.send(Incoming::Reset(ResetRequest)).await;
            true
        }
        other => {
            warn!("unrecognized command {} received", other);
            true
        }
    }
}

struct StatSettings {
    limit: i64,
    groups: usize,
    max_iterations: usize,
    formatter: Arc<dyn Formatter>,
}

fn parse_stat_settings<'a>(
    args: impl Iterator<Item = &'a str>,
    defaults: &ReportDefaults,
) -> GeoIpResult<StatSettings> {
    let mut limit = defaults.limit;
    let mut groups = defaults.groups;
    let mut max_iterations = defaults.iterations;
    let mut formatter = defaults.default_formatter.clone();

    for arg in args {
        let (key, value) = arg.split_once('=').unwrap_or((arg, ""));

        match key.to_uppercase().as_str() {
            "LIMIT" => {
                limit = value
                    .parse()
                    .map_err(|_| GeoIpError::InvalidInt(value.to_string()))?;
            }
            "GROUPS" => {
                let requested: usize = value
                    .parse()
                    .map_err(|_| GeoIpError::InvalidInt(value.to_string()))?;
                if requested < groups {
                    groups = requested;
                }
            }
            "ITERATION" => {
                let requested: usize = value
                    .parse()
                    .map_err(|_| GeoIpError::InvalidInt(value.to_string()))?;
                if requested < max_iterations {
                    max_iterations = requested;
                }
            }
            "FORMAT" => {
                formatter = defaults.formatter(value)?;
            }
            other => return Err(GeoIpError::UnknownStatKey(other.to_string())),
        }
    }

    Ok(StatSettings {
        limit,
        groups,
        max_iterations,
        formatter,
    })
}

/// Feeds lines from `reader` as `LocationRequest`s until EOF, then
/// issues one final `StatisticRequest` writing straight to `out` from
/// inside the aggregator task.
pub async fn run_stdin_feeder(
    mut reader: impl AsyncBufRead + Unpin,
    incoming: mpsc::Sender<Incoming>,
    defaults: Arc<ReportDefaults>,
    out: impl AsyncWrite + Send + Unpin + 'static,
) {
    let mut line = String::new();

    loop {
        line.clear();

        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let address = line.trim();
                if address.is_empty() {
                    continue;
                }

                let sent = incoming
                    .send(Incoming::Location(LocationRequest {
                        address: address.to_string(),
                        result: None,
                    }))
                    .await;

                if sent.is_err() {
                    return;
                }
            }
            Err(e) => {
                error!("input read error: {}", e);
                break;
            }
        }
    }

    let (done_tx, done_rx) = oneshot::channel();
    let sent = incoming
        .send(Incoming::Statistic(StatisticRequest {
            limit: defaults.limit,
            groups: defaults.groups,
            max_iterations: defaults.iterations,
            formatter: defaults.default_formatter.clone(),
            sink: Box::new(out),
            done: done_tx,
        }))
        .await;

    if sent.is_err() {
        return;
    }

    let _ = done_rx.await;
}
