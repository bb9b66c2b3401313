#[macro_use]
extern crate log;

mod aggregator;
mod block;
mod city;
mod cluster;
mod config;
mod error;
mod format;
mod ip4range;
mod listener;
mod population;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{stdin, stdout, BufReader};
use tokio::sync::{mpsc, watch};

use aggregator::Aggregator;
use block::BlockIndex;
use city::CityIndex;
use config::Cli;
use listener::ReportDefaults;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let cities = match CityIndex::load(cli.city_path()) {
        Ok(cities) => cities,
        Err(e) => {
            error!("cannot load city database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let blocks = match BlockIndex::load(cli.block_path(), &cities) {
        Ok(blocks) => blocks,
        Err(e) => {
            error!("cannot load block database: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let blocks = Arc::new(blocks);

    let defaults = match ReportDefaults::new(
        cli.limit,
        cli.groups,
        cli.iterations,
        &cli.format,
        cli.field_order.clone(),
        cli.field_separator.clone(),
    ) {
        Ok(defaults) => Arc::new(defaults),
        Err(e) => {
            error!("cannot build report formatter: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (incoming_tx, incoming_rx) = mpsc::channel(1);

    let aggregator = Aggregator::new(blocks, cli.include_unknown, cli.verbose > 0);
    let aggregator_handle = tokio::spawn(aggregator.run(incoming_rx));

    let (quit_tx, quit_rx) = watch::channel(false);

    let listener_handle = cli.listen.clone().map(|addr| {
        let tx = incoming_tx.clone();
        let defaults = defaults.clone();
        tokio::spawn(listener::run_listener(addr, tx, defaults, quit_rx))
    });

    let stdin_tx = incoming_tx.clone();
    let stdin_defaults = defaults.clone();
    let input = cli.input.clone();
    let stdin_handle = tokio::spawn(async move {
        match input {
            Some(path) => match tokio::fs::File::open(&path).await {
                Ok(file) => {
                    let reader = BufReader::new(file);
                    listener::run_stdin_feeder(reader, stdin_tx, stdin_defaults, stdout()).await;
                }
                Err(e) => error!("cannot open input file {}: {}", path.display(), e),
            },
            None => {
                let reader = BufReader::new(stdin());
                listener::run_stdin_feeder(reader, stdin_tx, stdin_defaults, stdout()).await;
            }
        }
    });

    let stdin_abort = stdin_handle.abort_handle();

    let exit_code = tokio::select! {
        _ = stdin_handle => {
            info!("input exhausted, shutting down");
            ExitCode::SUCCESS
        }
        signal = wait_for_signal() => {
            warn!("received {}, shutting down", signal.name);
            // select! drops the stdin_handle future without stopping the
            // task it's attached to; abort it explicitly so its `incoming`
            // sender clone is released and the channel can close below.
            stdin_abort.abort();
            ExitCode::from(128u8.wrapping_add(signal.number))
        }
    };

    let _ = quit_tx.send(true);

    if let Some(handle) = listener_handle {
        let _ = handle.await;
    }

    drop(incoming_tx);
    let _ = aggregator_handle.await;

    exit_code
}

struct Signal {
    name: &'static str,
    number: u8,
}

#[cfg(unix)]
async fn wait_for_signal() -> Signal {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

    tokio::select! {
        _ = sigint.recv() => Signal { name: "SIGINT", number: 2 },
        _ = sigterm.recv() => Signal { name: "SIGTERM", number: 15 },
        _ = sigquit.recv() => Signal { name: "SIGQUIT", number: 3 },
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Signal {
    let _ = tokio::signal::ctrl_c().await;
    Signal { name: "CTRL-C", number: 2 }
}
