//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;

use clap::{Arg, Command};
use config::{Config, LoggingFmtStyle};
use spark::network::UdpIoProvider;
use spark::{InterfaceRecord, Spark};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

fn init_tracing(config: &config::Logging) {
    let stdout = config.stdout.enabled.then(|| {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_file(config.stdout.show_source)
            .with_line_number(config.stdout.show_source)
            .with_ansi(config.stdout.colors);
        let layer = match config.stdout.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy();
        layer.with_filter(filter)
    });

    tracing_subscriber::registry().with(stdout).init();
}

// Resolves an interface name to its kernel index.
fn ifindex(name: &str) -> Option<u32> {
    let name = std::ffi::CString::new(name).ok()?;
    match unsafe { libc::if_nametoindex(name.as_ptr()) } {
        0 => None,
        index => Some(index),
    }
}

fn interface_db(config: &Config) -> Vec<InterfaceRecord> {
    config
        .interfaces
        .iter()
        .filter_map(|iface| match ifindex(&iface.name) {
            Some(index) => Some(InterfaceRecord::new(
                iface.name.clone(),
                index,
                iface.v4_addr,
                iface.v6_link_local,
            )),
            None => {
                warn!(name = %iface.name, "interface not found, skipping");
                None
            }
        })
        .collect()
}

#[tokio::main]
async fn main() {
    // Parse command-line parameters.
    let matches = Command::new("sparkd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Spark neighbor-discovery daemon")
        .arg(
            Arg::new("config")
                .short('f')
                .long("config-file")
                .value_name("FILE")
                .default_value("/etc/sparkd.toml")
                .help("Configuration file"),
        )
        .get_matches();
    let config_file = matches.get_one::<String>("config").unwrap();

    // Read configuration file.
    let config = std::fs::read_to_string(config_file)
        .map_err(|error| error.to_string())
        .and_then(|data| {
            toml::from_str::<Config>(&data).map_err(|error| error.to_string())
        })
        .unwrap_or_else(|error| {
            eprintln!("failed to load configuration: {error}");
            std::process::exit(1);
        });

    init_tracing(&config.logging);

    // Bring up the I/O provider and the protocol instance.
    let io = UdpIoProvider::new().unwrap_or_else(|error| {
        error!(%error, "failed to create protocol socket");
        std::process::exit(1);
    });
    let spark =
        Spark::spawn(config.node.clone(), io).unwrap_or_else(|error| {
            error!(%error, "failed to start protocol instance");
            std::process::exit(1);
        });

    // Hand over the configured interfaces.
    let db = interface_db(&config);
    if db.is_empty() {
        warn!("no usable interfaces configured");
    }
    if !spark.update_interface_db(db).await {
        error!("interface database rejected");
        std::process::exit(1);
    }

    info!("daemon started");

    // Log neighbor events until asked to stop.
    let mut events = spark.subscribe();
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.expect("failed to listen for SIGINT");
                break;
            }
            _ = sigterm.recv() => break,
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        info!(
                            event = ?event.event_type,
                            interface = %event.ifname,
                            neighbor = %event.node_name,
                            area = %event.area,
                            rtt_us = event.rtt_us,
                            "neighbor event",
                        );
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(count)) => {
                        warn!(%count, "neighbor events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("shutting down");
    spark.stop().await;
}
