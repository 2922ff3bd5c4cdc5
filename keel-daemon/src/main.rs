//
// Copyright (c) The Keel Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

use clap::{Arg, Command};
use keel_daemon::config::{self, Config, LoggingFmtStyle};
use keel_daemon::northbound::Northbound;
use keel_northbound::PluginRegistry;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = rolling::never(&config.file.dir, &config.file.name);
        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_ansi(false)
            .with_filter(LevelFilter::from_level(tracing::Level::TRACE))
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(config.stdout.colors);
        let layer = match config.stdout.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(LevelFilter::from_level(tracing::Level::TRACE))
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("keel=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = Command::new("Keel configuration engine")
        .version(clap::crate_version!())
        .arg(
            Arg::new("config")
                .short('f')
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .arg(
            Arg::new("sock")
                .short('s')
                .long("sock")
                .value_name("path")
                .help("Override the front-end socket path."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.get_one::<String>("config").map(String::as_str);
    let mut config = Config::load(config_file);
    if let Some(sock) = matches.get_one::<String>("sock") {
        config.sock_path = sock.into();
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    // The engine is a single-threaded cooperative event loop; suspension
    // points are socket I/O and timers only.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            // Plugins are registered here at startup; the loading mechanism
            // itself lives outside the engine core.
            let plugins = PluginRegistry::new();

            let (mut nb, _provider_tx) = match Northbound::init(config, plugins)
            {
                Ok(nb) => nb,
                Err(error) => {
                    error!(%error, "failed to initialize engine");
                    std::process::exit(1);
                }
            };
            if let Err(error) = nb.listen() {
                error!(%error, "failed to bind front-end socket");
                std::process::exit(1);
            }
            nb.run().await;
        });
}
