// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounty Relayer Binary.
//!
//! Exit codes: 0 on a clean shutdown, 1 on a configuration error, 2 on a
//! fatal worker error.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal::unix;

use bounty_relayer::routes::build_web_services;
use bounty_relayer::service::{self, ServiceHandle};
use bounty_relayer_config::cli::{
    create_store, load_config, setup_logger, Opts,
};
use bounty_relayer_context::RelayerContext;

/// The main entry point for the relayer.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose, "bounty_relayer")?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory
    let config = match load_config(args.config_dir.clone()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load the configuration: {}", e);
            std::process::exit(1);
        }
    };

    // persistent storage for the relayer
    let store = match create_store(&args).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open the store: {}", e);
            std::process::exit(1);
        }
    };

    // The RelayerContext takes a configuration, and populates objects that
    // are needed throughout the lifetime of the relayer. Items such as
    // wallets and providers, as well as a convenient place to access the
    // configuration.
    let ctx = RelayerContext::new(config, store.clone())?;

    let (handle, mut fatal_workers) = ServiceHandle::new();

    // the status endpoint; the PORT env var overrides the config.
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(ctx.config.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = build_web_services(handle.clone());
    tracing::info!("Starting the server on {}", addr);
    let server_handle = tokio::spawn(
        axum::Server::bind(&addr).serve(app.into_make_service()),
    );

    // start all background services.
    // this does not block, will fire the services on background tasks.
    if let Err(e) =
        service::ignite(&ctx, Arc::new(store), handle.clone()).await
    {
        tracing::error!("Failed to start the workers: {}", e);
        std::process::exit(2);
    }
    tracing::event!(
        target: bounty_relayer_utils::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %bounty_relayer_utils::probe::Kind::Lifecycle,
        started = true
    );

    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    let shutdown = || {
        tracing::event!(
            target: bounty_relayer_utils::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %bounty_relayer_utils::probe::Kind::Lifecycle,
            shutdown = true
        );
        tracing::warn!("Shutting down...");
        // send shutdown signal to all of the application.
        ctx.shutdown();
        // also abort the server task
        server_handle.abort();
        std::thread::sleep(std::time::Duration::from_millis(300));
        tracing::info!("Clean Exit ..");
    };
    tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
            shutdown();
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
            shutdown();
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
            shutdown();
        },
        chain_id = fatal_workers.recv() => {
            tracing::error!(?chain_id, "A worker died fatally ...");
            shutdown();
            std::process::exit(2);
        },
    }
    Ok(())
}
