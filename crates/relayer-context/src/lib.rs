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

#![warn(missing_docs)]
//! # Relayer Context Module 🕸️
//!
//! A module for managing the context of the relayer.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use bounty_price_oracle_backends::{
    CachedPriceBackend, CoinGeckoBackend, DummyPriceBackend, PriceOracleMerger,
};
use bounty_relayer_config::evm::EvmChainConfig;
use bounty_relayer_store::SledStore;
use ethers::core::k256::SecretKey;
use ethers::prelude::*;

/// RelayerContext contains the relayer's configuration and shutdown signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the relayer.
    pub config: bounty_relayer_config::BountyRelayerConfig,
    /// Broadcasts a shutdown signal to all active connections.
    ///
    /// The initial `shutdown` trigger is provided by the `run` caller. The
    /// server is responsible for gracefully shutting down active connections.
    /// When a connection task is spawned, it is passed a broadcast receiver
    /// handle. When a graceful shutdown is initiated, a `()` value is sent via
    /// the broadcast::Sender. Each active connection receives it, reaches a
    /// safe terminal state, and completes the task.
    notify_shutdown: broadcast::Sender<()>,
    store: SledStore,
    /// Price backend for fetching prices.
    price_oracle: Arc<PriceOracleMerger>,
}

impl RelayerContext {
    /// Creates a new RelayerContext.
    pub fn new(
        config: bounty_relayer_config::BountyRelayerConfig,
        store: SledStore,
    ) -> bounty_relayer_utils::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);

        let dummy_backend = {
            let price_map = config
                .assets
                .iter()
                .map(|(token, details)| (token.clone(), details.price))
                .collect();
            DummyPriceBackend::new(price_map)
        };
        let cached_coingecko_backend = CachedPriceBackend::builder()
            .backend(CoinGeckoBackend::builder().build())
            .store(store.clone())
            .cache_expiration(Some(Duration::from_millis(
                config.pricing.cache_duration,
            )))
            .max_consecutive_failures(Some(config.pricing.max_tries))
            .use_cache_if_source_unavailable()
            .even_if_expired()
            .build();
        // merge all the price oracle backends; the pinned asset prices win
        // over the live oracle when both know a token.
        let price_oracle = PriceOracleMerger::builder()
            .merge(Box::new(cached_coingecko_backend))
            .merge(Box::new(dummy_backend))
            .build();
        let price_oracle = Arc::new(price_oracle);
        Ok(Self {
            config,
            notify_shutdown,
            store,
            price_oracle,
        })
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks/connections.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// The chain config for a chain id.
    pub fn chain_config(
        &self,
        chain_id: u32,
    ) -> bounty_relayer_utils::Result<&EvmChainConfig> {
        self.config.chain(chain_id).ok_or_else(|| {
            bounty_relayer_utils::Error::ChainNotFound {
                chain_id: chain_id.to_string(),
            }
        })
    }

    /// Returns a new `EthereumProvider` for the relayer.
    ///
    /// # Arguments
    ///
    /// * `chain_id` - the chain id.
    pub async fn evm_provider(
        &self,
        chain_id: u32,
    ) -> bounty_relayer_utils::Result<Provider<Http>> {
        let chain_config = self.chain_config(chain_id)?;
        let provider = Provider::try_from(chain_config.http_endpoint.as_str())?
            .interval(Duration::from_millis(5u64));
        Ok(provider)
    }

    /// Sets up and returns an EVM wallet for the relayer.
    ///
    /// # Arguments
    ///
    /// * `chain_id` - the chain id.
    pub async fn evm_wallet(
        &self,
        chain_id: u32,
    ) -> bounty_relayer_utils::Result<LocalWallet> {
        let chain_config = self.chain_config(chain_id)?;
        let private_key = chain_config
            .private_key
            .as_ref()
            .ok_or(bounty_relayer_utils::Error::MissingSecrets)?;
        let key = SecretKey::from_bytes(private_key.as_bytes().into())?;
        let wallet = LocalWallet::from(key).with_chain_id(chain_id);
        Ok(wallet)
    }

    /// Returns [Sled](https://sled.rs)-based database store
    pub fn store(&self) -> &SledStore {
        &self.store
    }

    /// Returns a price oracle for fetching token prices.
    pub fn price_oracle(&self) -> Arc<PriceOracleMerger> {
        self.price_oracle.clone()
    }
}

/// Listens for the server shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value is
/// ever sent. Once a value has been sent via the broadcast channel, the server
/// should shutdown.
///
/// The `Shutdown` struct listens for the signal and tracks that the signal has
/// been received. Callers may query for whether the shutdown signal has been
/// received or not.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}
