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

//! # Relayer Configuration Module 🕸️
//!
//! A module for configuring the bounty relayer.
//!
//! ## Overview
//!
//! Configuration is loaded from a directory of `.toml`/`.json` files plus
//! the environment, and covers:
//! * `port`: the port the status endpoint listens on. Defaults to 9955
//! * `evm`: the EVM networks to relay between, one worker each.
//! * `assets`: pinned token prices for the dummy price backend.
//! * `pricing`: the token price cache behavior.

/// CLI configuration
#[cfg(feature = "cli")]
pub mod cli;
/// Default values for the configuration
pub mod defaults;
/// EVM configuration
pub mod evm;
/// Utils for processing configuration
pub mod utils;

use std::collections::HashMap;

use evm::EvmChainConfig;
use serde::{Deserialize, Serialize};

/// BountyRelayerConfig is the configuration for the bounty relayer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct BountyRelayerConfig {
    /// Status endpoint port number.
    ///
    /// default to 9955
    #[serde(default = "defaults::port", skip_serializing)]
    pub port: u16,
    /// EVM based networks and the configuration.
    ///
    /// a map between chain name and its configuration.
    #[serde(default)]
    pub evm: HashMap<String, EvmChainConfig>,
    /// Pinned token prices, used as the price oracle of last resort.
    ///
    /// a map between token symbol and its details.
    #[serde(default)]
    pub assets: HashMap<String, AssetConfig>,
    /// Token price cache configuration.
    #[serde(default)]
    pub pricing: PricingConfig,
}

impl BountyRelayerConfig {
    /// Makes sure that the config is valid, by going
    /// through the whole config and doing some basic checks.
    pub fn verify(&self) -> bounty_relayer_utils::Result<()> {
        // every enabled chain submits transactions, so every enabled chain
        // needs a signing key.
        let all_keyed = self
            .evm
            .iter()
            .filter(|(_, chain)| chain.enabled)
            .all(|(_, chain)| chain.private_key.is_some());
        all_keyed
            .then_some(())
            .ok_or(bounty_relayer_utils::Error::MissingSecrets)
    }

    /// The chain config for a chain id, if we know the chain.
    pub fn chain(&self, chain_id: u32) -> Option<&EvmChainConfig> {
        self.evm.values().find(|chain| chain.chain_id == chain_id)
    }
}

/// Details of an asset the relayer prices gas in.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssetConfig {
    /// A pinned USD price for this asset.
    pub price: f64,
}

/// PricingConfig is the configuration of the token price cache.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PricingConfig {
    /// How long a cached price stays fresh, in milliseconds.
    #[serde(default = "defaults::price_cache_duration")]
    pub cache_duration: u64,
    /// Consecutive provider failures tolerated before pricing is treated
    /// as unavailable.
    #[serde(default = "defaults::pricing_max_tries")]
    pub max_tries: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cache_duration: defaults::price_cache_duration(),
            max_tries: defaults::pricing_max_tries(),
        }
    }
}
