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

use config::{Config, File};
use std::path::{Path, PathBuf};

use super::*;

/// A helper function that will search for all config files in the given directory and return them as a vec
/// of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> bounty_relayer_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(bounty_relayer_utils::Error::from))
        .collect()
}

/// Try to parse the [`BountyRelayerConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> bounty_relayer_utils::Result<BountyRelayerConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        // get file extension
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of BOUNTY).
    let builder = builder
        .add_source(config::Environment::with_prefix("BOUNTY").separator("_"));
    let cfg = builder.build()?;
    // and finally deserialize the config and post-process it
    let config: Result<
        BountyRelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files.
///
/// it is the same as using the [`search_config_files`] and
/// [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> bounty_relayer_utils::Result<BountyRelayerConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration and standardize
/// the format of the configuration
pub fn postloading_process(
    mut config: BountyRelayerConfig,
) -> bounty_relayer_utils::Result<BountyRelayerConfig> {
    tracing::trace!("Checking configration sanity ...");

    // 1. drain everything, and take enabled chains.
    let old_evm = config
        .evm
        .drain()
        .filter(|(_, chain)| chain.enabled)
        .collect::<Vec<_>>();
    // 2. insert them again, keyed by their chain id.
    for (_, chain) in old_evm {
        config.evm.insert(chain.chain_id.to_string(), chain);
    }

    // every enabled chain must carry a signing key.
    config.verify()?;

    for chain in config.evm.values() {
        // without a pinned price for the native token, the evaluator can
        // only price this chain through the live oracle.
        if !config.assets.contains_key(&chain.native_token) {
            tracing::warn!(
                "No pinned price for token ({}) of chain ({}); \
                 the evaluator will rely on the live price oracle only.",
                chain.native_token,
                chain.name,
            );
        }
        if let (Some(start), Some(stop)) =
            (chain.getter.starting_block, chain.getter.stopping_block)
        {
            if stop < start {
                tracing::warn!(
                    "stopping-block {} is before starting-block {} on ({}); \
                     the worker will stop immediately.",
                    stop,
                    start,
                    chain.name,
                );
            }
        }
    }

    tracing::trace!(
        "postloaded config: {}",
        serde_json::to_string_pretty(&config)?
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, contents: &str) {
        std::fs::write(dir.join("main.toml"), contents).unwrap();
    }

    #[test]
    fn loads_a_minimal_chain_config() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
            port = 9123

            [assets.ETH]
            price = 3000.0

            [evm.sepolia]
            name = "sepolia"
            enabled = true
            chain-id = 11155111
            http-endpoint = "https://rpc.sepolia.org"
            private-key = "0x000000000000000000000000000000000000000000000000000000000000dead"
            incentives-address = "0x00000000000000000000000000000000000000ee"
            native-token = "ETH"
            "#,
        );
        let config = load(dir.path()).unwrap();
        assert_eq!(config.port, 9123);
        // chains are re-keyed by chain id.
        let chain = config.evm.get("11155111").unwrap();
        assert_eq!(chain.name, "sepolia");
        assert_eq!(chain.getter.interval, defaults::getter_interval());
        assert_eq!(
            chain.submitter.max_pending_transactions,
            defaults::max_pending_transactions()
        );
        assert!(chain.getter.max_blocks.is_some());
    }

    #[test]
    fn disabled_chains_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
            [evm.dead]
            name = "dead"
            enabled = false
            chain-id = 5
            http-endpoint = "https://example.com"
            incentives-address = "0x00000000000000000000000000000000000000ee"
            native-token = "ETH"
            "#,
        );
        let config = load(dir.path()).unwrap();
        assert!(config.evm.is_empty());
    }

    #[test]
    fn enabled_chain_without_key_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
            [evm.keyless]
            name = "keyless"
            enabled = true
            chain-id = 5
            http-endpoint = "https://example.com"
            incentives-address = "0x00000000000000000000000000000000000000ee"
            native-token = "ETH"
            "#,
        );
        assert!(load(dir.path()).is_err());
    }
}
