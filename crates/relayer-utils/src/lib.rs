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

//! Common utilities shared by every crate of the bounty relayer: the error
//! taxonomy, retry policies and the probe logging targets.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ethers::types::U256;

pub mod clickable_link;
/// A module used for debugging relayer lifecycle, sync state, or other relayer state.
pub mod probe;
/// Retry functionality
pub mod retry;

/// An enum of all possible errors that could be encountered during the
/// execution of the bounty relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in the underlying Http/Ws server.
    #[error(transparent)]
    Axum(#[from] axum::Error),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Ethers ABI decoding error.
    #[error(transparent)]
    EthersAbi(#[from] ethers::abi::Error),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWalletError(#[from] ethers::signers::WalletError),
    /// Elliptic Curve error.
    #[error(transparent)]
    EllipticCurve(#[from] ethers::core::k256::elliptic_curve::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Sled transaction error.
    #[error(transparent)]
    SledTransaction(
        #[from] sled::transaction::TransactionError<std::io::Error>,
    ),
    /// Reqwest error
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// EVM Chain not found.
    #[error("Chain Not Found: {}", chain_id)]
    ChainNotFound {
        /// The chain id of the chain.
        chain_id: String,
    },
    /// Missing Secrets in the config, either private key, ...etc.
    #[error("Missing required private-key in the config")]
    MissingSecrets,
    /// The log payload could not be decoded into a bounty event.
    #[error("Invalid bounty event: {}", reason)]
    InvalidBountyEvent {
        /// Why the decoder rejected the log.
        reason: String,
    },
    /// The destination chain encoded in a message is not a chain we know of.
    #[error("Invalid destination chain identifier in message payload")]
    InvalidDestinationChain,
    /// The relay state version in the store moved under us while writing.
    #[error("Relay state version conflict for {}", message_identifier)]
    StateVersionConflict {
        /// The message identifier of the conflicting relay state.
        message_identifier: String,
    },
    /// The wallet balance dropped below the minimum operational balance.
    #[error("Wallet balance {} below operational minimum {}", balance, minimum)]
    InsufficientBalance {
        /// Current balance in wei.
        balance: U256,
        /// Derived minimum operational balance in wei.
        minimum: U256,
    },
    /// An order exceeded its maximum number of submission attempts.
    #[error("Order exceeded {} attempts: {}", max_tries, last_error)]
    OrderFailed {
        /// The configured attempt cap.
        max_tries: u32,
        /// The error of the last attempt.
        last_error: String,
    },
    /// Token price could not be fetched and the cache ran dry.
    #[error("Failed to fetch token price for token: {token}")]
    FetchTokenPriceError {
        /// The token symbol we asked the oracle about.
        token: String,
    },
    /// a background task failed and force restarted.
    #[error("Task Force Restarted from an error")]
    ForceRestart,
    /// a background task failed and stopped abnormally.
    #[error("Task Stopped Abnormally")]
    TaskStoppedAbnormally,
}

/// A type alias for the result used all over the bounty relayer.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for HandlerError {
    fn from(value: Error) -> Self {
        HandlerError(StatusCode::INTERNAL_SERVER_ERROR, value.to_string())
    }
}

/// Error type for HTTP handlers
pub struct HandlerError(
    /// HTTP status code for response
    pub StatusCode,
    /// Response message
    pub String,
);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}
