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

use bounty_relayer_store::OrderKind;
use bounty_relayer_types::{PrivateKey, RpcUrl};
use ethers::types::Address;

use super::*;

/// EvmChainConfig is the configuration for one EVM based network. The
/// relayer runs one isolated worker per enabled chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EvmChainConfig {
    /// String that groups configuration for this chain on a human-readable name.
    pub name: String,
    /// Boolean indicating EVM based networks are enabled or not.
    #[serde(default)]
    pub enabled: bool,
    /// Http(s) Endpoint for quick Req/Res
    #[serde(skip_serializing)]
    pub http_endpoint: RpcUrl,
    /// Block Explorer for this chain.
    ///
    /// Optional, and only used for printing a clickable links
    /// for transactions and contracts.
    #[serde(skip_serializing)]
    pub explorer: Option<url::Url>,
    /// chain specific id (output of chainId opcode on EVM networks)
    #[serde(rename(serialize = "chainId"))]
    pub chain_id: u32,
    /// The Private Key of this account on this network
    /// the format is more dynamic here:
    /// 1. if it starts with '0x' then this would be raw (64 bytes) hex encoded
    ///    private key.
    ///    Example: 0x8917174396171783496173419137618235192359106130478137647163400318
    ///
    /// 2. if it starts with '$' then it would be considered as an Enviroment variable
    ///    of a hex-encoded private key.
    ///    Example: $HARMONY_PRIVATE_KEY
    ///
    /// 3. if it starts with 'file:' then it is read from the given path.
    #[serde(skip_serializing)]
    pub private_key: Option<PrivateKey>,
    /// The incentives (escrow) contract this worker observes and claims
    /// bounties from.
    pub incentives_address: Address,
    /// The symbol of the chain's native token, used for pricing.
    pub native_token: String,
    /// Block-range log getter configuration.
    #[serde(default)]
    pub getter: GetterConfig,
    /// Order profitability configuration.
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    /// Transaction submission configuration.
    #[serde(default)]
    pub submitter: SubmitterConfig,
    /// Wallet and confirmation configuration.
    #[serde(default)]
    pub wallet: WalletConfig,
}

/// Controls the block-range log getter of one chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GetterConfig {
    /// Head polling interval in milliseconds.
    #[serde(default = "defaults::getter_interval")]
    pub interval: u64,
    /// How many blocks behind the chain head to stay, as reorg shelter.
    #[serde(default = "defaults::block_delay")]
    pub block_delay: u64,
    /// The maximum number of blocks to fetch in one request.
    /// Unset means unbounded windows, only safe on archive nodes.
    #[serde(default = "defaults::max_blocks")]
    pub max_blocks: Option<u64>,
    /// Base wait before retrying a failed RPC call, in milliseconds.
    #[serde(default = "defaults::retry_interval")]
    pub retry_interval: u64,
    /// Rewind the cursor to this block at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting_block: Option<u64>,
    /// Stop the worker cleanly once the cursor passes this block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopping_block: Option<u64>,
}

impl Default for GetterConfig {
    fn default() -> Self {
        Self {
            interval: defaults::getter_interval(),
            block_delay: defaults::block_delay(),
            max_blocks: defaults::max_blocks(),
            retry_interval: defaults::retry_interval(),
            starting_block: None,
            stopping_block: None,
        }
    }
}

/// Controls when an order is considered worth submitting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EvaluatorConfig {
    /// Grace period after the first observation of a bounty before it is
    /// evaluated, to absorb a `BountyIncreased` in the same window. In
    /// milliseconds.
    #[serde(default = "defaults::new_orders_delay")]
    pub new_orders_delay: u64,
    /// Minimum absolute delivery reward, in USD.
    #[serde(default = "defaults::min_reward")]
    pub min_delivery_reward: f64,
    /// Minimum relative delivery reward over the gas cost.
    #[serde(default = "defaults::relative_min_reward")]
    pub relative_min_delivery_reward: f64,
    /// Minimum absolute ack reward, in USD.
    #[serde(default = "defaults::min_reward")]
    pub min_ack_reward: f64,
    /// Minimum relative ack reward over the gas cost.
    #[serde(default = "defaults::relative_min_reward")]
    pub relative_min_ack_reward: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            new_orders_delay: defaults::new_orders_delay(),
            min_delivery_reward: defaults::min_reward(),
            relative_min_delivery_reward: defaults::relative_min_reward(),
            min_ack_reward: defaults::min_reward(),
            relative_min_ack_reward: defaults::relative_min_reward(),
        }
    }
}

/// Extra gas-limit headroom per order kind, as a fraction of the estimate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GasLimitBufferConfig {
    /// The fallback buffer for order kinds without their own entry.
    #[serde(default = "defaults::gas_limit_buffer")]
    pub default: f64,
    /// Buffer for delivery transactions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<f64>,
    /// Buffer for ack transactions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<f64>,
}

impl GasLimitBufferConfig {
    /// The buffer for the given order kind, falling back to `default`.
    pub fn for_kind(&self, kind: OrderKind) -> f64 {
        match kind {
            OrderKind::Delivery => self.delivery.unwrap_or(self.default),
            OrderKind::Ack => self.ack.unwrap_or(self.default),
        }
    }
}

impl Default for GasLimitBufferConfig {
    fn default() -> Self {
        Self {
            default: defaults::gas_limit_buffer(),
            delivery: None,
            ack: None,
        }
    }
}

/// Controls the transaction submitter of one chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SubmitterConfig {
    /// Orchestrator tick interval, in milliseconds.
    #[serde(default = "defaults::processing_interval")]
    pub processing_interval: u64,
    /// Submission attempts before an order is failed.
    #[serde(default = "defaults::max_tries")]
    pub max_tries: u32,
    /// Upper bound on in-flight transactions.
    #[serde(default = "defaults::max_pending_transactions")]
    pub max_pending_transactions: usize,
    /// Extra gas-limit headroom per order kind.
    #[serde(default)]
    pub gas_limit_buffer: GasLimitBufferConfig,
    /// Fixed `maxFeePerGas` in wei. When set, the base-fee formula is
    /// skipped entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<u64>,
    /// Fraction added on top of the base fee when computing `maxFeePerGas`.
    #[serde(default = "defaults::gas_price_adjustment_factor")]
    pub gas_price_adjustment_factor: f64,
    /// Per-attempt compounding factor on the computed `maxFeePerGas`.
    #[serde(default = "defaults::priority_adjustment_factor")]
    pub priority_adjustment_factor: f64,
    /// Multiplier on the node-suggested priority fee.
    #[serde(default = "defaults::max_priority_fee_adjustment_factor")]
    pub max_priority_fee_adjustment_factor: f64,
    /// Hard cap on `maxFeePerGas`, in wei.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_allowed_gas_price: Option<u64>,
    /// Hard cap on `maxPriorityFeePerGas`, in wei.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_allowed_priority_fee_per_gas: Option<u64>,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            processing_interval: defaults::processing_interval(),
            max_tries: defaults::max_tries(),
            max_pending_transactions: defaults::max_pending_transactions(),
            gas_limit_buffer: GasLimitBufferConfig::default(),
            max_fee_per_gas: None,
            gas_price_adjustment_factor:
                defaults::gas_price_adjustment_factor(),
            priority_adjustment_factor: defaults::priority_adjustment_factor(),
            max_priority_fee_adjustment_factor:
                defaults::max_priority_fee_adjustment_factor(),
            max_allowed_gas_price: None,
            max_allowed_priority_fee_per_gas: None,
        }
    }
}

/// Controls the wallet of one chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WalletConfig {
    /// Blocks on top of the inclusion block before a tx counts as
    /// confirmed. Zero confirms in the submitted block.
    #[serde(default = "defaults::confirmations")]
    pub confirmations: u64,
    /// How long to wait for a confirmation before replacing at the same
    /// nonce, in milliseconds.
    #[serde(default = "defaults::confirmation_timeout")]
    pub confirmation_timeout: u64,
    /// Balance refresh cadence, in orchestrator ticks.
    #[serde(default = "defaults::balance_update_interval")]
    pub balance_update_interval: u64,
    /// Warn once whenever the balance crosses below this, in wei.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_balance_warning: Option<u64>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            confirmations: defaults::confirmations(),
            confirmation_timeout: defaults::confirmation_timeout(),
            balance_update_interval: defaults::balance_update_interval(),
            low_balance_warning: None,
        }
    }
}
