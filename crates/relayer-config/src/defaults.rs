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

//! Default values for the bounty relayer configuration.

/// The default port the relayer status endpoint listens on.
pub const fn port() -> u16 {
    9955
}

/// Getter head-poll interval, in milliseconds.
pub const fn getter_interval() -> u64 {
    5_000
}

/// How many blocks behind the head the getter stays.
pub const fn block_delay() -> u64 {
    0
}

/// The maximum number of blocks per `eth_getLogs` window.
/// `None` means an unbounded window, only safe against archive nodes.
pub const fn max_blocks() -> Option<u64> {
    Some(100)
}

/// Base wait before retrying a failed RPC call, in milliseconds.
pub const fn retry_interval() -> u64 {
    2_000
}

/// Grace period before a fresh order is first evaluated, in milliseconds.
pub const fn new_orders_delay() -> u64 {
    0
}

/// Orchestrator tick interval, in milliseconds.
pub const fn processing_interval() -> u64 {
    100
}

/// Submission attempts before an order is failed.
pub const fn max_tries() -> u32 {
    3
}

/// Upper bound on in-flight transactions per chain.
pub const fn max_pending_transactions() -> usize {
    1_000
}

/// Blocks on top of the inclusion block before a tx counts as confirmed.
pub const fn confirmations() -> u64 {
    1
}

/// How long to wait for a confirmation before replacing, in milliseconds.
pub const fn confirmation_timeout() -> u64 {
    600_000
}

/// Wallet balance refresh cadence, in orchestrator ticks.
pub const fn balance_update_interval() -> u64 {
    50
}

/// Fraction added on top of the gas estimate for the gas limit.
pub const fn gas_limit_buffer() -> f64 {
    0.0
}

/// Fraction added on top of the base fee when computing `maxFeePerGas`.
pub const fn gas_price_adjustment_factor() -> f64 {
    0.1
}

/// Per-attempt compounding factor on the computed `maxFeePerGas`.
pub const fn priority_adjustment_factor() -> f64 {
    0.1
}

/// Multiplier on the node-suggested priority fee.
pub const fn max_priority_fee_adjustment_factor() -> f64 {
    1.0
}

/// Minimum absolute reward for an order, in USD.
pub const fn min_reward() -> f64 {
    0.0
}

/// Minimum relative reward (profit over cost) for an order.
pub const fn relative_min_reward() -> f64 {
    0.0
}

/// Token price cache lifetime, in milliseconds.
pub const fn price_cache_duration() -> u64 {
    900_000
}

/// Consecutive pricing failures tolerated before pricing counts as down.
pub const fn pricing_max_tries() -> u32 {
    3
}
