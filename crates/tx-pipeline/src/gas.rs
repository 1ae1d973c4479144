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

use bounty_relayer_config::evm::SubmitterConfig;
use bounty_relayer_store::OrderKind;
use ethers::types::U256;

/// The EVM replacement floor: a transaction replacing another at the same
/// nonce must raise both fee caps by at least 12.5%.
pub const REPLACEMENT_FACTOR: f64 = 1.125;

/// The fee pair attached to one submission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeEstimate {
    /// `maxFeePerGas`, in wei.
    pub max_fee_per_gas: U256,
    /// `maxPriorityFeePerGas`, in wei.
    pub max_priority_fee_per_gas: U256,
}

/// Multiplies a wei amount by a float factor.
///
/// Gas prices fit comfortably in a u128, so the f64 round-trip is fine at
/// this precision.
pub fn mul_f64(value: U256, factor: f64) -> U256 {
    let value = value.min(U256::from(u128::MAX)).as_u128() as f64;
    let scaled = (value * factor).max(0.0);
    U256::from(scaled.min(u128::MAX as f64) as u128)
}

/// Computes fees for fresh submissions and for replacements.
#[derive(Clone, Copy, Debug)]
pub struct GasPolicy {
    config: SubmitterConfig,
}

impl GasPolicy {
    /// A policy from the chain's submitter configuration.
    pub fn new(config: SubmitterConfig) -> Self {
        Self { config }
    }

    /// The submitter configuration the policy was built from.
    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// The fee pair for a submission attempt.
    ///
    /// `previous` is the fee pair of the prior attempt at the same nonce;
    /// when present both caps are raised to at least the replacement floor
    /// on top of it.
    pub fn fees(
        &self,
        base_fee: U256,
        suggested_priority: U256,
        previous: Option<&FeeEstimate>,
        attempt: u32,
    ) -> FeeEstimate {
        let mut max_fee = match self.config.max_fee_per_gas {
            Some(fixed) => U256::from(fixed),
            None => {
                let adjusted = mul_f64(
                    base_fee,
                    1.0 + self.config.gas_price_adjustment_factor,
                );
                // escalate per attempt so a retried order outbids its own
                // earlier self.
                mul_f64(
                    adjusted,
                    (1.0 + self.config.priority_adjustment_factor)
                        .powi(attempt as i32),
                )
            }
        };
        let mut priority = mul_f64(
            suggested_priority,
            self.config.max_priority_fee_adjustment_factor,
        );
        if let Some(previous) = previous {
            max_fee = max_fee
                .max(mul_f64(previous.max_fee_per_gas, REPLACEMENT_FACTOR));
            priority = priority.max(mul_f64(
                previous.max_priority_fee_per_gas,
                REPLACEMENT_FACTOR,
            ));
        }
        if let Some(cap) = self.config.max_allowed_gas_price {
            max_fee = max_fee.min(U256::from(cap));
        }
        if let Some(cap) = self.config.max_allowed_priority_fee_per_gas {
            priority = priority.min(U256::from(cap));
        }
        // maxFeePerGas must cover the priority fee.
        max_fee = max_fee.max(priority);
        FeeEstimate {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
        }
    }

    /// The fee pair for replacing a stalled transaction at the same nonce.
    pub fn replacement_fees(&self, previous: &FeeEstimate) -> FeeEstimate {
        let mut max_fee =
            mul_f64(previous.max_fee_per_gas, REPLACEMENT_FACTOR);
        let mut priority =
            mul_f64(previous.max_priority_fee_per_gas, REPLACEMENT_FACTOR);
        if let Some(cap) = self.config.max_allowed_gas_price {
            max_fee = max_fee.min(U256::from(cap));
        }
        if let Some(cap) = self.config.max_allowed_priority_fee_per_gas {
            priority = priority.min(U256::from(cap));
        }
        max_fee = max_fee.max(priority);
        FeeEstimate {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
        }
    }

    /// The gas limit for an order: the estimate plus the configured
    /// per-kind buffer.
    pub fn padded_gas_limit(&self, kind: OrderKind, estimate: U256) -> U256 {
        let buffer = self.config.gas_limit_buffer.for_kind(kind);
        mul_f64(estimate, 1.0 + buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bounty_relayer_config::evm::GasLimitBufferConfig;

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    fn policy(config: SubmitterConfig) -> GasPolicy {
        GasPolicy::new(config)
    }

    #[test]
    fn base_fee_formula_applies_the_adjustment() {
        let policy = policy(SubmitterConfig {
            gas_price_adjustment_factor: 0.2,
            ..Default::default()
        });
        let fee = policy.fees(gwei(100), gwei(2), None, 0);
        assert_eq!(fee.max_fee_per_gas, gwei(120));
        assert_eq!(fee.max_priority_fee_per_gas, gwei(2));
    }

    #[test]
    fn attempts_escalate_the_fee() {
        let policy = policy(SubmitterConfig {
            gas_price_adjustment_factor: 0.0,
            priority_adjustment_factor: 0.5,
            ..Default::default()
        });
        let first = policy.fees(gwei(100), gwei(1), None, 0);
        let third = policy.fees(gwei(100), gwei(1), None, 2);
        assert_eq!(first.max_fee_per_gas, gwei(100));
        assert_eq!(third.max_fee_per_gas, gwei(225));
    }

    #[test]
    fn fixed_max_fee_short_circuits_the_formula() {
        let policy = policy(SubmitterConfig {
            max_fee_per_gas: Some(gwei(30).as_u64()),
            ..Default::default()
        });
        let fee = policy.fees(gwei(100), gwei(1), None, 0);
        assert_eq!(fee.max_fee_per_gas, gwei(30));
    }

    #[test]
    fn replacement_respects_the_evm_floor() {
        let policy = policy(SubmitterConfig::default());
        let previous = FeeEstimate {
            max_fee_per_gas: gwei(80),
            max_priority_fee_per_gas: gwei(8),
        };
        let bumped = policy.replacement_fees(&previous);
        assert_eq!(bumped.max_fee_per_gas, gwei(90));
        assert_eq!(bumped.max_priority_fee_per_gas, gwei(9));
    }

    #[test]
    fn caps_are_enforced() {
        let policy = policy(SubmitterConfig {
            gas_price_adjustment_factor: 1.0,
            max_allowed_gas_price: Some(gwei(50).as_u64()),
            max_allowed_priority_fee_per_gas: Some(gwei(3).as_u64()),
            max_priority_fee_adjustment_factor: 10.0,
            ..Default::default()
        });
        let fee = policy.fees(gwei(100), gwei(2), None, 0);
        assert_eq!(fee.max_fee_per_gas, gwei(50));
        assert_eq!(fee.max_priority_fee_per_gas, gwei(3));
    }

    #[test]
    fn prior_fees_force_the_floor_even_on_fresh_estimates() {
        let policy = policy(SubmitterConfig {
            gas_price_adjustment_factor: 0.0,
            ..Default::default()
        });
        let previous = FeeEstimate {
            max_fee_per_gas: gwei(200),
            max_priority_fee_per_gas: gwei(10),
        };
        let fee = policy.fees(gwei(100), gwei(1), Some(&previous), 1);
        assert_eq!(fee.max_fee_per_gas, gwei(225));
        assert!(fee.max_priority_fee_per_gas >= mul_f64(gwei(10), 1.125));
    }

    #[test]
    fn gas_limit_buffer_falls_back_to_default() {
        let policy = policy(SubmitterConfig {
            gas_limit_buffer: GasLimitBufferConfig {
                default: 0.1,
                delivery: Some(0.5),
                ack: None,
            },
            ..Default::default()
        });
        assert_eq!(
            policy.padded_gas_limit(OrderKind::Delivery, U256::from(100_000)),
            U256::from(150_000)
        );
        assert_eq!(
            policy.padded_gas_limit(OrderKind::Ack, U256::from(100_000)),
            U256::from(110_000)
        );
    }
}
