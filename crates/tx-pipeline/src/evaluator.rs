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

//! Decides whether a pending order pays for itself.
//!
//! The bounty reimburses gas in the origin chain's wei; our cost accrues in
//! the target chain's wei. Both sides are converted to USD through the
//! price oracle before comparing. Pricing being unavailable defers the
//! order rather than abandoning it.

use std::collections::HashMap;
use std::sync::Arc;

use bounty_chain_watcher::AmbAdapter;
use bounty_price_oracle_backends::{PriceBackend, PriceOracleMerger};
use bounty_relayer_config::evm::EvaluatorConfig;
use bounty_relayer_store::{OrderKind, RelayState, SubmitOrder};
use bounty_relayer_utils::Result;
use ethers::providers::{Middleware, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};

use crate::gas::mul_f64;

/// Gas estimation falls back to the bounty's gas allowance padded by 10%
/// when the node refuses to estimate.
const ESTIMATE_FALLBACK_FACTOR: f64 = 1.1;

/// The evaluator's verdict on one order.
#[derive(Debug)]
pub enum Evaluation {
    /// Worth it; hand the prepared transaction to the submitter.
    Submit(PreparedTx),
    /// Not decidable right now (grace period, pricing down); put the order
    /// back in the queue.
    Defer {
        /// Why the order was put back.
        reason: String,
    },
    /// Unprofitable at the current bounty; park it until the bounty rises.
    Abandon {
        /// Why the order does not pay.
        reason: String,
    },
    /// The chain already moved past this order; drop it.
    Obsolete,
}

/// An order that passed the profitability test, with everything the
/// submitter needs to put it on the wire.
#[derive(Clone, Debug)]
pub struct PreparedTx {
    /// The order being executed.
    pub order: SubmitOrder,
    /// The incentives contract to call.
    pub to: Address,
    /// The delivery or ack calldata.
    pub calldata: Bytes,
    /// The gas estimate before the gas-limit buffer.
    pub gas_estimate: U256,
    /// The bounty value at decision time, in USD.
    pub value_in_usd: f64,
    /// The gas cost at decision time, in USD.
    pub cost_out_usd: f64,
}

fn wei_to_eth(wei: U256) -> f64 {
    wei.min(U256::from(u128::MAX)).as_u128() as f64 / 1e18
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Evaluates orders targeting one chain.
pub struct Evaluator<M, A> {
    chain_id: u32,
    provider: Arc<M>,
    adapter: Arc<A>,
    price_oracle: Arc<PriceOracleMerger>,
    config: EvaluatorConfig,
    /// chain id -> native token symbol, from the configuration.
    native_tokens: HashMap<u32, String>,
}

impl<M, A> Evaluator<M, A>
where
    M: Middleware<Error = ProviderError>,
    A: AmbAdapter,
{
    /// Creates the evaluator for the chain this worker submits on.
    pub fn new(
        chain_id: u32,
        provider: Arc<M>,
        adapter: Arc<A>,
        price_oracle: Arc<PriceOracleMerger>,
        config: EvaluatorConfig,
        native_tokens: HashMap<u32, String>,
    ) -> Self {
        Self {
            chain_id,
            provider,
            adapter,
            price_oracle,
            config,
            native_tokens,
        }
    }

    /// Judge one order against the current relay state.
    #[tracing::instrument(skip_all, fields(chain_id = self.chain_id, mid = %order.message_identifier, kind = %order.kind))]
    pub async fn evaluate(
        &self,
        order: &SubmitOrder,
        state: &RelayState,
    ) -> Result<Evaluation> {
        // absorb a BountyIncreased landing right behind the placement.
        let age_ms = now_ms().saturating_sub(order.observed_at_ms);
        if age_ms < self.config.new_orders_delay {
            return Ok(Evaluation::Defer {
                reason: "inside the new-orders grace period".into(),
            });
        }
        let Some(placed) = &state.placed else {
            return Ok(Evaluation::Defer {
                reason: "bounty placement not observed yet".into(),
            });
        };
        let (wanted, bounty_gas_price, max_gas, min_reward, relative_min) =
            match order.kind {
                OrderKind::Delivery => (
                    state.needs_delivery(),
                    state.delivery_gas_price(),
                    placed.max_gas_delivery,
                    self.config.min_delivery_reward,
                    self.config.relative_min_delivery_reward,
                ),
                OrderKind::Ack => (
                    state.needs_ack(),
                    state.ack_gas_price(),
                    placed.max_gas_ack,
                    self.config.min_ack_reward,
                    self.config.relative_min_ack_reward,
                ),
            };
        if !wanted {
            return Ok(Evaluation::Obsolete);
        }
        let Some(to) = self.adapter.incentives_address(self.chain_id) else {
            return Ok(Evaluation::Defer {
                reason: "no incentives contract on this chain".into(),
            });
        };
        let calldata = match order.kind {
            OrderKind::Delivery => self
                .adapter
                .encode_delivery(order.message_identifier, &placed.payload),
            OrderKind::Ack => {
                self.adapter.encode_ack(order.message_identifier)
            }
        };

        let max_gas = U256::from(max_gas);
        let probe_tx: TypedTransaction = Eip1559TransactionRequest::new()
            .to(to)
            .data(calldata.clone())
            .into();
        let gas_estimate =
            match self.provider.estimate_gas(&probe_tx, None).await {
                Ok(estimate) => estimate,
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        "gas estimation failed, falling back to the allowance",
                    );
                    mul_f64(max_gas, ESTIMATE_FALLBACK_FACTOR)
                }
            };
        let local_gas_price = self.provider.get_gas_price().await?;

        // the bounty pays in origin wei, we spend in local wei.
        let Some(source_token) = self.native_tokens.get(&placed.from_chain_id)
        else {
            return Ok(Evaluation::Defer {
                reason: format!(
                    "no native token known for chain {}",
                    placed.from_chain_id
                ),
            });
        };
        let Some(local_token) = self.native_tokens.get(&self.chain_id) else {
            return Ok(Evaluation::Defer {
                reason: "no native token known for this chain".into(),
            });
        };
        let prices = match self
            .price_oracle
            .get_prices(&[source_token.as_str(), local_token.as_str()])
            .await
        {
            Ok(prices) => prices,
            Err(e) => {
                // pricing being down is never a reason to abandon.
                return Ok(Evaluation::Defer {
                    reason: format!("pricing unavailable: {e}"),
                });
            }
        };
        let (Some(source_price), Some(local_price)) = (
            prices.get(source_token.as_str()),
            prices.get(local_token.as_str()),
        ) else {
            return Ok(Evaluation::Defer {
                reason: "token prices missing from the oracle".into(),
            });
        };

        let reimbursed_gas = gas_estimate.min(max_gas);
        let value_in_usd =
            wei_to_eth(bounty_gas_price * reimbursed_gas) * source_price;
        let cost_out_usd =
            wei_to_eth(gas_estimate * local_gas_price) * local_price;
        let required = cost_out_usd * (1.0 + relative_min) + min_reward;
        if value_in_usd >= required {
            Ok(Evaluation::Submit(PreparedTx {
                order: order.clone(),
                to,
                calldata,
                gas_estimate,
                value_in_usd,
                cost_out_usd,
            }))
        } else {
            Ok(Evaluation::Abandon {
                reason: format!(
                    "bounty pays {value_in_usd:.6} USD but {required:.6} USD is required",
                ),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bounty_chain_watcher::EscrowIncentivesAdapter;
    use bounty_price_oracle_backends::DummyPriceBackend;
    use bounty_relayer_store::{BountyEvent, BountyPlaced, EventMeta};
    use bounty_relayer_types::MessageIdentifier;
    use ethers::providers::{MockProvider, Provider};
    use ethers::types::H256;

    fn mid() -> MessageIdentifier {
        MessageIdentifier([9; 32])
    }

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    fn placed(price_of_delivery_gas: U256) -> BountyPlaced {
        BountyPlaced {
            message_identifier: mid(),
            from_chain_id: 1,
            to_chain_id: 2,
            incentives_address: Address::repeat_byte(0xaa),
            max_gas_delivery: 2_000_000,
            max_gas_ack: 200_000,
            refund_gas_to: Address::zero(),
            price_of_delivery_gas,
            price_of_ack_gas: gwei(5),
            target_delta: 0,
            payload: vec![0, 0, 0, 2, 1, 2, 3],
            meta: EventMeta {
                tx_hash: H256::zero(),
                block_hash: H256::zero(),
                block_number: 100,
                log_index: 0,
            },
        }
    }

    fn state_with(placed_event: BountyPlaced) -> RelayState {
        let mut state = RelayState::new(mid());
        state.apply(&BountyEvent::Placed(placed_event));
        state
    }

    fn delivery_order() -> SubmitOrder {
        SubmitOrder {
            message_identifier: mid(),
            kind: OrderKind::Delivery,
            target_chain_id: 2,
            block_number: 100,
            log_index: 0,
            observed_at_ms: 0,
        }
    }

    fn oracle() -> Arc<PriceOracleMerger> {
        let prices = bounty_price_oracle_backends::PricesMap::from_iter([
            (String::from("ETH"), 2000.0),
            (String::from("MATIC"), 1.0),
        ]);
        Arc::new(
            PriceOracleMerger::builder()
                .merge(Box::new(DummyPriceBackend::new(prices)))
                .build(),
        )
    }

    fn evaluator(
        config: EvaluatorConfig,
    ) -> (
        Evaluator<Provider<MockProvider>, EscrowIncentivesAdapter>,
        MockProvider,
    ) {
        let (provider, mock) = Provider::mocked();
        let adapter =
            Arc::new(EscrowIncentivesAdapter::new(HashMap::from_iter([
                (1, Address::repeat_byte(0x0a)),
                (2, Address::repeat_byte(0x0b)),
            ])));
        let tokens = HashMap::from_iter([
            (1, String::from("ETH")),
            (2, String::from("MATIC")),
        ]);
        let evaluator = Evaluator::new(
            2,
            Arc::new(provider),
            adapter,
            oracle(),
            config,
            tokens,
        );
        (evaluator, mock)
    }

    #[tokio::test]
    async fn profitable_delivery_is_submitted() {
        let (evaluator, mock) = evaluator(EvaluatorConfig::default());
        // calls: estimate_gas, then gas_price.
        mock.push(gwei(30)).unwrap();
        mock.push(U256::from(500_000)).unwrap();

        // 50 gwei * 500k gas * 2000 USD/ETH = 50 USD in;
        // 500k gas * 30 gwei * 1 USD/MATIC = 0.015 USD out.
        let state = state_with(placed(gwei(50)));
        let verdict =
            evaluator.evaluate(&delivery_order(), &state).await.unwrap();
        let Evaluation::Submit(prepared) = verdict else {
            panic!("expected a submit, got {verdict:?}");
        };
        assert_eq!(prepared.to, Address::repeat_byte(0x0b));
        assert_eq!(prepared.gas_estimate, U256::from(500_000));
        assert!(prepared.value_in_usd > prepared.cost_out_usd);
        // the decision-time inequality the submitter relies on.
        assert!(prepared.value_in_usd >= prepared.cost_out_usd);
    }

    #[tokio::test]
    async fn zero_bounty_is_abandoned() {
        let (evaluator, mock) = evaluator(EvaluatorConfig::default());
        mock.push(gwei(30)).unwrap();
        mock.push(U256::from(500_000)).unwrap();

        let state = state_with(placed(U256::zero()));
        let verdict =
            evaluator.evaluate(&delivery_order(), &state).await.unwrap();
        assert!(matches!(verdict, Evaluation::Abandon { .. }));
    }

    #[tokio::test]
    async fn relative_and_absolute_rewards_raise_the_bar() {
        let config = EvaluatorConfig {
            min_delivery_reward: 1_000_000.0,
            ..Default::default()
        };
        let (evaluator, mock) = evaluator(config);
        mock.push(gwei(30)).unwrap();
        mock.push(U256::from(500_000)).unwrap();

        let state = state_with(placed(gwei(50)));
        let verdict =
            evaluator.evaluate(&delivery_order(), &state).await.unwrap();
        assert!(matches!(verdict, Evaluation::Abandon { .. }));
    }

    #[tokio::test]
    async fn grace_period_defers() {
        let config = EvaluatorConfig {
            new_orders_delay: 60_000,
            ..Default::default()
        };
        let (evaluator, _mock) = evaluator(config);
        let mut order = delivery_order();
        order.observed_at_ms = now_ms();
        let state = state_with(placed(gwei(50)));
        let verdict = evaluator.evaluate(&order, &state).await.unwrap();
        assert!(matches!(verdict, Evaluation::Defer { .. }));
    }

    #[tokio::test]
    async fn already_delivered_is_obsolete() {
        let (evaluator, _mock) = evaluator(EvaluatorConfig::default());
        let mut state = state_with(placed(gwei(50)));
        state.apply(&BountyEvent::Delivered(
            bounty_relayer_store::MessageDelivered {
                message_identifier: mid(),
                to_chain_id: 2,
                meta: EventMeta {
                    tx_hash: H256::zero(),
                    block_hash: H256::zero(),
                    block_number: 120,
                    log_index: 0,
                },
            },
        ));
        let verdict =
            evaluator.evaluate(&delivery_order(), &state).await.unwrap();
        assert!(matches!(verdict, Evaluation::Obsolete));
    }

    #[tokio::test]
    async fn reimbursement_is_capped_at_the_gas_allowance() {
        let (evaluator, mock) = evaluator(EvaluatorConfig::default());
        mock.push(gwei(1)).unwrap();
        // the estimate exceeds maxGasDelivery; only the allowance is paid.
        mock.push(U256::from(5_000_000)).unwrap();

        let state = state_with(placed(gwei(50)));
        let verdict =
            evaluator.evaluate(&delivery_order(), &state).await.unwrap();
        let Evaluation::Submit(prepared) = verdict else {
            panic!("expected a submit, got {verdict:?}");
        };
        // value side used min(estimate, maxGasDelivery) = 2M gas.
        let expected_value = wei_to_eth(gwei(50) * 2_000_000u64) * 2000.0;
        assert!((prepared.value_in_usd - expected_value).abs() < 1e-9);
    }
}
