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

//! The submitter sits between the evaluator and the wallet: it enforces
//! the pending cap, attaches the gas policy, keeps at most one in-flight
//! transaction per `(message, kind)`, and writes confirmation results back
//! into the store.

use std::collections::HashMap;
use std::sync::Arc;

use bounty_relayer_store::{OrderKind, OrderQueueStore, RelayStateStore};
use bounty_relayer_types::MessageIdentifier;
use bounty_relayer_utils::clickable_link::ClickableLink;
use bounty_relayer_utils::{probe, Result};
use ethers::providers::{Middleware, ProviderError};
use ethers::types::{BlockNumber, U256};

use crate::evaluator::PreparedTx;
use crate::gas::GasPolicy;
use crate::wallet::{TxOutcome, Wallet};

/// Submits prepared orders on one chain, bounded by the pending cap.
pub struct Submitter<M, S> {
    chain_id: u32,
    provider: Arc<M>,
    store: Arc<S>,
    wallet: Wallet<M>,
    policy: GasPolicy,
    explorer: Option<url::Url>,
    /// message/kind -> nonce of the single in-flight transaction.
    in_flight: HashMap<(MessageIdentifier, OrderKind), u64>,
}

impl<M, S> Submitter<M, S>
where
    M: Middleware<Error = ProviderError>,
    S: RelayStateStore + OrderQueueStore,
{
    /// Creates the submitter for one chain.
    pub fn new(
        chain_id: u32,
        provider: Arc<M>,
        store: Arc<S>,
        wallet: Wallet<M>,
        policy: GasPolicy,
        explorer: Option<url::Url>,
    ) -> Self {
        Self {
            chain_id,
            provider,
            store,
            wallet,
            policy,
            explorer,
            in_flight: HashMap::new(),
        }
    }

    /// The wallet behind this submitter, for balance upkeep.
    pub fn wallet_mut(&mut self) -> &mut Wallet<M> {
        &mut self.wallet
    }

    /// How many more orders the pipeline can take right now.
    pub fn free_capacity(&self) -> usize {
        self.policy
            .config()
            .max_pending_transactions
            .saturating_sub(self.wallet.pending_count())
    }

    /// Whether a transaction for this `(message, kind)` is on the wire.
    pub fn is_in_flight(
        &self,
        message_identifier: MessageIdentifier,
        kind: OrderKind,
    ) -> bool {
        self.in_flight.contains_key(&(message_identifier, kind))
    }

    async fn initial_fees(&self) -> Result<crate::gas::FeeEstimate> {
        let base_fee = self
            .provider
            .get_block(BlockNumber::Latest)
            .await?
            .and_then(|block| block.base_fee_per_gas)
            .unwrap_or_default();
        let gas_price = self.provider.get_gas_price().await?;
        // the node's gas price quote minus the base fee approximates the
        // going priority fee; floor it at one wei so replacements have
        // something to escalate from.
        let suggested_priority =
            gas_price.saturating_sub(base_fee).max(U256::one());
        Ok(self.policy.fees(base_fee, suggested_priority, None, 0))
    }

    /// Puts one prepared order on the wire.
    ///
    /// Orders that find the pipeline full go back to the store queue; the
    /// pending-cap invariant holds at all times. A failed submission is
    /// dropped here, the evaluator re-derives it from the store later.
    #[tracing::instrument(skip_all, fields(chain_id = self.chain_id, mid = %prepared.order.message_identifier, kind = %prepared.order.kind))]
    pub async fn submit(&mut self, prepared: PreparedTx) -> Result<()> {
        let order = &prepared.order;
        let key = (order.message_identifier, order.kind);
        if self.in_flight.contains_key(&key) {
            // one in-flight delivery and one in-flight ack per message,
            // never more.
            tracing::trace!("already in flight, dropping duplicate order");
            return Ok(());
        }
        if self.free_capacity() == 0 {
            tracing::debug!("pipeline full, returning the order to the queue");
            self.store.push_order(order)?;
            return Ok(());
        }
        let fee = self.initial_fees().await?;
        let gas_limit =
            self.policy.padded_gas_limit(order.kind, prepared.gas_estimate);
        self.store
            .record_attempt(order.message_identifier, order.kind)?;
        match self
            .wallet
            .submit(
                order.clone(),
                prepared.to,
                prepared.calldata.clone(),
                gas_limit,
                fee,
            )
            .await
        {
            Ok(nonce) => {
                self.in_flight.insert(key, nonce);
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::TxPipeline,
                    chain_id = self.chain_id,
                    mid = %order.message_identifier,
                    order_kind = %order.kind,
                    nonce,
                    value_in_usd = prepared.value_in_usd,
                    cost_out_usd = prepared.cost_out_usd,
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "order submission failed, surfacing and moving on",
                );
            }
        }
        Ok(())
    }

    /// Drains wallet outcomes into the store and frees pipeline slots.
    pub async fn poll(&mut self) -> Result<()> {
        for outcome in self.wallet.poll().await? {
            match outcome {
                TxOutcome::Confirmed {
                    order,
                    nonce,
                    receipt,
                } => {
                    self.in_flight
                        .remove(&(order.message_identifier, order.kind));
                    let gas_cost = receipt
                        .gas_used
                        .unwrap_or_default()
                        .saturating_mul(
                            receipt.effective_gas_price.unwrap_or_default(),
                        );
                    self.store.record_gas_cost(
                        order.message_identifier,
                        order.kind,
                        gas_cost,
                    )?;
                    let tx_hash_string =
                        format!("{:#x}", receipt.transaction_hash);
                    if let Some(mut url) = self.explorer.clone() {
                        url.set_path(&format!("tx/{tx_hash_string}"));
                        let link =
                            ClickableLink::new(&tx_hash_string, url.as_str());
                        tracing::info!(
                            chain_id = self.chain_id,
                            mid = %order.message_identifier,
                            order_kind = %order.kind,
                            nonce,
                            "tx {} confirmed",
                            link,
                        );
                    } else {
                        tracing::info!(
                            chain_id = self.chain_id,
                            mid = %order.message_identifier,
                            order_kind = %order.kind,
                            nonce,
                            "tx {} confirmed",
                            tx_hash_string,
                        );
                    }
                }
                TxOutcome::Cancelled { order, nonce } => {
                    self.in_flight
                        .remove(&(order.message_identifier, order.kind));
                    tracing::error!(
                        chain_id = self.chain_id,
                        mid = %order.message_identifier,
                        order_kind = %order.kind,
                        nonce,
                        "order stalled past the stall limit and its \
                         nonce was cancelled",
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::PreparedTx;
    use crate::wallet::Wallet;
    use bounty_relayer_config::evm::{SubmitterConfig, WalletConfig};
    use bounty_relayer_store::{InMemoryStore, SubmitOrder};
    use ethers::providers::{MockProvider, Provider};
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::{
        Address, Block, Bytes, TransactionReceipt, H256, U256, U64,
    };

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    fn order(byte: u8) -> SubmitOrder {
        SubmitOrder {
            message_identifier:
                bounty_relayer_types::MessageIdentifier([byte; 32]),
            kind: OrderKind::Delivery,
            target_chain_id: 1,
            block_number: 1,
            log_index: 0,
            observed_at_ms: 0,
        }
    }

    fn prepared(byte: u8) -> PreparedTx {
        PreparedTx {
            order: order(byte),
            to: Address::repeat_byte(0xee),
            calldata: Bytes::from(vec![1, 2, 3]),
            gas_estimate: U256::from(100_000),
            value_in_usd: 10.0,
            cost_out_usd: 1.0,
        }
    }

    async fn submitter(
        max_pending: usize,
    ) -> (Submitter<Provider<MockProvider>, InMemoryStore>, MockProvider)
    {
        let (provider, mock) = Provider::mocked();
        let provider = Arc::new(provider);
        let config = SubmitterConfig {
            max_pending_transactions: max_pending,
            ..Default::default()
        };
        let policy = GasPolicy::new(config);
        // wallet sync: nonce then balance.
        mock.push(U256::exp10(19)).unwrap();
        mock.push(U256::zero()).unwrap();
        let signer: LocalWallet =
            "0000000000000000000000000000000000000000000000000000000000000002"
                .parse()
                .unwrap();
        let wallet = Wallet::new(
            1337,
            provider.clone(),
            signer.with_chain_id(1337u64),
            WalletConfig::default(),
            policy,
        )
        .await
        .unwrap();
        let store = Arc::new(InMemoryStore::default());
        let submitter =
            Submitter::new(1337, provider, store, wallet, policy, None);
        (submitter, mock)
    }

    fn push_submission_responses(mock: &MockProvider) {
        // calls: get_block(latest), get_gas_price, send_raw_transaction.
        mock.push(H256::repeat_byte(0x33)).unwrap();
        mock.push(gwei(32)).unwrap();
        let block = Block::<H256> {
            base_fee_per_gas: Some(gwei(30)),
            ..Default::default()
        };
        mock.push(block).unwrap();
    }

    #[tokio::test]
    async fn submits_and_tracks_in_flight() {
        let (mut submitter, mock) = submitter(10).await;
        push_submission_responses(&mock);
        submitter.submit(prepared(1)).await.unwrap();
        assert!(submitter
            .is_in_flight(order(1).message_identifier, OrderKind::Delivery));
        assert_eq!(submitter.free_capacity(), 9);
        // the attempt was counted in the store.
        let state = submitter
            .store
            .get_relay_state(order(1).message_identifier)
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(state.delivery_attempts, 1);
    }

    #[tokio::test]
    async fn duplicate_orders_do_not_double_submit() {
        let (mut submitter, mock) = submitter(10).await;
        push_submission_responses(&mock);
        submitter.submit(prepared(1)).await.unwrap();
        // no responses pushed: a second submission would panic on the
        // empty mock, proving nothing was sent.
        submitter.submit(prepared(1)).await.unwrap();
        assert_eq!(submitter.wallet.pending_count(), 1);
    }

    #[tokio::test]
    async fn full_pipeline_pushes_the_order_back() {
        let (mut submitter, mock) = submitter(1).await;
        push_submission_responses(&mock);
        submitter.submit(prepared(1)).await.unwrap();
        assert_eq!(submitter.free_capacity(), 0);

        submitter.submit(prepared(2)).await.unwrap();
        // the pending cap held and the order went back to the queue.
        assert_eq!(submitter.wallet.pending_count(), 1);
        assert!(submitter
            .store
            .has_order(1, order(2).message_identifier, OrderKind::Delivery)
            .unwrap());
    }

    #[tokio::test]
    async fn confirmation_records_the_gas_cost_and_frees_the_slot() {
        let (mut submitter, mock) = submitter(10).await;
        push_submission_responses(&mock);
        submitter.submit(prepared(1)).await.unwrap();

        let receipt = TransactionReceipt {
            block_number: Some(50.into()),
            gas_used: Some(U256::from(90_000)),
            effective_gas_price: Some(gwei(31)),
            status: Some(1.into()),
            ..Default::default()
        };
        mock.push(receipt).unwrap();
        mock.push(U64::from(60)).unwrap();
        submitter.poll().await.unwrap();

        assert!(!submitter
            .is_in_flight(order(1).message_identifier, OrderKind::Delivery));
        assert_eq!(submitter.free_capacity(), 10);
        let state = submitter
            .store
            .get_relay_state(order(1).message_identifier)
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(
            state.delivery_gas_cost,
            Some(U256::from(90_000) * gwei(31))
        );
    }
}
