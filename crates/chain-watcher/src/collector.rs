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

use std::sync::Arc;

use bounty_relayer_store::{
    OrderKind, OrderQueueStore, RelayState, RelayStateStore, SubmitOrder,
};
use bounty_relayer_utils::{probe, Result};
use tokio::sync::mpsc;

use crate::adapter::AmbAdapter;
use crate::getter::LogBatch;

/// Decodes raw logs into bounty events, merges them into the store and
/// enqueues the orders the new state asks for.
///
/// The collector is deliberately dumb about profitability: it queues every
/// candidate order and lets the evaluator judge it. Re-observing the same
/// log is harmless, the merge is idempotent and the queues deduplicate.
pub struct Collector<S, A> {
    chain_id: u32,
    adapter: Arc<A>,
    store: Arc<S>,
}

impl<S, A> Collector<S, A>
where
    S: RelayStateStore + OrderQueueStore,
    A: AmbAdapter,
{
    /// Creates a collector for one chain.
    pub fn new(chain_id: u32, adapter: Arc<A>, store: Arc<S>) -> Self {
        Self {
            chain_id,
            adapter,
            store,
        }
    }

    /// Drains batches from the getter until it goes away.
    #[tracing::instrument(skip_all, fields(chain_id = self.chain_id))]
    pub async fn run(
        self,
        mut batches: mpsc::Receiver<LogBatch>,
    ) -> Result<()> {
        while let Some(batch) = batches.recv().await {
            self.process_batch(&batch)?;
        }
        Ok(())
    }

    /// Decode and merge every log of one batch, in order.
    pub fn process_batch(&self, batch: &LogBatch) -> Result<()> {
        for log in &batch.logs {
            match self.adapter.decode(self.chain_id, log) {
                Ok(Some(event)) => {
                    let state = self.store.apply_event(&event)?;
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::TRACE,
                        kind = %probe::Kind::Bounty,
                        chain_id = self.chain_id,
                        mid = %event.message_identifier(),
                        status = state.status.as_u8(),
                    );
                    self.enqueue_candidates(&state)?;
                }
                Ok(None) => {
                    // a topic outside the adapter's set; not ours.
                }
                Err(e) => {
                    // invalid event: log and skip, the slot stays empty.
                    tracing::warn!(
                        chain_id = self.chain_id,
                        tx = ?log.transaction_hash,
                        error = %e,
                        "skipping undecodable log",
                    );
                }
            }
        }
        Ok(())
    }

    /// Queue whatever transaction the merged state still wants.
    ///
    /// Delivery goes to the destination chain's queue, the ack back to the
    /// origin chain's queue. Both wait there for their chain's evaluator.
    fn enqueue_candidates(&self, state: &RelayState) -> Result<()> {
        let Some(placed) = &state.placed else {
            // until the BountyPlaced slot fills we cannot route anything.
            return Ok(());
        };
        if state.needs_delivery() {
            let order = SubmitOrder {
                message_identifier: state.message_identifier,
                kind: OrderKind::Delivery,
                target_chain_id: placed.to_chain_id,
                block_number: placed.meta.block_number,
                log_index: placed.meta.log_index,
                observed_at_ms: now_ms(),
            };
            if self.store.push_order(&order)? {
                tracing::debug!(
                    mid = %state.message_identifier,
                    to = placed.to_chain_id,
                    "queued delivery order",
                );
            }
        }
        if state.needs_ack() {
            let meta = state
                .delivered
                .as_ref()
                .map(|d| d.meta)
                .unwrap_or(placed.meta);
            let order = SubmitOrder {
                message_identifier: state.message_identifier,
                kind: OrderKind::Ack,
                target_chain_id: placed.from_chain_id,
                block_number: meta.block_number,
                log_index: meta.log_index,
                observed_at_ms: now_ms(),
            };
            if self.store.push_order(&order)? {
                tracing::debug!(
                    mid = %state.message_identifier,
                    to = placed.from_chain_id,
                    "queued ack order",
                );
            }
        }
        Ok(())
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::{
        BountyPlacedEvent, EscrowIncentivesAdapter, MessageDeliveredEvent,
    };
    use bounty_relayer_store::InMemoryStore;
    use bounty_relayer_types::MessageIdentifier;
    use ethers::abi::Token;
    use ethers::contract::EthEvent;
    use ethers::types::{Address, Log, H256};
    use std::collections::HashMap;

    fn adapter() -> Arc<EscrowIncentivesAdapter> {
        Arc::new(EscrowIncentivesAdapter::new(HashMap::from_iter([
            (1, Address::repeat_byte(0xaa)),
            (2, Address::repeat_byte(0xbb)),
        ])))
    }

    fn mid() -> MessageIdentifier {
        MessageIdentifier([0x42; 32])
    }

    fn placed_log(to_chain: u32, block: u64) -> Log {
        let mut message = to_chain.to_be_bytes().to_vec();
        message.extend_from_slice(b"payload");
        Log {
            address: Address::repeat_byte(0xaa),
            topics: vec![
                BountyPlacedEvent::signature(),
                H256::from(mid().to_bytes()),
            ],
            data: ethers::abi::encode(&[
                Token::Address(Address::repeat_byte(0xaa)),
                Token::Uint(2_000_000u64.into()),
                Token::Uint(200_000u64.into()),
                Token::Address(Address::repeat_byte(0x11)),
                Token::Uint(50_000_000_000u128.into()),
                Token::Uint(5_000_000_000u128.into()),
                Token::Uint(0u64.into()),
                Token::Bytes(message),
            ])
            .into(),
            block_hash: Some(H256::repeat_byte(block as u8)),
            block_number: Some(block.into()),
            log_index: Some(0.into()),
            ..Default::default()
        }
    }

    fn delivered_log(block: u64) -> Log {
        Log {
            address: Address::repeat_byte(0xbb),
            topics: vec![
                MessageDeliveredEvent::signature(),
                H256::from(mid().to_bytes()),
            ],
            data: ethers::abi::encode(&[Token::Uint(2u32.into())]).into(),
            block_hash: Some(H256::repeat_byte(0xdd)),
            block_number: Some(block.into()),
            log_index: Some(0.into()),
            ..Default::default()
        }
    }

    fn batch(logs: Vec<Log>) -> LogBatch {
        LogBatch {
            from_block: 0,
            to_block: 1000,
            logs,
        }
    }

    #[test]
    fn placed_event_queues_a_delivery_order() {
        let store = Arc::new(InMemoryStore::default());
        let collector = Collector::new(1, adapter(), store.clone());
        collector.process_batch(&batch(vec![placed_log(2, 100)])).unwrap();

        let state = store.get_relay_state(mid()).unwrap().unwrap().value;
        assert!(state.placed.is_some());
        // the delivery order waits on the destination chain's queue.
        assert!(store.has_order(2, mid(), OrderKind::Delivery).unwrap());
        assert!(!store.has_order(1, mid(), OrderKind::Delivery).unwrap());
    }

    #[test]
    fn delivered_event_queues_the_ack_on_the_origin() {
        let store = Arc::new(InMemoryStore::default());
        // origin observes the bounty...
        Collector::new(1, adapter(), store.clone())
            .process_batch(&batch(vec![placed_log(2, 100)]))
            .unwrap();
        // ...the destination worker observes the delivery.
        Collector::new(2, adapter(), store.clone())
            .process_batch(&batch(vec![delivered_log(50)]))
            .unwrap();

        let state = store.get_relay_state(mid()).unwrap().unwrap().value;
        assert!(state.needs_ack());
        assert!(store.has_order(1, mid(), OrderKind::Ack).unwrap());
    }

    #[test]
    fn invalid_destination_is_skipped_entirely() {
        let store = Arc::new(InMemoryStore::default());
        let collector = Collector::new(1, adapter(), store.clone());
        collector
            .process_batch(&batch(vec![placed_log(999, 100)]))
            .unwrap();
        assert!(store.get_relay_state(mid()).unwrap().is_none());
        assert_eq!(store.queued_orders(1).unwrap(), 0);
    }

    #[test]
    fn reorged_placement_converges_on_the_final_block_hash() {
        let store = Arc::new(InMemoryStore::default());
        let collector = Collector::new(1, adapter(), store.clone());
        // observed at block 100 first, then re-observed at 102 after a
        // reorg dropped the original block.
        collector
            .process_batch(&batch(vec![placed_log(2, 100)]))
            .unwrap();
        collector
            .process_batch(&batch(vec![placed_log(2, 102)]))
            .unwrap();

        let state = store.get_relay_state(mid()).unwrap().unwrap().value;
        let placed = state.placed.unwrap();
        assert_eq!(placed.meta.block_number, 102);
        assert_eq!(placed.meta.block_hash, H256::repeat_byte(102));
        // still exactly one pending delivery order.
        assert_eq!(store.queued_orders(2).unwrap(), 1);
    }
}
