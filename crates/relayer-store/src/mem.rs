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

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bounty_relayer_types::MessageIdentifier;
use parking_lot::RwLock;

use super::queue::{OrderKind, OrderQueueStore, SubmitOrder};
use super::{
    CursorStore, RelayState, RelayStateStore, TokenPriceCacheStore, Versioned,
};

#[derive(Default)]
struct OrderQueue {
    items: VecDeque<SubmitOrder>,
    markers: HashSet<[u8; 33]>,
}

/// InMemoryStore mirrors [`super::SledStore`] behind plain maps, for unit
/// tests and dry runs.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    relay_states:
        Arc<RwLock<HashMap<MessageIdentifier, Versioned<RelayState>>>>,
    order_queues: Arc<RwLock<HashMap<u32, OrderQueue>>>,
    cursors: Arc<RwLock<HashMap<u32, u64>>>,
    target_blocks: Arc<RwLock<HashMap<u32, u64>>>,
    token_prices_cache: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl RelayStateStore for InMemoryStore {
    #[tracing::instrument(skip(self))]
    fn get_relay_state(
        &self,
        message_identifier: MessageIdentifier,
    ) -> crate::Result<Option<Versioned<RelayState>>> {
        let guard = self.relay_states.read();
        Ok(guard.get(&message_identifier).cloned())
    }

    #[tracing::instrument(skip(self, state))]
    fn set_relay_state_if_version(
        &self,
        message_identifier: MessageIdentifier,
        expected_version: u64,
        state: &RelayState,
    ) -> crate::Result<bool> {
        let mut guard = self.relay_states.write();
        let current_version =
            guard.get(&message_identifier).map(|v| v.version).unwrap_or(0);
        if current_version != expected_version {
            return Ok(false);
        }
        guard.insert(
            message_identifier,
            Versioned {
                version: expected_version + 1,
                value: state.clone(),
            },
        );
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    fn relay_states(&self) -> crate::Result<Vec<RelayState>> {
        let guard = self.relay_states.read();
        Ok(guard.values().map(|v| v.value.clone()).collect())
    }
}

impl CursorStore for InMemoryStore {
    #[tracing::instrument(skip(self))]
    fn set_cursor(
        &self,
        chain_id: u32,
        block_number: u64,
    ) -> crate::Result<()> {
        self.cursors.write().insert(chain_id, block_number);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn get_cursor(
        &self,
        chain_id: u32,
        default_block_number: u64,
    ) -> crate::Result<u64> {
        let guard = self.cursors.read();
        Ok(guard.get(&chain_id).copied().unwrap_or(default_block_number))
    }

    #[tracing::instrument(skip(self))]
    fn set_target_block_number(
        &self,
        chain_id: u32,
        block_number: u64,
    ) -> crate::Result<()> {
        self.target_blocks.write().insert(chain_id, block_number);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn get_target_block_number(
        &self,
        chain_id: u32,
        default_block_number: u64,
    ) -> crate::Result<u64> {
        let guard = self.target_blocks.read();
        Ok(guard.get(&chain_id).copied().unwrap_or(default_block_number))
    }
}

impl OrderQueueStore for InMemoryStore {
    #[tracing::instrument(skip_all, fields(chain_id = order.target_chain_id))]
    fn push_order(&self, order: &SubmitOrder) -> crate::Result<bool> {
        let mut guard = self.order_queues.write();
        let queue = guard.entry(order.target_chain_id).or_default();
        if !queue.markers.insert(order.dedup_key()) {
            return Ok(false);
        }
        queue.items.push_back(order.clone());
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    fn pop_orders(
        &self,
        chain_id: u32,
        n: usize,
    ) -> crate::Result<Vec<SubmitOrder>> {
        let mut guard = self.order_queues.write();
        let Some(queue) = guard.get_mut(&chain_id) else {
            return Ok(Vec::new());
        };
        let mut orders = Vec::with_capacity(n.min(queue.items.len()));
        while orders.len() < n {
            match queue.items.pop_front() {
                Some(order) => {
                    queue.markers.remove(&order.dedup_key());
                    orders.push(order);
                }
                None => break,
            }
        }
        Ok(orders)
    }

    #[tracing::instrument(skip(self))]
    fn has_order(
        &self,
        chain_id: u32,
        message_identifier: MessageIdentifier,
        kind: OrderKind,
    ) -> crate::Result<bool> {
        let probe = SubmitOrder {
            message_identifier,
            kind,
            target_chain_id: chain_id,
            block_number: 0,
            log_index: 0,
            observed_at_ms: 0,
        };
        let guard = self.order_queues.read();
        Ok(guard
            .get(&chain_id)
            .map(|q| q.markers.contains(&probe.dedup_key()))
            .unwrap_or(false))
    }

    #[tracing::instrument(skip(self))]
    fn queued_orders(&self, chain_id: u32) -> crate::Result<usize> {
        let guard = self.order_queues.read();
        Ok(guard.get(&chain_id).map(|q| q.items.len()).unwrap_or(0))
    }
}

impl<T> TokenPriceCacheStore<T> for InMemoryStore
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    fn get_price(&self, token: &str) -> crate::Result<Option<T>> {
        let guard = self.token_prices_cache.read();
        match guard.get(token) {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    fn insert_price(&self, token: &str, value: T) -> crate::Result<()> {
        let bytes = serde_json::to_vec(&value)?;
        self.token_prices_cache
            .write()
            .insert(token.to_string(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BountyEvent, BountyPlaced, EventMeta};
    use ethers::types::{Address, H256, U256};

    fn mid(byte: u8) -> MessageIdentifier {
        MessageIdentifier([byte; 32])
    }

    fn placed_event(byte: u8) -> BountyEvent {
        BountyEvent::Placed(BountyPlaced {
            message_identifier: mid(byte),
            from_chain_id: 1,
            to_chain_id: 2,
            incentives_address: Address::zero(),
            max_gas_delivery: 1_000_000,
            max_gas_ack: 100_000,
            refund_gas_to: Address::zero(),
            price_of_delivery_gas: U256::exp10(10),
            price_of_ack_gas: U256::exp10(9),
            target_delta: 0,
            payload: vec![],
            meta: EventMeta {
                tx_hash: H256::zero(),
                block_hash: H256::zero(),
                block_number: 1,
                log_index: 0,
            },
        })
    }

    #[test]
    fn apply_event_is_idempotent() {
        let store = InMemoryStore::default();
        let event = placed_event(1);
        let first = store.apply_event(&event).unwrap();
        let second = store.apply_event(&event).unwrap();
        assert_eq!(first, second);
        let versioned = store.get_relay_state(mid(1)).unwrap().unwrap();
        assert_eq!(versioned.version, 2);
        assert!(versioned.value.placed.is_some());
    }

    #[test]
    fn order_queue_matches_sled_semantics() {
        let store = InMemoryStore::default();
        let order = SubmitOrder {
            message_identifier: mid(1),
            kind: OrderKind::Delivery,
            target_chain_id: 3,
            block_number: 10,
            log_index: 0,
            observed_at_ms: 0,
        };
        assert!(store.push_order(&order).unwrap());
        assert!(!store.push_order(&order).unwrap());
        assert!(store.has_order(3, mid(1), OrderKind::Delivery).unwrap());
        assert!(!store.has_order(3, mid(1), OrderKind::Ack).unwrap());
        let popped = store.pop_orders(3, 10).unwrap();
        assert_eq!(popped.len(), 1);
        assert!(!store.has_order(3, mid(1), OrderKind::Delivery).unwrap());
    }
}
