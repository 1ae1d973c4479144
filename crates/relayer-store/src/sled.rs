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

use std::path::Path;

use bounty_relayer_types::MessageIdentifier;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::ConflictableTransactionError;

use super::queue::{OrderKind, OrderQueueStore, SubmitOrder};
use super::{
    CursorStore, RelayState, RelayStateStore, TokenPriceCacheStore, Versioned,
};

/// SledStore is a store that stores the relay states, order queues and
/// getter cursors in a [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

const RELAY_STATES_TREE: &str = "relay_states";
const ITEM_PREFIX: &[u8] = b"item_";
const MARK_PREFIX: &[u8] = b"mark_";

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// Creates a temporary SledStore.
    pub fn temporary() -> crate::Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::open(dir.path())
    }

    /// Gets the total amount of data stored on disk
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    /// Change notifications for relay states.
    ///
    /// This is a hint for subscribers only; the orchestrator tick is the
    /// authoritative loop and never waits on it.
    pub fn watch_relay_states(&self) -> crate::Result<sled::Subscriber> {
        let tree = self.db.open_tree(RELAY_STATES_TREE)?;
        Ok(tree.watch_prefix(vec![]))
    }

    fn queue_tree(&self, chain_id: u32) -> crate::Result<sled::Tree> {
        self.db
            .open_tree(format!("order_queue_{chain_id}"))
            .map_err(Into::into)
    }
}

impl RelayStateStore for SledStore {
    #[tracing::instrument(skip(self))]
    fn get_relay_state(
        &self,
        message_identifier: MessageIdentifier,
    ) -> crate::Result<Option<Versioned<RelayState>>> {
        let tree = self.db.open_tree(RELAY_STATES_TREE)?;
        match tree.get(message_identifier.to_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, state))]
    fn set_relay_state_if_version(
        &self,
        message_identifier: MessageIdentifier,
        expected_version: u64,
        state: &RelayState,
    ) -> crate::Result<bool> {
        let tree = self.db.open_tree(RELAY_STATES_TREE)?;
        let new_bytes = serde_json::to_vec(&Versioned {
            version: expected_version + 1,
            value: state.clone(),
        })?;
        let key = message_identifier.to_bytes();
        let swapped = tree.transaction::<_, _, std::io::Error>(|db| {
            let current_version = match db.get(key)? {
                Some(bytes) => serde_json::from_slice::<Versioned<RelayState>>(
                    &bytes,
                )
                .map_err(|e| {
                    ConflictableTransactionError::Abort(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e,
                    ))
                })?
                .version,
                None => 0,
            };
            if current_version != expected_version {
                return Ok(false);
            }
            db.insert(&key[..], new_bytes.as_slice())?;
            Ok(true)
        })?;
        // flush the db to make sure we don't lose anything.
        self.db.flush()?;
        Ok(swapped)
    }

    #[tracing::instrument(skip(self))]
    fn relay_states(&self) -> crate::Result<Vec<RelayState>> {
        let tree = self.db.open_tree(RELAY_STATES_TREE)?;
        let mut states = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let versioned: Versioned<RelayState> =
                serde_json::from_slice(&bytes)?;
            states.push(versioned.value);
        }
        Ok(states)
    }
}

impl CursorStore for SledStore {
    #[tracing::instrument(skip(self))]
    fn set_cursor(
        &self,
        chain_id: u32,
        block_number: u64,
    ) -> crate::Result<()> {
        let tree = self.db.open_tree("cursors")?;
        tree.insert(chain_id.to_be_bytes(), &block_number.to_be_bytes())?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn get_cursor(
        &self,
        chain_id: u32,
        default_block_number: u64,
    ) -> crate::Result<u64> {
        let tree = self.db.open_tree("cursors")?;
        match tree.get(chain_id.to_be_bytes())? {
            Some(v) => {
                let mut output = [0u8; 8];
                output.copy_from_slice(&v);
                Ok(u64::from_be_bytes(output))
            }
            None => Ok(default_block_number),
        }
    }

    #[tracing::instrument(skip(self))]
    fn set_target_block_number(
        &self,
        chain_id: u32,
        block_number: u64,
    ) -> crate::Result<()> {
        let tree = self.db.open_tree("target_blocks")?;
        tree.insert(chain_id.to_be_bytes(), &block_number.to_be_bytes())?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn get_target_block_number(
        &self,
        chain_id: u32,
        default_block_number: u64,
    ) -> crate::Result<u64> {
        let tree = self.db.open_tree("target_blocks")?;
        match tree.get(chain_id.to_be_bytes())? {
            Some(v) => {
                let mut output = [0u8; 8];
                output.copy_from_slice(&v);
                Ok(u64::from_be_bytes(output))
            }
            None => Ok(default_block_number),
        }
    }
}

impl OrderQueueStore for SledStore {
    #[tracing::instrument(skip_all, fields(chain_id = order.target_chain_id, mid = %order.message_identifier, kind = %order.kind))]
    fn push_order(&self, order: &SubmitOrder) -> crate::Result<bool> {
        let tree = self.queue_tree(order.target_chain_id)?;
        let order_bytes = serde_json::to_vec(order)?;
        let mut mark_key =
            Vec::with_capacity(MARK_PREFIX.len() + order.dedup_key().len());
        mark_key.extend_from_slice(MARK_PREFIX);
        mark_key.extend_from_slice(&order.dedup_key());
        // we do everything inside a single transaction
        // so everything happens atomically and if anything fails
        // we revert everything back to the old state.
        let pushed = tree.transaction::<_, _, std::io::Error>(|db| {
            if db.get(mark_key.as_slice())?.is_some() {
                // an equal order is already waiting.
                return Ok(false);
            }
            // get the last id of the queue.
            let last_item_idx = match db.get("last_item_idx")? {
                Some(v) => {
                    let mut output = [0u8; 8];
                    output.copy_from_slice(&v);
                    u64::from_be_bytes(output)
                }
                None => 0u64,
            };
            // increment it.
            let next_idx = last_item_idx + 1u64;
            let idx_bytes = next_idx.to_be_bytes();
            // then save it.
            db.insert("last_item_idx", &idx_bytes)?;
            // item key = prefix + 8 bytes of the index, so a prefix scan
            // walks the queue in FIFO order.
            let mut item_key =
                [0u8; ITEM_PREFIX.len() + std::mem::size_of::<u64>()];
            item_key[..ITEM_PREFIX.len()].copy_from_slice(ITEM_PREFIX);
            item_key[ITEM_PREFIX.len()..].copy_from_slice(&idx_bytes);
            db.insert(&item_key[..], order_bytes.as_slice())?;
            // also save the dedup marker, pointing at the item key.
            db.insert(mark_key.as_slice(), &item_key[..])?;
            Ok(true)
        })?;
        // flush the db to make sure we don't lose anything.
        self.db.flush()?;
        Ok(pushed)
    }

    #[tracing::instrument(skip(self))]
    fn pop_orders(
        &self,
        chain_id: u32,
        n: usize,
    ) -> crate::Result<Vec<SubmitOrder>> {
        let tree = self.queue_tree(chain_id)?;
        let mut orders = Vec::with_capacity(n);
        while orders.len() < n {
            let (key, value) = match tree.scan_prefix(ITEM_PREFIX).next() {
                Some(Ok(v)) => v,
                _ => break,
            };
            let order: SubmitOrder = serde_json::from_slice(&value)?;
            // now it is safe to remove it from the queue.
            tree.remove(key)?;
            let mut mark_key = Vec::with_capacity(
                MARK_PREFIX.len() + order.dedup_key().len(),
            );
            mark_key.extend_from_slice(MARK_PREFIX);
            mark_key.extend_from_slice(&order.dedup_key());
            tree.remove(mark_key)?;
            orders.push(order);
        }
        if !orders.is_empty() {
            self.db.flush()?;
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
        let tree = self.queue_tree(chain_id)?;
        let probe = SubmitOrder {
            message_identifier,
            kind,
            target_chain_id: chain_id,
            block_number: 0,
            log_index: 0,
            observed_at_ms: 0,
        };
        let mut mark_key =
            Vec::with_capacity(MARK_PREFIX.len() + probe.dedup_key().len());
        mark_key.extend_from_slice(MARK_PREFIX);
        mark_key.extend_from_slice(&probe.dedup_key());
        tree.contains_key(mark_key).map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    fn queued_orders(&self, chain_id: u32) -> crate::Result<usize> {
        let tree = self.queue_tree(chain_id)?;
        Ok(tree.scan_prefix(ITEM_PREFIX).count())
    }
}

impl<T> TokenPriceCacheStore<T> for SledStore
where
    T: Serialize + DeserializeOwned,
{
    fn get_price(&self, token: &str) -> crate::Result<Option<T>> {
        let tree = self.db.open_tree("token_prices")?;
        match tree.get(token)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert_price(&self, token: &str, value: T) -> crate::Result<()> {
        let v = serde_json::to_vec(&value)?;
        let tree = self.db.open_tree("token_prices")?;
        tree.insert(token, v.as_slice())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    fn mid(byte: u8) -> MessageIdentifier {
        MessageIdentifier([byte; 32])
    }

    fn order(byte: u8, kind: OrderKind, chain_id: u32) -> SubmitOrder {
        SubmitOrder {
            message_identifier: mid(byte),
            kind,
            target_chain_id: chain_id,
            block_number: byte as u64,
            log_index: 0,
            observed_at_ms: 0,
        }
    }

    #[test]
    fn relay_state_round_trips_256_bit_values() {
        let store = SledStore::temporary().unwrap();
        let mut state = RelayState::new(mid(1));
        state.delivery_gas_cost = Some(U256::MAX);
        assert!(store.set_relay_state_if_version(mid(1), 0, &state).unwrap());
        let loaded = store.get_relay_state(mid(1)).unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.value.delivery_gas_cost, Some(U256::MAX));
    }

    #[test]
    fn cas_rejects_stale_versions() {
        let store = SledStore::temporary().unwrap();
        let state = RelayState::new(mid(2));
        assert!(store.set_relay_state_if_version(mid(2), 0, &state).unwrap());
        // a second writer with the old version loses.
        assert!(!store.set_relay_state_if_version(mid(2), 0, &state).unwrap());
        assert!(store.set_relay_state_if_version(mid(2), 1, &state).unwrap());
        let loaded = store.get_relay_state(mid(2)).unwrap().unwrap();
        assert_eq!(loaded.version, 2);
    }

    #[test]
    fn order_queue_is_fifo_and_deduplicates() {
        let store = SledStore::temporary().unwrap();
        assert!(store.push_order(&order(1, OrderKind::Delivery, 5)).unwrap());
        assert!(store.push_order(&order(2, OrderKind::Delivery, 5)).unwrap());
        // the same (message, kind) is already waiting.
        assert!(!store.push_order(&order(1, OrderKind::Delivery, 5)).unwrap());
        // a different kind for the same message is a new order.
        assert!(store.push_order(&order(1, OrderKind::Ack, 5)).unwrap());
        assert_eq!(store.queued_orders(5).unwrap(), 3);

        let popped = store.pop_orders(5, 2).unwrap();
        assert_eq!(popped.len(), 2);
        assert_eq!(popped[0].message_identifier, mid(1));
        assert_eq!(popped[1].message_identifier, mid(2));
        // once popped, the same order may be enqueued again.
        assert!(store.push_order(&order(1, OrderKind::Delivery, 5)).unwrap());
    }

    #[test]
    fn queues_are_per_chain() {
        let store = SledStore::temporary().unwrap();
        assert!(store.push_order(&order(1, OrderKind::Delivery, 1)).unwrap());
        assert!(store.push_order(&order(1, OrderKind::Delivery, 2)).unwrap());
        assert_eq!(store.pop_orders(1, 10).unwrap().len(), 1);
        assert_eq!(store.pop_orders(2, 10).unwrap().len(), 1);
    }

    #[test]
    fn cursor_round_trip() {
        let store = SledStore::temporary().unwrap();
        assert_eq!(store.get_cursor(7, 42).unwrap(), 42);
        store.set_cursor(7, 1000).unwrap();
        assert_eq!(store.get_cursor(7, 42).unwrap(), 1000);
    }

    #[test]
    fn modify_relay_state_creates_and_updates() {
        let store = SledStore::temporary().unwrap();
        let state = store
            .modify_relay_state(mid(3), |s| s.delivery_attempts += 1)
            .unwrap();
        assert_eq!(state.delivery_attempts, 1);
        let state = store
            .modify_relay_state(mid(3), |s| s.delivery_attempts += 1)
            .unwrap();
        assert_eq!(state.delivery_attempts, 2);
        let loaded = store.get_relay_state(mid(3)).unwrap().unwrap();
        assert_eq!(loaded.version, 2);
    }
}
