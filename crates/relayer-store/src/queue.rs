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

use bounty_relayer_types::MessageIdentifier;
use bounty_relayer_utils::Result;
use serde::{Deserialize, Serialize};

/// What kind of transaction an order asks for.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum OrderKind {
    /// Execute the message payload on the destination chain.
    Delivery,
    /// Prove the delivery back on the origin chain to release the bounty.
    Ack,
}

impl OrderKind {
    /// Stable name, used in store keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Ack => "ack",
        }
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work: one transaction the relayer intends to submit on
/// `target_chain_id` for one message. Orders wait in the per-chain queue
/// until the evaluator judges them profitable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrder {
    /// The message the order is about.
    pub message_identifier: MessageIdentifier,
    /// Delivery or ack.
    pub kind: OrderKind,
    /// The chain the transaction must land on.
    pub target_chain_id: u32,
    /// Block number of the event that triggered the order.
    pub block_number: u64,
    /// Log index of the event that triggered the order.
    pub log_index: u64,
    /// Unix milliseconds of the first observation, for the new-orders
    /// grace period.
    pub observed_at_ms: u64,
}

impl SubmitOrder {
    /// The dedup key of an order inside its chain queue.
    pub fn dedup_key(&self) -> [u8; 33] {
        let mut key = [0u8; 33];
        key[..32].copy_from_slice(&self.message_identifier.to_bytes());
        key[32] = match self.kind {
            OrderKind::Delivery => 0,
            OrderKind::Ack => 1,
        };
        key
    }
}

/// A FIFO queue of pending orders per chain, the secondary index the
/// evaluator feeds from. Pushing the same `(message, kind)` twice is a
/// no-op until the first copy is popped.
pub trait OrderQueueStore: Send + Sync {
    /// Enqueue an order on its target chain's queue. Returns `false` if an
    /// equal `(message, kind)` order is already waiting.
    fn push_order(&self, order: &SubmitOrder) -> Result<bool>;

    /// Pop up to `n` orders from the front of the chain's queue.
    fn pop_orders(&self, chain_id: u32, n: usize)
        -> Result<Vec<SubmitOrder>>;

    /// Whether an order for `(message, kind)` is waiting on that chain.
    fn has_order(
        &self,
        chain_id: u32,
        message_identifier: MessageIdentifier,
        kind: OrderKind,
    ) -> Result<bool>;

    /// How many orders are waiting on that chain.
    fn queued_orders(&self, chain_id: u32) -> Result<usize>;
}

impl<S: OrderQueueStore> OrderQueueStore for Arc<S> {
    fn push_order(&self, order: &SubmitOrder) -> Result<bool> {
        S::push_order(self, order)
    }

    fn pop_orders(
        &self,
        chain_id: u32,
        n: usize,
    ) -> Result<Vec<SubmitOrder>> {
        S::pop_orders(self, chain_id, n)
    }

    fn has_order(
        &self,
        chain_id: u32,
        message_identifier: MessageIdentifier,
        kind: OrderKind,
    ) -> Result<bool> {
        S::has_order(self, chain_id, message_identifier, kind)
    }

    fn queued_orders(&self, chain_id: u32) -> Result<usize> {
        S::queued_orders(self, chain_id)
    }
}
