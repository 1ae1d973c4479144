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

//! # Relayer Store Module 🕸️
//!
//! A module for managing the storage of the relayer.
//!
//! ## Overview
//!
//! The relayer store module owns the per-message relay state: the lifecycle
//! events observed on both chains merged into one aggregate, the pending
//! order queues, and the block cursors of the log getters. All mutations of
//! a relay state go through a compare-and-set on a monotonic version, so two
//! chain workers updating the same message never lose each other's writes.
use std::sync::Arc;

use bounty_relayer_types::MessageIdentifier;
use bounty_relayer_utils::Result;
use ethers::types::{Address, H256, U256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A module for managing in-memory storage of the relayer.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
#[cfg(feature = "sled")]
pub mod sled;

pub mod queue;
/// A store that uses [`sled`](https://sled.rs) as the backend.
#[cfg(feature = "sled")]
pub use self::sled::SledStore;
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;
pub use queue::{OrderKind, OrderQueueStore, SubmitOrder};

/// Where on chain an event was observed. The pair `(block_number,
/// log_index)` orders observations of the same slot; the block hash ties a
/// slot to the fork it was last seen on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Hash of the transaction that emitted the event.
    pub tx_hash: H256,
    /// Hash of the block the event was found in.
    pub block_hash: H256,
    /// Number of the block the event was found in.
    pub block_number: u64,
    /// Index of the log within its block.
    pub log_index: u64,
}

impl EventMeta {
    /// The ordering key of an observation. Later observations win a slot.
    pub fn ordinal(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// A bounty was placed in the escrow contract on the origin chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BountyPlaced {
    /// The message this bounty pays for.
    pub message_identifier: MessageIdentifier,
    /// The chain the bounty was observed on.
    pub from_chain_id: u32,
    /// The chain the message must be delivered to, as resolved by the AMB
    /// adapter from the message payload.
    pub to_chain_id: u32,
    /// The incentives (escrow) contract holding the bounty.
    pub incentives_address: Address,
    /// Gas the bounty reimburses for the delivery transaction.
    pub max_gas_delivery: u64,
    /// Gas the bounty reimburses for the ack transaction.
    pub max_gas_ack: u64,
    /// Where unspent gas reimbursement is refunded.
    pub refund_gas_to: Address,
    /// Price per delivery gas unit, in origin-chain wei.
    pub price_of_delivery_gas: U256,
    /// Price per ack gas unit, in origin-chain wei.
    pub price_of_ack_gas: U256,
    /// Seconds the escrow targets between delivery and ack.
    pub target_delta: u64,
    /// The raw message payload to execute on the destination.
    pub payload: Vec<u8>,
    /// Where the event was observed.
    pub meta: EventMeta,
}

/// The bounty of an already placed message was raised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BountyIncreased {
    /// The message whose bounty was raised.
    pub message_identifier: MessageIdentifier,
    /// New price per delivery gas unit, in origin-chain wei.
    pub new_delivery_gas_price: U256,
    /// New price per ack gas unit, in origin-chain wei.
    pub new_ack_gas_price: U256,
    /// Where the event was observed.
    pub meta: EventMeta,
}

/// The message payload was executed on the destination chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelivered {
    /// The message that was delivered.
    pub message_identifier: MessageIdentifier,
    /// The chain the delivery was observed on.
    pub to_chain_id: u32,
    /// Where the event was observed.
    pub meta: EventMeta,
}

/// The bounty was claimed on the origin chain after the ack arrived.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BountyClaimed {
    /// The message whose bounty was claimed.
    pub message_identifier: MessageIdentifier,
    /// Where the event was observed.
    pub meta: EventMeta,
}

/// A semantic event in the life of a bounty, decoded from a raw chain log by
/// an AMB adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BountyEvent {
    /// A new bounty appeared in the escrow.
    Placed(BountyPlaced),
    /// An existing bounty was raised.
    Increased(BountyIncreased),
    /// The message was executed on its destination chain.
    Delivered(MessageDelivered),
    /// The bounty was paid out.
    Claimed(BountyClaimed),
}

impl BountyEvent {
    /// The message this event belongs to.
    pub fn message_identifier(&self) -> MessageIdentifier {
        match self {
            Self::Placed(e) => e.message_identifier,
            Self::Increased(e) => e.message_identifier,
            Self::Delivered(e) => e.message_identifier,
            Self::Claimed(e) => e.message_identifier,
        }
    }

    /// Where the event was observed.
    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::Placed(e) => &e.meta,
            Self::Increased(e) => &e.meta,
            Self::Delivered(e) => &e.meta,
            Self::Claimed(e) => &e.meta,
        }
    }

    /// The lifecycle status this event implies for its message.
    pub fn status(&self) -> RelayStatus {
        match self {
            Self::Placed(_) | Self::Increased(_) => RelayStatus::Placed,
            Self::Delivered(_) => RelayStatus::Delivered,
            Self::Claimed(_) => RelayStatus::Claimed,
        }
    }
}

/// The lifecycle status of a relayed message. Only ever moves forward.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum RelayStatus {
    /// A bounty exists, the message has not been delivered yet.
    Placed,
    /// The message was executed on the destination chain.
    Delivered,
    /// The bounty was paid out on the origin chain.
    Claimed,
}

impl RelayStatus {
    /// The numeric representation used in logs and the status endpoint.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Placed => 0,
            Self::Delivered => 1,
            Self::Claimed => 2,
        }
    }
}

/// The per-message aggregate the whole relayer works from.
///
/// Each event kind has one slot; re-observations with a larger
/// `(block_number, log_index)` overwrite the slot, so replaying logs after a
/// reorg converges on the canonical view. A relay state is created on the
/// first `BountyPlaced` and is never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayState {
    /// The message this state aggregates.
    pub message_identifier: MessageIdentifier,
    /// Current lifecycle status, monotonically non-decreasing.
    pub status: RelayStatus,
    /// The latest observed `BountyPlaced`, if any.
    pub placed: Option<BountyPlaced>,
    /// The latest observed `BountyIncreased`, if any.
    pub increased: Option<BountyIncreased>,
    /// The latest observed `MessageDelivered`, if any.
    pub delivered: Option<MessageDelivered>,
    /// The latest observed `BountyClaimed`, if any.
    pub claimed: Option<BountyClaimed>,
    /// Gas spent by our delivery transaction, once confirmed.
    pub delivery_gas_cost: Option<U256>,
    /// Gas spent by our ack transaction, once confirmed.
    pub ack_gas_cost: Option<U256>,
    /// How many delivery submissions we attempted for this message.
    pub delivery_attempts: u32,
    /// How many ack submissions we attempted for this message.
    pub ack_attempts: u32,
    /// Set when delivery was judged permanently unprofitable. Cleared by a
    /// `BountyIncreased`.
    pub delivery_abandoned: Option<String>,
    /// Set when the ack was judged permanently unprofitable. Cleared by a
    /// `BountyIncreased`.
    pub ack_abandoned: Option<String>,
}

impl RelayState {
    /// An empty state for a message we have just learned about.
    pub fn new(message_identifier: MessageIdentifier) -> Self {
        Self {
            message_identifier,
            status: RelayStatus::Placed,
            placed: None,
            increased: None,
            delivered: None,
            claimed: None,
            delivery_gas_cost: None,
            ack_gas_cost: None,
            delivery_attempts: 0,
            ack_attempts: 0,
            delivery_abandoned: None,
            ack_abandoned: None,
        }
    }

    /// Merges one observed event into the aggregate.
    ///
    /// The merge is commutative over any permutation of a fixed event set:
    /// each slot keeps the observation with the largest `(block_number,
    /// log_index)`, and the status only ever rises.
    pub fn apply(&mut self, event: &BountyEvent) {
        fn fill<T: Clone>(
            slot: &mut Option<T>,
            incoming: &T,
            ordinal_of: impl Fn(&T) -> (u64, u64),
        ) {
            let replace = match slot {
                Some(existing) => {
                    ordinal_of(incoming) >= ordinal_of(existing)
                }
                None => true,
            };
            if replace {
                *slot = Some(incoming.clone());
            }
        }

        match event {
            BountyEvent::Placed(e) => {
                fill(&mut self.placed, e, |e| e.meta.ordinal())
            }
            BountyEvent::Increased(e) => {
                fill(&mut self.increased, e, |e| e.meta.ordinal());
                // a raised bounty reopens anything we gave up on.
                self.delivery_abandoned = None;
                self.ack_abandoned = None;
            }
            BountyEvent::Delivered(e) => {
                fill(&mut self.delivered, e, |e| e.meta.ordinal())
            }
            BountyEvent::Claimed(e) => {
                fill(&mut self.claimed, e, |e| e.meta.ordinal())
            }
        }
        if event.status() > self.status {
            self.status = event.status();
        }
    }

    /// The delivery gas price the evaluator must use: the larger of the
    /// original bounty and the latest raise.
    pub fn delivery_gas_price(&self) -> U256 {
        let placed = self
            .placed
            .as_ref()
            .map(|e| e.price_of_delivery_gas)
            .unwrap_or_default();
        let increased = self
            .increased
            .as_ref()
            .map(|e| e.new_delivery_gas_price)
            .unwrap_or_default();
        placed.max(increased)
    }

    /// The ack gas price the evaluator must use.
    pub fn ack_gas_price(&self) -> U256 {
        let placed = self
            .placed
            .as_ref()
            .map(|e| e.price_of_ack_gas)
            .unwrap_or_default();
        let increased = self
            .increased
            .as_ref()
            .map(|e| e.new_ack_gas_price)
            .unwrap_or_default();
        placed.max(increased)
    }

    /// Whether a delivery transaction is still wanted for this message.
    pub fn needs_delivery(&self) -> bool {
        self.status == RelayStatus::Placed
            && self.placed.is_some()
            && self.delivered.is_none()
            && self.delivery_abandoned.is_none()
    }

    /// Whether an ack transaction is still wanted for this message.
    pub fn needs_ack(&self) -> bool {
        self.status == RelayStatus::Delivered
            && self.claimed.is_none()
            && self.ack_abandoned.is_none()
    }

    /// Terminal means claimed with both gas costs on record; nothing will
    /// ever change this state again, it is kept for audit.
    pub fn is_terminal(&self) -> bool {
        self.status == RelayStatus::Claimed
            && self.delivery_gas_cost.is_some()
            && self.ack_gas_cost.is_some()
    }
}

/// A value paired with the monotonic version the store knows it under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Version counter, starts at 1 on first insert.
    pub version: u64,
    /// The stored value.
    pub value: T,
}

/// How many times a read-modify-write loop retries a lost CAS race before
/// giving up. Contention on one message is two workers at most, so this is
/// never hit in practice.
const CAS_MAX_RETRIES: usize = 16;

/// Storage of [`RelayState`]s keyed by message identifier.
///
/// The only primitive write is a compare-and-set on the state version; all
/// higher-level mutations are read-modify-write loops over it.
pub trait RelayStateStore: Send + Sync {
    /// Get the relay state and its version for the given message.
    fn get_relay_state(
        &self,
        message_identifier: MessageIdentifier,
    ) -> Result<Option<Versioned<RelayState>>>;

    /// Write `state` only if the stored version still equals
    /// `expected_version` (`0` means "not present yet"). Returns whether the
    /// write happened.
    fn set_relay_state_if_version(
        &self,
        message_identifier: MessageIdentifier,
        expected_version: u64,
        state: &RelayState,
    ) -> Result<bool>;

    /// All relay states currently in the store. The evaluator walks this to
    /// re-enqueue orders that were dropped along the way; the store is the
    /// source of truth, the queues are only a work feed.
    fn relay_states(&self) -> Result<Vec<RelayState>>;

    /// Read-modify-write with optimistic retry on version conflicts.
    fn modify_relay_state<F>(
        &self,
        message_identifier: MessageIdentifier,
        f: F,
    ) -> Result<RelayState>
    where
        F: Fn(&mut RelayState),
    {
        for _ in 0..CAS_MAX_RETRIES {
            let (version, mut state) =
                match self.get_relay_state(message_identifier)? {
                    Some(versioned) => (versioned.version, versioned.value),
                    None => (0, RelayState::new(message_identifier)),
                };
            f(&mut state);
            if self.set_relay_state_if_version(
                message_identifier,
                version,
                &state,
            )? {
                return Ok(state);
            }
            tracing::trace!(
                mid = %message_identifier,
                "relay state version moved, retrying",
            );
        }
        Err(bounty_relayer_utils::Error::StateVersionConflict {
            message_identifier: message_identifier.to_string(),
        })
    }

    /// Merge an observed event into the message's aggregate.
    fn apply_event(&self, event: &BountyEvent) -> Result<RelayState> {
        self.modify_relay_state(event.message_identifier(), |state| {
            state.apply(event)
        })
    }

    /// Count one more submission attempt for the given order kind.
    fn record_attempt(
        &self,
        message_identifier: MessageIdentifier,
        kind: OrderKind,
    ) -> Result<RelayState> {
        self.modify_relay_state(message_identifier, |state| match kind {
            OrderKind::Delivery => state.delivery_attempts += 1,
            OrderKind::Ack => state.ack_attempts += 1,
        })
    }

    /// Record the gas a confirmed transaction of ours actually spent.
    fn record_gas_cost(
        &self,
        message_identifier: MessageIdentifier,
        kind: OrderKind,
        gas_cost: U256,
    ) -> Result<RelayState> {
        self.modify_relay_state(message_identifier, |state| match kind {
            OrderKind::Delivery => state.delivery_gas_cost = Some(gas_cost),
            OrderKind::Ack => state.ack_gas_cost = Some(gas_cost),
        })
    }

    /// Mark an order kind as permanently unprofitable. The mark is cleared
    /// again when a `BountyIncreased` event arrives.
    fn mark_abandoned(
        &self,
        message_identifier: MessageIdentifier,
        kind: OrderKind,
        reason: &str,
    ) -> Result<RelayState> {
        self.modify_relay_state(message_identifier, |state| match kind {
            OrderKind::Delivery => {
                state.delivery_abandoned = Some(reason.to_string())
            }
            OrderKind::Ack => state.ack_abandoned = Some(reason.to_string()),
        })
    }
}

impl<S: RelayStateStore> RelayStateStore for Arc<S> {
    fn get_relay_state(
        &self,
        message_identifier: MessageIdentifier,
    ) -> Result<Option<Versioned<RelayState>>> {
        S::get_relay_state(self, message_identifier)
    }

    fn set_relay_state_if_version(
        &self,
        message_identifier: MessageIdentifier,
        expected_version: u64,
        state: &RelayState,
    ) -> Result<bool> {
        S::set_relay_state_if_version(
            self,
            message_identifier,
            expected_version,
            state,
        )
    }

    fn relay_states(&self) -> Result<Vec<RelayState>> {
        S::relay_states(self)
    }
}

/// CursorStore is a simple trait for storing and retrieving the block
/// cursors of the per-chain log getters.
pub trait CursorStore: Send + Sync {
    /// Persist the next block the getter should read for that chain.
    fn set_cursor(&self, chain_id: u32, block_number: u64) -> Result<()>;
    /// Get the next block the getter should read for that chain.
    /// if not found, returns the `default_block_number`.
    fn get_cursor(
        &self,
        chain_id: u32,
        default_block_number: u64,
    ) -> Result<u64>;

    /// Sets the target block number (usually the confirmed head of the
    /// chain). This is used to check if we are fully synced or not.
    fn set_target_block_number(
        &self,
        chain_id: u32,
        block_number: u64,
    ) -> Result<()>;
    /// Get the target block number.
    /// if not found, returns the `default_block_number`.
    fn get_target_block_number(
        &self,
        chain_id: u32,
        default_block_number: u64,
    ) -> Result<u64>;
}

impl<S: CursorStore> CursorStore for Arc<S> {
    fn set_cursor(&self, chain_id: u32, block_number: u64) -> Result<()> {
        S::set_cursor(self, chain_id, block_number)
    }

    fn get_cursor(
        &self,
        chain_id: u32,
        default_block_number: u64,
    ) -> Result<u64> {
        S::get_cursor(self, chain_id, default_block_number)
    }

    fn set_target_block_number(
        &self,
        chain_id: u32,
        block_number: u64,
    ) -> Result<()> {
        S::set_target_block_number(self, chain_id, block_number)
    }

    fn get_target_block_number(
        &self,
        chain_id: u32,
        default_block_number: u64,
    ) -> Result<u64> {
        S::get_target_block_number(self, chain_id, default_block_number)
    }
}

/// A trait for Cached Token Price.
pub trait TokenPriceCacheStore<CachedTokenPrice>
where
    CachedTokenPrice: Serialize + DeserializeOwned,
{
    /// Get the cached token price for the given token key.
    /// If the token is not found, it will return `None`.
    fn get_price(&self, token_key: &str)
        -> Result<Option<CachedTokenPrice>>;
    /// Insert the cached token price for the given token key.
    ///
    /// **Note**: this will override the previous value.
    fn insert_price(
        &self,
        token_key: &str,
        value: CachedTokenPrice,
    ) -> Result<()>;
}
