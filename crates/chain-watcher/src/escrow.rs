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

//! The adapter for the escrow incentives contract family.
//!
//! The escrow prefixes every message with the destination chain id as four
//! big-endian bytes; the rest of the message is the payload executed on the
//! destination. The adapter resolves the destination at decode time so the
//! collector can route delivery orders without understanding the payload.

use std::collections::HashMap;

use bounty_relayer_store::{
    BountyClaimed, BountyEvent, BountyIncreased, BountyPlaced, EventMeta,
    MessageDelivered,
};
use bounty_relayer_types::MessageIdentifier;
use bounty_relayer_utils::{Error, Result};
use ethers::abi::{RawLog, Token};
use ethers::contract::EthEvent;
use ethers::types::{Address, Bytes, Log, H256};

/// `BountyPlaced` as the escrow contract emits it.
#[derive(Clone, Debug, PartialEq, EthEvent)]
#[ethevent(
    name = "BountyPlaced",
    abi = "BountyPlaced(bytes32,address,uint64,uint64,address,uint128,uint128,uint64,bytes)"
)]
pub struct BountyPlacedEvent {
    /// The escrow-assigned message identifier.
    #[ethevent(indexed)]
    pub message_identifier: H256,
    /// The incentives contract holding the bounty.
    pub incentives_address: Address,
    /// Gas reimbursed for delivery.
    pub max_gas_delivery: u64,
    /// Gas reimbursed for the ack.
    pub max_gas_ack: u64,
    /// Refund target for unspent reimbursement.
    pub refund_gas_to: Address,
    /// Wei per delivery gas unit.
    pub price_of_delivery_gas: u128,
    /// Wei per ack gas unit.
    pub price_of_ack_gas: u128,
    /// Target seconds between delivery and ack.
    pub target_delta: u64,
    /// Destination-prefixed message bytes.
    pub message: Bytes,
}

/// `BountyIncreased` as the escrow contract emits it.
#[derive(Clone, Debug, PartialEq, EthEvent)]
#[ethevent(
    name = "BountyIncreased",
    abi = "BountyIncreased(bytes32,uint128,uint128)"
)]
pub struct BountyIncreasedEvent {
    /// The escrow-assigned message identifier.
    #[ethevent(indexed)]
    pub message_identifier: H256,
    /// The raised delivery gas price, in wei.
    pub new_delivery_gas_price: u128,
    /// The raised ack gas price, in wei.
    pub new_ack_gas_price: u128,
}

/// `MessageDelivered` as the destination escrow emits it.
#[derive(Clone, Debug, PartialEq, EthEvent)]
#[ethevent(name = "MessageDelivered", abi = "MessageDelivered(bytes32,uint32)")]
pub struct MessageDeliveredEvent {
    /// The escrow-assigned message identifier.
    #[ethevent(indexed)]
    pub message_identifier: H256,
    /// The chain the message was delivered on.
    pub to_chain_id: u32,
}

/// `BountyClaimed` as the origin escrow emits it.
#[derive(Clone, Debug, PartialEq, EthEvent)]
#[ethevent(name = "BountyClaimed", abi = "BountyClaimed(bytes32)")]
pub struct BountyClaimedEvent {
    /// The escrow-assigned message identifier.
    #[ethevent(indexed)]
    pub message_identifier: H256,
}

/// The adapter for the escrow incentives contracts, one instance shared by
/// all chain workers.
#[derive(Clone, Debug, Default)]
pub struct EscrowIncentivesAdapter {
    /// chain id -> incentives contract on that chain.
    incentives: HashMap<u32, Address>,
}

impl EscrowIncentivesAdapter {
    /// Creates the adapter from the chain -> incentives contract map.
    pub fn new(incentives: HashMap<u32, Address>) -> Self {
        Self { incentives }
    }

    /// Splits the destination chain id off an escrow message.
    ///
    /// A message the escrow accepts is always at least the four-byte
    /// destination prefix; anything shorter is a decoder error.
    fn destination_of(&self, message: &[u8]) -> Result<u32> {
        let prefix: [u8; 4] = message
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::InvalidBountyEvent {
                reason: "message shorter than the destination prefix".into(),
            })?;
        let to_chain_id = u32::from_be_bytes(prefix);
        if !self.incentives.contains_key(&to_chain_id) {
            return Err(Error::InvalidDestinationChain);
        }
        Ok(to_chain_id)
    }
}

fn meta_of(log: &Log) -> EventMeta {
    EventMeta {
        tx_hash: log.transaction_hash.unwrap_or_default(),
        block_hash: log.block_hash.unwrap_or_default(),
        block_number: log.block_number.unwrap_or_default().as_u64(),
        log_index: log.log_index.unwrap_or_default().as_u64(),
    }
}

impl super::AmbAdapter for EscrowIncentivesAdapter {
    fn incentives_address(&self, chain_id: u32) -> Option<Address> {
        self.incentives.get(&chain_id).copied()
    }

    fn topics(&self) -> Vec<H256> {
        vec![
            BountyPlacedEvent::signature(),
            BountyIncreasedEvent::signature(),
            MessageDeliveredEvent::signature(),
            BountyClaimedEvent::signature(),
        ]
    }

    fn decode(
        &self,
        chain_id: u32,
        log: &Log,
    ) -> Result<Option<BountyEvent>> {
        let Some(topic0) = log.topics.first().copied() else {
            return Ok(None);
        };
        let raw = RawLog::from(log.clone());
        let meta = meta_of(log);
        let invalid = |e: ethers::abi::Error| Error::InvalidBountyEvent {
            reason: e.to_string(),
        };
        if topic0 == BountyPlacedEvent::signature() {
            let event =
                BountyPlacedEvent::decode_log(&raw).map_err(invalid)?;
            let to_chain_id = self.destination_of(&event.message)?;
            Ok(Some(BountyEvent::Placed(BountyPlaced {
                message_identifier: event.message_identifier.into(),
                from_chain_id: chain_id,
                to_chain_id,
                incentives_address: event.incentives_address,
                max_gas_delivery: event.max_gas_delivery,
                max_gas_ack: event.max_gas_ack,
                refund_gas_to: event.refund_gas_to,
                price_of_delivery_gas: event.price_of_delivery_gas.into(),
                price_of_ack_gas: event.price_of_ack_gas.into(),
                target_delta: event.target_delta,
                payload: event.message.to_vec(),
                meta,
            })))
        } else if topic0 == BountyIncreasedEvent::signature() {
            let event =
                BountyIncreasedEvent::decode_log(&raw).map_err(invalid)?;
            Ok(Some(BountyEvent::Increased(BountyIncreased {
                message_identifier: event.message_identifier.into(),
                new_delivery_gas_price: event.new_delivery_gas_price.into(),
                new_ack_gas_price: event.new_ack_gas_price.into(),
                meta,
            })))
        } else if topic0 == MessageDeliveredEvent::signature() {
            let event =
                MessageDeliveredEvent::decode_log(&raw).map_err(invalid)?;
            Ok(Some(BountyEvent::Delivered(MessageDelivered {
                message_identifier: event.message_identifier.into(),
                to_chain_id: event.to_chain_id,
                meta,
            })))
        } else if topic0 == BountyClaimedEvent::signature() {
            let event =
                BountyClaimedEvent::decode_log(&raw).map_err(invalid)?;
            Ok(Some(BountyEvent::Claimed(BountyClaimed {
                message_identifier: event.message_identifier.into(),
                meta,
            })))
        } else {
            Ok(None)
        }
    }

    fn encode_delivery(
        &self,
        message_identifier: MessageIdentifier,
        payload: &[u8],
    ) -> Bytes {
        let selector = ethers::utils::id("deliverMessage(bytes32,bytes)");
        let encoded = ethers::abi::encode(&[
            Token::FixedBytes(message_identifier.to_bytes().to_vec()),
            Token::Bytes(payload.to_vec()),
        ]);
        let mut calldata = selector.to_vec();
        calldata.extend_from_slice(&encoded);
        calldata.into()
    }

    fn encode_ack(&self, message_identifier: MessageIdentifier) -> Bytes {
        let selector = ethers::utils::id("ackMessage(bytes32)");
        let encoded = ethers::abi::encode(&[Token::FixedBytes(
            message_identifier.to_bytes().to_vec(),
        )]);
        let mut calldata = selector.to_vec();
        calldata.extend_from_slice(&encoded);
        calldata.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AmbAdapter;
    use ethers::types::U256;

    fn adapter() -> EscrowIncentivesAdapter {
        EscrowIncentivesAdapter::new(HashMap::from_iter([
            (1, Address::repeat_byte(0xaa)),
            (2, Address::repeat_byte(0xbb)),
        ]))
    }

    fn mid() -> MessageIdentifier {
        MessageIdentifier([0x42; 32])
    }

    fn message_to(chain_id: u32) -> Vec<u8> {
        let mut message = chain_id.to_be_bytes().to_vec();
        message.extend_from_slice(b"swap calldata");
        message
    }

    fn placed_log(message: Vec<u8>) -> Log {
        let data = ethers::abi::encode(&[
            Token::Address(Address::repeat_byte(0xaa)),
            Token::Uint(2_000_000u64.into()),
            Token::Uint(200_000u64.into()),
            Token::Address(Address::repeat_byte(0x11)),
            Token::Uint(50_000_000_000u128.into()),
            Token::Uint(5_000_000_000u128.into()),
            Token::Uint(3600u64.into()),
            Token::Bytes(message),
        ]);
        Log {
            address: Address::repeat_byte(0xaa),
            topics: vec![
                BountyPlacedEvent::signature(),
                H256::from(mid().to_bytes()),
            ],
            data: data.into(),
            block_hash: Some(H256::repeat_byte(7)),
            block_number: Some(100.into()),
            transaction_hash: Some(H256::repeat_byte(8)),
            log_index: Some(3.into()),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_a_placed_bounty() {
        let log = placed_log(message_to(2));
        let event = adapter().decode(1, &log).unwrap().unwrap();
        let BountyEvent::Placed(placed) = event else {
            panic!("expected a placed event");
        };
        assert_eq!(placed.message_identifier, mid());
        assert_eq!(placed.from_chain_id, 1);
        assert_eq!(placed.to_chain_id, 2);
        assert_eq!(placed.max_gas_delivery, 2_000_000);
        assert_eq!(
            placed.price_of_delivery_gas,
            U256::from(50_000_000_000u64)
        );
        assert_eq!(placed.meta.block_number, 100);
        assert_eq!(placed.meta.log_index, 3);
        assert_eq!(placed.payload, message_to(2));
    }

    #[test]
    fn rejects_an_unknown_destination() {
        let log = placed_log(message_to(999));
        let result = adapter().decode(1, &log);
        assert!(matches!(result, Err(Error::InvalidDestinationChain)));
    }

    #[test]
    fn rejects_a_truncated_message() {
        let log = placed_log(vec![0, 0]);
        assert!(adapter().decode(1, &log).is_err());
    }

    #[test]
    fn ignores_unknown_topics() {
        let mut log = placed_log(message_to(2));
        log.topics[0] = H256::repeat_byte(0xff);
        assert_eq!(adapter().decode(1, &log).unwrap(), None);
    }

    #[test]
    fn decodes_the_full_lifecycle() {
        let increased = Log {
            address: Address::repeat_byte(0xaa),
            topics: vec![
                BountyIncreasedEvent::signature(),
                H256::from(mid().to_bytes()),
            ],
            data: ethers::abi::encode(&[
                Token::Uint(70_000_000_000u128.into()),
                Token::Uint(0u128.into()),
            ])
            .into(),
            block_number: Some(101.into()),
            log_index: Some(0.into()),
            ..Default::default()
        };
        let delivered = Log {
            address: Address::repeat_byte(0xbb),
            topics: vec![
                MessageDeliveredEvent::signature(),
                H256::from(mid().to_bytes()),
            ],
            data: ethers::abi::encode(&[Token::Uint(2u32.into())]).into(),
            block_number: Some(50.into()),
            log_index: Some(1.into()),
            ..Default::default()
        };
        let claimed = Log {
            address: Address::repeat_byte(0xaa),
            topics: vec![
                BountyClaimedEvent::signature(),
                H256::from(mid().to_bytes()),
            ],
            data: Bytes::default(),
            block_number: Some(102.into()),
            log_index: Some(2.into()),
            ..Default::default()
        };

        let adapter = adapter();
        assert!(matches!(
            adapter.decode(1, &increased).unwrap(),
            Some(BountyEvent::Increased(_))
        ));
        assert!(matches!(
            adapter.decode(2, &delivered).unwrap(),
            Some(BountyEvent::Delivered(_))
        ));
        assert!(matches!(
            adapter.decode(1, &claimed).unwrap(),
            Some(BountyEvent::Claimed(_))
        ));
    }

    #[test]
    fn delivery_calldata_carries_the_selector_and_payload() {
        let adapter = adapter();
        let payload = message_to(2);
        let calldata = adapter.encode_delivery(mid(), &payload);
        assert_eq!(
            &calldata[..4],
            ethers::utils::id("deliverMessage(bytes32,bytes)").as_slice()
        );
        let decoded = ethers::abi::decode(
            &[
                ethers::abi::ParamType::FixedBytes(32),
                ethers::abi::ParamType::Bytes,
            ],
            &calldata[4..],
        )
        .unwrap();
        assert_eq!(decoded[0], Token::FixedBytes(mid().to_bytes().to_vec()));
        assert_eq!(decoded[1], Token::Bytes(payload));
    }

    #[test]
    fn ack_calldata_carries_the_selector() {
        let calldata = adapter().encode_ack(mid());
        assert_eq!(
            &calldata[..4],
            ethers::utils::id("ackMessage(bytes32)").as_slice()
        );
    }
}
