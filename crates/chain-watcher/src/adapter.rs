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

use bounty_relayer_store::BountyEvent;
use bounty_relayer_types::MessageIdentifier;
use bounty_relayer_utils::Result;
use ethers::types::{Address, Bytes, Filter, Log, ValueOrArray, H256};

/// The plug-in contract an AMB flavor implements.
///
/// Adapters differ only in their escrow addresses, their topic set and
/// their ABI; everything downstream of the collector is adapter-agnostic.
pub trait AmbAdapter: Send + Sync + 'static {
    /// The incentives (escrow) contract on the given chain, if the adapter
    /// serves that chain.
    fn incentives_address(&self, chain_id: u32) -> Option<Address>;

    /// The event signatures (topic0) the adapter understands.
    fn topics(&self) -> Vec<H256>;

    /// Decode one raw log into a bounty event.
    ///
    /// Returns `Ok(None)` for topics the adapter does not know (the getter
    /// filter is broader than one event), and an error for logs that carry
    /// a known topic but an undecodable or invalid body. The collector
    /// logs and skips those, the event slot stays empty.
    fn decode(&self, chain_id: u32, log: &Log) -> Result<Option<BountyEvent>>;

    /// The calldata that executes the given message on its destination
    /// chain's incentives contract.
    fn encode_delivery(
        &self,
        message_identifier: MessageIdentifier,
        payload: &[u8],
    ) -> Bytes;

    /// The calldata that proves a delivery back on the origin chain and
    /// releases the bounty.
    fn encode_ack(&self, message_identifier: MessageIdentifier) -> Bytes;

    /// The log filter the getter polls with on the given chain.
    fn filter(&self, chain_id: u32) -> Filter {
        let topics =
            self.topics().into_iter().map(Some).collect::<Vec<_>>();
        let mut filter =
            Filter::new().topic0(ValueOrArray::Array(topics));
        if let Some(address) = self.incentives_address(chain_id) {
            filter = filter.address(address);
        }
        filter
    }
}
