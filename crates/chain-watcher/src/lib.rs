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

//! # Chain Watcher Module 🕸️
//!
//! Per chain, the watcher is the front half of the relayer: a block-range
//! log getter that follows the chain head at a safe distance, and a
//! collector that decodes the raw logs into bounty events and merges them
//! into the store. Both are driven by the per-chain worker.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The AMB adapter contract: decoding and encoding for one escrow flavor.
pub mod adapter;
/// The collector: raw logs to relay state.
pub mod collector;
/// The escrow incentives adapter.
pub mod escrow;
/// The block-range log getter.
pub mod getter;

pub use adapter::AmbAdapter;
pub use collector::Collector;
pub use escrow::EscrowIncentivesAdapter;
pub use getter::{BlockRangeGetter, LogBatch};
