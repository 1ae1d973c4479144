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

//! # Transaction Pipeline Module 🕸️
//!
//! The back half of a chain worker: the evaluator decides whether an order
//! pays for itself, the submitter attaches a gas policy and enforces the
//! pending cap, and the wallet owns the key, the nonces, replacements and
//! confirmation tracking.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Order profitability evaluation.
pub mod evaluator;
/// EIP-1559 fee computation and escalation.
pub mod gas;
/// Bounded submission on top of the wallet.
pub mod submitter;
/// Key ownership, nonce discipline and confirmations.
pub mod wallet;

pub use evaluator::{Evaluation, Evaluator, PreparedTx};
pub use gas::{FeeEstimate, GasPolicy};
pub use submitter::Submitter;
pub use wallet::{TxOutcome, Wallet};
