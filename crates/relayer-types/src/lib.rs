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

//! Core value types of the bounty relayer.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Message identifier assigned by the escrow contract.
pub mod message_id;
/// Private key configuration value.
pub mod private_key;
/// RPC URL configuration value.
pub mod rpc_url;

pub use message_id::MessageIdentifier;
pub use private_key::PrivateKey;
pub use rpc_url::RpcUrl;
