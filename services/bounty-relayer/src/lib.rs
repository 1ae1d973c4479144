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

//! # Bounty Relayer 🕸️
//!
//! The service crate: one isolated worker per configured chain, glued
//! together only through the persistent store, plus the status endpoint.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// HTTP/WebSocket status endpoint.
pub mod routes;
/// Worker orchestration.
pub mod service;
