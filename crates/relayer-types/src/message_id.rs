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

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The 32-byte unique handle the escrow contract assigns to a cross-chain
/// message. Every piece of relayer state is keyed by it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageIdentifier(pub [u8; 32]);

impl MessageIdentifier {
    /// Returns the raw bytes of the identifier.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Returns the identifier as a `0x`-prefixed hex string.
    pub fn to_hex(self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for MessageIdentifier {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<ethers::types::H256> for MessageIdentifier {
    fn from(h: ethers::types::H256) -> Self {
        Self(h.to_fixed_bytes())
    }
}

impl fmt::Display for MessageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for MessageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageIdentifier({})", self.to_hex())
    }
}

/// The string was not a 32-byte hex value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMessageIdentifierError;

impl fmt::Display for ParseMessageIdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected a 32-byte hex string")
    }
}

impl std::error::Error for ParseMessageIdentifierError {}

impl FromStr for MessageIdentifier {
    type Err = ParseMessageIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(s).map_err(|_| ParseMessageIdentifierError)?;
        let bytes: [u8; 32] =
            raw.try_into().map_err(|_| ParseMessageIdentifierError)?;
        Ok(Self(bytes))
    }
}

impl Serialize for MessageIdentifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MessageIdentifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let mid = MessageIdentifier([0xab; 32]);
        let parsed: MessageIdentifier = mid.to_hex().parse().unwrap();
        assert_eq!(parsed, mid);
    }

    #[test]
    fn round_trips_through_serde() {
        let mid = MessageIdentifier([7; 32]);
        let json = serde_json::to_string(&mid).unwrap();
        let back: MessageIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mid);
    }

    #[test]
    fn rejects_short_strings() {
        assert!("0xdeadbeef".parse::<MessageIdentifier>().is_err());
    }
}
