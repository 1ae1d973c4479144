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

use serde::Deserialize;

/// A wrapper around a chain RPC endpoint URL.
///
/// Like the private key, the value may be given inline or indirectly
/// through an environment variable (`$MY_CHAIN_RPC`).
#[derive(Clone, Debug)]
pub struct RpcUrl(url::Url);

impl RpcUrl {
    /// Returns the URL as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for RpcUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for RpcUrl {
    type Target = url::Url;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<url::Url> for RpcUrl {
    fn from(url: url::Url) -> Self {
        Self(url)
    }
}

impl<'de> Deserialize<'de> for RpcUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let value = if let Some(var) = raw.strip_prefix('$') {
            std::env::var(var).map_err(|e| {
                serde::de::Error::custom(format!(
                    "error while loading this env {}: {}",
                    var, e,
                ))
            })?
        } else {
            raw
        };
        let url = value.parse().map_err(serde::de::Error::custom)?;
        Ok(Self(url))
    }
}
