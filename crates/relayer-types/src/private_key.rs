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

use std::str::FromStr;

use ethers::types::H256;
use serde::Deserialize;

/// PrivateKey represents a private key.
#[derive(Clone)]
pub struct PrivateKey(H256);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl From<H256> for PrivateKey {
    fn from(secret: H256) -> Self {
        PrivateKey(secret)
    }
}

impl std::ops::Deref for PrivateKey {
    type Target = H256;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVisitor;
        impl serde::de::Visitor<'_> for PrivateKeyVisitor {
            type Value = H256;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "hex string or an env var containing a hex string in it",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if value.starts_with("0x") {
                    // hex value
                    H256::from_str(value).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{e}\n got {} chars but expected a 66 chars string (including the 0x prefix)",
                            value.len()
                        ))
                    })
                } else if value.starts_with('$') {
                    // env
                    let var = value.strip_prefix('$').unwrap_or(value);
                    tracing::trace!("Reading {} from env", var);
                    let val = std::env::var(var).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "error while loading this env {}: {}",
                            var, e,
                        ))
                    })?;
                    H256::from_str(&val).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{e}\n expected a 66 chars string (including the 0x prefix) but found {} chars",
                            val.len()
                        ))
                    })
                } else if value.starts_with("file:") {
                    // Read the secret from the file path
                    let file_path =
                        value.strip_prefix("file:").unwrap_or(value);
                    let val =
                        std::fs::read_to_string(file_path).map_err(|e| {
                            serde::de::Error::custom(format!(
                                "error while reading file path {} : {}",
                                file_path, e
                            ))
                        })?;
                    H256::from_str(val.trim()).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{e}\n expected a 66 chars string (including the 0x prefix)",
                        ))
                    })
                } else {
                    Err(serde::de::Error::custom(
                        "expected a hex string, $ENV_VAR or file: path",
                    ))
                }
            }
        }

        let secret = deserializer.deserialize_str(PrivateKeyVisitor)?;
        Ok(Self(secret))
    }
}
