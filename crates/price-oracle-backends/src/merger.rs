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

use bounty_relayer_utils::Result;

/// A Price Oracle Merger backend is a backend that builds on top of other backends and merges the
/// price data from the underlying backends. The merger backend is useful when you want to use
/// multiple backends to fetch the price data and merge the results.
///
/// ## Semantics
///
/// The merger backend will fetch the price data from the underlying backends and merge the results,
/// the following rules are applied:
/// - If the price data is available in all backends, the price data from the **last** merged backend is used.
/// - If the price is not available in any of the backends, the price data is not included in the result.
/// - A failing backend is skipped; the merger only errors when every
///   backend failed and nothing could be priced at all.
#[allow(clippy::module_name_repetitions)]
pub struct PriceOracleMerger {
    /// The underlying backends
    backends: Vec<Box<dyn super::PriceBackend>>,
}

impl PriceOracleMerger {
    /// Creates a new `PriceOracleMergerBuilder`
    #[must_use]
    pub fn builder() -> PriceOracleMergerBuilder {
        PriceOracleMergerBuilder {
            backends: Vec::default(),
        }
    }
}

/// A builder for the `PriceOracleMerger`
pub struct PriceOracleMergerBuilder {
    backends: Vec<Box<dyn super::PriceBackend>>,
}

impl PriceOracleMergerBuilder {
    /// Merges the price data from the underlying backends
    #[must_use]
    pub fn merge(mut self, backend: Box<dyn super::PriceBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Builds the `PriceOracleMerger`
    #[must_use]
    pub fn build(self) -> PriceOracleMerger {
        PriceOracleMerger {
            backends: self.backends,
        }
    }
}

#[async_trait::async_trait]
impl super::PriceBackend for PriceOracleMerger {
    async fn get_prices_vs_currency(
        &self,
        tokens: &[&str],
        currency: super::FiatCurrency,
    ) -> Result<super::PricesMap> {
        let mut prices = super::PricesMap::new();
        let mut last_error = None;
        for backend in &self.backends {
            match backend.get_prices_vs_currency(tokens, currency).await {
                Ok(backend_prices) => prices.extend(backend_prices),
                Err(e) => {
                    tracing::warn!("price backend failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if prices.is_empty() => Err(e),
            _ => Ok(prices),
        }
    }
}
