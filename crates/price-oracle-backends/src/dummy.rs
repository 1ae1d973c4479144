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

/// A Dummy Price Oracle Backend
///
/// This backend is useful for testing purposes, it always returns the same price data
/// that is configured initially while creating the backend. The relayer also
/// uses it as the oracle of last resort, fed from the pinned `assets` prices
/// in the configuration.
#[derive(Debug, Clone)]
pub struct DummyPriceBackend {
    /// The price data that is returned by the backend
    prices: super::PricesMap,
}

impl DummyPriceBackend {
    /// Creates a new dummy price backend
    #[must_use]
    pub fn new(prices: super::PricesMap) -> Self {
        Self { prices }
    }
}

#[async_trait::async_trait]
impl super::PriceBackend for DummyPriceBackend {
    async fn get_prices_vs_currency(
        &self,
        tokens: &[&str],
        _currency: super::FiatCurrency,
    ) -> Result<super::PricesMap> {
        let result = self
            .prices
            .iter()
            .filter(|(token, _)| tokens.contains(&token.as_str()))
            .map(|(token, price)| (token.clone(), *price))
            .collect();
        Ok(result)
    }
}
