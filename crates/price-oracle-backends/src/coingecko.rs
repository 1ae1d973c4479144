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

//! Price Backend implementation for `CoinGecko`

use std::{collections::HashMap, sync::Arc};

use futures::TryFutureExt;
use serde::de::DeserializeOwned;

use bounty_relayer_utils::Result;

/// Maps a native token symbol to its CoinGecko coin id.
///
/// Unmapped symbols are passed through as-is, which works for tokens whose
/// symbol happens to equal their coin id.
fn coingecko_coin_id(symbol: &str) -> &str {
    match symbol {
        "ETH" | "WETH" => "ethereum",
        "MATIC" | "WMATIC" => "matic-network",
        "BNB" | "WBNB" => "binancecoin",
        "AVAX" | "WAVAX" => "avalanche-2",
        "FTM" | "WFTM" => "fantom",
        "GLMR" => "moonbeam",
        "MOVR" => "moonriver",
        "ONE" => "harmony",
        "USDC" => "usd-coin",
        "DAI" => "dai",
        other => other,
    }
}

/// A backend for fetching prices from `CoinGecko`
#[derive(Clone, Debug, typed_builder::TypedBuilder)]
pub struct CoinGeckoBackend {
    #[builder(
        default = String::from("https://api.coingecko.com/api/v3"),
        setter(into)
    )]
    host: String,
    #[builder(default = Arc::new(reqwest::Client::new()))]
    client: Arc<reqwest::Client>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SimplePriceResponse {
    pub(crate) usd: Option<f64>,
}

impl CoinGeckoBackend {
    async fn get<R: DeserializeOwned>(&self, endpoint: &str) -> Result<R> {
        let url = format!("{}/{}", self.host, endpoint);
        self.client
            .get(&url)
            .send()
            .await?
            .json()
            .await
            .map_err(Into::into)
    }

    async fn price<Id: AsRef<str>, Curr: AsRef<str>>(
        &self,
        ids: &[Id],
        vs_currencies: &[Curr],
    ) -> Result<HashMap<String, SimplePriceResponse>> {
        let ids = ids.iter().map(AsRef::as_ref).collect::<Vec<_>>();
        let vs_currencies =
            vs_currencies.iter().map(AsRef::as_ref).collect::<Vec<_>>();
        let req = format!(
            "simple/price?ids={}&vs_currencies={}",
            ids.join("%2C"),
            vs_currencies.join("%2C")
        );
        self.get(&req).await
    }
}

#[async_trait::async_trait]
impl super::PriceBackend for CoinGeckoBackend {
    async fn get_prices_vs_currency(
        &self,
        tokens: &[&str],
        currency: super::FiatCurrency,
    ) -> Result<super::PricesMap> {
        // map token names to coingecko ids
        let mut id_to_token = HashMap::new();
        for token in tokens {
            id_to_token.insert(coingecko_coin_id(token), *token);
        }
        let ids = id_to_token.keys().collect::<Vec<_>>();

        let prices: crate::PricesMap = self
            .price(&ids, &[currency.to_string().to_lowercase()])
            .map_ok(|m| {
                m.into_iter()
                    .filter_map(|(k, v)| v.usd.map(|price| (k, price)))
                    .collect()
            })
            .await?;
        // remap the ids back to token names
        let prices = prices
            .into_iter()
            .filter_map(|(id, price)| {
                id_to_token
                    .get(id.as_str())
                    .map(|t| ((*t).to_string(), price))
            })
            .collect();
        Ok(prices)
    }
}
