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

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bounty_relayer_store::TokenPriceCacheStore;
use bounty_relayer_utils::Result;
use chrono::{DateTime, NaiveDateTime, Utc};

/// A price backend that caches the price data in a local database
///
/// The cache is used to reduce the number of requests to the source and to improve the performance.
///
/// **Note:** depending on the configuration, this backend may be used to return the last saved price
/// data even if the source is unavailable, which may lead to incorrect price data.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct CachedPriceBackend<B, S> {
    /// The price backend
    backend: B,
    /// The local data store used for caching
    store: S,
    /// The cache expiration time.
    ///
    /// If the cache is older than this value, it will be refreshed
    /// from the source backend.
    ///
    /// If the value is `None`, the cache will never expire
    /// and will never be refreshed. **This may lead to incorrect price data.**
    ///
    /// Use this option only if you are sure that the source backend is always available.
    /// Otherwise, use a reasonable value, The default value is `15 minutes`.
    /// see [`Self::use_cache_if_source_unavailable`] and [`Self::even_if_expired`]
    /// for fine tuning the cache behavior.
    #[builder(default = Some(Duration::from_secs(15 * 60)))]
    cache_expiration: Option<Duration>,
    /// Specifies whether the cache should be returned even if the source is unavailable
    ///
    /// If the value is `true`, the cache will be returned even if the source
    /// backend is unavailable unless the cache is expired.
    ///
    /// see [`Self::even_if_expired`] if you want to return the cache even if it is expired.
    #[builder(setter(strip_bool))]
    use_cache_if_source_unavailable: bool,
    /// Specifies whether the cache should be returned even if it is expired
    /// in case the source is unavailable.
    ///
    /// see [`Self::use_cache_if_source_unavailable`] if you want to return the cache
    /// even if the source is unavailable.
    #[builder(setter(strip_bool))]
    even_if_expired: bool,
    /// How many consecutive source failures are bridged with stale data.
    /// Once the streak reaches this count the backend stops serving the
    /// cache and surfaces the error, so callers can tell that pricing is
    /// actually down. `None` disables the cut-off.
    #[builder(default = Some(3))]
    max_consecutive_failures: Option<u32>,
    /// The current source failure streak.
    #[builder(default = Arc::new(AtomicU32::new(0)))]
    failure_streak: Arc<AtomicU32>,
}

/// A cached price data
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct CachedPrice {
    /// The Cached Price of the token
    pub price: f64,
    /// The timestamp of the cached price
    pub timestamp: i64,
}

impl<B, S> CachedPriceBackend<B, S>
where
    B: super::PriceBackend,
    S: TokenPriceCacheStore<CachedPrice>,
{
    /// Returns the cache expiration duration
    pub const fn cache_expiration(&self) -> Option<Duration> {
        self.cache_expiration
    }

    /// Returns `true` if the cache should be returned even if the source is unavailable
    pub const fn use_cache_if_source_unavailable_enabled(&self) -> bool {
        self.use_cache_if_source_unavailable
    }

    /// Returns the inner price backend
    pub const fn inner(&self) -> &B {
        &self.backend
    }

    /// Returns the inner data store
    /// The data store is used for caching the price data
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The current number of back-to-back source failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.failure_streak.load(Ordering::Relaxed)
    }

    fn source_failures_exhausted(&self) -> bool {
        match self.max_consecutive_failures {
            Some(max) => self.failure_streak.load(Ordering::Relaxed) >= max,
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl<B, S> super::PriceBackend for CachedPriceBackend<B, S>
where
    B: super::PriceBackend + Clone + 'static,
    S: TokenPriceCacheStore<CachedPrice> + Clone + Send + Sync + 'static,
{
    async fn get_prices_vs_currency(
        &self,
        tokens: &[&str],
        vs_currency: super::FiatCurrency,
    ) -> Result<super::PricesMap> {
        // The returned prices map
        let mut prices = super::PricesMap::new();
        // The tokens that need to be fetched from the source
        let mut tokens_to_fetch = HashSet::new();

        for token in tokens {
            let token_key = format!("{token}/{vs_currency}");
            // Check if the token is cached
            if let Some(cached) = self.store.get_price(&token_key)? {
                let expired =
                    self.cache_expiration.map_or(false, |expiration| {
                        let ts = NaiveDateTime::from_timestamp_opt(
                            cached.timestamp + expiration.as_secs() as i64,
                            Default::default(),
                        )
                        .expect("Time went backwards");
                        DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc)
                            < Utc::now()
                    });
                // If the cache is expired, add the token to the list of tokens to fetch
                if expired {
                    tokens_to_fetch.insert(token.to_owned());
                } else {
                    prices.insert((*token).to_owned(), cached.price);
                }
            } else {
                // If the token is not cached, add it to the list of tokens to fetch
                tokens_to_fetch.insert(token.to_owned());
            }
        }
        if !tokens_to_fetch.is_empty() {
            // Fetch the prices from the source
            let token_ids = tokens_to_fetch.iter().copied().collect::<Vec<_>>();
            let result = self
                .backend
                .get_prices_vs_currency(&token_ids, vs_currency)
                .await;
            let source_unavailable = result.is_err();
            let updated_prices = match result {
                Ok(updated_prices) => {
                    self.failure_streak.store(0, Ordering::Relaxed);
                    updated_prices
                }
                Err(err) => {
                    self.failure_streak.fetch_add(1, Ordering::Relaxed);
                    // Too many failures in a row: stop papering over the
                    // outage with stale prices and let the caller see it.
                    if self.source_failures_exhausted() {
                        return Err(err);
                    }
                    // If the source is unavailable and the cache is enabled, return the cache
                    if self.use_cache_if_source_unavailable {
                        super::PricesMap::new()
                    } else {
                        return Err(err);
                    }
                }
            };

            // If the source is unavailable and the cache is enabled and `even_if_expired` is enabled,
            // return the cache
            if source_unavailable
                && self.use_cache_if_source_unavailable
                && self.even_if_expired
            {
                // refetch the cache, and ignore the expiration
                for token in tokens {
                    let token_key = format!("{token}/{vs_currency}");
                    if let Some(cached) = self.store.get_price(&token_key)? {
                        prices.insert((*token).to_owned(), cached.price);
                    }
                }
            }

            // Update the cache, only if the source is available
            let source_available = !source_unavailable;
            if source_available {
                for (token, price) in updated_prices {
                    let token_key = format!("{token}/{vs_currency}");
                    prices.insert(token.clone(), price);
                    self.store.insert_price(
                        &token_key,
                        CachedPrice {
                            price,
                            timestamp: Utc::now().timestamp(),
                        },
                    )?;
                }
            }
        }
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use crate::PriceBackend;

    use super::*;

    #[derive(Clone)]
    struct FlakyBackend {
        inner: crate::DummyPriceBackend,
        fail: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl PriceBackend for FlakyBackend {
        async fn get_prices_vs_currency(
            &self,
            tokens: &[&str],
            vs_currency: crate::FiatCurrency,
        ) -> Result<crate::PricesMap> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(bounty_relayer_utils::Error::Generic(
                    "simulated outage",
                ));
            }
            self.inner.get_prices_vs_currency(tokens, vs_currency).await
        }
    }

    fn make_backend() -> FlakyBackend {
        let prices = crate::PricesMap::from_iter([
            (String::from("ETH"), 1000.0),
            (String::from("MATIC"), 1.0),
            (String::from("USDC"), 1.0),
        ]);
        FlakyBackend {
            inner: crate::DummyPriceBackend::new(prices),
            fail: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    fn make_store() -> bounty_relayer_store::InMemoryStore {
        bounty_relayer_store::InMemoryStore::default()
    }

    #[tokio::test]
    async fn it_works() {
        let backend = CachedPriceBackend::builder()
            .backend(make_backend())
            .store(make_store())
            .build();
        let prices = backend.get_prices(&["USDC"]).await.unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices.get("USDC"), Some(&1.0));
    }

    #[tokio::test]
    async fn serves_stale_prices_during_a_short_outage() {
        let backend = make_backend();
        let cached = CachedPriceBackend::builder()
            .backend(backend.clone())
            .store(make_store())
            .cache_expiration(Some(Duration::from_secs(0)))
            .use_cache_if_source_unavailable()
            .even_if_expired()
            .build();
        let prices = cached.get_prices(&["ETH"]).await.unwrap();
        assert_eq!(prices.get("ETH"), Some(&1000.0));

        backend.fail.store(true, Ordering::Relaxed);
        let prices = cached.get_prices(&["ETH"]).await.unwrap();
        assert_eq!(prices.get("ETH"), Some(&1000.0));
        assert_eq!(cached.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn surfaces_the_outage_after_the_failure_cap() {
        let backend = make_backend();
        let cached = CachedPriceBackend::builder()
            .backend(backend.clone())
            .store(make_store())
            .cache_expiration(Some(Duration::from_secs(0)))
            .use_cache_if_source_unavailable()
            .even_if_expired()
            .max_consecutive_failures(Some(3))
            .build();
        let prices = cached.get_prices(&["ETH"]).await.unwrap();
        assert_eq!(prices.get("ETH"), Some(&1000.0));

        backend.fail.store(true, Ordering::Relaxed);
        // the first two failures are bridged with the cache.
        assert!(cached.get_prices(&["ETH"]).await.is_ok());
        assert!(cached.get_prices(&["ETH"]).await.is_ok());
        // the third one crosses the cap and surfaces.
        assert!(cached.get_prices(&["ETH"]).await.is_err());

        // a successful fetch resets the streak.
        backend.fail.store(false, Ordering::Relaxed);
        assert!(cached.get_prices(&["ETH"]).await.is_ok());
        assert_eq!(cached.consecutive_failures(), 0);
    }
}
