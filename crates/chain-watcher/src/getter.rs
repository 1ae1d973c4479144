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

use std::sync::Arc;
use std::time::Duration;

use bounty_relayer_config::evm::GetterConfig;
use bounty_relayer_store::CursorStore;
use bounty_relayer_utils::retry::CappedExponential;
use bounty_relayer_utils::{probe, Result};
use ethers::providers::{Middleware, ProviderError};
use ethers::types::{Filter, Log};
use tokio::sync::mpsc;

/// The logs of one fetched block window, in ascending
/// `(block_number, log_index)` order.
#[derive(Clone, Debug)]
pub struct LogBatch {
    /// First block of the window.
    pub from_block: u64,
    /// Last block of the window, inclusive.
    pub to_block: u64,
    /// The logs found in the window.
    pub logs: Vec<Log>,
}

/// What one getter step decided to do.
#[derive(Debug)]
pub enum GetterStep {
    /// The cursor caught up with the confirmed head; sleep one interval.
    Synced {
        /// The confirmed head we are waiting on.
        head: u64,
    },
    /// A window was fetched; emit it and advance the cursor.
    Fetched(LogBatch),
    /// The cursor passed the configured stopping block; wind the worker
    /// down cleanly.
    Stopped,
}

/// A block-range log fetcher with backpressure and reorg tolerance.
///
/// The getter never reads past `head - block_delay`, fetches at most
/// `max_blocks` per request, and checkpoints its cursor only after the
/// collector accepted the batch, so every log is seen at least once even
/// across restarts. Reorg reconciliation is the collector's job, keyed by
/// block hash.
pub struct BlockRangeGetter<M, S> {
    chain_id: u32,
    provider: Arc<M>,
    filter: Filter,
    config: GetterConfig,
    store: Arc<S>,
}

impl<M, S> BlockRangeGetter<M, S>
where
    M: Middleware<Error = ProviderError>,
    S: CursorStore,
{
    /// Creates a getter for one chain.
    pub fn new(
        chain_id: u32,
        provider: Arc<M>,
        filter: Filter,
        config: GetterConfig,
        store: Arc<S>,
    ) -> Self {
        Self {
            chain_id,
            provider,
            filter,
            config,
            store,
        }
    }

    /// The cursor the getter starts from: the persisted checkpoint, or the
    /// configured starting block when it rewinds past it.
    pub fn initial_cursor(&self) -> Result<u64> {
        let cursor = self.store.get_cursor(self.chain_id, 1)?;
        Ok(match self.config.starting_block {
            Some(start) => start.min(cursor).max(1),
            None => cursor,
        })
    }

    /// One step of the getter loop, given the current cursor.
    pub async fn step(&self, cursor: u64) -> Result<GetterStep> {
        if let Some(stop) = self.config.stopping_block {
            if cursor > stop {
                return Ok(GetterStep::Stopped);
            }
        }
        let head = self.provider.get_block_number().await?.as_u64();
        let confirmed_head = head.saturating_sub(self.config.block_delay);
        self.store
            .set_target_block_number(self.chain_id, confirmed_head)?;
        if confirmed_head < cursor {
            return Ok(GetterStep::Synced {
                head: confirmed_head,
            });
        }
        let mut upper = match self.config.max_blocks {
            Some(max_blocks) => {
                confirmed_head.min(cursor + max_blocks.max(1) - 1)
            }
            // unbounded window, only safe against archive nodes.
            None => confirmed_head,
        };
        if let Some(stop) = self.config.stopping_block {
            upper = upper.min(stop);
        }
        let filter = self
            .filter
            .clone()
            .from_block(cursor)
            .to_block(upper);
        let mut logs = self.provider.get_logs(&filter).await?;
        logs.sort_by_key(|log| {
            (
                log.block_number.unwrap_or_default().as_u64(),
                log.log_index.unwrap_or_default().as_u64(),
            )
        });
        Ok(GetterStep::Fetched(LogBatch {
            from_block: cursor,
            to_block: upper,
            logs,
        }))
    }

    /// Runs the getter until the collector goes away or the stopping block
    /// is reached. Cancellation happens at the worker level.
    #[tracing::instrument(skip_all, fields(chain_id = self.chain_id))]
    pub async fn run(self, batches: mpsc::Sender<LogBatch>) -> Result<()> {
        let mut cursor = self.initial_cursor()?;
        let mut backoff = CappedExponential::new(
            Duration::from_millis(self.config.retry_interval),
            5,
        );
        tracing::debug!(cursor, "log getter started");
        loop {
            match self.step(cursor).await {
                Ok(GetterStep::Stopped) => {
                    tracing::info!(
                        chain_id = self.chain_id,
                        "stopping block reached, getter done",
                    );
                    return Ok(());
                }
                Ok(GetterStep::Synced { head }) => {
                    backoff.reset();
                    tracing::trace!(head, cursor, "synced with the head");
                    tokio::time::sleep(Duration::from_millis(
                        self.config.interval,
                    ))
                    .await;
                }
                Ok(GetterStep::Fetched(batch)) => {
                    backoff.reset();
                    let to_block = batch.to_block;
                    let fully_synced = batch.logs.is_empty()
                        && to_block
                            >= self
                                .store
                                .get_target_block_number(self.chain_id, 0)?;
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::TRACE,
                        kind = %probe::Kind::Sync,
                        chain_id = self.chain_id,
                        from = batch.from_block,
                        to = to_block,
                        logs = batch.logs.len(),
                    );
                    if batches.send(batch).await.is_err() {
                        // the collector is gone, we are shutting down.
                        return Ok(());
                    }
                    cursor = to_block + 1;
                    // checkpoint after the batch was handed downstream:
                    // at-least-once across restarts.
                    self.store.set_cursor(self.chain_id, cursor)?;
                    if fully_synced {
                        tokio::time::sleep(Duration::from_millis(
                            self.config.interval,
                        ))
                        .await;
                    }
                }
                Err(e) => {
                    let wait = backoff.next_wait();
                    tracing::warn!(
                        chain_id = self.chain_id,
                        error = %e,
                        "getter RPC error, retrying in {:?}",
                        wait,
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bounty_relayer_store::InMemoryStore;
    use ethers::providers::{MockProvider, Provider};
    use ethers::types::{H256, U64};

    fn getter(
        config: GetterConfig,
        store: Arc<InMemoryStore>,
    ) -> (BlockRangeGetter<Provider<MockProvider>, InMemoryStore>, MockProvider)
    {
        let (provider, mock) = Provider::mocked();
        let getter = BlockRangeGetter::new(
            7,
            Arc::new(provider),
            Filter::new(),
            config,
            store,
        );
        (getter, mock)
    }

    fn log_at(block: u64, index: u64) -> Log {
        Log {
            block_number: Some(block.into()),
            log_index: Some(index.into()),
            block_hash: Some(H256::repeat_byte(block as u8)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fetches_a_bounded_window() {
        let store = Arc::new(InMemoryStore::default());
        let config = GetterConfig {
            max_blocks: Some(10),
            ..Default::default()
        };
        let (getter, mock) = getter(config, store.clone());
        // responses are a LIFO stack: push logs first, head second.
        mock.push::<Vec<Log>, _>(vec![log_at(6, 1), log_at(5, 0)]).unwrap();
        mock.push(U64::from(100)).unwrap();

        let step = getter.step(5).await.unwrap();
        let GetterStep::Fetched(batch) = step else {
            panic!("expected a fetched window");
        };
        assert_eq!(batch.from_block, 5);
        assert_eq!(batch.to_block, 14);
        // logs come back sorted by (block, index).
        assert_eq!(batch.logs[0].block_number, Some(5.into()));
        assert_eq!(batch.logs[1].block_number, Some(6.into()));
        // the head is persisted for sync tracking.
        assert_eq!(store.get_target_block_number(7, 0).unwrap(), 100);
    }

    #[tokio::test]
    async fn max_blocks_of_one_still_makes_progress() {
        let store = Arc::new(InMemoryStore::default());
        let config = GetterConfig {
            max_blocks: Some(1),
            ..Default::default()
        };
        let (getter, mock) = getter(config, store);
        mock.push::<Vec<Log>, _>(vec![]).unwrap();
        mock.push(U64::from(100)).unwrap();

        let step = getter.step(5).await.unwrap();
        let GetterStep::Fetched(batch) = step else {
            panic!("expected a fetched window");
        };
        assert_eq!(batch.from_block, 5);
        assert_eq!(batch.to_block, 5);
    }

    #[tokio::test]
    async fn stalls_when_the_delay_swallows_the_head() {
        let store = Arc::new(InMemoryStore::default());
        let config = GetterConfig {
            block_delay: 1000,
            ..Default::default()
        };
        let (getter, mock) = getter(config, store);
        mock.push(U64::from(10)).unwrap();

        let step = getter.step(5).await.unwrap();
        assert!(matches!(step, GetterStep::Synced { head: 0 }));
    }

    #[tokio::test]
    async fn stops_past_the_stopping_block() {
        let store = Arc::new(InMemoryStore::default());
        let config = GetterConfig {
            stopping_block: Some(4),
            ..Default::default()
        };
        let (getter, _mock) = getter(config, store);
        let step = getter.step(5).await.unwrap();
        assert!(matches!(step, GetterStep::Stopped));
    }

    #[tokio::test]
    async fn starting_block_rewinds_the_cursor() {
        let store = Arc::new(InMemoryStore::default());
        store.set_cursor(7, 500).unwrap();
        let config = GetterConfig {
            starting_block: Some(100),
            ..Default::default()
        };
        let (getter, _mock) = getter(config, store);
        assert_eq!(getter.initial_cursor().unwrap(), 100);
    }
}
