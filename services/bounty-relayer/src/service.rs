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

//! Spawns and drives the per-chain workers.
//!
//! A worker owns its getter, collector, evaluator, submitter and wallet,
//! and shares nothing with the other workers but the store. The pipeline
//! tick is the authoritative loop; store notifications are only a hint.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, RwLock};

use bounty_chain_watcher::{
    AmbAdapter, BlockRangeGetter, Collector, EscrowIncentivesAdapter,
};
use bounty_relayer_config::evm::EvmChainConfig;
use bounty_relayer_context::RelayerContext;
use bounty_relayer_store::{
    CursorStore, OrderQueueStore, RelayState, RelayStateStore, SubmitOrder,
};
use bounty_relayer_utils::{probe, Result};
use bounty_tx_pipeline::{
    Evaluation, Evaluator, GasPolicy, Submitter, Wallet,
};
use ethers::providers::Middleware;

/// The persistent store shared by all workers.
pub type Store = bounty_relayer_store::SledStore;

/// Re-derive dropped orders from the store every this many ticks.
const RECONCILE_EVERY: u64 = 100;

/// Emit a monitor status event every this many ticks.
const MONITOR_EVERY: u64 = 50;

/// Bound on the orders pulled from the queue per tick.
const ORDERS_PER_TICK: usize = 64;

/// Consecutive failing ticks before a worker gives up as fatal.
const FATAL_TICK_ERRORS: u32 = 50;

/// The periodic head observation pushed to status subscribers.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEvent {
    /// The observing chain.
    pub chain_id: u32,
    /// Confirmed head of that chain.
    pub block_number: u64,
    /// Hash of that block.
    pub block_hash: String,
    /// Unix seconds of the observation.
    pub timestamp: u64,
}

/// Which chain workers are alive.
#[derive(Clone, Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatuses {
    /// Chains with a running worker.
    pub active_workers: BTreeSet<u32>,
    /// Configured chains whose worker is not running.
    pub inactive_workers: BTreeSet<u32>,
}

/// Shared handle between the orchestrator and the status endpoint.
#[derive(Clone)]
pub struct ServiceHandle {
    /// Worker liveness, as the status endpoint reports it.
    pub statuses: Arc<RwLock<WorkerStatuses>>,
    /// Fan-out of monitor events to websocket subscribers.
    pub monitor: broadcast::Sender<MonitorEvent>,
    fatal: mpsc::Sender<u32>,
}

impl ServiceHandle {
    /// Creates the handle plus the receiving end of fatal worker exits.
    pub fn new() -> (Self, mpsc::Receiver<u32>) {
        let (monitor, _) = broadcast::channel(64);
        let (fatal, fatal_rx) = mpsc::channel(16);
        (
            Self {
                statuses: Arc::new(RwLock::new(WorkerStatuses::default())),
                monitor,
                fatal,
            },
            fatal_rx,
        )
    }

    async fn mark_active(&self, chain_id: u32) {
        let mut statuses = self.statuses.write().await;
        statuses.inactive_workers.remove(&chain_id);
        statuses.active_workers.insert(chain_id);
    }

    async fn mark_inactive(&self, chain_id: u32) {
        let mut statuses = self.statuses.write().await;
        statuses.active_workers.remove(&chain_id);
        statuses.inactive_workers.insert(chain_id);
    }
}

/// Fires up all background services for all chains configured in the
/// config file.
///
/// Returns once all workers are started; the workers themselves run on
/// background tasks until shutdown.
pub async fn ignite(
    ctx: &RelayerContext,
    store: Arc<Store>,
    handle: ServiceHandle,
) -> Result<()> {
    let incentives = ctx
        .config
        .evm
        .values()
        .map(|chain| (chain.chain_id, chain.incentives_address))
        .collect::<HashMap<_, _>>();
    let native_tokens = ctx
        .config
        .evm
        .values()
        .map(|chain| (chain.chain_id, chain.native_token.clone()))
        .collect::<HashMap<_, _>>();
    let adapter = Arc::new(EscrowIncentivesAdapter::new(incentives));

    for chain_config in ctx.config.evm.values() {
        if !chain_config.enabled {
            continue;
        }
        tracing::debug!(
            "Starting Background Services for ({}) chain.",
            chain_config.name
        );
        handle.mark_inactive(chain_config.chain_id).await;
        start_chain_worker(
            ctx,
            chain_config.clone(),
            adapter.clone(),
            native_tokens.clone(),
            store.clone(),
            handle.clone(),
        )
        .await?;
    }
    Ok(())
}

async fn start_chain_worker(
    ctx: &RelayerContext,
    config: EvmChainConfig,
    adapter: Arc<EscrowIncentivesAdapter>,
    native_tokens: HashMap<u32, String>,
    store: Arc<Store>,
    handle: ServiceHandle,
) -> Result<()> {
    let chain_id = config.chain_id;
    let provider = Arc::new(ctx.evm_provider(chain_id).await?);
    let signer = ctx.evm_wallet(chain_id).await?;
    let policy = GasPolicy::new(config.submitter);
    let wallet = Wallet::new(
        chain_id,
        provider.clone(),
        signer,
        config.wallet,
        policy,
    )
    .await?;
    let evaluator = Evaluator::new(
        chain_id,
        provider.clone(),
        adapter.clone(),
        ctx.price_oracle(),
        config.evaluator,
        native_tokens,
    );
    let submitter = Submitter::new(
        chain_id,
        provider.clone(),
        store.clone(),
        wallet,
        policy,
        config.explorer.clone(),
    );
    let getter = BlockRangeGetter::new(
        chain_id,
        provider.clone(),
        adapter.filter(chain_id),
        config.getter,
        store.clone(),
    );
    let collector = Collector::new(chain_id, adapter.clone(), store.clone());
    let (batch_tx, batch_rx) = mpsc::channel(64);

    let mut shutdown = ctx.shutdown_signal();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::trace!(chain_id, "getter stopped by shutdown");
            }
            result = getter.run(batch_tx) => {
                if let Err(e) = result {
                    tracing::error!(chain_id, error = %e, "getter exited");
                }
            }
        }
    });

    let mut shutdown = ctx.shutdown_signal();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::trace!(chain_id, "collector stopped by shutdown");
            }
            result = collector.run(batch_rx) => {
                if let Err(e) = result {
                    tracing::error!(chain_id, error = %e, "collector exited");
                }
            }
        }
    });

    let mut shutdown = ctx.shutdown_signal();
    handle.mark_active(chain_id).await;
    tokio::spawn(async move {
        let mut worker = ChainWorker {
            chain_id,
            config,
            provider,
            store,
            evaluator,
            submitter,
            handle: handle.clone(),
            ticks: 0,
            consecutive_errors: 0,
        };
        tokio::select! {
            _ = shutdown.recv() => {
                // graceful: give in-flight orders one confirmation window.
                worker.drain().await;
            }
            result = worker.run() => {
                if let Err(e) = result {
                    tracing::error!(chain_id, error = %e, "worker exited fatally");
                    let _ = handle.fatal.send(chain_id).await;
                }
            }
        }
        handle.mark_inactive(chain_id).await;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            chain_id,
            worker_stopped = true,
        );
    });
    Ok(())
}

struct ChainWorker<M: Middleware> {
    chain_id: u32,
    config: EvmChainConfig,
    provider: Arc<M>,
    store: Arc<Store>,
    evaluator: Evaluator<M, EscrowIncentivesAdapter>,
    submitter: Submitter<M, Store>,
    handle: ServiceHandle,
    ticks: u64,
    consecutive_errors: u32,
}

impl<M> ChainWorker<M>
where
    M: Middleware<Error = ethers::providers::ProviderError>,
{
    /// The authoritative per-chain loop: feed, confirm, reconcile, report.
    async fn run(&mut self) -> Result<()> {
        let mut interval = tokio::time::interval(Duration::from_millis(
            self.config.submitter.processing_interval.max(1),
        ));
        loop {
            interval.tick().await;
            self.ticks += 1;
            match self.tick().await {
                Ok(()) => self.consecutive_errors = 0,
                Err(e) => {
                    self.consecutive_errors += 1;
                    tracing::warn!(
                        chain_id = self.chain_id,
                        error = %e,
                        streak = self.consecutive_errors,
                        "worker tick failed",
                    );
                    // a persistently failing store or RPC is fatal for
                    // this chain; the others keep running.
                    if self.consecutive_errors >= FATAL_TICK_ERRORS {
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn tick(&mut self) -> Result<()> {
        // 1. pull pending orders, bounded by the free pipeline capacity.
        let capacity =
            self.submitter.free_capacity().min(ORDERS_PER_TICK);
        if capacity > 0 {
            let orders = self.store.pop_orders(self.chain_id, capacity)?;
            for order in orders {
                self.handle_order(order).await?;
            }
        }
        // 2. confirmation tracking.
        self.submitter.poll().await?;
        // 3. balance watchdog.
        let balance_every =
            self.config.wallet.balance_update_interval.max(1);
        if self.ticks % balance_every == 0 {
            self.submitter.wallet_mut().refresh_balance().await?;
        }
        // 4. the store is the source of truth: re-derive anything the
        //    queues lost along the way.
        if self.ticks % RECONCILE_EVERY == 0 {
            self.reconcile()?;
        }
        // 5. status monitor.
        if self.ticks % MONITOR_EVERY == 0 {
            self.emit_monitor().await;
        }
        Ok(())
    }

    async fn handle_order(&mut self, order: SubmitOrder) -> Result<()> {
        if self
            .submitter
            .is_in_flight(order.message_identifier, order.kind)
        {
            return Ok(());
        }
        let Some(versioned) =
            self.store.get_relay_state(order.message_identifier)?
        else {
            // an order without state is stale noise.
            return Ok(());
        };
        match self.evaluator.evaluate(&order, &versioned.value).await? {
            Evaluation::Submit(prepared) => {
                self.submitter.submit(prepared).await?;
            }
            Evaluation::Defer { reason } => {
                tracing::trace!(
                    mid = %order.message_identifier,
                    %reason,
                    "order deferred",
                );
                self.store.push_order(&order)?;
            }
            Evaluation::Abandon { reason } => {
                tracing::info!(
                    mid = %order.message_identifier,
                    kind = %order.kind,
                    %reason,
                    "order abandoned until the bounty rises",
                );
                self.store.mark_abandoned(
                    order.message_identifier,
                    order.kind,
                    &reason,
                )?;
            }
            Evaluation::Obsolete => {}
        }
        Ok(())
    }

    /// Walk the store and queue whatever this chain still owes: deliveries
    /// for messages headed here, acks for messages that left from here.
    fn reconcile(&self) -> Result<()> {
        for state in self.store.relay_states()? {
            let Some(placed) = &state.placed else { continue };
            if state.needs_delivery()
                && placed.to_chain_id == self.chain_id
                && !self.submitter.is_in_flight(
                    state.message_identifier,
                    bounty_relayer_store::OrderKind::Delivery,
                )
            {
                self.push_reconciled(&state, placed.to_chain_id, true)?;
            }
            if state.needs_ack()
                && placed.from_chain_id == self.chain_id
                && !self.submitter.is_in_flight(
                    state.message_identifier,
                    bounty_relayer_store::OrderKind::Ack,
                )
            {
                self.push_reconciled(&state, placed.from_chain_id, false)?;
            }
        }
        Ok(())
    }

    fn push_reconciled(
        &self,
        state: &RelayState,
        target_chain_id: u32,
        delivery: bool,
    ) -> Result<()> {
        let meta = if delivery {
            state.placed.as_ref().map(|p| p.meta)
        } else {
            state.delivered.as_ref().map(|d| d.meta)
        }
        .unwrap_or_else(|| state.placed.as_ref().expect("checked").meta);
        let order = SubmitOrder {
            message_identifier: state.message_identifier,
            kind: if delivery {
                bounty_relayer_store::OrderKind::Delivery
            } else {
                bounty_relayer_store::OrderKind::Ack
            },
            target_chain_id,
            block_number: meta.block_number,
            log_index: meta.log_index,
            observed_at_ms: 0,
        };
        if self.store.push_order(&order)? {
            tracing::debug!(
                mid = %state.message_identifier,
                kind = %order.kind,
                "order re-derived from the store",
            );
        }
        Ok(())
    }

    async fn emit_monitor(&self) {
        let block = match self
            .provider
            .get_block(ethers::types::BlockNumber::Latest)
            .await
        {
            Ok(Some(block)) => block,
            _ => return,
        };
        let event = MonitorEvent {
            chain_id: self.chain_id,
            block_number: block.number.unwrap_or_default().as_u64(),
            block_hash: format!("{:#x}", block.hash.unwrap_or_default()),
            timestamp: block.timestamp.as_u64(),
        };
        // nobody listening is fine.
        let _ = self.handle.monitor.send(event);
        let _ = self
            .store
            .set_target_block_number(self.chain_id, block.number.unwrap_or_default().as_u64());
    }

    /// Post-shutdown drain: keep polling confirmations until the pending
    /// set empties or the confirmation timeout passes.
    async fn drain(&mut self) {
        let deadline = Instant::now()
            + Duration::from_millis(self.config.wallet.confirmation_timeout);
        while self.submitter.wallet_mut().pending_count() > 0
            && Instant::now() < deadline
        {
            if let Err(e) = self.submitter.poll().await {
                tracing::warn!(
                    chain_id = self.chain_id,
                    error = %e,
                    "error while draining in-flight orders",
                );
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tracing::info!(
            chain_id = self.chain_id,
            remaining = self.submitter.wallet_mut().pending_count(),
            "worker drained",
        );
    }
}
