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

//! The wallet is the single owner of the signing key and the nonce
//! sequence of its chain. Broadcasts may overlap, but nonce allocation and
//! the pending set are serialized behind `&mut self`, and confirmation
//! results are surfaced to the store strictly in nonce order.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bounty_relayer_config::evm::WalletConfig;
use bounty_relayer_store::SubmitOrder;
use bounty_relayer_utils::{probe, Error, Result};
use ethers::providers::{Middleware, ProviderError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, Eip1559TransactionRequest,
    TransactionReceipt, H256, U256,
};
use std::sync::Arc;

use crate::gas::{FeeEstimate, GasPolicy};

/// After this many confirmation timeouts at one nonce, the wallet stops
/// replacing the work transaction and cancels the nonce with a self-send.
const STALL_TIMEOUT_LIMIT: u32 = 3;

/// The lifecycle of one order inside the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderState {
    /// Accepted, nothing signed yet.
    New,
    /// Signed, not yet on the wire.
    Signed,
    /// On the wire, waiting for a receipt.
    Broadcast,
    /// Enough confirmations on top of the inclusion block.
    Confirmed,
    /// Rebroadcast at the same nonce with bumped fees.
    Replaced,
    /// Given up; the error was surfaced.
    Failed,
}

/// How the RPC rejected a broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendErrorKind {
    /// Our nonce was already consumed on chain.
    NonceTooLow,
    /// The exact transaction is already in the pool; as good as accepted.
    AlreadyKnown,
    /// The pool wants higher fees, for entry or for replacement.
    Underpriced,
    /// The account cannot fund the transaction.
    InsufficientFunds,
    /// Anything else; treated as transient.
    Other,
}

/// Maps an RPC error message onto the retry taxonomy. Error bodies differ
/// between node implementations, so this matches substrings.
pub fn classify_send_error(message: &str) -> SendErrorKind {
    let message = message.to_lowercase();
    if message.contains("nonce too low") {
        SendErrorKind::NonceTooLow
    } else if message.contains("already known")
        || message.contains("known transaction")
        || message.contains("alreadyknown")
    {
        SendErrorKind::AlreadyKnown
    } else if message.contains("underpriced") {
        SendErrorKind::Underpriced
    } else if message.contains("insufficient funds") {
        SendErrorKind::InsufficientFunds
    } else {
        SendErrorKind::Other
    }
}

/// One transaction the wallet is responsible for until its nonce resolves.
#[derive(Clone, Debug)]
pub struct PendingTx {
    /// The order the transaction executes.
    pub order: SubmitOrder,
    /// The request as last signed.
    pub tx: Eip1559TransactionRequest,
    /// The fee pair of the last attempt.
    pub fee: FeeEstimate,
    /// Where the order is in its lifecycle.
    pub state: OrderState,
    /// Every hash ever broadcast for this nonce, newest last. A receipt
    /// for any of them resolves the nonce.
    pub hashes: Vec<H256>,
    /// When the first attempt went out.
    pub first_submitted: Instant,
    /// When the latest attempt went out.
    pub last_submitted: Instant,
    /// Submission attempts at this nonce.
    pub attempt: u32,
    /// Confirmation timeouts observed at this nonce.
    pub timeouts: u32,
    /// Whether the latest replacement is a cancel self-send.
    pub cancelling: bool,
}

/// What the wallet tells the submitter about a resolved nonce.
#[derive(Clone, Debug)]
pub enum TxOutcome {
    /// The order's transaction confirmed.
    Confirmed {
        /// The order that was executed.
        order: SubmitOrder,
        /// The nonce it consumed.
        nonce: u64,
        /// The receipt, for gas accounting.
        receipt: TransactionReceipt,
    },
    /// The order stalled and its nonce was burned by a cancel self-send.
    Cancelled {
        /// The order that was given up on.
        order: SubmitOrder,
        /// The nonce the cancel consumed.
        nonce: u64,
    },
}

/// Single owner of the signing key and of nonces for its chain.
pub struct Wallet<M> {
    chain_id: u32,
    provider: Arc<M>,
    signer: LocalWallet,
    address: Address,
    config: WalletConfig,
    policy: GasPolicy,
    max_tries: u32,
    next_nonce: u64,
    pending: BTreeMap<u64, PendingTx>,
    /// Receipts of confirmed nonces that are still held back behind an
    /// unresolved earlier nonce.
    confirmed_receipts: BTreeMap<u64, TransactionReceipt>,
    balance: U256,
    low_balance_warned: bool,
}

impl<M> Wallet<M>
where
    M: Middleware<Error = ProviderError>,
{
    /// Creates the wallet and syncs nonce and balance from the chain.
    pub async fn new(
        chain_id: u32,
        provider: Arc<M>,
        signer: LocalWallet,
        config: WalletConfig,
        policy: GasPolicy,
    ) -> Result<Self> {
        let address = signer.address();
        let next_nonce = provider
            .get_transaction_count(
                address,
                Some(BlockNumber::Pending.into()),
            )
            .await?
            .as_u64();
        let balance = provider.get_balance(address, None).await?;
        let max_tries = policy.config().max_tries;
        Ok(Self {
            chain_id,
            provider,
            signer,
            address,
            config,
            policy,
            max_tries,
            next_nonce,
            pending: BTreeMap::new(),
            confirmed_receipts: BTreeMap::new(),
            balance,
            low_balance_warned: false,
        })
    }

    /// The wallet's account address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// How many nonces are still unresolved.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The nonce the next submission will get.
    pub fn next_nonce(&self) -> u64 {
        self.next_nonce
    }

    /// The balance as of the last refresh, in wei.
    pub fn balance(&self) -> U256 {
        self.balance
    }

    /// Whether the balance supports taking on another transaction.
    ///
    /// The minimum operational balance is derived from the pending cap and
    /// the worst-case cost of one transaction; below it, new submissions
    /// are refused until the account is topped up.
    pub fn can_accept(&self, gas_limit: U256, fee: &FeeEstimate) -> bool {
        let worst_case = fee.max_fee_per_gas.saturating_mul(gas_limit);
        let minimum = worst_case.saturating_mul(U256::from(
            self.policy.config().max_pending_transactions as u64,
        ));
        self.balance >= minimum
    }

    /// Refreshes the balance and drives the low-balance watchdog. The
    /// warning fires exactly once per downward crossing.
    pub async fn refresh_balance(&mut self) -> Result<U256> {
        self.balance = self.provider.get_balance(self.address, None).await?;
        if let Some(threshold) =
            self.config.low_balance_warning.map(U256::from)
        {
            let below = self.balance < threshold;
            if below && !self.low_balance_warned {
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::WARN,
                    kind = %probe::Kind::Balance,
                    chain_id = self.chain_id,
                    balance = %self.balance,
                    threshold = %threshold,
                );
                tracing::warn!(
                    chain_id = self.chain_id,
                    balance = %self.balance,
                    "wallet balance below the warning threshold",
                );
                self.low_balance_warned = true;
            } else if !below {
                self.low_balance_warned = false;
            }
        }
        Ok(self.balance)
    }

    fn build_tx(
        &self,
        to: Address,
        data: Option<Bytes>,
        value: U256,
        gas_limit: U256,
        fee: &FeeEstimate,
        nonce: u64,
    ) -> Eip1559TransactionRequest {
        let mut tx = Eip1559TransactionRequest::new()
            .from(self.address)
            .to(to)
            .value(value)
            .gas(gas_limit)
            .max_fee_per_gas(fee.max_fee_per_gas)
            .max_priority_fee_per_gas(fee.max_priority_fee_per_gas)
            .nonce(nonce)
            .chain_id(self.chain_id);
        if let Some(data) = data {
            tx = tx.data(data);
        }
        tx
    }

    async fn sign_and_send(
        &self,
        tx: &Eip1559TransactionRequest,
    ) -> Result<(H256, std::result::Result<(), SendErrorKind>)> {
        let typed = TypedTransaction::Eip1559(tx.clone());
        let signature = self.signer.sign_transaction(&typed).await?;
        let raw = typed.rlp_signed(&signature);
        let tx_hash = H256::from(ethers::utils::keccak256(&raw));
        match self.provider.send_raw_transaction(raw).await {
            Ok(_) => Ok((tx_hash, Ok(()))),
            Err(e) => {
                let kind = classify_send_error(&e.to_string());
                tracing::debug!(
                    chain_id = self.chain_id,
                    %tx_hash,
                    ?kind,
                    error = %e,
                    "broadcast rejected",
                );
                Ok((tx_hash, Err(kind)))
            }
        }
    }

    /// Signs and broadcasts an order transaction at the next nonce.
    ///
    /// Returns the consumed nonce as the order's handle. Underpriced
    /// rejections bump fees in place; nonce conflicts re-read the pending
    /// nonce and re-sequence; `already known`/`nonce too low` on a hash we
    /// produced count as an accepted broadcast.
    #[tracing::instrument(skip_all, fields(chain_id = self.chain_id, mid = %order.message_identifier, kind = %order.kind))]
    pub async fn submit(
        &mut self,
        order: SubmitOrder,
        to: Address,
        calldata: Bytes,
        gas_limit: U256,
        fee: FeeEstimate,
    ) -> Result<u64> {
        if !self.can_accept(gas_limit, &fee) {
            let worst_case = fee
                .max_fee_per_gas
                .saturating_mul(gas_limit)
                .saturating_mul(U256::from(
                    self.policy.config().max_pending_transactions as u64,
                ));
            return Err(Error::InsufficientBalance {
                balance: self.balance,
                minimum: worst_case,
            });
        }
        let mut nonce = self.next_nonce;
        let mut attempt_fee = fee;
        let mut last_error = String::from("no attempts made");
        for _ in 0..self.max_tries.max(1) {
            let tx = self.build_tx(
                to,
                Some(calldata.clone()),
                U256::zero(),
                gas_limit,
                &attempt_fee,
                nonce,
            );
            let (tx_hash, sent) = self.sign_and_send(&tx).await?;
            match sent {
                Ok(()) | Err(SendErrorKind::AlreadyKnown) => {
                    self.track(order, tx, attempt_fee, tx_hash, nonce);
                    return Ok(nonce);
                }
                Err(SendErrorKind::NonceTooLow) => {
                    // someone (possibly an old incarnation of us) consumed
                    // this nonce; re-read and re-sequence.
                    let chain_nonce = self
                        .provider
                        .get_transaction_count(
                            self.address,
                            Some(BlockNumber::Pending.into()),
                        )
                        .await?
                        .as_u64();
                    if chain_nonce > nonce {
                        tracing::warn!(
                            chain_id = self.chain_id,
                            ours = nonce,
                            theirs = chain_nonce,
                            "nonce conflict, re-sequencing",
                        );
                        nonce = chain_nonce;
                        continue;
                    }
                    // the pool already has this exact payload; treat as
                    // accepted and wait for the confirmation.
                    self.track(order, tx, attempt_fee, tx_hash, nonce);
                    return Ok(nonce);
                }
                Err(SendErrorKind::Underpriced) => {
                    attempt_fee = self.policy.replacement_fees(&attempt_fee);
                    last_error = "transaction underpriced".into();
                }
                Err(SendErrorKind::InsufficientFunds) => {
                    return Err(Error::InsufficientBalance {
                        balance: self.balance,
                        minimum: fee.max_fee_per_gas.saturating_mul(gas_limit),
                    });
                }
                Err(SendErrorKind::Other) => {
                    last_error = "broadcast rejected".into();
                }
            }
        }
        Err(Error::OrderFailed {
            max_tries: self.max_tries,
            last_error,
        })
    }

    fn track(
        &mut self,
        order: SubmitOrder,
        tx: Eip1559TransactionRequest,
        fee: FeeEstimate,
        tx_hash: H256,
        nonce: u64,
    ) {
        let now = Instant::now();
        self.pending.insert(
            nonce,
            PendingTx {
                order,
                tx,
                fee,
                state: OrderState::Broadcast,
                hashes: vec![tx_hash],
                first_submitted: now,
                last_submitted: now,
                attempt: 1,
                timeouts: 0,
                cancelling: false,
            },
        );
        self.next_nonce = nonce + 1;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxPipeline,
            chain_id = self.chain_id,
            nonce,
            %tx_hash,
            broadcast = true,
        );
    }

    /// Rebroadcasts the pending transaction at `nonce` with fees at least
    /// 12.5% over the previous attempt, reusing the same nonce.
    async fn replace_at(&mut self, nonce: u64) -> Result<()> {
        let Some(entry) = self.pending.get(&nonce) else {
            return Ok(());
        };
        let bumped = self.policy.replacement_fees(&entry.fee);
        let mut tx = entry.tx.clone();
        tx.max_fee_per_gas = Some(bumped.max_fee_per_gas);
        tx.max_priority_fee_per_gas = Some(bumped.max_priority_fee_per_gas);
        let (tx_hash, sent) = self.sign_and_send(&tx).await?;
        if let Err(kind) = sent {
            // a rejected replacement is fine: either the original is about
            // to confirm (nonce too low / already known) or the next poll
            // bumps again (underpriced).
            tracing::debug!(
                chain_id = self.chain_id,
                nonce,
                ?kind,
                "replacement not accepted",
            );
        }
        let entry = self.pending.get_mut(&nonce).expect("entry exists");
        entry.state = OrderState::Broadcast;
        entry.tx = tx;
        entry.fee = bumped;
        entry.hashes.push(tx_hash);
        entry.attempt += 1;
        entry.last_submitted = Instant::now();
        tracing::info!(
            chain_id = self.chain_id,
            nonce,
            attempt = entry.attempt,
            %tx_hash,
            "replaced stalled transaction",
        );
        Ok(())
    }

    /// Burns a hopeless nonce with a zero-value self-send at bumped fees.
    async fn cancel_at(&mut self, nonce: u64) -> Result<()> {
        let Some(entry) = self.pending.get(&nonce) else {
            return Ok(());
        };
        let bumped = self.policy.replacement_fees(&entry.fee);
        let tx = self.build_tx(
            self.address,
            None,
            U256::zero(),
            U256::from(21_000),
            &bumped,
            nonce,
        );
        let (tx_hash, _) = self.sign_and_send(&tx).await?;
        let entry = self.pending.get_mut(&nonce).expect("entry exists");
        entry.state = OrderState::Broadcast;
        entry.tx = tx;
        entry.fee = bumped;
        entry.hashes.push(tx_hash);
        entry.cancelling = true;
        entry.attempt += 1;
        entry.last_submitted = Instant::now();
        tracing::warn!(
            chain_id = self.chain_id,
            nonce,
            %tx_hash,
            "cancelling stalled nonce with a self-send",
        );
        Ok(())
    }

    /// Advances every pending nonce and surfaces resolved ones.
    ///
    /// Receipts may arrive out of order; outcomes are surfaced strictly
    /// from the lowest pending nonce upward, so the store always observes
    /// a monotone view. A later nonce that confirmed early is held back
    /// until everything below it resolved.
    pub async fn poll(&mut self) -> Result<Vec<TxOutcome>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let current_block = self.provider.get_block_number().await?.as_u64();
        let timeout = Duration::from_millis(self.config.confirmation_timeout);
        let nonces: Vec<u64> = self.pending.keys().copied().collect();
        for nonce in nonces {
            let (hashes, last_submitted, timeouts, state) = {
                let entry = &self.pending[&nonce];
                (
                    entry.hashes.clone(),
                    entry.last_submitted,
                    entry.timeouts,
                    entry.state,
                )
            };
            if state != OrderState::Broadcast {
                continue;
            }
            let mut receipt = None;
            // newest hash first: replacements usually win.
            for hash in hashes.iter().rev() {
                if let Some(found) =
                    self.provider.get_transaction_receipt(*hash).await?
                {
                    if found.block_number.is_some() {
                        receipt = Some(found);
                        break;
                    }
                }
            }
            match receipt {
                Some(receipt) => {
                    let tx_block =
                        receipt.block_number.unwrap_or_default().as_u64();
                    // confirmed once `current - tx_block + 1 >= confirmations`;
                    // zero confirmations confirm in the inclusion block.
                    if current_block + 1
                        >= tx_block + self.config.confirmations
                    {
                        let entry =
                            self.pending.get_mut(&nonce).expect("exists");
                        entry.state = OrderState::Confirmed;
                        self.confirmed_receipts.insert(nonce, receipt);
                    }
                }
                None => {
                    if last_submitted.elapsed() >= timeout {
                        let should_cancel = {
                            let entry =
                                self.pending.get_mut(&nonce).expect("exists");
                            entry.timeouts = timeouts + 1;
                            entry.state = OrderState::Replaced;
                            entry.timeouts >= STALL_TIMEOUT_LIMIT
                                && !entry.cancelling
                        };
                        if should_cancel {
                            self.cancel_at(nonce).await?;
                        } else {
                            self.replace_at(nonce).await?;
                        }
                    }
                }
            }
        }
        // surface outcomes strictly in nonce order.
        let mut outcomes = Vec::new();
        while let Some((&nonce, entry)) = self.pending.iter().next() {
            if entry.state != OrderState::Confirmed {
                break;
            }
            let entry = self.pending.remove(&nonce).expect("exists");
            let receipt = self
                .confirmed_receipts
                .remove(&nonce)
                .unwrap_or_default();
            let outcome = if entry.cancelling {
                TxOutcome::Cancelled {
                    order: entry.order,
                    nonce,
                }
            } else {
                TxOutcome::Confirmed {
                    order: entry.order,
                    nonce,
                    receipt,
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bounty_relayer_config::evm::SubmitterConfig;
    use bounty_relayer_store::OrderKind;
    use bounty_relayer_types::MessageIdentifier;
    use ethers::providers::{MockProvider, Provider};
    use ethers::types::U64;

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    fn order(byte: u8) -> SubmitOrder {
        SubmitOrder {
            message_identifier: MessageIdentifier([byte; 32]),
            kind: OrderKind::Delivery,
            target_chain_id: 1,
            block_number: 1,
            log_index: 0,
            observed_at_ms: 0,
        }
    }

    fn fee() -> FeeEstimate {
        FeeEstimate {
            max_fee_per_gas: gwei(10),
            max_priority_fee_per_gas: gwei(1),
        }
    }

    async fn wallet(
        wallet_config: WalletConfig,
        submitter_config: SubmitterConfig,
        initial_nonce: u64,
        balance: U256,
    ) -> (Wallet<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        // responses are a LIFO stack; new() reads the nonce first, then
        // the balance.
        mock.push(balance).unwrap();
        mock.push(U256::from(initial_nonce)).unwrap();
        let signer: LocalWallet =
            "0000000000000000000000000000000000000000000000000000000000000001"
                .parse()
                .unwrap();
        let wallet = Wallet::new(
            1337,
            Arc::new(provider),
            signer.with_chain_id(1337u64),
            wallet_config,
            GasPolicy::new(submitter_config),
        )
        .await
        .unwrap();
        (wallet, mock)
    }

    fn small_cap() -> SubmitterConfig {
        SubmitterConfig {
            max_pending_transactions: 2,
            ..Default::default()
        }
    }

    async fn submit_one(
        wallet: &mut Wallet<Provider<MockProvider>>,
        mock: &MockProvider,
        byte: u8,
    ) -> u64 {
        mock.push(H256::repeat_byte(byte)).unwrap();
        wallet
            .submit(
                order(byte),
                Address::repeat_byte(0xee),
                Bytes::from(vec![1, 2, 3]),
                U256::from(100_000),
                fee(),
            )
            .await
            .unwrap()
    }

    fn receipt_in_block(block: u64) -> TransactionReceipt {
        TransactionReceipt {
            block_number: Some(block.into()),
            gas_used: Some(U256::from(90_000)),
            effective_gas_price: Some(gwei(9)),
            status: Some(1.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn nonces_are_contiguous_from_the_pending_nonce() {
        let (mut wallet, mock) =
            wallet(WalletConfig::default(), small_cap(), 7, U256::exp10(19))
                .await;
        let a = submit_one(&mut wallet, &mock, 1).await;
        let b = submit_one(&mut wallet, &mock, 2).await;
        assert_eq!((a, b), (7, 8));
        assert_eq!(wallet.next_nonce(), 9);
        assert_eq!(wallet.pending_count(), 2);
    }

    #[tokio::test]
    async fn outcomes_surface_in_nonce_order() {
        let (mut wallet, mock) =
            wallet(WalletConfig::default(), small_cap(), 0, U256::exp10(19))
                .await;
        submit_one(&mut wallet, &mock, 1).await;
        submit_one(&mut wallet, &mock, 2).await;

        // nonce 1 confirms first; nonce 0 has no receipt yet.
        mock.push(receipt_in_block(10)).unwrap();
        mock.push::<Option<TransactionReceipt>, _>(None).unwrap();
        mock.push(U64::from(20)).unwrap();
        let outcomes = wallet.poll().await.unwrap();
        // held back: the store must observe a monotone view.
        assert!(outcomes.is_empty());

        // now nonce 0 confirms too; nonce 1 is already terminal.
        mock.push(receipt_in_block(11)).unwrap();
        mock.push(U64::from(21)).unwrap();
        let outcomes = wallet.poll().await.unwrap();
        assert_eq!(outcomes.len(), 2);
        let nonces: Vec<u64> = outcomes
            .iter()
            .map(|o| match o {
                TxOutcome::Confirmed { nonce, .. } => *nonce,
                TxOutcome::Cancelled { nonce, .. } => *nonce,
            })
            .collect();
        assert_eq!(nonces, vec![0, 1]);
        assert_eq!(wallet.pending_count(), 0);
    }

    #[tokio::test]
    async fn zero_confirmations_confirm_in_the_inclusion_block() {
        let config = WalletConfig {
            confirmations: 0,
            ..Default::default()
        };
        let (mut wallet, mock) =
            wallet(config, small_cap(), 0, U256::exp10(19)).await;
        submit_one(&mut wallet, &mock, 1).await;
        mock.push(receipt_in_block(20)).unwrap();
        mock.push(U64::from(20)).unwrap();
        let outcomes = wallet.poll().await.unwrap();
        assert_eq!(outcomes.len(), 1);
    }

    #[tokio::test]
    async fn timeout_replaces_at_the_same_nonce_with_bumped_fees() {
        let config = WalletConfig {
            confirmation_timeout: 0,
            ..Default::default()
        };
        let (mut wallet, mock) =
            wallet(config, small_cap(), 3, U256::exp10(19)).await;
        submit_one(&mut wallet, &mock, 1).await;

        mock.push(H256::repeat_byte(0x99)).unwrap(); // replacement broadcast
        mock.push::<Option<TransactionReceipt>, _>(None).unwrap();
        mock.push(U64::from(20)).unwrap();
        let outcomes = wallet.poll().await.unwrap();
        assert!(outcomes.is_empty());

        assert_eq!(wallet.pending_count(), 1);
        let entry = &wallet.pending[&3];
        // the EVM replacement floor: both caps at least 12.5% up.
        assert_eq!(
            entry.fee.max_fee_per_gas,
            crate::gas::mul_f64(gwei(10), 1.125)
        );
        assert_eq!(entry.attempt, 2);
        assert_eq!(entry.timeouts, 1);
        assert_eq!(entry.hashes.len(), 2);
        assert!(!entry.cancelling);
    }

    #[tokio::test]
    async fn persistent_stall_cancels_with_a_self_send() {
        let config = WalletConfig {
            confirmation_timeout: 0,
            ..Default::default()
        };
        let (mut wallet, mock) =
            wallet(config, small_cap(), 0, U256::exp10(19)).await;
        submit_one(&mut wallet, &mock, 1).await;

        for round in 0..STALL_TIMEOUT_LIMIT {
            mock.push(H256::repeat_byte(0x99)).unwrap();
            // one receipt probe per hash broadcast so far.
            for _ in 0..=round {
                mock.push::<Option<TransactionReceipt>, _>(None).unwrap();
            }
            mock.push(U64::from(20)).unwrap();
            wallet.poll().await.unwrap();
        }
        let entry = &wallet.pending[&0];
        assert!(entry.cancelling);
        // the cancel is a plain value transfer to ourselves.
        assert_eq!(entry.tx.to, Some(wallet.address().into()));
        assert_eq!(entry.tx.gas, Some(U256::from(21_000)));

        // once the cancel lands, the order surfaces as cancelled.
        mock.push(receipt_in_block(30)).unwrap();
        mock.push(U64::from(31)).unwrap();
        let outcomes = wallet.poll().await.unwrap();
        assert!(matches!(
            outcomes.as_slice(),
            [TxOutcome::Cancelled { nonce: 0, .. }]
        ));
    }

    #[tokio::test]
    async fn refuses_submissions_below_the_operational_balance() {
        // max_pending 2 * 10 gwei * 100k gas = 2e15 wei needed.
        let (mut wallet, mock) = wallet(
            WalletConfig::default(),
            small_cap(),
            0,
            U256::exp10(14),
        )
        .await;
        mock.push(H256::repeat_byte(1)).unwrap();
        let result = wallet
            .submit(
                order(1),
                Address::repeat_byte(0xee),
                Bytes::new(),
                U256::from(100_000),
                fee(),
            )
            .await;
        assert!(matches!(result, Err(Error::InsufficientBalance { .. })));
        assert_eq!(wallet.pending_count(), 0);
        // the unused nonce is not burned.
        assert_eq!(wallet.next_nonce(), 0);
    }

    #[tokio::test]
    async fn low_balance_warns_once_per_crossing() {
        let config = WalletConfig {
            low_balance_warning: Some(1_000_000),
            ..Default::default()
        };
        let (mut wallet, mock) =
            wallet(config, small_cap(), 0, U256::exp10(19)).await;

        mock.push(U256::from(999u64)).unwrap();
        wallet.refresh_balance().await.unwrap();
        assert!(wallet.low_balance_warned);

        // still below: the flag stays set, no second warning.
        mock.push(U256::from(998u64)).unwrap();
        wallet.refresh_balance().await.unwrap();
        assert!(wallet.low_balance_warned);

        // replenished: the watchdog re-arms.
        mock.push(U256::from(2_000_000u64)).unwrap();
        wallet.refresh_balance().await.unwrap();
        assert!(!wallet.low_balance_warned);
    }

    #[test]
    fn classifies_node_error_strings() {
        assert_eq!(
            classify_send_error("nonce too low: next nonce 5"),
            SendErrorKind::NonceTooLow
        );
        assert_eq!(
            classify_send_error("already known"),
            SendErrorKind::AlreadyKnown
        );
        assert_eq!(
            classify_send_error("replacement transaction underpriced"),
            SendErrorKind::Underpriced
        );
        assert_eq!(
            classify_send_error("insufficient funds for gas * price + value"),
            SendErrorKind::InsufficientFunds
        );
        assert_eq!(
            classify_send_error("connection reset by peer"),
            SendErrorKind::Other
        );
    }
}
