//! Migration orchestrator.
//!
//! A migration run turns the current selection into independent chain
//! operations: one ERC20 transfer per selected token, issued back to back
//! without waiting on each other, followed by at most one native operation.
//! The native step is, in priority order:
//!
//! 1. a single disperse carrying both the migrated amount and the donation,
//!    when the native balance strictly exceeds their sum (plus the configured
//!    reserve);
//! 2. the donation alone;
//! 3. the native migration alone.
//!
//! Every operation owns its status. A failure stays in that status and
//! leaves the token selected; nothing is rolled back.

use crate::balance::WalletBalances;
use crate::chain::{ChainCall, ChainOperations, TxReceiptSummary};
use crate::config::Config;
use crate::donation::DonationState;
use crate::operation_log::OperationLog;
use crate::selection::{SelectionState, SelectionStore};
use crate::transaction::{status_channel, Transaction, TxStatus};
use crate::types::{is_native, native_token_address, NormalizedAmount, TokenSpec, NATIVE_DECIMALS};
use crate::utils;
use anyhow::{anyhow, Result};
use ethers::types::{Address, U256};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeStep {
    None,
    Disperse { amount: U256, donation: U256 },
    DonateOnly { donation: U256 },
    SendOnly { amount: U256 },
}

/// One operation of a plan and how to reconcile state once it confirms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOperation {
    pub call: ChainCall,
    /// ERC20 to refresh alongside native currency
    pub refresh: Option<Address>,
    /// Address to drop from the selection on success
    pub deselect: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub destination: Address,
    pub donation_receiver: Address,
    pub transfers: Vec<(Address, U256)>,
    pub native: NativeStep,
}

/// `balance > amount + donation + reserve`, false on overflow.
pub fn combined_disperse_fits(native_balance: U256, amount: U256, donation: U256, reserve: U256) -> bool {
    amount
        .checked_add(donation)
        .and_then(|sum| sum.checked_add(reserve))
        .map(|needed| native_balance > needed)
        .unwrap_or(false)
}

impl MigrationPlan {
    pub fn build(
        selection: &SelectionState,
        donation: &DonationState,
        native_balance: U256,
        donation_receiver: Address,
        reserve: U256,
    ) -> Result<Self> {
        let destination = selection
            .destination()
            .ok_or_else(|| anyhow!("No destination address set"))?;

        let mut transfers = Vec::new();
        let mut native_amount = U256::zero();
        for token in selection.selected() {
            let amount = selection.amount_raw(*token);
            if amount.is_zero() {
                continue;
            }
            if is_native(*token) {
                // Native goes last so its amount is not eaten by transfer gas first
                native_amount = amount;
                continue;
            }
            transfers.push((*token, amount));
        }

        let donation_raw = donation.effective_raw();
        let native = if !donation_raw.is_zero()
            && !native_amount.is_zero()
            && combined_disperse_fits(native_balance, native_amount, donation_raw, reserve)
        {
            NativeStep::Disperse {
                amount: native_amount,
                donation: donation_raw,
            }
        } else if !donation_raw.is_zero() {
            NativeStep::DonateOnly { donation: donation_raw }
        } else if !native_amount.is_zero() {
            NativeStep::SendOnly { amount: native_amount }
        } else {
            NativeStep::None
        };

        Ok(Self {
            destination,
            donation_receiver,
            transfers,
            native,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty() && self.native == NativeStep::None
    }

    /// Operations in issue order: transfers first, native last.
    pub fn operations(&self) -> Vec<PlannedOperation> {
        let mut ops: Vec<PlannedOperation> = self
            .transfers
            .iter()
            .map(|(token, amount)| PlannedOperation {
                call: ChainCall::Transfer {
                    token: *token,
                    destination: self.destination,
                    amount: *amount,
                },
                refresh: Some(*token),
                deselect: Some(*token),
            })
            .collect();

        let native = native_token_address();
        match self.native {
            NativeStep::None => {}
            NativeStep::Disperse { amount, donation } => ops.push(PlannedOperation {
                call: ChainCall::Disperse {
                    destination: self.destination,
                    amount,
                    donation,
                },
                refresh: None,
                deselect: Some(native),
            }),
            NativeStep::DonateOnly { donation } => ops.push(PlannedOperation {
                call: ChainCall::SendNative {
                    destination: self.donation_receiver,
                    amount: donation,
                },
                refresh: None,
                deselect: None,
            }),
            NativeStep::SendOnly { amount } => ops.push(PlannedOperation {
                call: ChainCall::SendNative {
                    destination: self.destination,
                    amount,
                },
                refresh: None,
                deselect: Some(native),
            }),
        }
        ops
    }
}

/// An operation that has been handed to the chain.
pub struct IssuedOperation {
    pub call: ChainCall,
    pub status: watch::Receiver<TxStatus>,
    handle: JoinHandle<()>,
}

impl IssuedOperation {
    pub fn current_status(&self) -> TxStatus {
        self.status.borrow().clone()
    }

    /// Wait until the transaction and its success callback have finished
    pub async fn wait(self) -> TxStatus {
        if let Err(e) = self.handle.await {
            warn!("{} task ended abnormally: {}", self.call.label(), e);
        }
        let status = self.status.borrow().clone();
        status
    }
}

/// All operations issued by one migration run.
pub struct MigrationHandle {
    operations: Vec<IssuedOperation>,
}

impl MigrationHandle {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn calls(&self) -> Vec<ChainCall> {
        self.operations.iter().map(|op| op.call.clone()).collect()
    }

    pub fn into_operations(self) -> Vec<IssuedOperation> {
        self.operations
    }

    pub async fn wait_all(self) -> Vec<(ChainCall, TxStatus)> {
        let mut results = Vec::with_capacity(self.operations.len());
        for op in self.operations {
            let call = op.call.clone();
            results.push((call, op.wait().await));
        }
        results
    }
}

/// State shared by the migrator and every success callback it spawns.
#[derive(Clone)]
struct Settlement {
    balances: WalletBalances,
    selection: SelectionStore,
    donation: Arc<Mutex<DonationState>>,
    native: TokenSpec,
    chain_id: u64,
    operation_log: Option<OperationLog>,
}

impl Settlement {
    async fn native_spec(&self) -> TokenSpec {
        match self.balances.get(native_token_address()).await {
            Some(balance) => balance.spec(),
            None => self.native.clone(),
        }
    }

    async fn reconcile_donation(&self) {
        let native_raw = self.balances.native_raw().await;
        let taken = self.donation.lock().await.reconcile(native_raw);
        if !taken.is_empty() {
            info!("Donation reconciled: {:?}", taken);
        }
    }

    /// Success callback: refresh native (and the token involved), then
    /// apply the fresh amounts and drop the address from the selection in
    /// one update.
    async fn settle(&self, op: &PlannedOperation, receipt: &TxReceiptSummary) -> Result<()> {
        let mut specs = vec![self.native_spec().await];
        if let Some(token) = op.refresh.filter(|t| !is_native(*t)) {
            if let Some(balance) = self.balances.get(token).await {
                specs.push(balance.spec());
            }
        }

        let refreshed = self.balances.refresh(&specs).await;
        self.selection
            .update(|s| {
                if let Ok(updated) = &refreshed {
                    s.apply_refreshed(updated);
                }
                if let Some(address) = op.deselect {
                    s.deselect(address);
                }
            })
            .await;

        if let Some(log) = &self.operation_log {
            let details = format!(
                "{}\nTx hash: {:?}\nBlock: {:?}\nGas used: {}",
                op.call.describe(),
                receipt.tx_hash,
                receipt.block_number,
                receipt.gas_used
            );
            if let Err(e) = log.append(op.call.label(), self.chain_id, details) {
                warn!("Failed to write operation log: {}", e);
            }
        }

        refreshed?;
        self.reconcile_donation().await;
        Ok(())
    }
}

pub struct Migrator {
    chain: Arc<dyn ChainOperations>,
    settlement: Settlement,
    donation_receiver: Address,
    disperse_reserve: U256,
    wallet_active: Option<watch::Receiver<bool>>,
}

impl Migrator {
    pub fn new(
        chain: Arc<dyn ChainOperations>,
        balances: WalletBalances,
        native: TokenSpec,
        donation_receiver: Address,
    ) -> Self {
        Self {
            chain,
            settlement: Settlement {
                balances,
                selection: SelectionStore::new(),
                donation: Arc::new(Mutex::new(DonationState::new())),
                native,
                chain_id: 0,
                operation_log: None,
            },
            donation_receiver,
            disperse_reserve: U256::zero(),
            wallet_active: None,
        }
    }

    pub fn from_config(config: &Config, chain: Arc<dyn ChainOperations>, balances: WalletBalances) -> Self {
        let mut migrator = Self::new(
            chain,
            balances,
            TokenSpec::native(config.native_token()),
            config.donation_receiver,
        )
        .with_disperse_reserve(config.disperse_reserve);
        migrator.settlement.chain_id = config.chain_id;
        migrator
    }

    pub fn with_disperse_reserve(mut self, reserve: U256) -> Self {
        self.disperse_reserve = reserve;
        self
    }

    pub fn with_operation_log(mut self, log: OperationLog) -> Self {
        self.settlement.operation_log = Some(log);
        self
    }

    /// Refuse to issue operations while the wallet session is inactive
    pub fn with_wallet_activity(mut self, active: watch::Receiver<bool>) -> Self {
        self.wallet_active = Some(active);
        self
    }

    fn ensure_active(&self) -> Result<()> {
        match &self.wallet_active {
            Some(active) if !*active.borrow() => Err(anyhow!("Wallet is not connected")),
            _ => Ok(()),
        }
    }

    pub fn selection(&self) -> &SelectionStore {
        &self.settlement.selection
    }

    pub fn balances(&self) -> &WalletBalances {
        &self.settlement.balances
    }

    pub async fn donation(&self) -> DonationState {
        self.settlement.donation.lock().await.clone()
    }

    fn with_native(&self, tokens: &[TokenSpec]) -> Vec<TokenSpec> {
        let mut specs = Vec::with_capacity(tokens.len() + 1);
        if !tokens.iter().any(|t| is_native(t.address)) {
            specs.push(self.settlement.native.clone());
        }
        specs.extend(tokens.iter().cloned());
        specs
    }

    // ==================== balances ====================

    /// Fetch balances for the token set; tokens seen for the first time get
    /// their full balance as the amount to migrate.
    pub async fn load_balances(&self, tokens: &[TokenSpec]) -> Result<()> {
        let updated = self.settlement.balances.refresh(&self.with_native(tokens)).await?;
        self.settlement
            .selection
            .update(|s| {
                for balance in updated.values() {
                    s.init_amount(balance);
                }
            })
            .await;
        self.settlement.reconcile_donation().await;
        Ok(())
    }

    /// The wallet moved to another chain: drop old balances and reset every
    /// amount to the fresh balance.
    pub async fn switch_chain(&mut self, chain_id: u64, tokens: &[TokenSpec]) -> Result<()> {
        info!("Active chain changed to {}", chain_id);
        self.settlement.chain_id = chain_id;
        let updated = self.settlement.balances.reload(&self.with_native(tokens)).await?;
        self.settlement
            .selection
            .update(|s| s.reset_amounts(updated.values()))
            .await;
        self.settlement.reconcile_donation().await;
        Ok(())
    }

    // ==================== selection ====================

    pub async fn toggle(&self, token: Address) -> bool {
        self.settlement.selection.toggle(token).await
    }

    pub async fn set_destination(&self, destination: Address) {
        self.settlement.selection.set_destination(destination).await
    }

    /// Parse a typed amount with the token's decimals and store it, clamped
    /// to the balance.
    pub async fn set_amount(&self, token: Address, input: &str) -> Result<NormalizedAmount> {
        let balance = self
            .settlement
            .balances
            .get(token)
            .await
            .ok_or_else(|| anyhow!("No balance loaded for {:?}", token))?;
        let amount = NormalizedAmount::parse(input, balance.decimals)?;
        Ok(self.settlement.selection.set_amount(token, amount, &balance).await)
    }

    pub async fn set_max(&self, token: Address) -> Result<()> {
        let balance = self
            .settlement
            .balances
            .get(token)
            .await
            .ok_or_else(|| anyhow!("No balance loaded for {:?}", token))?;
        self.settlement.selection.update(|s| s.set_max(&balance)).await;
        Ok(())
    }

    // ==================== donation ====================

    pub async fn toggle_donation(&self) -> bool {
        let enabled = self.settlement.donation.lock().await.toggle();
        self.settlement.reconcile_donation().await;
        enabled
    }

    pub async fn type_donation(&self, input: &str) -> Result<NormalizedAmount> {
        let amount = NormalizedAmount::parse(input, NATIVE_DECIMALS)?;
        let native_raw = self.settlement.balances.native_raw().await;
        self.settlement.donation.lock().await.type_amount(amount, native_raw);
        self.settlement.reconcile_donation().await;
        Ok(self.settlement.donation.lock().await.amount().clone())
    }

    // ==================== running ====================

    pub async fn plan(&self) -> Result<MigrationPlan> {
        let selection = self.settlement.selection.snapshot().await;
        let donation = self.donation().await;
        let native_raw = self.settlement.balances.native_raw().await;
        MigrationPlan::build(
            &selection,
            &donation,
            native_raw,
            self.donation_receiver,
            self.disperse_reserve,
        )
    }

    fn issue(&self, op: PlannedOperation) -> IssuedOperation {
        let (status_tx, status_rx) = status_channel();
        let transaction = Transaction::new(self.chain.clone(), op.call.clone(), status_tx);
        let settlement = self.settlement.clone();
        let call = op.call.clone();
        let handle = tokio::spawn(async move {
            let _ = transaction
                .perform_then(move |receipt| async move { settlement.settle(&op, &receipt).await })
                .await;
        });
        IssuedOperation {
            call,
            status: status_rx,
            handle,
        }
    }

    /// Issue every operation for the current selection without waiting for
    /// any of them to confirm.
    pub async fn migrate_selected(&self) -> Result<MigrationHandle> {
        self.ensure_active()?;
        let plan = self.plan().await?;
        if plan.is_empty() {
            return Err(anyhow!("Nothing to migrate: no selected token has a non-zero amount"));
        }
        info!(
            "Migrating {} token(s) to {:?}, native step {:?}",
            plan.transfers.len(),
            plan.destination,
            plan.native
        );

        let operations = plan
            .operations()
            .into_iter()
            .map(|op| self.issue(op))
            .collect();
        Ok(MigrationHandle { operations })
    }

    /// Migrate a single row regardless of the rest of the selection
    pub async fn migrate_one(&self, token: Address) -> Result<IssuedOperation> {
        self.ensure_active()?;
        let selection = self.settlement.selection.snapshot().await;
        let destination = selection
            .destination()
            .ok_or_else(|| anyhow!("No destination address set"))?;
        let amount = selection.amount_raw(token);
        if amount.is_zero() {
            return Err(anyhow!("Amount to migrate for {:?} is zero", token));
        }

        let call = if is_native(token) {
            ChainCall::SendNative { destination, amount }
        } else {
            ChainCall::Transfer {
                token,
                destination,
                amount,
            }
        };
        Ok(self.issue(PlannedOperation {
            call,
            refresh: Some(token),
            deselect: Some(token),
        }))
    }

    /// Send the donation on its own
    pub async fn donate(&self) -> Result<IssuedOperation> {
        self.ensure_active()?;
        let donation = self.donation().await.effective_raw();
        if donation.is_zero() {
            return Err(anyhow!("Donation amount is zero"));
        }
        info!(
            "Donating {} to {:?}",
            utils::format_ether(donation),
            self.donation_receiver
        );
        Ok(self.issue(PlannedOperation {
            call: ChainCall::SendNative {
                destination: self.donation_receiver,
                amount: donation,
            },
            refresh: None,
            deselect: None,
        }))
    }
}
