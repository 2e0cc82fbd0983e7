//! Wallet balances: the ledger that reads them from chain and the cached
//! book the rest of the crate reads from.

use crate::erc20;
use crate::types::{is_native, native_token_address, TokenBalance, TokenSpec};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Source of current on-chain balances for the connected account.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Fetch fresh balances for exactly the given tokens.
    async fn refresh(&self, tokens: &[TokenSpec]) -> Result<HashMap<Address, TokenBalance>>;
}

/// Reads balances through any ethers middleware.
pub struct EthersBalanceLedger<M> {
    client: Arc<M>,
    owner: Address,
}

impl<M: Middleware + 'static> EthersBalanceLedger<M> {
    pub fn new(client: Arc<M>, owner: Address) -> Self {
        Self { client, owner }
    }

    async fn erc20_balance(&self, token: Address) -> Result<U256> {
        let tx = TransactionRequest::new()
            .to(token)
            .data(erc20::encode_balance_of(self.owner)?);
        let output = self
            .client
            .call(&tx.into(), None)
            .await
            .map_err(|e| anyhow!("balanceOf call to {:?} failed: {}", token, e))?;
        erc20::decode_balance_of(&output)
    }
}

#[async_trait]
impl<M: Middleware + 'static> BalanceLedger for EthersBalanceLedger<M> {
    async fn refresh(&self, tokens: &[TokenSpec]) -> Result<HashMap<Address, TokenBalance>> {
        let mut balances = HashMap::new();
        for token in tokens {
            let raw = if is_native(token.address) {
                self.client
                    .get_balance(self.owner, None)
                    .await
                    .map_err(|e| anyhow!("Failed to fetch native balance: {}", e))?
            } else {
                match self.erc20_balance(token.address).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        // Not every listed address is a live ERC20 on every chain
                        warn!("Skipping {} ({:?}): {}", token.symbol, token.address, e);
                        continue;
                    }
                }
            };
            balances.insert(token.address, TokenBalance::new(token, raw));
        }
        Ok(balances)
    }
}

/// Latest known balances plus the nonce that changes whenever they do.
#[derive(Debug, Clone, Default)]
pub struct BalanceBook {
    balances: HashMap<Address, TokenBalance>,
    nonce: u64,
}

impl BalanceBook {
    pub fn get(&self, token: Address) -> Option<&TokenBalance> {
        self.balances.get(&token)
    }

    /// Native balance, zero when not loaded yet.
    pub fn native_raw(&self) -> U256 {
        self.balances
            .get(&native_token_address())
            .map(|b| b.raw)
            .unwrap_or_default()
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Overwrite entries with fresher ones. Last writer wins.
    pub fn merge(&mut self, updated: &HashMap<Address, TokenBalance>) {
        for (address, balance) in updated {
            self.balances.insert(*address, balance.clone());
        }
        self.nonce += 1;
    }

    pub fn clear(&mut self) {
        self.balances.clear();
        self.nonce += 1;
    }

    /// Balances worth listing, native first then by symbol.
    pub fn displayable(&self) -> Vec<&TokenBalance> {
        let mut rows: Vec<&TokenBalance> = self
            .balances
            .values()
            .filter(|b| b.is_displayable())
            .collect();
        rows.sort_by(|a, b| {
            is_native(b.address)
                .cmp(&is_native(a.address))
                .then_with(|| a.symbol.cmp(&b.symbol))
                .then_with(|| a.address.cmp(&b.address))
        });
        rows
    }
}

/// Balance ledger paired with the cached book it keeps current.
#[derive(Clone)]
pub struct WalletBalances {
    ledger: Arc<dyn BalanceLedger>,
    book: Arc<Mutex<BalanceBook>>,
}

impl WalletBalances {
    pub fn new(ledger: Arc<dyn BalanceLedger>) -> Self {
        Self {
            ledger,
            book: Arc::new(Mutex::new(BalanceBook::default())),
        }
    }

    /// Fetch the given tokens and merge them into the book
    pub async fn refresh(&self, tokens: &[TokenSpec]) -> Result<HashMap<Address, TokenBalance>> {
        let updated = self.ledger.refresh(tokens).await?;
        let mut book = self.book.lock().await;
        book.merge(&updated);
        info!(
            "Refreshed {} balance(s), balances nonce now {}",
            updated.len(),
            book.nonce()
        );
        Ok(updated)
    }

    /// Drop everything and load the token set from scratch (chain switch)
    pub async fn reload(&self, tokens: &[TokenSpec]) -> Result<HashMap<Address, TokenBalance>> {
        let updated = self.ledger.refresh(tokens).await?;
        let mut book = self.book.lock().await;
        book.clear();
        book.merge(&updated);
        Ok(updated)
    }

    pub async fn snapshot(&self) -> BalanceBook {
        self.book.lock().await.clone()
    }

    pub async fn get(&self, token: Address) -> Option<TokenBalance> {
        self.book.lock().await.get(token).cloned()
    }

    pub async fn native_raw(&self) -> U256 {
        self.book.lock().await.native_raw()
    }

    pub async fn nonce(&self) -> u64 {
        self.book.lock().await.nonce()
    }
}
