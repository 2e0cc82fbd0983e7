//! On-chain operations the migrator issues: ERC20 transfer, native send
//! and the combined disperse.

use crate::disperse::DisperseCall;
use crate::erc20;
use crate::error::ChainError;
use crate::utils;
use async_trait::async_trait;
use ethers::prelude::*;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// What a confirmed transaction left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceiptSummary {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// A single operation the orchestrator can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainCall {
    Transfer {
        token: Address,
        destination: Address,
        amount: U256,
    },
    SendNative {
        destination: Address,
        amount: U256,
    },
    /// `amount` to the destination and `donation` to the donation receiver
    Disperse {
        destination: Address,
        amount: U256,
        donation: U256,
    },
}

impl ChainCall {
    pub fn label(&self) -> &'static str {
        match self {
            ChainCall::Transfer { .. } => "Transfer",
            ChainCall::SendNative { .. } => "Send",
            ChainCall::Disperse { .. } => "Disperse",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ChainCall::Transfer { token, destination, amount } => {
                format!("transfer {} of token {:?} to {:?}", amount, token, destination)
            }
            ChainCall::SendNative { destination, amount } => {
                format!("send {} native to {:?}", utils::format_ether(*amount), destination)
            }
            ChainCall::Disperse { destination, amount, donation } => format!(
                "disperse {} native to {:?} with {} donation",
                utils::format_ether(*amount),
                destination,
                utils::format_ether(*donation)
            ),
        }
    }
}

/// Chain calls used by the migrator. Each call resolves once the
/// transaction is mined, or fails.
#[async_trait]
pub trait ChainOperations: Send + Sync {
    async fn transfer(
        &self,
        token: Address,
        destination: Address,
        amount: U256,
    ) -> Result<TxReceiptSummary, ChainError>;

    async fn send_native(&self, destination: Address, amount: U256) -> Result<TxReceiptSummary, ChainError>;

    async fn disperse(
        &self,
        destination: Address,
        amount: U256,
        donation: U256,
    ) -> Result<TxReceiptSummary, ChainError>;
}

/// Route a [`ChainCall`] to the matching operation.
pub async fn dispatch(chain: &dyn ChainOperations, call: &ChainCall) -> Result<TxReceiptSummary, ChainError> {
    match call {
        ChainCall::Transfer { token, destination, amount } => chain.transfer(*token, *destination, *amount).await,
        ChainCall::SendNative { destination, amount } => chain.send_native(*destination, *amount).await,
        ChainCall::Disperse { destination, amount, donation } => {
            chain.disperse(*destination, *amount, *donation).await
        }
    }
}

/// Signs and submits through an ethers signing middleware.
pub struct EthersChainOperations<M> {
    client: Arc<M>,
    sender: Address,
    disperse_address: Address,
    donation_receiver: Address,
    /// Next nonce to hand out, `None` until the first submission
    next_nonce: Arc<Mutex<Option<U256>>>,
}

impl<M: Middleware + 'static> EthersChainOperations<M> {
    pub fn new(client: Arc<M>, sender: Address, disperse_address: Address, donation_receiver: Address) -> Self {
        Self {
            client,
            sender,
            disperse_address,
            donation_receiver,
            next_nonce: Arc::new(Mutex::new(None)),
        }
    }

    /// Reserve the next nonce. The lock is held across the chain lookup so
    /// concurrent submissions never share a nonce.
    async fn allocate_nonce(&self) -> Result<U256, ChainError> {
        let mut nonce_guard = self.next_nonce.lock().await;
        let on_chain = self
            .client
            .get_transaction_count(self.sender, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))?;
        let nonce = match *nonce_guard {
            Some(next) => std::cmp::max(next, on_chain),
            None => on_chain,
        };
        *nonce_guard = Some(nonce + 1);
        Ok(nonce)
    }

    /// Hand back a nonce whose transaction never reached the node, unless a
    /// later one is already out.
    async fn release_nonce(&self, nonce: U256) {
        let mut nonce_guard = self.next_nonce.lock().await;
        if *nonce_guard == Some(nonce + 1) {
            *nonce_guard = Some(nonce);
        }
    }

    pub fn transfer_request(
        &self,
        token: Address,
        destination: Address,
        amount: U256,
    ) -> Result<TransactionRequest, ChainError> {
        let calldata = erc20::encode_transfer(destination, amount)
            .map_err(|e| ChainError::Provider(e.to_string()))?;
        Ok(TransactionRequest::new().from(self.sender).to(token).data(calldata))
    }

    pub fn send_native_request(&self, destination: Address, amount: U256) -> TransactionRequest {
        TransactionRequest::new()
            .from(self.sender)
            .to(destination)
            .value(amount)
    }

    /// `msg.value` is the sum of every disperse value.
    pub fn disperse_request(
        &self,
        destination: Address,
        amount: U256,
        donation: U256,
    ) -> Result<TransactionRequest, ChainError> {
        let call = DisperseCall::migration_with_donation(destination, amount, self.donation_receiver, donation);
        let value = call.total_value().map_err(|e| ChainError::Provider(e.to_string()))?;
        let calldata = call.encode().map_err(|e| ChainError::Provider(e.to_string()))?;
        Ok(TransactionRequest::new()
            .from(self.sender)
            .to(self.disperse_address)
            .value(value)
            .data(calldata))
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<TxReceiptSummary, ChainError> {
        let nonce = self.allocate_nonce().await?;
        let pending = match self.client.send_transaction(tx.nonce(nonce), None).await {
            Ok(pending) => pending,
            Err(e) => {
                self.release_nonce(nonce).await;
                return Err(ChainError::from_message(e.to_string()));
            }
        };
        let tx_hash = pending.tx_hash();
        info!("Transaction sent: {:?} (nonce {})", tx_hash, nonce);

        let receipt = pending
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))?
            .ok_or(ChainError::Dropped { tx_hash })?;

        if receipt.status == Some(U64::zero()) {
            return Err(ChainError::Reverted { tx_hash });
        }

        let summary = TxReceiptSummary {
            tx_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            gas_used: receipt.gas_used.map(|g| g.as_u64()).unwrap_or(0),
        };
        info!(
            "Transaction {:?} confirmed in block {:?}, gas used {}",
            tx_hash, summary.block_number, summary.gas_used
        );
        Ok(summary)
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainOperations for EthersChainOperations<M> {
    async fn transfer(
        &self,
        token: Address,
        destination: Address,
        amount: U256,
    ) -> Result<TxReceiptSummary, ChainError> {
        let tx = self.transfer_request(token, destination, amount)?;
        self.submit(tx).await
    }

    async fn send_native(&self, destination: Address, amount: U256) -> Result<TxReceiptSummary, ChainError> {
        self.submit(self.send_native_request(destination, amount)).await
    }

    async fn disperse(
        &self,
        destination: Address,
        amount: U256,
        donation: U256,
    ) -> Result<TxReceiptSummary, ChainError> {
        info!(
            "Disperse via {:?}: {} to {:?}, {} to {:?}",
            self.disperse_address,
            utils::format_ether(amount),
            destination,
            utils::format_ether(donation),
            self.donation_receiver
        );
        let tx = self.disperse_request(destination, amount, donation)?;
        self.submit(tx).await
    }
}
