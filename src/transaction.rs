//! Transaction runner: one chain call, one status, one success callback.

use crate::chain::{self, ChainCall, ChainOperations, TxReceiptSummary};
use crate::error::ChainError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Status of a single issued operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TxStatus {
    #[default]
    Idle,
    /// Waiting for signature and confirmation
    Pending,
    Success(TxReceiptSummary),
    Error(ChainError),
}

impl TxStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TxStatus::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TxStatus::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TxStatus::Error(_))
    }

    /// Settled means success or error; nothing further will happen.
    pub fn is_settled(&self) -> bool {
        self.is_success() || self.is_error()
    }
}

/// Fresh status slot for one operation.
pub fn status_channel() -> (watch::Sender<TxStatus>, watch::Receiver<TxStatus>) {
    watch::channel(TxStatus::Idle)
}

pub struct Transaction {
    chain: Arc<dyn ChainOperations>,
    call: ChainCall,
    status: watch::Sender<TxStatus>,
}

impl Transaction {
    pub fn new(chain: Arc<dyn ChainOperations>, call: ChainCall, status: watch::Sender<TxStatus>) -> Self {
        Self { chain, call, status }
    }

    pub fn call(&self) -> &ChainCall {
        &self.call
    }

    pub async fn perform(self) -> Result<TxReceiptSummary, ChainError> {
        self.perform_then(|_| async { anyhow::Ok(()) }).await
    }

    /// Run the call. On confirmation the status becomes success and
    /// `on_success` runs; a failing callback is logged but the transaction
    /// still counts as confirmed. Errors are never retried.
    pub async fn perform_then<F, Fut>(self, on_success: F) -> Result<TxReceiptSummary, ChainError>
    where
        F: FnOnce(TxReceiptSummary) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        self.status.send_replace(TxStatus::Pending);
        info!("{}: {}", self.call.label(), self.call.describe());

        match chain::dispatch(self.chain.as_ref(), &self.call).await {
            Ok(receipt) => {
                self.status.send_replace(TxStatus::Success(receipt.clone()));
                if let Err(e) = on_success(receipt.clone()).await {
                    warn!("{} {:?} confirmed but follow-up failed: {}", self.call.label(), receipt.tx_hash, e);
                }
                Ok(receipt)
            }
            Err(e) => {
                error!("{} failed: {}", self.call.label(), e);
                self.status.send_replace(TxStatus::Error(e.clone()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests::FakeChain;
    use ethers::types::{Address, U256};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transfer(token: Address) -> ChainCall {
        ChainCall::Transfer {
            token,
            destination: Address::repeat_byte(0xde),
            amount: U256::from(10u64),
        }
    }

    #[tokio::test]
    async fn test_success_sets_status_and_runs_callback() {
        let chain = Arc::new(FakeChain::default());
        let (tx, rx) = status_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = Transaction::new(chain, transfer(Address::repeat_byte(1)), tx)
            .perform_then(move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert!(rx.borrow().is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_sets_error_and_skips_callback() {
        let token = Address::repeat_byte(1);
        let chain = Arc::new(FakeChain::failing(&[token]));
        let (tx, rx) = status_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = Transaction::new(chain.clone(), transfer(token), tx)
            .perform_then(move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_rejection());
        assert!(rx.borrow().is_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // no automatic retry
        assert_eq!(chain.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_callback_keeps_success() {
        let chain = Arc::new(FakeChain::default());
        let (tx, rx) = status_channel();
        let result = Transaction::new(chain, transfer(Address::repeat_byte(1)), tx)
            .perform_then(|_| async { Err::<(), _>(anyhow::anyhow!("refresh failed")) })
            .await;
        assert!(result.is_ok());
        assert!(rx.borrow().is_success());
    }

    #[tokio::test]
    async fn test_statuses_are_independent() {
        let good = Address::repeat_byte(1);
        let bad = Address::repeat_byte(2);
        let chain: Arc<FakeChain> = Arc::new(FakeChain::failing(&[bad]));
        let (tx_a, rx_a) = status_channel();
        let (tx_b, rx_b) = status_channel();

        let a = Transaction::new(chain.clone(), transfer(good), tx_a);
        let b = Transaction::new(chain.clone(), transfer(bad), tx_b);
        assert_eq!(*rx_a.borrow(), TxStatus::Idle);

        let (ra, rb) = tokio::join!(a.perform(), b.perform());
        assert!(ra.is_ok());
        assert!(rb.is_err());
        assert!(rx_a.borrow().is_success());
        assert!(rx_b.borrow().is_error());
    }
}
