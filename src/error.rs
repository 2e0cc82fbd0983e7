//! Errors surfaced by on-chain operations.

use ethers::types::TxHash;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The user refused to sign, in the wallet or on the device.
    #[error("signing rejected: {0}")]
    Rejected(String),
    #[error("transaction {tx_hash:?} reverted")]
    Reverted { tx_hash: TxHash },
    /// The node dropped the transaction before it was mined.
    #[error("transaction {tx_hash:?} was dropped from the mempool")]
    Dropped { tx_hash: TxHash },
    #[error("provider error: {0}")]
    Provider(String),
}

impl ChainError {
    /// Classify a signer or provider error message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        // 0x6985 is the Ledger status word for "conditions of use not satisfied"
        if lower.contains("rejected")
            || lower.contains("denied")
            || lower.contains("user refused")
            || lower.contains("0x6985")
        {
            ChainError::Rejected(message)
        } else {
            ChainError::Provider(message)
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, ChainError::Rejected(_))
    }
}
