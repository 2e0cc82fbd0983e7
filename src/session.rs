//! Wallet session: the connected account, its chain and a signing client.
//!
//! Signing goes either through a local key from `PRIVATE_KEY` or through a
//! Ledger over HID using ethers' built-in support.

use crate::balance::EthersBalanceLedger;
use crate::chain::EthersChainOperations;
use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use ethers::prelude::*;
use ethers::signers::{HDPath, Ledger};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

/// Maximum number of attempts when the Ledger reports a transient HID error
const MAX_RETRY_ATTEMPTS: usize = 5;

/// Base delay between retries in milliseconds (multiplied by attempt number)
const RETRY_BASE_DELAY_MS: u64 = 300;

pub type LocalClient = SignerMiddleware<Provider<Http>, LocalWallet>;
pub type LedgerClient = SignerMiddleware<Provider<Http>, Ledger>;

/// HID timing or busy errors that may clear up on retry
fn is_transient_error(err_str: &str) -> bool {
    let lower = err_str.to_lowercase();
    if lower.contains("busy") || lower.contains("overlapped i/o operation") {
        return true;
    }
    if lower.contains("hidapi") && !lower.contains("no device") && !lower.contains("device not found") {
        return true;
    }
    lower.contains("i/o error") || lower.contains("io error")
}

fn map_ledger_error(err_str: &str) -> anyhow::Error {
    let lower = err_str.to_lowercase();
    if lower.contains("locked") || lower.contains("6983") || lower.contains("6985") || lower.contains("not open") {
        anyhow!("Ledger is locked or the Ethereum app is not open: {}", err_str)
    } else if lower.contains("device not found") || lower.contains("no device") {
        anyhow!("Ledger not found. Connect and unlock it: {}", err_str)
    } else {
        anyhow!("Ledger error: {}", err_str)
    }
}

/// A connected wallet. `active` goes false once the wallet disconnects;
/// observers hold the receiving end.
pub struct WalletSession<M> {
    client: Arc<M>,
    account: Address,
    chain_id: u64,
    active: watch::Sender<bool>,
}

impl<M: Middleware + 'static> WalletSession<M> {
    pub fn new(client: Arc<M>, account: Address, chain_id: u64) -> Self {
        Self {
            client,
            account,
            chain_id,
            active: watch::channel(true).0,
        }
    }

    pub fn client(&self) -> Arc<M> {
        self.client.clone()
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Follow the active flag, e.g. to refuse new operations after a disconnect
    pub fn activity(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }

    pub fn disconnect(&self) {
        info!("Wallet {:?} disconnected", self.account);
        self.active.send_replace(false);
    }

    /// Ask the node which chain it serves. Returns the new chain id when it
    /// differs from the one the session was opened on.
    pub async fn sync_chain_id(&mut self) -> Result<Option<u64>> {
        let reported = self
            .client
            .get_chainid()
            .await
            .map_err(|e| anyhow!("Failed to query chain id: {}", e))?
            .as_u64();
        if reported == self.chain_id {
            return Ok(None);
        }
        warn!("Chain changed from {} to {}", self.chain_id, reported);
        self.chain_id = reported;
        Ok(Some(reported))
    }

    pub fn balance_ledger(&self) -> EthersBalanceLedger<M> {
        EthersBalanceLedger::new(self.client.clone(), self.account)
    }

    pub fn chain_operations(&self, config: &Config) -> EthersChainOperations<M> {
        EthersChainOperations::new(
            self.client.clone(),
            self.account,
            config.disperse_address,
            config.donation_receiver,
        )
    }
}

impl WalletSession<LocalClient> {
    /// Connect with the hex key in `PRIVATE_KEY`.
    pub async fn from_env(config: &Config) -> Result<Self> {
        let key = env::var("PRIVATE_KEY").context("PRIVATE_KEY is not set")?;
        Self::from_private_key(config, key.trim()).await
    }

    pub async fn from_private_key(config: &Config, key: &str) -> Result<Self> {
        let wallet = key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| anyhow!("Invalid private key: {}", e))?
            .with_chain_id(config.chain_id);
        let account = wallet.address();
        let provider = config.get_provider().await?;
        let client = SignerMiddleware::new((*provider).clone(), wallet);
        info!("Connected local wallet {:?} on chain {}", account, config.chain_id);
        Ok(Self::new(Arc::new(client), account, config.chain_id))
    }
}

impl WalletSession<LedgerClient> {
    /// Connect to the Ledger Live account at `index`, retrying transient HID errors.
    pub async fn from_ledger(config: &Config, index: u32) -> Result<Self> {
        let provider = config.get_provider().await?;
        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            info!(
                "Connecting to Ledger account {} on chain {} (attempt {}/{})",
                index, config.chain_id, attempt, MAX_RETRY_ATTEMPTS
            );
            match Ledger::new(HDPath::LedgerLive(index as usize), config.chain_id).await {
                Ok(ledger) => {
                    let account = ledger.address();
                    let client = SignerMiddleware::new((*provider).clone(), ledger);
                    info!("Connected Ledger {:?}", account);
                    return Ok(Self::new(Arc::new(client), account, config.chain_id));
                }
                Err(e) => {
                    let err_str = e.to_string();
                    if is_transient_error(&err_str) && attempt < MAX_RETRY_ATTEMPTS {
                        warn!("Transient Ledger error (attempt {}): {}, retrying...", attempt, err_str);
                        sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * attempt as u64)).await;
                        continue;
                    }
                    return Err(map_ledger_error(&err_str));
                }
            }
        }
        Err(anyhow!("Failed to connect to Ledger after {} attempts", MAX_RETRY_ATTEMPTS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known anvil dev key #0
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_transient_error_classification() {
        assert!(is_transient_error("hidapi error: read failed"));
        assert!(is_transient_error("Device busy"));
        assert!(!is_transient_error("hidapi error: no device found"));
        assert!(!is_transient_error("APDU 6985"));
    }

    #[test]
    fn test_map_ledger_error_messages() {
        assert!(map_ledger_error("status 6983").to_string().contains("locked"));
        assert!(map_ledger_error("device not found").to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_local_wallet_session() {
        let config = Config::new("http://127.0.0.1:8545".to_string(), 31337);
        let session = tokio_test::assert_ok!(WalletSession::from_private_key(&config, DEV_KEY).await);
        let activity = session.activity();
        assert_eq!(
            session.account(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
        assert_eq!(session.chain_id(), 31337);
        assert!(session.is_active());
        session.disconnect();
        assert!(!session.is_active());
        assert!(!*activity.borrow());
    }

    #[tokio::test]
    async fn test_invalid_private_key() {
        let config = Config::default();
        assert!(WalletSession::from_private_key(&config, "not-a-key").await.is_err());
    }
}
