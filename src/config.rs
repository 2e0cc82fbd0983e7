use anyhow::{anyhow, Result};
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};
use std::env;
use std::sync::Arc;
use url::Url;

/// Disperse.app contract, deployed at the same address on every supported chain
pub const DISPERSE_ADDRESS: &str = "0xD152f549545093347A162Dce210e7293f1452150";

/// Default receiver of migration donations (override with `RECEIVER_ADDRESS`)
pub const DONATION_RECEIVER_ADDRESS: &str = "0x5b555B6fC357434eb7bA572A87F3AcA30AB5D272";

/// A predefined EVM-compatible network with label, chain ID, native token, and default RPC.
#[derive(Clone, Debug)]
pub struct EvmNetwork {
    pub label: &'static str,
    pub chain_id: u64,
    pub native_token: &'static str,
    pub default_rpc: &'static str,
}

impl EvmNetwork {
    pub const fn new(
        label: &'static str,
        chain_id: u64,
        native_token: &'static str,
        default_rpc: &'static str,
    ) -> Self {
        Self {
            label,
            chain_id,
            native_token,
            default_rpc,
        }
    }
}

/// Networks the migrator knows default RPC endpoints for.
pub const NETWORKS: &[EvmNetwork] = &[
    EvmNetwork::new("Ethereum", 1, "ETH", "https://ethereum-rpc.publicnode.com"),
    EvmNetwork::new("Sepolia", 11155111, "ETH", "https://ethereum-sepolia-rpc.publicnode.com"),
    EvmNetwork::new("Optimism", 10, "ETH", "https://mainnet.optimism.io"),
    EvmNetwork::new("Base", 8453, "ETH", "https://mainnet.base.org"),
    EvmNetwork::new("Arbitrum One", 42161, "ETH", "https://arb1.arbitrum.io/rpc"),
    EvmNetwork::new("Polygon", 137, "POL", "https://polygon-rpc.com"),
    EvmNetwork::new("Gnosis Chain", 100, "xDAI", "https://rpc.gnosischain.com"),
    EvmNetwork::new("BNB Chain", 56, "BNB", "https://bsc-dataseed.binance.org"),
    EvmNetwork::new("Fantom", 250, "FTM", "https://rpc.ftm.tools"),
];

/// Find a network by chain ID
pub fn find_network_by_chain_id(chain_id: u64) -> Option<&'static EvmNetwork> {
    NETWORKS.iter().find(|n| n.chain_id == chain_id)
}

/// Get the block explorer URL for a given chain ID
pub fn get_block_explorer_url(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        1 => Some("https://etherscan.io"),
        11155111 => Some("https://sepolia.etherscan.io"),
        10 => Some("https://optimistic.etherscan.io"),
        8453 => Some("https://basescan.org"),
        42161 => Some("https://arbiscan.io"),
        137 => Some("https://polygonscan.com"),
        100 => Some("https://gnosisscan.io"),
        56 => Some("https://bscscan.com"),
        250 => Some("https://ftmscan.com"),
        _ => None,
    }
}

/// Get the full URL to view a transaction on the block explorer
pub fn get_tx_explorer_url(chain_id: u64, tx_hash: &str) -> Option<String> {
    get_block_explorer_url(chain_id).map(|base| format!("{}/tx/{}", base, tx_hash))
}

#[derive(Clone, Debug)]
pub struct Config {
    pub rpc_url: String,
    pub chain_id: u64,
    pub disperse_address: Address,
    pub donation_receiver: Address,
    /// Extra native balance that must remain after a combined disperse.
    /// Zero keeps the plain `balance > migration + donation` rule.
    pub disperse_reserve: U256,
}

impl Config {
    pub fn new(rpc_url: String, chain_id: u64) -> Self {
        let donation_receiver = env::var("RECEIVER_ADDRESS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or_else(default_donation_receiver);

        Self {
            rpc_url,
            chain_id,
            disperse_address: default_disperse_address(),
            donation_receiver,
            disperse_reserve: U256::zero(),
        }
    }

    pub fn from_network(network: &EvmNetwork) -> Self {
        Self::new(network.default_rpc.to_string(), network.chain_id)
    }

    /// Build a config for a chain, preferring a user RPC override over the built-in one
    pub fn for_chain(chain_id: u64, rpc_override: Option<&str>) -> Result<Self> {
        match (rpc_override, find_network_by_chain_id(chain_id)) {
            (Some(rpc), _) => Ok(Self::new(rpc.to_string(), chain_id)),
            (None, Some(network)) => Ok(Self::from_network(network)),
            (None, None) => Err(anyhow!(
                "No default RPC for chain {}. Set a custom RPC URL for it",
                chain_id
            )),
        }
    }

    pub fn native_token(&self) -> &str {
        find_network_by_chain_id(self.chain_id)
            .map(|n| n.native_token)
            .unwrap_or("ETH")
    }

    pub fn network_label(&self) -> &str {
        find_network_by_chain_id(self.chain_id)
            .map(|n| n.label)
            .unwrap_or("Unknown")
    }

    pub async fn get_provider(&self) -> Result<Arc<Provider<Http>>> {
        let url = Url::parse(&self.rpc_url)?;
        let provider = Provider::<Http>::try_from(url.as_str())?;
        Ok(Arc::new(provider))
    }
}

impl Default for Config {
    fn default() -> Self {
        if let Some(mainnet) = find_network_by_chain_id(1) {
            Self::from_network(mainnet)
        } else {
            Self::new("https://ethereum-rpc.publicnode.com".to_string(), 1)
        }
    }
}

fn default_disperse_address() -> Address {
    DISPERSE_ADDRESS
        .parse()
        .unwrap_or_else(|_| Address::zero())
}

fn default_donation_receiver() -> Address {
    DONATION_RECEIVER_ADDRESS
        .parse()
        .unwrap_or_else(|_| Address::zero())
}
