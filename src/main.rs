use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ethers::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use token_migrator::{
    balance::WalletBalances,
    chain::ChainOperations,
    config::{get_tx_explorer_url, Config},
    migration::Migrator,
    operation_log::OperationLog,
    session::WalletSession,
    token_list,
    transaction::TxStatus,
    types::{is_native, native_token_address, TokenSpec},
    user_settings::UserSettings,
    utils,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "token-migrator", version, about = "Move tokens and native currency to another wallet")]
struct Cli {
    /// Chain to use; defaults to the saved selection
    #[arg(long, env = "CHAIN_ID")]
    chain_id: Option<u64>,

    /// RPC endpoint overriding the saved or built-in one
    #[arg(long, env = "RPC_URL")]
    rpc_url: Option<String>,

    /// Sign with a Ledger instead of PRIVATE_KEY
    #[arg(long)]
    ledger: bool,

    /// Ledger Live account index
    #[arg(long)]
    ledger_index: Option<u32>,

    /// Disperse contract to use instead of the canonical deployment
    #[arg(long, env = "DISPERSE_ADDRESS")]
    disperse_address: Option<String>,

    /// Native amount that must stay behind after a combined disperse
    #[arg(long)]
    disperse_reserve: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List balances of tracked tokens
    Balances,
    /// Migrate selected tokens to another address
    Migrate {
        /// Destination address
        #[arg(long)]
        to: String,
        /// `<address>` or `<address>=<amount>`; repeatable
        #[arg(long = "token")]
        tokens: Vec<String>,
        /// Select every ERC20 with a balance
        #[arg(long)]
        all: bool,
        /// Include native currency, optionally with an amount
        #[arg(long, num_args = 0..=1, default_missing_value = "max")]
        native: Option<String>,
        /// Add a donation, optionally with an amount
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        donate: Option<String>,
    },
    /// Send only the donation
    Donate { amount: Option<String> },
    /// Print the operation log
    Log,
    /// Track a custom token even when its balance is zero
    AddToken {
        address: String,
        symbol: String,
        decimals: u8,
    },
    /// Stop tracking a custom token
    RemoveToken { address: String },
    /// Track every token from a JSON or CSV list file
    AddList { path: PathBuf },
    /// Save an RPC endpoint for a chain; an empty URL restores the built-in one
    SetRpc { chain_id: u64, url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut settings = UserSettings::load();

    match &cli.command {
        Command::Log => {
            print!("{}", OperationLog::default().read()?);
            return Ok(());
        }
        Command::AddToken {
            address,
            symbol,
            decimals,
        } => {
            let address: Address = address.parse().context("Invalid token address")?;
            settings.add_custom_token(TokenSpec::new(address, symbol.as_str(), *decimals));
            return settings.save();
        }
        Command::RemoveToken { address } => {
            let address: Address = address.parse().context("Invalid token address")?;
            if !settings.remove_custom_token(address) {
                warn!("{:?} is not a custom token", address);
            }
            return settings.save();
        }
        Command::AddList { path } => {
            if !settings.token_lists.contains(path) {
                settings.token_lists.push(path.clone());
            }
            return settings.save();
        }
        Command::SetRpc { chain_id, url } => {
            settings.set_custom_rpc(*chain_id, url.clone());
            return settings.save();
        }
        _ => {}
    }

    let chain_id = cli.chain_id.unwrap_or(settings.selected_chain_id);
    let rpc = cli.rpc_url.clone().or_else(|| settings.get_custom_rpc(chain_id).cloned());
    let mut config = Config::for_chain(chain_id, rpc.as_deref())?;
    if let Some(address) = &cli.disperse_address {
        config.disperse_address = address.parse().context("Invalid disperse address")?;
    }
    if let Some(reserve) = &cli.disperse_reserve {
        config.disperse_reserve = utils::parse_eth_str_to_wei(reserve)?;
    }
    info!("Using {} (chain {}) via {}", config.network_label(), config.chain_id, config.rpc_url);

    if cli.ledger || settings.use_ledger {
        let index = cli.ledger_index.unwrap_or(settings.ledger_index);
        let session = WalletSession::from_ledger(&config, index).await?;
        run(session, config, &settings, cli.command).await
    } else {
        let session = WalletSession::from_env(&config).await?;
        run(session, config, &settings, cli.command).await
    }
}

async fn run<M: Middleware + 'static>(
    mut session: WalletSession<M>,
    config: Config,
    settings: &UserSettings,
    command: Command,
) -> Result<()> {
    if let Some(actual) = session.sync_chain_id().await? {
        return Err(anyhow!(
            "RPC serves chain {} but chain {} is selected",
            actual,
            config.chain_id
        ));
    }

    let tokens = token_list::collect_tokens(settings.token_lists.as_slice(), &settings.custom_tokens, config.chain_id);
    let balances = WalletBalances::new(Arc::new(session.balance_ledger()));
    let chain: Arc<dyn ChainOperations> = Arc::new(session.chain_operations(&config));
    let migrator = Migrator::from_config(&config, chain, balances)
        .with_operation_log(OperationLog::default())
        .with_wallet_activity(session.activity());
    migrator.load_balances(&tokens).await?;

    match command {
        Command::Balances => {
            print_balances(&migrator, session.account()).await;
            Ok(())
        }
        Command::Migrate {
            to,
            tokens,
            all,
            native,
            donate,
        } => {
            let destination: Address = to.parse().context("Invalid destination address")?;
            migrator.set_destination(destination).await;

            if all {
                let book = migrator.balances().snapshot().await;
                let held: Vec<Address> = book
                    .displayable()
                    .iter()
                    .filter(|b| !is_native(b.address) && !b.raw.is_zero())
                    .map(|b| b.address)
                    .collect();
                migrator.selection().update(|s| held.iter().for_each(|a| s.select(*a))).await;
            }

            for entry in &tokens {
                let (address, amount) = match entry.split_once('=') {
                    Some((address, amount)) => (address, Some(amount)),
                    None => (entry.as_str(), None),
                };
                let address: Address = address.trim().parse().with_context(|| format!("Invalid token {}", entry))?;
                migrator.selection().update(|s| s.select(address)).await;
                if let Some(amount) = amount {
                    migrator.set_amount(address, amount).await?;
                }
            }

            if let Some(amount) = native {
                let native = native_token_address();
                migrator.selection().update(|s| s.select(native)).await;
                if amount != "max" {
                    migrator.set_amount(native, &amount).await?;
                }
            }

            if let Some(amount) = donate {
                set_donation(&migrator, &amount).await?;
            }

            let handle = migrator.migrate_selected().await?;
            for call in handle.calls() {
                println!("issued   {}", call.describe());
            }
            report(config.chain_id, handle.wait_all().await)
        }
        Command::Donate { amount } => {
            set_donation(&migrator, amount.as_deref().unwrap_or("")).await?;
            let op = migrator.donate().await?;
            let call = op.call.clone();
            report(config.chain_id, vec![(call, op.wait().await)])
        }
        Command::Log
        | Command::AddToken { .. }
        | Command::RemoveToken { .. }
        | Command::AddList { .. }
        | Command::SetRpc { .. } => Ok(()),
    }
}

/// Empty input turns the donation on with its default amount.
async fn set_donation(migrator: &Migrator, amount: &str) -> Result<()> {
    if amount.trim().is_empty() {
        if !migrator.donation().await.is_enabled() {
            migrator.toggle_donation().await;
        }
    } else {
        migrator.type_donation(amount).await?;
    }
    Ok(())
}

async fn print_balances(migrator: &Migrator, account: Address) {
    let book = migrator.balances().snapshot().await;
    println!("Balances of {:?}", account);
    for balance in book.displayable() {
        println!(
            "{:<10} {:>28}  {}",
            balance.symbol,
            balance.normalized,
            utils::truncate_hex(balance.address, 6)
        );
    }
}

fn report(chain_id: u64, results: Vec<(token_migrator::chain::ChainCall, TxStatus)>) -> Result<()> {
    let mut failed = 0;
    for (call, status) in &results {
        match status {
            TxStatus::Success(receipt) => {
                let hash = format!("{:?}", receipt.tx_hash);
                let link = get_tx_explorer_url(chain_id, &hash).unwrap_or(hash);
                println!("success  {}  {}", call.describe(), link);
            }
            TxStatus::Error(e) => {
                failed += 1;
                println!("error    {}  {}", call.describe(), e);
            }
            other => {
                warn!("{} left in state {:?}", call.label(), other);
            }
        }
    }
    if failed > 0 {
        return Err(anyhow!("{} of {} operation(s) failed", failed, results.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== settings subcommand tests ====================

    #[test]
    fn test_parse_set_rpc() {
        let cli = Cli::try_parse_from(["token-migrator", "set-rpc", "10", "https://my-node.example"]).unwrap();
        match cli.command {
            Command::SetRpc { chain_id, url } => {
                assert_eq!(chain_id, 10);
                assert_eq!(url, "https://my-node.example");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_set_rpc_empty_url_clears() {
        let cli = Cli::try_parse_from(["token-migrator", "set-rpc", "10", ""]).unwrap();
        let mut settings = UserSettings::default();
        settings.set_custom_rpc(10, "https://old.example".to_string());
        if let Command::SetRpc { chain_id, url } = cli.command {
            settings.set_custom_rpc(chain_id, url);
        }
        assert!(settings.get_custom_rpc(10).is_none());
    }

    #[test]
    fn test_parse_remove_token() {
        let cli = Cli::try_parse_from([
            "token-migrator",
            "remove-token",
            "0x6B175474E89094C44Da98b954EedeAC495271d0F",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::RemoveToken { .. }));
    }
}
