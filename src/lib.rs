pub mod balance;
pub mod chain;
pub mod config;
pub mod disperse;
pub mod donation;
pub mod erc20;
pub mod error;
pub mod migration;
pub mod operation_log;
pub mod selection;
pub mod session;
pub mod token_list;
pub mod transaction;
pub mod types;
pub mod user_settings;
pub mod utils;
