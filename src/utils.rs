//! Amount formatting and parsing helpers.

use ethers::types::{Address, U256};
use anyhow::{anyhow, Result};

pub fn format_ether(wei: U256) -> String {
    ethers::utils::format_units(wei, "ether").unwrap_or_else(|_| "0.0".to_string())
}

/// Format a raw token amount with the given decimals, dropping trailing zeros
pub fn format_amount(raw: U256, decimals: u8) -> String {
    let full = ethers::utils::format_units(raw, decimals as u32)
        .unwrap_or_else(|_| raw.to_string());
    if !full.contains('.') {
        return full;
    }
    let trimmed = full.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a decimal string into a raw amount scaled by `decimals`
///
/// Digits beyond the token's precision are dropped rather than rejected,
/// matching what a numeric input field lets the user type.
///
/// # Errors
/// Returns an error for negative values or anything that is not a decimal number
pub fn parse_amount(input: &str, decimals: u8) -> Result<U256> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Amount cannot be empty"));
    }
    if trimmed.starts_with('-') {
        return Err(anyhow!("Amount cannot be negative: {}", trimmed));
    }
    if let Some((whole, fraction)) = trimmed.split_once('.') {
        if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(anyhow!("Invalid amount '{}': expected decimal digits", trimmed));
        }
    }

    let truncated = match trimmed.split_once('.') {
        Some((whole, fraction)) if fraction.len() > decimals as usize => {
            let fraction = &fraction[..decimals as usize];
            if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{}.{}", whole, fraction)
            }
        }
        _ => trimmed.to_string(),
    };

    ethers::utils::parse_units(truncated.as_str(), decimals as u32)
        .map(|pu| pu.into())
        .map_err(|e| anyhow!("Invalid amount '{}': {}", trimmed, e))
}

/// Parse a string representing ETH to Wei
pub fn parse_eth_str_to_wei(input: &str) -> Result<U256> {
    parse_amount(input, 18)
}

/// Shorten an address for display, e.g. `0x1234567890…abcdef`
pub fn truncate_hex(address: Address, size: usize) -> String {
    let encoded = hex::encode(address.as_bytes());
    if size == 0 || size * 2 >= encoded.len() {
        return format!("0x{}", encoded);
    }
    format!("0x{}…{}", &encoded[..size], &encoded[encoded.len() - size..])
}
