//! Common types shared across modules.

use crate::utils;
use ethers::prelude::*;
use serde::{Deserialize, Serialize};

/// Sentinel address used for the chain's native currency.
pub const NATIVE_TOKEN_ADDRESS: &str = "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE";

/// Decimals of every EVM native currency.
pub const NATIVE_DECIMALS: u8 = 18;

/// Parsed native sentinel address.
pub fn native_token_address() -> Address {
    Address::from([0xee; 20])
}

pub fn is_native(address: Address) -> bool {
    address == native_token_address()
}

/// A token the wallet should track, before its balance is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpec {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    /// Show the token even when its balance is zero.
    #[serde(default)]
    pub force: bool,
}

impl TokenSpec {
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            decimals,
            force: false,
        }
    }

    pub fn native(symbol: impl Into<String>) -> Self {
        Self::new(native_token_address(), symbol, NATIVE_DECIMALS)
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Raw integer amount paired with its human-readable decimal form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAmount {
    pub raw: U256,
    pub normalized: String,
    pub decimals: u8,
}

impl NormalizedAmount {
    pub fn zero(decimals: u8) -> Self {
        Self::from_raw(U256::zero(), decimals)
    }

    pub fn from_raw(raw: U256, decimals: u8) -> Self {
        Self {
            raw,
            normalized: utils::format_amount(raw, decimals),
            decimals,
        }
    }

    /// Parse a user-typed decimal string. Empty input means zero.
    pub fn parse(input: &str, decimals: u8) -> anyhow::Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::zero(decimals));
        }
        let raw = utils::parse_amount(input, decimals)?;
        Ok(Self::from_raw(raw, decimals))
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }
}

/// Snapshot of one token balance held by the connected account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub raw: U256,
    pub normalized: String,
    pub force: bool,
}

impl TokenBalance {
    pub fn new(spec: &TokenSpec, raw: U256) -> Self {
        Self {
            address: spec.address,
            symbol: spec.symbol.clone(),
            decimals: spec.decimals,
            raw,
            normalized: utils::format_amount(raw, spec.decimals),
            force: spec.force,
        }
    }

    pub fn spec(&self) -> TokenSpec {
        TokenSpec {
            address: self.address,
            symbol: self.symbol.clone(),
            decimals: self.decimals,
            force: self.force,
        }
    }

    pub fn amount(&self) -> NormalizedAmount {
        NormalizedAmount {
            raw: self.raw,
            normalized: self.normalized.clone(),
            decimals: self.decimals,
        }
    }

    /// Whether the token belongs in the listing.
    pub fn is_displayable(&self) -> bool {
        !self.raw.is_zero() || self.force
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_sentinel_matches_constant() {
        let parsed: Address = NATIVE_TOKEN_ADDRESS.parse().unwrap();
        assert_eq!(parsed, native_token_address());
        assert!(is_native(parsed));
    }

    #[test]
    fn test_normalized_amount_parse_empty_is_zero() {
        let amount = NormalizedAmount::parse("  ", 6).unwrap();
        assert!(amount.is_zero());
        assert_eq!(amount.decimals, 6);
    }

    #[test]
    fn test_normalized_amount_parse_usdc() {
        let amount = NormalizedAmount::parse("12.5", 6).unwrap();
        assert_eq!(amount.raw, U256::from(12_500_000u64));
        assert_eq!(amount.normalized, "12.5");
    }

    #[test]
    fn test_token_balance_displayable() {
        let spec = TokenSpec::new(Address::repeat_byte(1), "DAI", 18);
        assert!(!TokenBalance::new(&spec, U256::zero()).is_displayable());
        assert!(TokenBalance::new(&spec, U256::one()).is_displayable());
        assert!(TokenBalance::new(&spec.forced(), U256::zero()).is_displayable());
    }
}
