//! Where the set of tracked tokens comes from: token list files (Uniswap
//! JSON or `address,symbol,decimals` CSV) plus individually added tokens.

use crate::types::{is_native, TokenSpec};
use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct TokenListFile {
    #[serde(default)]
    name: String,
    tokens: Vec<TokenListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenListEntry {
    chain_id: u64,
    address: Address,
    symbol: String,
    decimals: u8,
}

/// Tokens from a Uniswap-style list that live on `chain_id`.
pub fn parse_json_list(contents: &str, chain_id: u64) -> Result<Vec<TokenSpec>> {
    let list: TokenListFile = serde_json::from_str(contents).context("Invalid token list JSON")?;
    let tokens: Vec<TokenSpec> = list
        .tokens
        .into_iter()
        .filter(|t| t.chain_id == chain_id)
        .map(|t| TokenSpec::new(t.address, t.symbol, t.decimals))
        .collect();
    info!(
        "Token list '{}': {} token(s) on chain {}",
        list.name,
        tokens.len(),
        chain_id
    );
    Ok(tokens)
}

/// Rows of `address,symbol,decimals`. A header row is detected and skipped;
/// malformed rows are skipped with a warning.
pub fn parse_csv_list(contents: &str) -> Result<Vec<TokenSpec>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(contents.as_bytes());

    let mut tokens = Vec::new();
    let mut invalid_count = 0;
    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("CSV line {}", line_num + 1))?;
        let address = record.get(0).unwrap_or("").trim_matches('"');
        if line_num == 0 && address.eq_ignore_ascii_case("address") {
            continue;
        }
        if address.is_empty() {
            continue;
        }

        let parsed = address.parse::<Address>().ok().zip(
            record
                .get(2)
                .and_then(|d| d.trim_matches('"').parse::<u8>().ok()),
        );
        match parsed {
            Some((address, decimals)) => {
                let symbol = record.get(1).unwrap_or("").trim_matches('"');
                tokens.push(TokenSpec::new(address, symbol, decimals));
            }
            None => invalid_count += 1,
        }
    }

    if invalid_count > 0 {
        warn!("Skipped {} invalid token row(s)", invalid_count);
    }
    Ok(tokens)
}

/// Load a list file, picking the parser from its extension.
pub fn load_list(path: &Path, chain_id: u64) -> Result<Vec<TokenSpec>> {
    let contents = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "json" => parse_json_list(&contents, chain_id),
        Some(ext) if ext == "csv" => parse_csv_list(&contents),
        _ => Err(anyhow!("Unsupported token list format: {:?}", path)),
    }
}

/// Merge token sources by address. Later sources win on metadata, and the
/// force flag sticks once any source sets it. The native sentinel is left
/// out; callers track it separately.
pub fn merge_tokens<I>(sources: I) -> Vec<TokenSpec>
where
    I: IntoIterator<Item = Vec<TokenSpec>>,
{
    let mut merged: Vec<TokenSpec> = Vec::new();
    for token in sources.into_iter().flatten() {
        if is_native(token.address) {
            continue;
        }
        match merged.iter_mut().find(|t| t.address == token.address) {
            Some(existing) => {
                let force = existing.force || token.force;
                *existing = token;
                existing.force = force;
            }
            None => merged.push(token),
        }
    }
    merged
}

/// Every token to track on `chain_id`: all configured lists, then custom
/// tokens. A list that fails to load is skipped.
pub fn collect_tokens(list_paths: &[impl AsRef<Path>], custom: &[TokenSpec], chain_id: u64) -> Vec<TokenSpec> {
    let mut sources = Vec::with_capacity(list_paths.len() + 1);
    for path in list_paths {
        match load_list(path.as_ref(), chain_id) {
            Ok(tokens) => sources.push(tokens),
            Err(e) => warn!("Skipping token list {:?}: {}", path.as_ref(), e),
        }
    }
    sources.push(custom.iter().cloned().map(TokenSpec::forced).collect());
    merge_tokens(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NATIVE_TOKEN_ADDRESS;

    const LIST: &str = r#"{
        "name": "Test List",
        "tokens": [
            {"chainId": 1, "address": "0x6B175474E89094C44Da98b954EedeAC495271d0F", "symbol": "DAI", "decimals": 18, "name": "Dai"},
            {"chainId": 10, "address": "0xDA10009cBd5D07dd0CeCc66161FC93D7c9000da1", "symbol": "DAI", "decimals": 18, "name": "Dai"},
            {"chainId": 1, "address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "symbol": "USDC", "decimals": 6}
        ]
    }"#;

    // ==================== parsing tests ====================

    #[test]
    fn test_json_list_filters_by_chain() {
        let tokens = parse_json_list(LIST, 1).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].symbol, "USDC");
        assert_eq!(tokens[1].decimals, 6);
        assert!(!tokens[0].force);

        assert_eq!(parse_json_list(LIST, 10).unwrap().len(), 1);
        assert!(parse_json_list(LIST, 137).unwrap().is_empty());
    }

    #[test]
    fn test_json_list_rejects_garbage() {
        assert!(parse_json_list("[1, 2]", 1).is_err());
    }

    #[test]
    fn test_csv_list_skips_header_and_bad_rows() {
        let csv = "address,symbol,decimals\n\
                   0x6B175474E89094C44Da98b954EedeAC495271d0F, DAI, 18\n\
                   not-an-address,BAD,18\n\
                   0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48,USDC,six\n\
                   \"0xdAC17F958D2ee523a2206206994597C13D831ec7\",\"USDT\",\"6\"\n";
        let tokens = parse_csv_list(csv).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].symbol, "DAI");
        assert_eq!(tokens[1].symbol, "USDT");
        assert_eq!(tokens[1].decimals, 6);
    }

    #[test]
    fn test_load_list_unknown_extension() {
        let path = std::env::temp_dir().join(format!("token-migrator-list-{}.txt", std::process::id()));
        fs::write(&path, "x").unwrap();
        assert!(load_list(&path, 1).is_err());
        let _ = fs::remove_file(&path);
    }

    // ==================== merge tests ====================

    #[test]
    fn test_merge_dedupes_by_address_and_keeps_force() {
        let address = Address::repeat_byte(1);
        let merged = merge_tokens(vec![
            vec![TokenSpec::new(address, "A", 18).forced()],
            vec![
                TokenSpec::new(address, "A2", 6),
                TokenSpec::new(Address::repeat_byte(2), "B", 18),
            ],
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].symbol, "A2");
        assert!(merged[0].force);
    }

    #[test]
    fn test_merge_drops_native_sentinel() {
        let native: Address = NATIVE_TOKEN_ADDRESS.parse().unwrap();
        let merged = merge_tokens(vec![vec![TokenSpec::new(native, "ETH", 18)]]);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_collect_tokens_skips_missing_lists_and_forces_custom() {
        let custom = vec![TokenSpec::new(Address::repeat_byte(9), "MINE", 18)];
        let tokens = collect_tokens(&["/nonexistent/list.json"], &custom, 1);
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].force);
    }
}
