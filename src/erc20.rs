//! Minimal ERC20 ABI used by the migrator: `balanceOf` and `transfer`.

use anyhow::{anyhow, Result};
use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::prelude::*;

/// balanceOf(address) returns (uint256)
#[allow(deprecated)]
pub fn balance_of_function() -> Function {
    Function {
        name: "balanceOf".to_string(),
        inputs: vec![Param {
            name: "owner".to_string(),
            kind: ParamType::Address,
            internal_type: None,
        }],
        outputs: vec![Param {
            name: "".to_string(),
            kind: ParamType::Uint(256),
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::View,
    }
}

/// transfer(address,uint256) returns (bool)
#[allow(deprecated)]
pub fn transfer_function() -> Function {
    Function {
        name: "transfer".to_string(),
        inputs: vec![
            Param {
                name: "to".to_string(),
                kind: ParamType::Address,
                internal_type: None,
            },
            Param {
                name: "amount".to_string(),
                kind: ParamType::Uint(256),
                internal_type: None,
            },
        ],
        outputs: vec![Param {
            name: "".to_string(),
            kind: ParamType::Bool,
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::NonPayable,
    }
}

pub fn encode_balance_of(owner: Address) -> Result<Bytes> {
    let calldata = balance_of_function().encode_input(&[Token::Address(owner)])?;
    Ok(calldata.into())
}

pub fn decode_balance_of(output: &[u8]) -> Result<U256> {
    let tokens = balance_of_function().decode_output(output)?;
    match tokens.first() {
        Some(Token::Uint(value)) => Ok(*value),
        _ => Err(anyhow!("balanceOf returned unexpected data")),
    }
}

pub fn encode_transfer(to: Address, amount: U256) -> Result<Bytes> {
    let calldata = transfer_function().encode_input(&[Token::Address(to), Token::Uint(amount)])?;
    Ok(calldata.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_selector() {
        // keccak256("transfer(address,uint256)") = 0xa9059cbb...
        let calldata = encode_transfer(Address::repeat_byte(0x11), U256::from(5u64)).unwrap();
        assert_eq!(&calldata[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(calldata.len(), 4 + 32 * 2);
        assert_eq!(calldata[4 + 31 + 32], 5);
    }

    #[test]
    fn test_balance_of_selector() {
        // keccak256("balanceOf(address)") = 0x70a08231...
        let calldata = encode_balance_of(Address::repeat_byte(0x22)).unwrap();
        assert_eq!(&calldata[..4], &[0x70, 0xa0, 0x82, 0x31]);
    }

    #[test]
    fn test_decode_balance_of() {
        let mut output = [0u8; 32];
        output[31] = 0x2a;
        assert_eq!(decode_balance_of(&output).unwrap(), U256::from(42u64));
    }

    #[test]
    fn test_decode_balance_of_empty_fails() {
        assert!(decode_balance_of(&[]).is_err());
    }
}
