//! Disperse contract call used to split a native payment between the
//! migration destination and the donation receiver in one transaction.

use anyhow::{anyhow, Result};
use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::prelude::*;

/// Function selector for disperseEther(address[],uint256[])
pub const DISPERSE_ETHER_SELECTOR: [u8; 4] = [0xe6, 0x3d, 0x38, 0xed];

/// disperseEther(address[] recipients, uint256[] values) payable
#[allow(deprecated)]
pub fn disperse_ether_function() -> Function {
    Function {
        name: "disperseEther".to_string(),
        inputs: vec![
            Param {
                name: "recipients".to_string(),
                kind: ParamType::Array(Box::new(ParamType::Address)),
                internal_type: None,
            },
            Param {
                name: "values".to_string(),
                kind: ParamType::Array(Box::new(ParamType::Uint(256))),
                internal_type: None,
            },
        ],
        outputs: vec![],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

/// One disperse call: recipients, their values and the exact `msg.value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisperseCall {
    pub recipients: Vec<Address>,
    pub values: Vec<U256>,
}

impl DisperseCall {
    /// Destination receives the migrated amount, receiver the donation.
    pub fn migration_with_donation(
        destination: Address,
        amount: U256,
        receiver: Address,
        donation: U256,
    ) -> Self {
        Self {
            recipients: vec![destination, receiver],
            values: vec![amount, donation],
        }
    }

    /// The contract requires msg.value to equal the sum of values.
    pub fn total_value(&self) -> Result<U256> {
        self.values
            .iter()
            .try_fold(U256::zero(), |acc, v| acc.checked_add(*v))
            .ok_or_else(|| anyhow!("Disperse total overflows uint256"))
    }

    pub fn encode(&self) -> Result<Bytes> {
        if self.recipients.len() != self.values.len() {
            return Err(anyhow!(
                "Disperse has {} recipients but {} values",
                self.recipients.len(),
                self.values.len()
            ));
        }
        let recipients: Vec<Token> = self.recipients.iter().map(|a| Token::Address(*a)).collect();
        let values: Vec<Token> = self.values.iter().map(|v| Token::Uint(*v)).collect();
        let calldata = disperse_ether_function()
            .encode_input(&[Token::Array(recipients), Token::Array(values)])?;
        Ok(calldata.into())
    }
}
