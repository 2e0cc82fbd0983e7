//! Optional donation riding along with a migration.
//!
//! The flag and the amount are kept mutually consistent by [`DonationState::reconcile`]:
//!
//! | enabled | amount | user typed | transition                     |
//! |---------|--------|------------|--------------------------------|
//! | yes     | zero   | no         | derive default (0.1% of native) |
//! | no      | > 0    | any        | enable                         |
//! | yes     | zero   | yes        | disable                        |
//! | *       | *      | *          | stable                         |

use crate::types::{NormalizedAmount, NATIVE_DECIMALS};
use ethers::types::U256;

/// Default donation is one thousandth of the native balance.
pub const DEFAULT_DONATION_DIVISOR: u64 = 1000;

/// Upper bound on reconcile passes; the table settles in at most two.
const MAX_RECONCILE_PASSES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DonationTransition {
    DeriveDefault(U256),
    Enable,
    Disable,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationState {
    enabled: bool,
    amount: NormalizedAmount,
    user_typed: bool,
}

impl Default for DonationState {
    fn default() -> Self {
        Self {
            enabled: false,
            amount: NormalizedAmount::zero(NATIVE_DECIMALS),
            user_typed: false,
        }
    }
}

pub fn default_donation(native_balance: U256) -> U256 {
    native_balance / U256::from(DEFAULT_DONATION_DIVISOR)
}

impl DonationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn amount(&self) -> &NormalizedAmount {
        &self.amount
    }

    pub fn user_typed(&self) -> bool {
        self.user_typed
    }

    /// Amount to send, zero unless the donation is enabled.
    pub fn effective_raw(&self) -> U256 {
        if self.enabled {
            self.amount.raw
        } else {
            U256::zero()
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn toggle(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.enabled
    }

    /// The user typed an amount; clamp it to the native balance.
    pub fn type_amount(&mut self, amount: NormalizedAmount, native_balance: U256) {
        self.user_typed = true;
        self.amount = if amount.raw > native_balance {
            NormalizedAmount::from_raw(native_balance, NATIVE_DECIMALS)
        } else {
            amount
        };
    }

    /// Which rule applies to the current state. First row of the table wins.
    pub fn next_transition(&self, native_balance: U256) -> DonationTransition {
        match (self.enabled, self.amount.is_zero(), self.user_typed) {
            (true, true, false) => DonationTransition::DeriveDefault(default_donation(native_balance)),
            (false, false, _) => DonationTransition::Enable,
            (true, true, true) => DonationTransition::Disable,
            _ => DonationTransition::Stable,
        }
    }

    fn apply(&mut self, transition: &DonationTransition) -> bool {
        match transition {
            DonationTransition::DeriveDefault(raw) => {
                let changed = *raw != self.amount.raw;
                self.amount = NormalizedAmount::from_raw(*raw, NATIVE_DECIMALS);
                changed
            }
            DonationTransition::Enable => {
                self.enabled = true;
                true
            }
            DonationTransition::Disable => {
                self.enabled = false;
                true
            }
            DonationTransition::Stable => false,
        }
    }

    /// Apply the table until nothing changes. Returns the transitions taken.
    pub fn reconcile(&mut self, native_balance: U256) -> Vec<DonationTransition> {
        let mut taken = Vec::new();
        for _ in 0..MAX_RECONCILE_PASSES {
            let transition = self.next_transition(native_balance);
            if !self.apply(&transition) {
                break;
            }
            taken.push(transition);
        }
        taken
    }
}
