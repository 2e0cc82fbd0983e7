//! Selection state: which tokens are marked for migration, how much of
//! each, and where they go.

use crate::types::{NormalizedAmount, TokenBalance};
use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    /// Insertion ordered so a migration run issues transfers deterministically
    selected: Vec<Address>,
    amounts: HashMap<Address, NormalizedAmount>,
    destination: Option<Address>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_selected(&self, token: Address) -> bool {
        self.selected.contains(&token)
    }

    pub fn selected(&self) -> &[Address] {
        &self.selected
    }

    /// Flip membership of `token`. Returns whether it is now selected.
    pub fn toggle(&mut self, token: Address) -> bool {
        if let Some(pos) = self.selected.iter().position(|a| *a == token) {
            self.selected.remove(pos);
            false
        } else {
            self.selected.push(token);
            true
        }
    }

    pub fn select(&mut self, token: Address) {
        if !self.is_selected(token) {
            self.selected.push(token);
        }
    }

    pub fn deselect(&mut self, token: Address) {
        self.selected.retain(|a| *a != token);
    }

    pub fn amount(&self, token: Address) -> Option<&NormalizedAmount> {
        self.amounts.get(&token)
    }

    /// Raw amount to migrate, zero if never set.
    pub fn amount_raw(&self, token: Address) -> U256 {
        self.amounts.get(&token).map(|a| a.raw).unwrap_or_default()
    }

    /// Store an amount for `token`, clamped to the current balance.
    pub fn set_amount(&mut self, token: Address, amount: NormalizedAmount, balance: &TokenBalance) -> &NormalizedAmount {
        let stored = if amount.raw > balance.raw {
            balance.amount()
        } else {
            amount
        };
        self.amounts.insert(token, stored);
        &self.amounts[&token]
    }

    pub fn set_max(&mut self, balance: &TokenBalance) {
        self.amounts.insert(balance.address, balance.amount());
    }

    /// First sighting of a token defaults its amount to the full balance.
    pub fn init_amount(&mut self, balance: &TokenBalance) {
        self.amounts
            .entry(balance.address)
            .or_insert_with(|| balance.amount());
    }

    /// The active chain changed: every amount becomes the fresh balance.
    pub fn reset_amounts<'a>(&mut self, balances: impl IntoIterator<Item = &'a TokenBalance>) {
        self.amounts.clear();
        for balance in balances {
            self.amounts.insert(balance.address, balance.amount());
        }
    }

    /// Post-transaction reconciliation with freshly fetched balances.
    pub fn apply_refreshed(&mut self, updated: &HashMap<Address, TokenBalance>) {
        for (address, balance) in updated {
            self.amounts.insert(*address, balance.amount());
        }
    }

    pub fn destination(&self) -> Option<Address> {
        self.destination
    }

    pub fn set_destination(&mut self, destination: Address) {
        self.destination = Some(destination);
    }
}

/// Shared handle to the selection state with a revision counter observers
/// can wait on.
#[derive(Clone)]
pub struct SelectionStore {
    state: Arc<Mutex<SelectionState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for SelectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(SelectionState::new())),
            revision: Arc::new(revision),
        }
    }

    /// Receiver that changes every time the state is mutated
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Apply several mutations as one update with a single revision bump
    pub async fn update<R>(&self, f: impl FnOnce(&mut SelectionState) -> R) -> R {
        let mut state = self.state.lock().await;
        let result = f(&mut state);
        self.revision.send_modify(|r| *r += 1);
        result
    }

    pub async fn snapshot(&self) -> SelectionState {
        self.state.lock().await.clone()
    }

    pub async fn toggle(&self, token: Address) -> bool {
        self.update(|s| s.toggle(token)).await
    }

    pub async fn set_amount(&self, token: Address, amount: NormalizedAmount, balance: &TokenBalance) -> NormalizedAmount {
        self.update(|s| s.set_amount(token, amount, balance).clone()).await
    }

    pub async fn set_destination(&self, destination: Address) {
        self.update(|s| s.set_destination(destination)).await
    }

    pub async fn is_selected(&self, token: Address) -> bool {
        self.state.lock().await.is_selected(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenSpec;

    fn usdc_balance(raw: u64) -> TokenBalance {
        let spec = TokenSpec::new(Address::repeat_byte(0x0c), "USDC", 6);
        TokenBalance::new(&spec, U256::from(raw))
    }

    // ==================== toggle tests ====================

    #[test]
    fn test_toggle_twice_restores_membership() {
        let mut state = SelectionState::new();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        state.toggle(b);

        assert!(state.toggle(a));
        assert!(!state.toggle(a));
        assert_eq!(state.selected(), &[b]);
    }

    #[test]
    fn test_select_is_idempotent() {
        let mut state = SelectionState::new();
        let a = Address::repeat_byte(1);
        state.select(a);
        state.select(a);
        assert_eq!(state.selected().len(), 1);
    }

    #[test]
    fn test_selection_keeps_insertion_order() {
        let mut state = SelectionState::new();
        let tokens: Vec<Address> = (1..=4).map(Address::repeat_byte).collect();
        for t in &tokens {
            state.toggle(*t);
        }
        state.deselect(tokens[1]);
        assert_eq!(state.selected(), &[tokens[0], tokens[2], tokens[3]]);
    }

    // ==================== amount tests ====================

    #[test]
    fn test_set_amount_clamps_to_balance() {
        let mut state = SelectionState::new();
        let balance = usdc_balance(5_000_000);
        let too_much = NormalizedAmount::parse("7", 6).unwrap();

        let stored = state.set_amount(balance.address, too_much, &balance).clone();
        assert_eq!(stored.raw, balance.raw);
        assert_eq!(stored.normalized, "5");
    }

    #[test]
    fn test_clamping_is_idempotent() {
        let mut state = SelectionState::new();
        let balance = usdc_balance(5_000_000);
        let clamped = state
            .set_amount(balance.address, NormalizedAmount::parse("9", 6).unwrap(), &balance)
            .clone();
        let again = state.set_amount(balance.address, clamped.clone(), &balance).clone();
        assert_eq!(clamped, again);
    }

    #[test]
    fn test_set_amount_within_balance_kept() {
        let mut state = SelectionState::new();
        let balance = usdc_balance(5_000_000);
        state.set_amount(balance.address, NormalizedAmount::parse("1.5", 6).unwrap(), &balance);
        assert_eq!(state.amount_raw(balance.address), U256::from(1_500_000u64));
    }

    #[test]
    fn test_amount_raw_defaults_to_zero() {
        assert!(SelectionState::new().amount_raw(Address::zero()).is_zero());
    }

    #[test]
    fn test_init_amount_does_not_overwrite() {
        let mut state = SelectionState::new();
        let balance = usdc_balance(5_000_000);
        state.set_amount(balance.address, NormalizedAmount::parse("1", 6).unwrap(), &balance);
        state.init_amount(&balance);
        assert_eq!(state.amount_raw(balance.address), U256::from(1_000_000u64));

        let other = TokenBalance::new(&TokenSpec::new(Address::repeat_byte(9), "X", 18), U256::from(3u64));
        state.init_amount(&other);
        assert_eq!(state.amount_raw(other.address), U256::from(3u64));
    }

    #[test]
    fn test_reset_amounts_uses_fresh_balances() {
        let mut state = SelectionState::new();
        let old = usdc_balance(5_000_000);
        state.set_amount(old.address, NormalizedAmount::parse("1", 6).unwrap(), &old);

        let fresh = usdc_balance(2_000_000);
        state.reset_amounts([&fresh]);
        assert_eq!(state.amount_raw(fresh.address), U256::from(2_000_000u64));
    }

    #[test]
    fn test_apply_refreshed_overwrites_amounts() {
        let mut state = SelectionState::new();
        let balance = usdc_balance(5_000_000);
        state.set_max(&balance);
        let mut updated = HashMap::new();
        updated.insert(balance.address, usdc_balance(0));
        state.apply_refreshed(&updated);
        assert!(state.amount_raw(balance.address).is_zero());
    }

    // ==================== SelectionStore tests ====================

    #[tokio::test]
    async fn test_store_bumps_revision_once_per_update() {
        let store = SelectionStore::new();
        let mut rx = store.subscribe();
        let a = Address::repeat_byte(1);

        store
            .update(|s| {
                s.toggle(a);
                s.set_destination(Address::repeat_byte(0xde));
            })
            .await;
        assert_eq!(store.revision(), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);

        assert!(!store.toggle(a).await);
        assert_eq!(store.revision(), 2);
    }

    #[tokio::test]
    async fn test_store_snapshot_is_detached() {
        let store = SelectionStore::new();
        let a = Address::repeat_byte(1);
        store.toggle(a).await;
        let snapshot = store.snapshot().await;
        store.toggle(a).await;
        assert!(snapshot.is_selected(a));
        assert!(!store.is_selected(a).await);
    }
}
