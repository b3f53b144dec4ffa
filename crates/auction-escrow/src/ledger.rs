//! The escrow ledger: per-account collateral, nonces and activity heights.
//!
//! The ledger keeps two keyed tables, escrow-by-account and withdrawal-by-account, plus the
//! allowances used by [`EscrowLedger::transfer_from`]. The ERC20-style balance of an account and
//! its escrow `total` are the same field, so the two views cannot diverge.
//!
//! Invariants:
//! - the sum of all `total`s equals [`EscrowLedger::total_supply`] whenever no settlement holds
//!   the ledger;
//! - `escrowed <= total` for every account, so the spendable balance is never negative;
//! - `nonce` never decreases.

use alloy_primitives::{
    map::{AddressHashMap, HashMap},
    Address, U256,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{constants, EscrowError};

/// The escrow record of one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowAccount {
    /// Collateral held for the account.
    pub total: U256,
    /// The last nonce the account used.
    pub nonce: u64,
    /// The block height of the account's last accepted activity.
    pub last_accessed: u64,
}

/// A time-locked withdrawal reservation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRecord {
    /// Collateral reserved for the outstanding withdrawal. It is not spendable.
    pub escrowed: U256,
    /// The block at which the withdrawal was requested.
    pub requested_at: u64,
}

/// Collateral bookkeeping shared by all solvers.
#[derive(Debug, Clone)]
pub struct EscrowLedger {
    accounts: AddressHashMap<EscrowAccount>,
    withdrawals: AddressHashMap<WithdrawalRecord>,
    allowances: HashMap<(Address, Address), U256>,
    /// Tracked collateral pool.
    pool: U256,
    /// Cooldown in blocks after an account's last activity.
    escrow_duration: u64,
    /// Set while a settlement holds the ledger.
    locked: bool,
}

impl Default for EscrowLedger {
    fn default() -> Self {
        Self::new(constants::ledger::ESCROW_DURATION)
    }
}

impl EscrowLedger {
    /// Creates an empty ledger with the given withdrawal cooldown.
    pub fn new(escrow_duration: u64) -> Self {
        Self {
            accounts: AddressHashMap::default(),
            withdrawals: AddressHashMap::default(),
            allowances: HashMap::default(),
            pool: U256::ZERO,
            escrow_duration,
            locked: false,
        }
    }

    /// The withdrawal cooldown in blocks.
    pub const fn escrow_duration(&self) -> u64 {
        self.escrow_duration
    }

    /// Whether a settlement currently holds the ledger.
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub(crate) fn unlock(&mut self) {
        self.locked = false;
    }

    fn ensure_unlocked(&self) -> Result<(), EscrowError> {
        if self.locked {
            return Err(EscrowError::SettlementInProgress);
        }
        Ok(())
    }
}

impl EscrowLedger {
    /// Returns the escrow record of `account`. Unknown accounts have an empty record.
    pub fn account(&self, account: Address) -> EscrowAccount {
        self.accounts.get(&account).copied().unwrap_or_default()
    }

    /// Returns the withdrawal reservation of `account`.
    pub fn withdrawal(&self, account: Address) -> WithdrawalRecord {
        self.withdrawals.get(&account).copied().unwrap_or_default()
    }

    /// The collateral held for `account`.
    pub fn balance_of(&self, account: Address) -> U256 {
        self.account(account).total
    }

    /// The collateral of `account` not reserved for a withdrawal.
    pub fn spendable(&self, account: Address) -> U256 {
        self.balance_of(account).saturating_sub(self.withdrawal(account).escrowed)
    }

    /// The nonce `account` must use next. Saturates once the nonce space is exhausted.
    pub fn next_nonce(&self, account: Address) -> u64 {
        self.account(account).nonce.saturating_add(1)
    }

    /// The block height of `account`'s last accepted activity.
    pub fn last_active(&self, account: Address) -> u64 {
        self.account(account).last_accessed
    }

    /// The total collateral tracked by the ledger.
    pub const fn total_supply(&self) -> U256 {
        self.pool
    }

    /// The amount `spender` may move out of `owner`'s collateral.
    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances.get(&(owner, spender)).copied().unwrap_or_default()
    }

    /// The first block at which `account` may move collateral out again.
    pub fn unlocks_at(&self, account: Address) -> u64 {
        self.account(account).last_accessed.saturating_add(self.escrow_duration)
    }
}

impl EscrowLedger {
    /// Credits `amount` to `account`. Returns the new balance.
    pub fn deposit(&mut self, account: Address, amount: U256) -> Result<U256, EscrowError> {
        self.ensure_unlocked()?;
        self.credit(account, amount)?;
        let total = self.balance_of(account);
        debug!(target: "escrow::ledger", %account, %amount, %total, "deposit");
        Ok(total)
    }

    /// Withdraws `amount` of spendable collateral from `account` and returns the amount paid out.
    pub fn withdraw(
        &mut self,
        account: Address,
        amount: U256,
        block: u64,
    ) -> Result<U256, EscrowError> {
        self.ensure_unlocked()?;
        self.ensure_spendable(account, amount)?;
        self.ensure_cooled_down(account, block)?;
        self.debit(account, amount);
        self.touch(account, block);
        debug!(target: "escrow::ledger", %account, %amount, block, "withdraw");
        Ok(amount)
    }

    /// Moves `amount` of collateral from `from` to `to`.
    pub fn transfer(
        &mut self,
        from: Address,
        to: Address,
        amount: U256,
        block: u64,
    ) -> Result<(), EscrowError> {
        self.ensure_unlocked()?;
        self.move_collateral(from, to, amount, block)
    }

    /// Moves `amount` of `from`'s collateral to `to` on behalf of `spender`.
    pub fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
        block: u64,
    ) -> Result<(), EscrowError> {
        self.ensure_unlocked()?;
        let allowance = self.allowance(from, spender);
        if allowance < amount {
            return Err(EscrowError::InsufficientAllowance {
                owner: from,
                spender,
                requested: amount,
            });
        }
        self.move_collateral(from, to, amount, block)?;
        if allowance != U256::MAX {
            self.allowances.insert((from, spender), allowance - amount);
        }
        Ok(())
    }

    /// Allows `spender` to move up to `amount` of `owner`'s collateral.
    pub fn approve(
        &mut self,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), EscrowError> {
        self.ensure_unlocked()?;
        self.allowances.insert((owner, spender), amount);
        Ok(())
    }

    /// Reserves `amount` of `account`'s spendable collateral for a time-locked withdrawal.
    /// Repeated requests add to the reservation and restart its lock.
    pub fn request_withdrawal(
        &mut self,
        account: Address,
        amount: U256,
        block: u64,
    ) -> Result<WithdrawalRecord, EscrowError> {
        self.ensure_unlocked()?;
        self.ensure_spendable(account, amount)?;
        let record = self.withdrawals.entry(account).or_default();
        record.escrowed += amount;
        record.requested_at = block;
        Ok(*record)
    }

    /// Pays out the reserved withdrawal of `account` once its lock has elapsed.
    pub fn claim_withdrawal(&mut self, account: Address, block: u64) -> Result<U256, EscrowError> {
        self.ensure_unlocked()?;
        let record = self.withdrawal(account);
        if record.escrowed.is_zero() {
            return Err(EscrowError::NoPendingWithdrawal(account));
        }
        let unlocks_at = record.requested_at.saturating_add(self.escrow_duration);
        if block < unlocks_at {
            return Err(EscrowError::TooEarly { account, unlocks_at, block });
        }
        self.ensure_cooled_down(account, block)?;
        let amount = record.escrowed.min(self.balance_of(account));
        self.withdrawals.remove(&account);
        self.debit(account, amount);
        self.touch(account, block);
        debug!(target: "escrow::ledger", %account, %amount, block, "claim withdrawal");
        Ok(amount)
    }

    /// Releases the withdrawal reservation of `account` back into its spendable balance.
    pub fn cancel_withdrawal(&mut self, account: Address) -> Result<U256, EscrowError> {
        self.ensure_unlocked()?;
        let record =
            self.withdrawals.remove(&account).ok_or(EscrowError::NoPendingWithdrawal(account))?;
        Ok(record.escrowed)
    }
}

impl EscrowLedger {
    fn ensure_spendable(&self, account: Address, amount: U256) -> Result<(), EscrowError> {
        let spendable = self.spendable(account);
        if amount > spendable {
            return Err(EscrowError::InsufficientBalance { account, requested: amount, spendable });
        }
        Ok(())
    }

    fn ensure_cooled_down(&self, account: Address, block: u64) -> Result<(), EscrowError> {
        let unlocks_at = self.unlocks_at(account);
        if block < unlocks_at {
            return Err(EscrowError::TooEarly { account, unlocks_at, block });
        }
        Ok(())
    }

    fn move_collateral(
        &mut self,
        from: Address,
        to: Address,
        amount: U256,
        block: u64,
    ) -> Result<(), EscrowError> {
        self.ensure_spendable(from, amount)?;
        self.ensure_cooled_down(from, block)?;
        self.debit(from, amount);
        self.credit(to, amount)?;
        self.touch(from, block);
        debug!(target: "escrow::ledger", %from, %to, %amount, block, "transfer");
        Ok(())
    }

    fn touch(&mut self, account: Address, block: u64) {
        let record = self.accounts.entry(account).or_default();
        record.last_accessed = record.last_accessed.max(block);
    }

    /// Credits `amount` to `account` and the pool.
    pub(crate) fn credit(&mut self, account: Address, amount: U256) -> Result<(), EscrowError> {
        let pool = self.pool.checked_add(amount).ok_or(EscrowError::BalanceOverflow)?;
        let record = self.accounts.entry(account).or_default();
        record.total = record.total.checked_add(amount).ok_or(EscrowError::BalanceOverflow)?;
        self.pool = pool;
        Ok(())
    }

    /// Debits up to `amount` from `account` and the pool, shrinking a withdrawal reservation
    /// that would exceed the remaining balance. Returns the amount actually debited.
    pub(crate) fn debit(&mut self, account: Address, amount: U256) -> U256 {
        let record = self.accounts.entry(account).or_default();
        let amount = amount.min(record.total);
        record.total -= amount;
        let total = record.total;
        self.pool = self.pool.saturating_sub(amount);
        if let Some(withdrawal) = self.withdrawals.get_mut(&account) {
            withdrawal.escrowed = withdrawal.escrowed.min(total);
        }
        amount
    }

    /// Persists the sequencing fields of a verified snapshot. The nonce never moves backwards.
    pub(crate) fn update_sequencing(&mut self, account: Address, snapshot: &EscrowAccount) {
        let record = self.accounts.entry(account).or_default();
        record.nonce = record.nonce.max(snapshot.nonce);
        record.last_accessed = record.last_accessed.max(snapshot.last_accessed);
    }

    /// Sums every account's total. Used to check the pool invariant.
    pub fn sum_of_balances(&self) -> U256 {
        self.accounts.values().fold(U256::ZERO, |acc, account| acc.saturating_add(account.total))
    }
}
