//! Value lending around solver calls and classification of their outcome.
//!
//! A solver may borrow native value from the escrow for the duration of its call. The
//! [`BorrowGuard`] records the debt before the call and refuses to finish while any of it is
//! outstanding, whether the call succeeded or not: an unpaid debt aborts the whole settlement.
//!
//! The outcome of a finished call is folded into a [`ResultBitmask`]. Failures are classified by
//! the selector of the revert data, using the signals declared in
//! [`ISolverErrors`](escrow_interfaces::ISolverErrors).

use alloy_primitives::{map::AddressHashMap, Address, U256};
use alloy_sol_types::SolError;
use escrow_interfaces::ISolverErrors;

use tracing::error;

use crate::{CallOutcome, EscrowError, EscrowLedger, ResultBitmask};

/// Revert selectors and the result bits they map to.
const FAILURE_SIGNALS: [([u8; 4], ResultBitmask); 8] = [
    (ISolverErrors::BidNotPaid::SELECTOR, ResultBitmask::BID_NOT_PAID),
    (ISolverErrors::SolverMsgValueTooHigh::SELECTOR, ResultBitmask::CALL_VALUE_TOO_HIGH),
    (ISolverErrors::IntentUnfulfilled::SELECTOR, ResultBitmask::INTENT_UNFULFILLED),
    (ISolverErrors::SolverOpReverted::SELECTOR, ResultBitmask::CALL_REVERTED),
    (ISolverErrors::CallbackNotCalled::SELECTOR, ResultBitmask::CALLBACK_FAILED),
    (ISolverErrors::AlteredControlHash::SELECTOR, ResultBitmask::INVALID_CONTROL_HASH),
    (ISolverErrors::PreSolverFailed::SELECTOR, ResultBitmask::PRE_SOLVER_FAILED),
    (ISolverErrors::PostSolverFailed::SELECTOR, ResultBitmask::INTENT_UNFULFILLED),
];

/// Native value held by the escrow during a settlement, and what solvers owe of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscrowVault {
    balance: U256,
    borrowed: AddressHashMap<U256>,
}

impl EscrowVault {
    /// Creates a vault holding `balance`.
    pub fn new(balance: U256) -> Self {
        Self { balance, borrowed: AddressHashMap::default() }
    }

    /// The value currently held.
    pub const fn balance(&self) -> U256 {
        self.balance
    }

    /// The value `solver` currently owes.
    pub fn borrowed(&self, solver: Address) -> U256 {
        self.borrowed.get(&solver).copied().unwrap_or_default()
    }
}

/// Scoped lend of `value` to one solver.
///
/// Create it with [`BorrowGuard::lend`], hand [`BorrowGuard::frame`] to the solver call and
/// close it with [`BorrowGuard::finish`]. Dropping an unfinished guard while the solver still
/// owes anything panics in debug builds.
#[derive(Debug)]
#[must_use = "a borrow must be finished to check that it was repaid"]
pub struct BorrowGuard<'a> {
    vault: &'a mut EscrowVault,
    solver: Address,
    value: U256,
    balance_before: U256,
    finished: bool,
}

impl<'a> BorrowGuard<'a> {
    /// Lends `value` out of `vault` to `solver`.
    pub fn lend(vault: &'a mut EscrowVault, solver: Address, value: U256) -> Self {
        let balance_before = vault.balance;
        if !value.is_zero() {
            vault.balance = vault.balance.saturating_sub(value);
            *vault.borrowed.entry(solver).or_default() += value;
        }
        Self { vault, solver, value, balance_before, finished: false }
    }

    /// The handle the solver call uses to repay and pay its bid.
    pub fn frame<'b>(&'b mut self, ledger: &'b mut EscrowLedger) -> SolverFrame<'b> {
        SolverFrame { vault: &mut *self.vault, ledger, solver: self.solver, value: self.value }
    }

    /// Closes the borrow.
    ///
    /// Fails with [`EscrowError::SolverMsgValueUnpaid`] if the solver still owes anything. On
    /// success returns the change in the vault balance across the call, or `None` if the balance
    /// went down. A failed call leaves the vault as it was before the lend.
    pub fn finish(mut self, succeeded: bool) -> Result<Option<U256>, EscrowError> {
        self.finished = true;
        let solver = self.solver;
        let outstanding = self.vault.borrowed(solver);
        if !outstanding.is_zero() {
            return Err(EscrowError::SolverMsgValueUnpaid { solver, outstanding });
        }
        self.vault.borrowed.remove(&solver);
        if !succeeded {
            self.vault.balance = self.balance_before;
            return Ok(None);
        }
        Ok(self.vault.balance.checked_sub(self.balance_before))
    }
}

impl Drop for BorrowGuard<'_> {
    fn drop(&mut self) {
        if self.finished || std::thread::panicking() {
            return;
        }
        let outstanding = self.vault.borrowed(self.solver);
        if !outstanding.is_zero() {
            error!(
                target: "escrow::borrow",
                solver = %self.solver,
                %outstanding,
                "borrow dropped unpaid"
            );
        }
        debug_assert!(
            outstanding.is_zero(),
            "borrow of {} dropped with {outstanding} unpaid",
            self.solver
        );
    }
}

/// What a solver call can touch in the escrow while it runs.
#[derive(Debug)]
pub struct SolverFrame<'a> {
    vault: &'a mut EscrowVault,
    ledger: &'a mut EscrowLedger,
    solver: Address,
    value: U256,
}

impl SolverFrame<'_> {
    /// The solver being called.
    pub const fn solver(&self) -> Address {
        self.solver
    }

    /// The value lent for this call.
    pub const fn value(&self) -> U256 {
        self.value
    }

    /// The value the solver still owes.
    pub fn outstanding(&self) -> U256 {
        self.vault.borrowed(self.solver)
    }

    /// Sends `amount` back to the escrow. It pays down the solver's debt first; anything beyond
    /// it counts as payment. Returns the debt left.
    pub fn repay(&mut self, amount: U256) -> U256 {
        self.vault.balance = self.vault.balance.saturating_add(amount);
        let debt = self.vault.borrowed.entry(self.solver).or_default();
        *debt = debt.saturating_sub(amount);
        *debt
    }

    /// Pays `amount` into the escrow without touching the debt, e.g. the bid.
    pub fn pay(&mut self, amount: U256) {
        self.vault.balance = self.vault.balance.saturating_add(amount);
    }

    /// Read access to the ledger.
    pub fn ledger(&self) -> &EscrowLedger {
        self.ledger
    }

    /// Tries to top up the solver's collateral. The ledger refuses while a settlement holds it.
    pub fn deposit(&mut self, amount: U256) -> Result<U256, EscrowError> {
        self.ledger.deposit(self.solver, amount)
    }
}

/// Maps revert data to the failure it signals. Unknown or missing selectors count as a plain
/// revert.
pub fn classify_failure(output: &[u8]) -> ResultBitmask {
    let Some(selector) = output.get(..4) else {
        return ResultBitmask::CALL_REVERTED;
    };
    FAILURE_SIGNALS
        .iter()
        .find(|(signal, _)| signal.as_slice() == selector)
        .map_or(ResultBitmask::CALL_REVERTED, |(_, result)| *result)
}

/// Folds a finished solver call into result bits.
///
/// `surplus` is what [`BorrowGuard::finish`] observed. Unless bids are inverted, a successful
/// call must have paid at least `bid_amount` to win.
pub fn classify_attempt(
    outcome: &CallOutcome,
    surplus: Option<U256>,
    bid_amount: U256,
    invert_bid_value: bool,
) -> ResultBitmask {
    let mut result = ResultBitmask::EXECUTION_COMPLETED;
    if !outcome.success {
        return result | classify_failure(&outcome.output);
    }
    match surplus {
        Some(surplus) if invert_bid_value || surplus >= bid_amount => {
            result |= ResultBitmask::SUCCESS;
        }
        _ => result |= ResultBitmask::BID_NOT_PAID,
    }
    result
}
