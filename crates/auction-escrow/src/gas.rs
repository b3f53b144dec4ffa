//! Gas accounting for solver attempts.
//!
//! Every solver attempt, whether it ran or not, is priced here. The charge is debited from the
//! solver's collateral and added to the settlement's gas refund, which is paid to the bundler
//! when the settlement completes.

use alloy_primitives::{Address, U256};
use tracing::trace;

use crate::{
    EscrowAccount, EscrowConfig, EscrowError, EscrowLedger, ExecutionKey, RefundClass,
    ResultBitmask,
};

/// The charge applied to one solver attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasCharge {
    /// The refund class the attempt fell into.
    pub class: RefundClass,
    /// Gas units charged.
    pub gas: u64,
    /// Native value debited from the solver.
    pub amount: U256,
}

/// Prices solver attempts at one gas price.
#[derive(Clone, Copy, Debug)]
pub struct GasAccountant<'a> {
    config: &'a EscrowConfig,
    gas_price: u128,
}

impl<'a> GasAccountant<'a> {
    /// Creates an accountant charging at `gas_price`.
    pub const fn new(config: &'a EscrowConfig, gas_price: u128) -> Self {
        Self { config, gas_price }
    }

    /// The gas an attempt is charged for, before capping at the solver's balance.
    pub const fn chargeable_gas(&self, class: RefundClass, gas_used: u64, calldata_len: usize) -> u64 {
        let calldata_gas = self.config.calldata_gas(calldata_len);
        match class {
            RefundClass::FullRefund => gas_used.saturating_add(calldata_gas),
            RefundClass::CalldataRefund => calldata_gas,
            RefundClass::NoUserRefund => 0,
        }
    }

    /// Charges `solver` for an attempt that produced `result` and persists its sequencing
    /// snapshot if the attempt was accepted.
    ///
    /// The charge never exceeds the solver's balance, and is always a whole number of gas units
    /// at the accountant's price. Fails with
    /// [`EscrowError::UncoveredResult`] if no refund class covers `result`.
    #[allow(clippy::too_many_arguments)]
    pub fn settle_attempt(
        &self,
        ledger: &mut EscrowLedger,
        key: ExecutionKey,
        solver: Address,
        snapshot: &EscrowAccount,
        result: ResultBitmask,
        gas_used: u64,
        calldata_len: usize,
    ) -> Result<(ExecutionKey, GasCharge), EscrowError> {
        let class = result.refund_class().ok_or(EscrowError::UncoveredResult(result))?;
        let gas = self.chargeable_gas(class, gas_used, calldata_len);

        let (units, amount) = if self.gas_price == 0 || gas == 0 {
            (0, U256::ZERO)
        } else {
            let price = U256::from(self.gas_price);
            let affordable = (price * U256::from(gas)).min(ledger.balance_of(solver));
            // capped charges round down to whole gas units
            let units = u64::try_from(affordable / price).unwrap_or(gas).min(gas);
            (units, ledger.debit(solver, price * U256::from(units)))
        };

        if result.updates_escrow() {
            ledger.update_sequencing(solver, snapshot);
        }

        trace!(target: "escrow::gas", %solver, %class, units, %amount, "charged attempt");
        Ok((key.add_gas_refund(units), GasCharge { class, gas: units, amount }))
    }
}
