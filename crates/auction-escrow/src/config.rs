use serde::{Deserialize, Serialize};

use crate::constants;

/// Protocol parameters of an escrow deployment.
///
/// Missing fields fall back to the defaults in [`constants`], so a partial JSON document is a
/// valid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EscrowConfig {
    /// Chain id of the EIP-712 domain solver signatures are bound to.
    pub chain_id: u64,
    /// Cooldown, in blocks, between an account's last activity and its next outgoing transfer.
    pub escrow_duration: u64,
    /// Platform cap on the gas of a single solver call.
    pub solver_gas_limit: u64,
    /// Percentage taken off the declared solver gas.
    pub gas_buffer_percent: u64,
    /// Gas kept back for bookkeeping after a solver call.
    pub fixed_gas_offset: u64,
    /// Gas charged per byte of solver calldata.
    pub calldata_premium: u64,
    /// Gas reserved for verifying one solver operation.
    pub validation_gas_limit: u64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            chain_id: constants::domain::DEFAULT_CHAIN_ID,
            escrow_duration: constants::ledger::ESCROW_DURATION,
            solver_gas_limit: constants::solver::SOLVER_GAS_LIMIT,
            gas_buffer_percent: constants::solver::SOLVER_GAS_BUFFER_PERCENT,
            fixed_gas_offset: constants::solver::FIXED_GAS_OFFSET,
            calldata_premium: constants::solver::CALLDATA_PREMIUM,
            validation_gas_limit: constants::solver::VALIDATION_GAS_LIMIT,
        }
    }
}

impl EscrowConfig {
    /// Sets the chain id.
    pub const fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Sets the withdrawal cooldown in blocks.
    pub const fn with_escrow_duration(mut self, escrow_duration: u64) -> Self {
        self.escrow_duration = escrow_duration;
        self
    }

    /// The gas a solver's calldata costs on top of its execution.
    pub const fn calldata_gas(&self, calldata_len: usize) -> u64 {
        (calldata_len as u64).saturating_mul(self.calldata_premium)
    }

    /// The remaining settlement gas below which no further solver is attempted.
    pub const fn solver_gas_floor(&self) -> u64 {
        self.validation_gas_limit.saturating_add(self.solver_gas_limit)
    }
}
