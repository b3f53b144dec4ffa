//! Constants for the auction escrow.
//!
//! It groups the default protocol parameters by the component that consumes them. The values
//! seed [`EscrowConfig::default`](crate::EscrowConfig).

/// Constants for the escrow ledger.
pub mod ledger {
    /// The number of blocks that must elapse after an account's last activity before it can
    /// withdraw or transfer collateral out again.
    pub const ESCROW_DURATION: u64 = 64;
}

/// Constants for solver verification and gas accounting.
pub mod solver {
    /// The platform cap on the gas a single solver call may consume, regardless of the gas the
    /// solver operation declares.
    pub const SOLVER_GAS_LIMIT: u64 = 1_000_000;

    /// The percentage buffer taken off the declared gas. The effective gas limit is
    /// `gas * 100 / (100 + SOLVER_GAS_BUFFER_PERCENT)`.
    pub const SOLVER_GAS_BUFFER_PERCENT: u64 = 5;

    /// The fixed gas the engine keeps for its own bookkeeping after a solver call returns. It is
    /// part of the worst-case cost a solver must be able to afford.
    pub const FIXED_GAS_OFFSET: u64 = 85_000;

    /// The gas charged per byte of solver calldata.
    pub const CALLDATA_PREMIUM: u64 = 16;

    /// The gas reserved for verifying one solver operation. Together with
    /// [`SOLVER_GAS_LIMIT`] it forms the floor the settlement must still have available before
    /// attempting another solver.
    pub const VALIDATION_GAS_LIMIT: u64 = 500_000;
}

/// Constants for the EIP-712 domain.
pub mod domain {
    /// The chain id used when no other is configured.
    pub const DEFAULT_CHAIN_ID: u64 = 1;
}
