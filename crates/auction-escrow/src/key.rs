//! The execution key threaded through one settlement.
//!
//! The key records which settlement step is running, which party holds execution, the gas the
//! settlement has left and the gas refund accumulated from solver charges. It is passed by value
//! from step to step and handed to the execution environment as its verification token; it is
//! never stored, so two settlements can never observe each other's key.

use alloy_primitives::Address;

use crate::EscrowError;

/// The steps of a settlement, in the only order they may run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutionPhase {
    /// The key was created but nothing ran yet.
    #[default]
    Uninitialized,
    /// The controller's pre-operation hook.
    PreOps,
    /// The user operation.
    UserOperation,
    /// The solver loop. The only phase that may be entered repeatedly.
    SolverOperations,
    /// Allocation of the winning bid.
    HandlingPayments,
    /// The controller's post-operation hook.
    PostOps,
    /// The settlement finished.
    Released,
}

/// The party currently holding execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExecutionLock {
    /// Nobody; the escrow itself is in control.
    #[default]
    Unlocked,
    /// The user (and the controller's hooks acting for it).
    User,
    /// The solver whose operation is being attempted.
    Solver(Address),
    /// The controller allocating the winning bid.
    Allocation,
}

/// The per-settlement phase token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionKey {
    phase: ExecutionPhase,
    lock: ExecutionLock,
    control: Address,
    gas_remaining: u64,
    gas_refund: u64,
    solver_calls: u32,
    winner: Option<Address>,
}

impl ExecutionKey {
    /// Creates the key of a settlement run for `control` with `gas_limit` gas.
    pub const fn new(control: Address, gas_limit: u64) -> Self {
        Self {
            phase: ExecutionPhase::Uninitialized,
            lock: ExecutionLock::Unlocked,
            control,
            gas_remaining: gas_limit,
            gas_refund: 0,
            solver_calls: 0,
            winner: None,
        }
    }

    /// The current phase.
    pub const fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    /// The party holding execution.
    pub const fn lock(&self) -> ExecutionLock {
        self.lock
    }

    /// The controller of the settlement.
    pub const fn control(&self) -> Address {
        self.control
    }

    /// Gas the settlement has left.
    pub const fn gas_remaining(&self) -> u64 {
        self.gas_remaining
    }

    /// Gas charged to solvers so far, owed to the bundler.
    pub const fn gas_refund(&self) -> u64 {
        self.gas_refund
    }

    /// Number of solver operations processed so far.
    pub const fn solver_calls(&self) -> u32 {
        self.solver_calls
    }

    /// The solver that won the auction, if any.
    pub const fn winner(&self) -> Option<Address> {
        self.winner
    }

    /// Whether a solver already won.
    pub const fn is_decided(&self) -> bool {
        self.winner.is_some()
    }
}

impl ExecutionKey {
    /// Moves the key into `next`.
    ///
    /// Phases only move forward, except that the solver loop re-enters its own phase once per
    /// solver operation. Payments can only be handled once a solver won.
    pub fn enter(self, next: ExecutionPhase) -> Result<Self, EscrowError> {
        let repeatable = next == ExecutionPhase::SolverOperations && self.phase == next;
        let premature = next == ExecutionPhase::HandlingPayments && self.winner.is_none();
        if (next <= self.phase && !repeatable) || premature {
            return Err(EscrowError::PhaseViolation { current: self.phase, next });
        }
        let lock = match next {
            ExecutionPhase::Uninitialized | ExecutionPhase::Released => ExecutionLock::Unlocked,
            ExecutionPhase::PreOps | ExecutionPhase::UserOperation | ExecutionPhase::PostOps => {
                ExecutionLock::User
            }
            // the solver is named by `hold_solver_lock`
            ExecutionPhase::SolverOperations => self.lock,
            ExecutionPhase::HandlingPayments => ExecutionLock::Allocation,
        };
        Ok(Self { phase: next, lock, ..self })
    }

    /// Enters the solver loop on behalf of `solver`.
    pub fn hold_solver_lock(self, solver: Address) -> Result<Self, EscrowError> {
        let key = self.enter(ExecutionPhase::SolverOperations)?;
        Ok(Self { lock: ExecutionLock::Solver(solver), solver_calls: key.solver_calls + 1, ..key })
    }

    /// Hands execution back to the escrow at the end of the settlement.
    pub fn release(self) -> Result<Self, EscrowError> {
        self.enter(ExecutionPhase::Released)
    }

    /// Records `solver` as the winner.
    pub const fn with_winner(self, solver: Address) -> Self {
        Self { winner: Some(solver), ..self }
    }

    /// Charges `gas` against the settlement's remaining gas.
    pub const fn consume_gas(self, gas: u64) -> Self {
        Self { gas_remaining: self.gas_remaining.saturating_sub(gas), ..self }
    }

    /// Adds `gas` charged to a solver to the refund owed to the bundler.
    pub const fn add_gas_refund(self, gas: u64) -> Self {
        Self { gas_refund: self.gas_refund.saturating_add(gas), ..self }
    }
}
