use alloy_primitives::{map::AddressHashMap, Address, Bytes, U256};
use escrow_interfaces::{SolverOperation, UserOperation};

use crate::{
    CallOutcome, ExecutionEnvironment, ExecutionKey, ExecutionLock, ExecutionPhase, SolverFrame,
    WinningBid,
};

/// Gas a scripted call reports unless told otherwise.
pub const DEFAULT_CALL_GAS: u64 = 50_000;

/// What a scripted solver does when called.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SolverBehavior {
    /// Repays the borrowed value and pays the declared bid.
    #[default]
    PayBid,
    /// Repays the borrowed value and pays `amount`.
    Pay(U256),
    /// Repays the borrowed value, then reverts with the given data.
    Revert(Bytes),
    /// Keeps `amount` of the borrowed value and returns successfully.
    Withhold(U256),
    /// Pays the bid but reports more gas than it was given.
    OverrunGas,
}

/// A call the environment received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCall {
    /// The pre-operation hook.
    PreOps(ExecutionPhase),
    /// The user operation.
    UserOp(ExecutionPhase),
    /// A solver attempt.
    Solver {
        /// The solver called.
        solver: Address,
        /// The lock the key carried.
        lock: ExecutionLock,
        /// The gas limit the solver got.
        gas_limit: u64,
        /// Whether topping up the solver's collateral mid-call succeeded.
        deposit_accepted: bool,
    },
    /// Allocation of the winning bid.
    Allocate(WinningBid),
    /// The post-operation hook.
    PostOps {
        /// Whether a solver won.
        solved: bool,
    },
}

/// An execution environment driven by a per-solver script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEnvironment {
    /// Per-solver scripts. Unscripted solvers pay their bid.
    pub behaviors: AddressHashMap<SolverBehavior>,
    /// Gas every call reports.
    pub call_gas: u64,
    /// Fail the pre-operation hook.
    pub fail_pre_ops: bool,
    /// Fail the user operation.
    pub fail_user_op: bool,
    /// Fail the allocation of the winning bid.
    pub fail_allocation: bool,
    /// Fail the post-operation hook.
    pub fail_post_ops: bool,
    /// Try to deposit into the escrow during every solver call.
    pub deposit_mid_call: bool,
    /// Every call received, in order.
    pub calls: Vec<RecordedCall>,
}

impl ScriptedEnvironment {
    /// Creates an environment where every solver pays its bid.
    pub fn new() -> Self {
        Self { call_gas: DEFAULT_CALL_GAS, ..Default::default() }
    }

    /// Scripts `solver` to behave as `behavior`.
    pub fn solver(mut self, solver: Address, behavior: SolverBehavior) -> Self {
        self.behaviors.insert(solver, behavior);
        self
    }

    /// The solvers that were actually called, in order.
    pub fn called_solvers(&self) -> Vec<Address> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Solver { solver, .. } => Some(*solver),
                _ => None,
            })
            .collect()
    }

    fn hook(&self, fail: bool) -> CallOutcome {
        if fail {
            CallOutcome::revert(self.call_gas, Bytes::new())
        } else {
            CallOutcome::success(self.call_gas)
        }
    }
}

impl ExecutionEnvironment for ScriptedEnvironment {
    fn pre_ops(&mut self, key: &ExecutionKey, _user_op: &UserOperation) -> CallOutcome {
        self.calls.push(RecordedCall::PreOps(key.phase()));
        self.hook(self.fail_pre_ops)
    }

    fn user_op(&mut self, key: &ExecutionKey, _user_op: &UserOperation) -> CallOutcome {
        self.calls.push(RecordedCall::UserOp(key.phase()));
        self.hook(self.fail_user_op)
    }

    fn solver_op(
        &mut self,
        key: &ExecutionKey,
        frame: &mut SolverFrame<'_>,
        solver_op: &SolverOperation,
        gas_limit: u64,
    ) -> CallOutcome {
        let deposit_accepted = self.deposit_mid_call && frame.deposit(U256::from(1)).is_ok();
        self.calls.push(RecordedCall::Solver {
            solver: frame.solver(),
            lock: key.lock(),
            gas_limit,
            deposit_accepted,
        });

        let borrowed = frame.value();
        match self.behaviors.get(&frame.solver()).cloned().unwrap_or_default() {
            SolverBehavior::PayBid => {
                frame.repay(borrowed);
                frame.pay(solver_op.bidAmount);
                CallOutcome::success(self.call_gas.min(gas_limit))
            }
            SolverBehavior::Pay(amount) => {
                frame.repay(borrowed);
                frame.pay(amount);
                CallOutcome::success(self.call_gas.min(gas_limit))
            }
            SolverBehavior::Revert(output) => {
                frame.repay(borrowed);
                CallOutcome::revert(self.call_gas.min(gas_limit), output)
            }
            SolverBehavior::Withhold(amount) => {
                frame.repay(borrowed.saturating_sub(amount));
                CallOutcome::success(self.call_gas.min(gas_limit))
            }
            SolverBehavior::OverrunGas => {
                frame.repay(borrowed);
                frame.pay(solver_op.bidAmount);
                CallOutcome::success(gas_limit + 1)
            }
        }
    }

    fn allocate_value(&mut self, _key: &ExecutionKey, bid: &WinningBid) -> CallOutcome {
        self.calls.push(RecordedCall::Allocate(*bid));
        self.hook(self.fail_allocation)
    }

    fn post_ops(&mut self, _key: &ExecutionKey, solved: bool) -> CallOutcome {
        self.calls.push(RecordedCall::PostOps { solved });
        self.hook(self.fail_post_ops)
    }
}
