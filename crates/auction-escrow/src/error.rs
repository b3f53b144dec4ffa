//! Fatal errors of the escrow.
//!
//! Expected solver rejections are never errors: they are folded into a
//! [`ResultBitmask`](crate::ResultBitmask) and priced by the gas accountant. The variants here
//! abort the operation they occur in, and a settlement that hits one discards every mutation it
//! made.

use alloy_primitives::{Address, U256};

use crate::{ExecutionPhase, ResultBitmask};

/// Errors that abort an escrow operation or a whole settlement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscrowError {
    /// The account does not hold enough spendable collateral.
    #[error("insufficient balance for {account}: requested {requested}, spendable {spendable}")]
    InsufficientBalance {
        /// The account being debited
        account: Address,
        /// The amount requested
        requested: U256,
        /// The spendable balance of the account
        spendable: U256,
    },

    /// The spender is not allowed to move that much of the owner's collateral.
    #[error("insufficient allowance for {spender} on {owner}: requested {requested}")]
    InsufficientAllowance {
        /// The collateral owner
        owner: Address,
        /// The spender
        spender: Address,
        /// The amount requested
        requested: U256,
    },

    /// The cooldown since the account's last activity has not elapsed.
    #[error("{account} is locked until block {unlocks_at}, current block {block}")]
    TooEarly {
        /// The locked account
        account: Address,
        /// The first block at which the account may move funds again
        unlocks_at: u64,
        /// The current block
        block: u64,
    },

    /// There is no pending withdrawal for the account.
    #[error("no pending withdrawal for {0}")]
    NoPendingWithdrawal(Address),

    /// A ledger entry point was called while a settlement holds the ledger.
    #[error("a settlement is in progress")]
    SettlementInProgress,

    /// A ledger sum would overflow.
    #[error("balance overflow")]
    BalanceOverflow,

    /// A solver left borrowed value unpaid when its call returned.
    #[error("solver {solver} left {outstanding} of borrowed value unpaid")]
    SolverMsgValueUnpaid {
        /// The solver address the value was lent to
        solver: Address,
        /// The debt still outstanding
        outstanding: U256,
    },

    /// A solver result matches no refund class.
    #[error("uncovered solver result: {0:?}")]
    UncoveredResult(ResultBitmask),

    /// A settlement step ran out of order.
    #[error("phase violation: cannot enter {next:?} from {current:?}")]
    PhaseViolation {
        /// The phase the key was in
        current: ExecutionPhase,
        /// The phase that was requested
        next: ExecutionPhase,
    },

    /// The controller is not registered.
    #[error("unknown controller {0}")]
    UnknownControl(Address),

    /// The pre-operation hook failed.
    #[error("pre-operation hook failed")]
    PreOpsFailed,

    /// The user operation failed.
    #[error("user operation failed")]
    UserOpFailed,

    /// The post-operation hook failed.
    #[error("post-operation hook failed")]
    PostOpsFailed,

    /// The controller requires fulfillment but no solver won.
    #[error("no solver fulfilled the user operation")]
    NoSolverFulfilled,
}
