//! Solver result bitmask.

use bitflags::bitflags;

bitflags! {
    /// Packed set of outcomes of one solver attempt, produced by verification and by the
    /// classification of the solver call.
    ///
    /// Several failure bits may be set at once; [`ResultBitmask::refund_class`] decides how the
    /// attempt is priced from the combination.
    ///
    /// Bits 0-1: execution markers
    /// Bits 2-7: failures outside the solver's control (no charge)
    /// Bits 8-15: solver failures detected before the call (calldata charge)
    /// Bits 16-20: solver failures detected after the call (full charge)
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ResultBitmask: u32 {
        /// The solver call succeeded and honored its bid
        const SUCCESS = 1 << 0;
        /// The solver call was made
        const EXECUTION_COMPLETED = 1 << 1;

        /// The signature does not recover to the declared sender
        const INVALID_SIGNATURE = 1 << 2;
        /// The operation answers a different user operation
        const INVALID_USER_HASH = 1 << 3;
        /// The operation's deadline is behind the current block
        const DEADLINE_PASSED = 1 << 4;
        /// The network gas price exceeds the operation's fee cap
        const GAS_PRICE_OVER_CAP = 1 << 5;
        /// The settlement has too little gas left to attempt the solver
        const USER_OUT_OF_GAS = 1 << 6;
        /// The controller does not match, or was altered during the call
        const INVALID_CONTROL_HASH = 1 << 7;

        /// The operation does not target this escrow
        const INVALID_TO = 1 << 8;
        /// The nonce was already used
        const INVALID_NONCE_UNDER = 1 << 9;
        /// The nonce skips ahead of the next expected nonce
        const INVALID_NONCE_OVER = 1 << 10;
        /// The solver account was already used at this height
        const PER_BLOCK_LIMIT = 1 << 11;
        /// The solver cannot afford its worst-case gas cost
        const INSUFFICIENT_ESCROW = 1 << 12;
        /// The call value exceeds what the escrow can lend
        const CALL_VALUE_TOO_HIGH = 1 << 13;
        /// The bid is denominated in a token the controller does not accept
        const INVALID_BID_TOKEN = 1 << 14;
        /// An earlier solver already won the auction
        const LOST_AUCTION = 1 << 15;

        /// The solver did not pay its bid
        const BID_NOT_PAID = 1 << 16;
        /// The solver call reverted
        const CALL_REVERTED = 1 << 17;
        /// The solver did not fulfill the intent
        const INTENT_UNFULFILLED = 1 << 18;
        /// The solver did not call back into the escrow
        const CALLBACK_FAILED = 1 << 19;
        /// The pre-solver hook failed
        const PRE_SOLVER_FAILED = 1 << 20;
    }
}

/// How a solver attempt is priced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum RefundClass {
    /// The attempt ran and failed (or won): the solver pays its gas and its calldata.
    #[display("full")]
    FullRefund,
    /// The attempt was rejected before running: the solver pays its calldata only.
    #[display("calldata")]
    CalldataRefund,
    /// The failure is not the solver's: nothing is charged.
    #[display("none")]
    NoUserRefund,
}

impl ResultBitmask {
    /// Failures outside the solver's control.
    pub const NO_USER_REFUND: Self = Self::INVALID_SIGNATURE
        .union(Self::INVALID_USER_HASH)
        .union(Self::DEADLINE_PASSED)
        .union(Self::GAS_PRICE_OVER_CAP)
        .union(Self::USER_OUT_OF_GAS)
        .union(Self::INVALID_CONTROL_HASH);

    /// Solver failures detected before the call.
    pub const CALLDATA_REFUND: Self = Self::INVALID_TO
        .union(Self::INVALID_NONCE_UNDER)
        .union(Self::INVALID_NONCE_OVER)
        .union(Self::PER_BLOCK_LIMIT)
        .union(Self::INSUFFICIENT_ESCROW)
        .union(Self::CALL_VALUE_TOO_HIGH)
        .union(Self::INVALID_BID_TOKEN)
        .union(Self::LOST_AUCTION);

    /// Attempts that ran.
    pub const FULL_REFUND: Self = Self::EXECUTION_COMPLETED
        .union(Self::BID_NOT_PAID)
        .union(Self::CALL_REVERTED)
        .union(Self::INTENT_UNFULFILLED)
        .union(Self::CALLBACK_FAILED)
        .union(Self::PRE_SOLVER_FAILED);

    /// Every bit that makes an attempt fail.
    pub const FAILURE: Self = Self::all().difference(Self::SUCCESS.union(Self::EXECUTION_COMPLETED));

    /// Bits that keep the solver's nonce and activity height from being persisted.
    const NO_ESCROW_UPDATE: Self =
        Self::INVALID_SIGNATURE.union(Self::INVALID_NONCE_UNDER).union(Self::PER_BLOCK_LIMIT);

    /// Whether no failure bit is set, i.e. the solver may be called.
    pub const fn is_executable(self) -> bool {
        !self.intersects(Self::FAILURE)
    }

    /// Whether the attempt won the auction.
    pub const fn is_success(self) -> bool {
        self.contains(Self::SUCCESS) && !self.intersects(Self::FAILURE)
    }

    /// Whether the failure is attributable to the bundler or the user rather than the solver.
    pub const fn bundlers_fault(self) -> bool {
        self.intersects(Self::NO_USER_REFUND)
    }

    /// Whether the attempt was accepted for sequencing, so the solver's nonce and activity
    /// height must be persisted.
    pub const fn updates_escrow(self) -> bool {
        !self.intersects(Self::NO_ESCROW_UPDATE)
    }

    /// The refund class of this result, or `None` if no class covers it.
    ///
    /// Failures outside the solver's control take precedence so that a solver is never charged
    /// for an operation it did not sign or could not have run.
    pub const fn refund_class(self) -> Option<RefundClass> {
        if self.intersects(Self::NO_USER_REFUND) {
            Some(RefundClass::NoUserRefund)
        } else if self.intersects(Self::FULL_REFUND) {
            Some(RefundClass::FullRefund)
        } else if self.intersects(Self::CALLDATA_REFUND) {
            Some(RefundClass::CalldataRefund)
        } else {
            None
        }
    }

    /// Gets the raw bitmap value.
    pub const fn raw(self) -> u32 {
        self.bits()
    }
}
