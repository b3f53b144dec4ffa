//! External collaborators of the escrow.
//!
//! The escrow does not run user, solver or controller logic itself. It drives an
//! [`ExecutionEnvironment`] that does, and asks a [`ControlRegistry`] how each controller wants
//! to be settled. Both are traits so that an on-chain host, a simulator or a test harness can be
//! plugged in without the escrow knowing which.

use core::fmt::Debug;

use alloy_primitives::{Address, Bytes, U256};
use auto_impl::auto_impl;
use escrow_interfaces::{SolverOperation, UserOperation};
use serde::{Deserialize, Serialize};

use crate::{ExecutionKey, SolverFrame};

/// What a call into the execution environment reported back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallOutcome {
    /// Whether the call succeeded.
    pub success: bool,
    /// The gas the call consumed.
    pub gas_used: u64,
    /// Return data on success, revert data on failure.
    pub output: Bytes,
}

impl CallOutcome {
    /// A successful call.
    pub fn success(gas_used: u64) -> Self {
        Self { success: true, gas_used, output: Bytes::new() }
    }

    /// A reverted call with its revert data.
    pub fn revert(gas_used: u64, output: Bytes) -> Self {
        Self { success: false, gas_used, output }
    }
}

/// Per-controller settlement configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControlConfig {
    /// Run the pre-operation hook before the user operation.
    pub requires_pre_ops: bool,
    /// Run the post-operation hook after allocation.
    pub requires_post_ops: bool,
    /// Bids are amounts the solver receives rather than pays, so no minimum payment applies.
    pub invert_bid_value: bool,
    /// Fail the settlement when no solver wins.
    pub require_fulfillment: bool,
    /// The token bids must be denominated in.
    pub bid_token: Address,
}

/// The winning bid handed to the allocation hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WinningBid {
    /// The solver's collateral-holding address.
    pub solver: Address,
    /// The signer of the winning operation.
    pub from: Address,
    /// The requesting party the payment goes to.
    pub recipient: Address,
    /// The bid token.
    pub bid_token: Address,
    /// The amount the solver declared.
    pub bid_amount: U256,
    /// The amount the escrow observed the solver pay.
    pub surplus: U256,
}

/// Registry of approved controllers.
#[auto_impl(&, Box, Arc)]
pub trait ControlRegistry: Debug {
    /// Returns the configuration of `control`, or `None` if it is not approved.
    fn control_config(&self, control: Address) -> Option<ControlConfig>;
}

/// The sandbox that runs user, solver and controller logic.
///
/// Every call receives the current [`ExecutionKey`], which the environment can use to check
/// which phase and which party the call belongs to.
#[auto_impl(&mut, Box)]
pub trait ExecutionEnvironment {
    /// Runs the controller's pre-operation hook.
    fn pre_ops(&mut self, key: &ExecutionKey, user_op: &UserOperation) -> CallOutcome;

    /// Runs the user operation.
    fn user_op(&mut self, key: &ExecutionKey, user_op: &UserOperation) -> CallOutcome;

    /// Runs one solver attempt with at most `gas_limit` gas.
    ///
    /// The solver receives `solver_op.value` borrowed from the escrow and must repay it, and pay
    /// its bid, through `frame` before returning.
    fn solver_op(
        &mut self,
        key: &ExecutionKey,
        frame: &mut SolverFrame<'_>,
        solver_op: &SolverOperation,
        gas_limit: u64,
    ) -> CallOutcome;

    /// Hands the winning bid to the requesting party.
    fn allocate_value(&mut self, key: &ExecutionKey, bid: &WinningBid) -> CallOutcome;

    /// Runs the controller's post-operation hook.
    fn post_ops(&mut self, key: &ExecutionKey, solved: bool) -> CallOutcome;
}
