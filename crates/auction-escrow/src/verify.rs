//! Solver operation verification.
//!
//! Verification is read-only: it evaluates a signed solver operation against a snapshot of the
//! solver's escrow record and the state of the settlement, and reports every problem it finds in
//! one [`ResultBitmask`]. The advanced snapshot it returns is only persisted later, by the gas
//! accountant, so verifying the same operation twice yields the same result.

use alloy_primitives::{Address, Bytes, PrimitiveSignature, SignatureError, B256, U256};
use alloy_sol_types::Eip712Domain;
use escrow_interfaces::SolverOperation;

use crate::{EscrowAccount, EscrowConfig, EscrowLedger, ResultBitmask};

/// A solver operation together with the signature over its EIP-712 signing hash.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignedSolverOperation {
    /// The operation.
    pub op: SolverOperation,
    /// 65-byte `r || s || v` signature of `op.signing_hash(domain)`.
    pub signature: Bytes,
}

impl SignedSolverOperation {
    /// Recovers the address that signed the operation under `domain`.
    pub fn recover_signer(&self, domain: &Eip712Domain) -> Result<Address, SignatureError> {
        let hash = self.op.signing_hash(domain);
        PrimitiveSignature::from_raw(&self.signature)?.recover_address_from_prehash(&hash)
    }
}

/// The state of the settlement a solver operation is verified against.
#[derive(Clone, Copy, Debug)]
pub struct VerificationContext<'a> {
    /// The escrow's own address; operations must target it.
    pub escrow: Address,
    /// The EIP-712 domain signatures are checked under.
    pub domain: &'a Eip712Domain,
    /// Protocol parameters.
    pub config: &'a EscrowConfig,
    /// The current block height.
    pub block: u64,
    /// The current gas price.
    pub gas_price: u128,
    /// The native value the escrow can lend.
    pub escrow_balance: U256,
    /// The hash of the user operation being settled.
    pub user_op_hash: B256,
    /// The controller of the settlement.
    pub control: Address,
    /// The token the controller accepts bids in.
    pub bid_token: Address,
    /// Whether an earlier solver already won.
    pub auction_won: bool,
    /// Gas the settlement has left.
    pub gas_remaining: u64,
}

/// The outcome of verifying one solver operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Verification {
    /// Every problem found; empty if the solver may be called.
    pub result: ResultBitmask,
    /// The gas limit the solver call gets.
    pub gas_limit: u64,
    /// The solver's escrow record, advanced as if the attempt were accepted.
    pub account: EscrowAccount,
    /// The worst-case cost reserved against the solver's collateral.
    pub max_cost: U256,
}

/// Verifies `signed` against `ledger` and the settlement state in `ctx`.
pub fn verify_solver_op(
    ledger: &EscrowLedger,
    signed: &SignedSolverOperation,
    ctx: &VerificationContext<'_>,
) -> Verification {
    let op = &signed.op;
    let config = ctx.config;
    let mut result = ResultBitmask::empty();

    // the escrow record backing the attempt must belong to the signer
    let identified = op.solver == op.from
        && signed.recover_signer(ctx.domain).is_ok_and(|signer| signer == op.from);
    if !identified {
        result |= ResultBitmask::INVALID_SIGNATURE;
    }

    let mut account = ledger.account(op.solver);

    if op.to != ctx.escrow {
        result |= ResultBitmask::INVALID_TO;
    }

    // the offset is reserved on top of the buffered gas so that bookkeeping after the call is
    // always affordable, but the call itself never gets it
    let buffered_gas = op.gas.min(config.solver_gas_limit).saturating_mul(100)
        / 100u64.saturating_add(config.gas_buffer_percent);
    let gas_ceiling = buffered_gas.saturating_add(config.fixed_gas_offset);
    let calldata_gas = config.calldata_gas(op.data.len());
    let gas_price = U256::from(ctx.gas_price);
    let max_cost = gas_price * U256::from(gas_ceiling) + gas_price * U256::from(calldata_gas);

    if identified {
        if op.nonce <= account.nonce {
            result |= ResultBitmask::INVALID_NONCE_UNDER;
        } else if op.nonce == u64::MAX {
            // the last nonce is never stored, so the next nonce is always representable
            result |= ResultBitmask::INVALID_NONCE_OVER;
        } else if op.nonce > account.nonce + 1 {
            result |= ResultBitmask::INVALID_NONCE_OVER;
            // gapped nonces still consume everything up to the submitted one
            account.nonce = op.nonce;
        } else {
            account.nonce = op.nonce;
        }

        if account.last_accessed >= ctx.block {
            result |= ResultBitmask::PER_BLOCK_LIMIT;
        } else {
            account.last_accessed = ctx.block;
        }

        if max_cost > ledger.spendable(op.solver) {
            result |= ResultBitmask::INSUFFICIENT_ESCROW;
        }
    }

    if op.value > ctx.escrow_balance.saturating_sub(max_cost) {
        result |= ResultBitmask::CALL_VALUE_TOO_HIGH;
    }

    if ctx.auction_won {
        result |= ResultBitmask::LOST_AUCTION;
    }
    if ctx.gas_remaining < config.solver_gas_floor() {
        result |= ResultBitmask::USER_OUT_OF_GAS;
    }
    if ctx.gas_price > op.maxFeePerGas {
        result |= ResultBitmask::GAS_PRICE_OVER_CAP;
    }
    if op.deadline < ctx.block {
        result |= ResultBitmask::DEADLINE_PASSED;
    }
    if op.userOpHash != ctx.user_op_hash {
        result |= ResultBitmask::INVALID_USER_HASH;
    }
    if op.control != ctx.control {
        result |= ResultBitmask::INVALID_CONTROL_HASH;
    }
    if op.bidToken != ctx.bid_token {
        result |= ResultBitmask::INVALID_BID_TOKEN;
    }

    Verification { result, gas_limit: gas_ceiling - config.fixed_gas_offset, account, max_cost }
}
