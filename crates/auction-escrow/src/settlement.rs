//! The settlement orchestrator.
//!
//! [`Escrow::settle`] drives one settlement: the controller's pre-operation hook, the user
//! operation, the ordered solver auction, allocation of the winning bid and the post-operation
//! hook. Solver attempts never abort a settlement; they are priced and reported. Everything in
//! [`EscrowError`] does, and discards every ledger mutation the settlement made.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::Eip712Domain;
use delegate::delegate;
use escrow_interfaces::{escrow_domain, SolverOperation, UserOperation};
use tracing::{debug, info, warn};

use crate::{
    classify_attempt, verify_solver_op, BorrowGuard, CallOutcome, ControlConfig, ControlRegistry,
    EscrowAccount, EscrowConfig, EscrowError, EscrowLedger, EscrowVault, ExecutionEnvironment,
    ExecutionKey, ExecutionPhase, GasAccountant, GasCharge, ResultBitmask, SignedSolverOperation,
    Verification, VerificationContext, WinningBid, WithdrawalRecord,
};

/// Everything the bundler submits for one settlement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettlementRequest {
    /// The party submitting the settlement. It receives the gas charged to solvers.
    pub bundler: Address,
    /// The operation of the requesting party.
    pub user_op: UserOperation,
    /// Solver operations, in the order they are attempted.
    pub solver_ops: Vec<SignedSolverOperation>,
    /// The block the settlement executes in.
    pub block_number: u64,
    /// The gas price solver charges are computed at.
    pub gas_price: u128,
    /// The gas budget of the whole settlement.
    pub gas_limit: u64,
    /// Native value sent along with the settlement.
    pub value: U256,
}

/// How far one solver operation got.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttemptState {
    /// Verification rejected the operation; the solver was not called.
    #[default]
    NotAttempted,
    /// The solver was called and won with the given surplus.
    Succeeded {
        /// The value the escrow observed the solver pay.
        surplus: U256,
    },
    /// The solver was called and failed.
    Failed,
}

/// The report of one solver operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SolverReport {
    /// The collateral-holding address.
    pub solver: Address,
    /// The signer.
    pub from: Address,
    /// Every outcome bit of the attempt.
    pub result: ResultBitmask,
    /// How far the attempt got.
    pub state: AttemptState,
    /// What the solver was charged.
    pub charge: GasCharge,
}

/// The result of a completed settlement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementOutcome {
    /// The winning bid, if a solver won.
    pub winner: Option<WinningBid>,
    /// One report per submitted solver operation, in submission order.
    pub solvers: Vec<SolverReport>,
    /// Gas units charged to solvers.
    pub gas_refund: u64,
    /// The value credited to the bundler's escrow account.
    pub bundler_credit: U256,
    /// Whether handing the winning bid to the requesting party failed.
    pub allocation_failed: bool,
}

impl SettlementOutcome {
    /// Whether a solver won.
    pub const fn is_solved(&self) -> bool {
        self.winner.is_some()
    }
}

/// An escrow deployment: the ledger, its protocol parameters and the controller registry.
#[derive(Debug)]
pub struct Escrow<R> {
    address: Address,
    config: EscrowConfig,
    domain: Eip712Domain,
    ledger: EscrowLedger,
    registry: R,
}

impl<R: ControlRegistry> Escrow<R> {
    /// Creates an escrow deployed at `address` with an empty ledger.
    pub fn new(address: Address, config: EscrowConfig, registry: R) -> Self {
        Self::with_ledger(address, config, registry, EscrowLedger::new(config.escrow_duration))
    }

    /// Creates an escrow deployed at `address` over an existing ledger.
    pub fn with_ledger(
        address: Address,
        config: EscrowConfig,
        registry: R,
        ledger: EscrowLedger,
    ) -> Self {
        let domain = escrow_domain(config.chain_id, address);
        Self { address, config, domain, ledger, registry }
    }

    /// The escrow's address.
    pub const fn address(&self) -> Address {
        self.address
    }

    /// The protocol parameters.
    pub const fn config(&self) -> &EscrowConfig {
        &self.config
    }

    /// The EIP-712 domain solver operations are signed under.
    pub const fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    /// The committed ledger.
    pub const fn ledger(&self) -> &EscrowLedger {
        &self.ledger
    }

    /// The controller registry.
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    /// The digest an off-engine signer must sign for `op`.
    pub fn solver_payload_hash(&self, op: &SolverOperation) -> B256 {
        op.signing_hash(&self.domain)
    }

    delegate! {
        to self.ledger {
            /// Credits `amount` of collateral to `account`. Returns the new balance.
            pub fn deposit(&mut self, account: Address, amount: U256) -> Result<U256, EscrowError>;
            /// Withdraws spendable collateral once the account's cooldown has elapsed.
            pub fn withdraw(&mut self, account: Address, amount: U256, block: u64) -> Result<U256, EscrowError>;
            /// Moves collateral between accounts.
            pub fn transfer(&mut self, from: Address, to: Address, amount: U256, block: u64) -> Result<(), EscrowError>;
            /// Moves collateral on behalf of its owner.
            pub fn transfer_from(
                &mut self,
                spender: Address,
                from: Address,
                to: Address,
                amount: U256,
                block: u64,
            ) -> Result<(), EscrowError>;
            /// Allows `spender` to move up to `amount` of `owner`'s collateral.
            pub fn approve(&mut self, owner: Address, spender: Address, amount: U256) -> Result<(), EscrowError>;
            /// Reserves collateral for a time-locked withdrawal.
            pub fn request_withdrawal(&mut self, account: Address, amount: U256, block: u64) -> Result<WithdrawalRecord, EscrowError>;
            /// Pays out a reserved withdrawal once its lock has elapsed.
            pub fn claim_withdrawal(&mut self, account: Address, block: u64) -> Result<U256, EscrowError>;
            /// Releases a withdrawal reservation.
            pub fn cancel_withdrawal(&mut self, account: Address) -> Result<U256, EscrowError>;

            /// The escrow record of `account`.
            pub fn account(&self, account: Address) -> EscrowAccount;
            /// The withdrawal reservation of `account`.
            pub fn withdrawal(&self, account: Address) -> WithdrawalRecord;
            /// The collateral held for `account`.
            pub fn balance_of(&self, account: Address) -> U256;
            /// The collateral of `account` not reserved for a withdrawal.
            pub fn spendable(&self, account: Address) -> U256;
            /// The nonce `account` must sign next.
            pub fn next_nonce(&self, account: Address) -> u64;
            /// The block of `account`'s last accepted activity.
            pub fn last_active(&self, account: Address) -> u64;
            /// The amount `spender` may move out of `owner`'s collateral.
            pub fn allowance(&self, owner: Address, spender: Address) -> U256;
            /// The total collateral held by the escrow.
            pub fn total_supply(&self) -> U256;
        }
    }

    /// Verifies `signed` as the first solver of a fresh settlement of `user_op`, without
    /// touching any state.
    pub fn verify(
        &self,
        signed: &SignedSolverOperation,
        user_op: &UserOperation,
        block: u64,
        gas_price: u128,
    ) -> Result<Verification, EscrowError> {
        let control = self.control_config(user_op.control)?;
        let ctx = VerificationContext {
            escrow: self.address,
            domain: &self.domain,
            config: &self.config,
            block,
            gas_price,
            escrow_balance: self.ledger.total_supply(),
            user_op_hash: user_op.hash(),
            control: user_op.control,
            bid_token: control.bid_token,
            auction_won: false,
            gas_remaining: u64::MAX,
        };
        Ok(verify_solver_op(&self.ledger, signed, &ctx))
    }

    fn control_config(&self, control: Address) -> Result<ControlConfig, EscrowError> {
        self.registry.control_config(control).ok_or(EscrowError::UnknownControl(control))
    }
}

impl<R: ControlRegistry> Escrow<R> {
    /// Runs one settlement against `env`.
    ///
    /// The settlement works on a locked copy of the ledger, which replaces the committed ledger
    /// only if the settlement completes.
    pub fn settle<E: ExecutionEnvironment>(
        &mut self,
        request: &SettlementRequest,
        mut env: E,
    ) -> Result<SettlementOutcome, EscrowError> {
        let user_op = &request.user_op;
        let control = user_op.control;
        let control_config = self.control_config(control)?;
        let user_op_hash = user_op.hash();

        let mut ledger = self.ledger.clone();
        ledger.lock();
        let mut vault = EscrowVault::new(ledger.total_supply().saturating_add(request.value));
        let mut key = ExecutionKey::new(control, request.gas_limit);

        if control_config.requires_pre_ops {
            key = key.enter(ExecutionPhase::PreOps)?;
            let outcome = env.pre_ops(&key, user_op);
            key = key.consume_gas(outcome.gas_used);
            if !outcome.success {
                return Err(EscrowError::PreOpsFailed);
            }
        }

        key = key.enter(ExecutionPhase::UserOperation)?;
        let outcome = env.user_op(&key, user_op);
        key = key.consume_gas(outcome.gas_used);
        if !outcome.success {
            return Err(EscrowError::UserOpFailed);
        }

        let accountant = GasAccountant::new(&self.config, request.gas_price);
        let mut reports = Vec::with_capacity(request.solver_ops.len());
        let mut winner = None;
        let mut bundler_credit = U256::ZERO;

        for signed in &request.solver_ops {
            let op = &signed.op;
            key = key.hold_solver_lock(op.solver)?;

            let ctx = VerificationContext {
                escrow: self.address,
                domain: &self.domain,
                config: &self.config,
                block: request.block_number,
                gas_price: request.gas_price,
                escrow_balance: vault.balance(),
                user_op_hash,
                control,
                bid_token: control_config.bid_token,
                auction_won: key.is_decided(),
                gas_remaining: key.gas_remaining(),
            };
            let verification = verify_solver_op(&ledger, signed, &ctx);

            let mut result = verification.result;
            let mut state = AttemptState::NotAttempted;
            let mut gas_used = 0;
            if result.is_executable() {
                let mut guard = BorrowGuard::lend(&mut vault, op.solver, op.value);
                let outcome =
                    env.solver_op(&key, &mut guard.frame(&mut ledger), op, verification.gas_limit);
                // a call that overran its budget is treated as having run out of gas
                let outcome = if outcome.gas_used > verification.gas_limit {
                    CallOutcome::revert(verification.gas_limit, Bytes::new())
                } else {
                    outcome
                };
                let surplus = guard.finish(outcome.success)?;

                result = classify_attempt(
                    &outcome,
                    surplus,
                    op.bidAmount,
                    control_config.invert_bid_value,
                );
                gas_used = outcome.gas_used;
                key = key.consume_gas(gas_used);
                state = match surplus {
                    Some(surplus) if result.is_success() => AttemptState::Succeeded { surplus },
                    _ => AttemptState::Failed,
                };
            }

            let (next, charge) = accountant.settle_attempt(
                &mut ledger,
                key,
                op.solver,
                &verification.account,
                result,
                gas_used,
                op.data.len(),
            )?;
            key = next;
            bundler_credit = bundler_credit.saturating_add(charge.amount);

            if let AttemptState::Succeeded { surplus } = state {
                key = key.with_winner(op.solver);
                winner = Some(WinningBid {
                    solver: op.solver,
                    from: op.from,
                    recipient: user_op.from,
                    bid_token: op.bidToken,
                    bid_amount: op.bidAmount,
                    surplus,
                });
            }

            debug!(
                target: "escrow::settlement",
                solver = %op.solver,
                ?result,
                ?state,
                gas_used,
                charged = %charge.amount,
                "solver attempt"
            );
            reports.push(SolverReport { solver: op.solver, from: op.from, result, state, charge });
        }

        let mut allocation_failed = false;
        if let Some(bid) = &winner {
            key = key.enter(ExecutionPhase::HandlingPayments)?;
            let outcome = env.allocate_value(&key, bid);
            key = key.consume_gas(outcome.gas_used);
            if !outcome.success {
                warn!(
                    target: "escrow::settlement",
                    solver = %bid.solver,
                    recipient = %bid.recipient,
                    "allocating the winning bid failed"
                );
                allocation_failed = true;
            }
        } else if control_config.require_fulfillment {
            return Err(EscrowError::NoSolverFulfilled);
        }

        if control_config.requires_post_ops {
            key = key.enter(ExecutionPhase::PostOps)?;
            let outcome = env.post_ops(&key, winner.is_some());
            key = key.consume_gas(outcome.gas_used);
            if !outcome.success {
                return Err(EscrowError::PostOpsFailed);
            }
        }

        key = key.release()?;
        ledger.credit(request.bundler, bundler_credit)?;
        ledger.unlock();
        self.ledger = ledger;

        info!(
            target: "escrow::settlement",
            %control,
            solvers = reports.len(),
            winner = ?winner.as_ref().map(|bid| bid.solver),
            gas_refund = key.gas_refund(),
            %bundler_credit,
            "settled"
        );

        Ok(SettlementOutcome {
            winner,
            solvers: reports,
            gas_refund: key.gas_refund(),
            bundler_credit,
            allocation_failed,
        })
    }
}
