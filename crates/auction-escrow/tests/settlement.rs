//! Tests for settlements driven end to end through a scripted execution environment.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolError;
use auction_escrow::{
    escrow_interfaces::{ISolverErrors, SolverOperation},
    test_utils::{
        control_config, escrow_with, sign, solver_operation, solver_signer, user_operation,
        RecordedCall, ScriptedEnvironment, SolverBehavior, StaticRegistry, BID_TOKEN, BUNDLER,
        CONTROL, ETHER, SETTLEMENT_GAS_LIMIT, USER,
    },
    AttemptState, ControlConfig, ControlRegistry, Escrow, EscrowError, ExecutionLock,
    ExecutionPhase, RefundClass, ResultBitmask, SettlementRequest, SignedSolverOperation,
    WinningBid,
};
use rstest::rstest;

const BLOCK: u64 = 100;
const GAS_PRICE: u128 = 10;
/// `500_000 * 100 / 105`, the gas a default test solver operation gets.
const SOLVER_GAS_LIMIT: u64 = 476_190;
/// Four bytes of calldata at the default premium.
const CALLDATA_GAS: u64 = 64;
const BID: U256 = U256::from_limbs([1_000, 0, 0, 0]);

fn funded_escrow(config: ControlConfig, signers: &[&PrivateKeySigner]) -> Escrow<StaticRegistry> {
    let mut escrow = escrow_with(config);
    for signer in signers {
        escrow.deposit(signer.address(), ETHER).unwrap();
    }
    escrow
}

fn signed(
    escrow: &Escrow<StaticRegistry>,
    signer: &PrivateKeySigner,
    nonce: u64,
) -> SignedSolverOperation {
    sign(signer, solver_operation(signer, &user_operation(), nonce, BID), escrow.domain())
}

fn request(solver_ops: Vec<SignedSolverOperation>) -> SettlementRequest {
    SettlementRequest {
        bundler: BUNDLER,
        user_op: user_operation(),
        solver_ops,
        block_number: BLOCK,
        gas_price: GAS_PRICE,
        gas_limit: SETTLEMENT_GAS_LIMIT,
        value: U256::ZERO,
    }
}

fn reverted_with<E: SolError>(error: E) -> SolverBehavior {
    SolverBehavior::Revert(error.abi_encode().into())
}

fn wei(gas: u64) -> U256 {
    U256::from(gas) * U256::from(GAS_PRICE)
}

fn assert_pool_consistent(escrow: &Escrow<StaticRegistry>) {
    assert_eq!(escrow.ledger().sum_of_balances(), escrow.total_supply());
}

#[test]
fn test_first_success_wins_and_later_solvers_lose() {
    let (s0, s1, s2) = (solver_signer(0), solver_signer(1), solver_signer(2));
    let mut escrow = funded_escrow(control_config(), &[&s0, &s1, &s2]);
    let request = request(vec![
        signed(&escrow, &s0, 1),
        signed(&escrow, &s1, 1),
        signed(&escrow, &s2, 1),
    ]);
    let mut env = ScriptedEnvironment::new()
        .solver(s0.address(), reverted_with(ISolverErrors::SolverOpReverted {}));

    let outcome = escrow.settle(&request, &mut env).unwrap();

    assert_eq!(env.called_solvers(), vec![s0.address(), s1.address()]);
    assert_eq!(
        outcome.winner,
        Some(WinningBid {
            solver: s1.address(),
            from: s1.address(),
            recipient: USER,
            bid_token: BID_TOKEN,
            bid_amount: BID,
            surplus: BID,
        })
    );

    let [first, second, third] = outcome.solvers.as_slice() else {
        panic!("expected three reports, got {:?}", outcome.solvers);
    };
    assert_eq!(first.result, ResultBitmask::EXECUTION_COMPLETED | ResultBitmask::CALL_REVERTED);
    assert_eq!(first.state, AttemptState::Failed);
    assert_eq!(first.charge.class, RefundClass::FullRefund);
    assert_eq!(first.charge.gas, 50_000 + CALLDATA_GAS);

    assert!(second.result.is_success());
    assert_eq!(second.state, AttemptState::Succeeded { surplus: BID });
    assert_eq!(second.charge.gas, 50_000 + CALLDATA_GAS);

    assert_eq!(third.result, ResultBitmask::LOST_AUCTION);
    assert_eq!(third.state, AttemptState::NotAttempted);
    assert_eq!(third.charge.class, RefundClass::CalldataRefund);
    assert_eq!(third.charge.gas, CALLDATA_GAS);

    let refund = 2 * (50_000 + CALLDATA_GAS) + CALLDATA_GAS;
    assert_eq!(outcome.gas_refund, refund);
    assert_eq!(outcome.bundler_credit, wei(refund));
    assert_eq!(escrow.balance_of(BUNDLER), wei(refund));
    assert_eq!(escrow.balance_of(s2.address()), ETHER - wei(CALLDATA_GAS));
    assert!(!outcome.allocation_failed);

    // every solver that passed the signature and activity checks consumed its nonce
    for signer in [&s0, &s1, &s2] {
        assert_eq!(escrow.next_nonce(signer.address()), 2);
        assert_eq!(escrow.last_active(signer.address()), BLOCK);
    }
    assert_pool_consistent(&escrow);
}

#[test]
fn test_hooks_run_in_phase_order() {
    let solver = solver_signer(0);
    let config =
        ControlConfig { requires_pre_ops: true, requires_post_ops: true, ..control_config() };
    let mut escrow = funded_escrow(config, &[&solver]);
    let request = request(vec![signed(&escrow, &solver, 1)]);
    let mut env = ScriptedEnvironment::new();

    let outcome = escrow.settle(&request, &mut env).unwrap();

    assert_eq!(
        env.calls,
        vec![
            RecordedCall::PreOps(ExecutionPhase::PreOps),
            RecordedCall::UserOp(ExecutionPhase::UserOperation),
            RecordedCall::Solver {
                solver: solver.address(),
                lock: ExecutionLock::Solver(solver.address()),
                gas_limit: SOLVER_GAS_LIMIT,
                deposit_accepted: false,
            },
            RecordedCall::Allocate(outcome.winner.unwrap()),
            RecordedCall::PostOps { solved: true },
        ]
    );
}

#[test]
fn test_replayed_nonce_is_rejected_and_charged_calldata() {
    let solver = solver_signer(0);
    let mut escrow = funded_escrow(control_config(), &[&solver]);
    let op = signed(&escrow, &solver, 1);

    let outcome = escrow.settle(&request(vec![op.clone()]), ScriptedEnvironment::new()).unwrap();
    assert!(outcome.is_solved());
    let balance = escrow.balance_of(solver.address());

    let mut replay = request(vec![op]);
    replay.block_number = BLOCK + 1;
    let mut env = ScriptedEnvironment::new();
    let outcome = escrow.settle(&replay, &mut env).unwrap();

    assert!(env.called_solvers().is_empty());
    assert_eq!(outcome.solvers[0].result, ResultBitmask::INVALID_NONCE_UNDER);
    assert_eq!(escrow.balance_of(solver.address()), balance - wei(CALLDATA_GAS));
    assert_eq!(escrow.next_nonce(solver.address()), 2);
    assert_eq!(escrow.last_active(solver.address()), BLOCK);
}

#[test]
fn test_one_accepted_attempt_per_account_per_block() {
    let solver = solver_signer(0);
    let mut escrow = funded_escrow(control_config(), &[&solver]);
    let request = request(vec![signed(&escrow, &solver, 1), signed(&escrow, &solver, 2)]);
    let mut env = ScriptedEnvironment::new()
        .solver(solver.address(), reverted_with(ISolverErrors::IntentUnfulfilled {}));

    let outcome = escrow.settle(&request, &mut env).unwrap();

    assert_eq!(env.called_solvers(), vec![solver.address()]);
    assert_eq!(
        outcome.solvers[0].result,
        ResultBitmask::EXECUTION_COMPLETED | ResultBitmask::INTENT_UNFULFILLED
    );
    assert_eq!(outcome.solvers[1].result, ResultBitmask::PER_BLOCK_LIMIT);
    assert_eq!(escrow.next_nonce(solver.address()), 2);
}

#[test]
fn test_gapped_nonce_is_rejected_but_consumed() {
    let solver = solver_signer(0);
    let mut escrow = funded_escrow(control_config(), &[&solver]);

    let outcome = escrow
        .settle(&request(vec![signed(&escrow, &solver, 5)]), ScriptedEnvironment::new())
        .unwrap();

    assert_eq!(outcome.solvers[0].result, ResultBitmask::INVALID_NONCE_OVER);
    assert!(!outcome.is_solved());
    assert_eq!(escrow.next_nonce(solver.address()), 6);
}

#[test]
fn test_last_nonce_is_never_stored() {
    let solver = solver_signer(0);
    let mut escrow = funded_escrow(control_config(), &[&solver]);

    let outcome = escrow
        .settle(&request(vec![signed(&escrow, &solver, u64::MAX)]), ScriptedEnvironment::new())
        .unwrap();
    assert_eq!(outcome.solvers[0].result, ResultBitmask::INVALID_NONCE_OVER);
    assert_eq!(escrow.next_nonce(solver.address()), 1);

    let mut gapped = request(vec![signed(&escrow, &solver, u64::MAX - 1)]);
    gapped.block_number = BLOCK + 1;
    let outcome = escrow.settle(&gapped, ScriptedEnvironment::new()).unwrap();
    assert_eq!(outcome.solvers[0].result, ResultBitmask::INVALID_NONCE_OVER);
    assert_eq!(escrow.next_nonce(solver.address()), u64::MAX);
}

#[test]
fn test_unrepaid_borrow_aborts_the_settlement() {
    let (s0, s1) = (solver_signer(0), solver_signer(1));
    let mut escrow = funded_escrow(control_config(), &[&s0, &s1]);
    let mut borrowing = solver_operation(&s1, &user_operation(), 1, BID);
    borrowing.value = U256::from(100);
    let request = request(vec![signed(&escrow, &s0, 1), sign(&s1, borrowing, escrow.domain())]);
    let env = ScriptedEnvironment::new()
        .solver(s0.address(), reverted_with(ISolverErrors::BidNotPaid {}))
        .solver(s1.address(), SolverBehavior::Withhold(U256::from(1)));

    assert_eq!(
        escrow.settle(&request, env),
        Err(EscrowError::SolverMsgValueUnpaid { solver: s1.address(), outstanding: U256::from(1) })
    );

    // the charge of the first solver is rolled back with everything else
    assert_eq!(escrow.balance_of(s0.address()), ETHER);
    assert_eq!(escrow.next_nonce(s0.address()), 1);
    assert_eq!(escrow.balance_of(BUNDLER), U256::ZERO);
    assert_eq!(escrow.total_supply(), ETHER * U256::from(2));
    assert!(!escrow.ledger().is_locked());
}

#[test]
fn test_repaid_borrow_settles() {
    let solver = solver_signer(0);
    let mut escrow = funded_escrow(control_config(), &[&solver]);
    let mut op = solver_operation(&solver, &user_operation(), 1, BID);
    op.value = ETHER / U256::from(2);

    let outcome = escrow
        .settle(&request(vec![sign(&solver, op, escrow.domain())]), ScriptedEnvironment::new())
        .unwrap();
    assert_eq!(outcome.winner.map(|bid| bid.surplus), Some(BID));
}

#[rstest]
#[case::underpaid(SolverBehavior::Pay(BID - U256::from(1)), false)]
#[case::inverted(SolverBehavior::Pay(U256::ZERO), true)]
fn test_bid_payment(#[case] behavior: SolverBehavior, #[case] invert_bid_value: bool) {
    let solver = solver_signer(0);
    let config = ControlConfig { invert_bid_value, ..control_config() };
    let mut escrow = funded_escrow(config, &[&solver]);
    let env = ScriptedEnvironment::new().solver(solver.address(), behavior);

    let outcome = escrow.settle(&request(vec![signed(&escrow, &solver, 1)]), env).unwrap();

    if invert_bid_value {
        assert!(outcome.is_solved());
        assert_eq!(outcome.winner.unwrap().surplus, U256::ZERO);
    } else {
        assert!(!outcome.is_solved());
        assert_eq!(
            outcome.solvers[0].result,
            ResultBitmask::EXECUTION_COMPLETED | ResultBitmask::BID_NOT_PAID
        );
    }
}

#[rstest]
#[case::deadline(|op: &mut SolverOperation| op.deadline = BLOCK - 1, ResultBitmask::DEADLINE_PASSED, RefundClass::NoUserRefund)]
#[case::user_hash(|op: &mut SolverOperation| op.userOpHash = B256::ZERO, ResultBitmask::INVALID_USER_HASH, RefundClass::NoUserRefund)]
#[case::fee_cap(|op: &mut SolverOperation| op.maxFeePerGas = GAS_PRICE - 1, ResultBitmask::GAS_PRICE_OVER_CAP, RefundClass::NoUserRefund)]
#[case::control(|op: &mut SolverOperation| op.control = USER, ResultBitmask::INVALID_CONTROL_HASH, RefundClass::NoUserRefund)]
#[case::bid_token(|op: &mut SolverOperation| op.bidToken = Address::ZERO, ResultBitmask::INVALID_BID_TOKEN, RefundClass::CalldataRefund)]
#[case::target(|op: &mut SolverOperation| op.to = USER, ResultBitmask::INVALID_TO, RefundClass::CalldataRefund)]
fn test_rejected_operations_are_not_called(
    #[case] tamper: fn(&mut SolverOperation),
    #[case] expected: ResultBitmask,
    #[case] class: RefundClass,
) {
    let solver = solver_signer(0);
    let mut escrow = funded_escrow(control_config(), &[&solver]);
    let mut op = solver_operation(&solver, &user_operation(), 1, BID);
    tamper(&mut op);
    let mut env = ScriptedEnvironment::new();

    let outcome =
        escrow.settle(&request(vec![sign(&solver, op, escrow.domain())]), &mut env).unwrap();

    assert!(env.called_solvers().is_empty());
    let report = outcome.solvers[0];
    assert_eq!(report.result, expected);
    assert_eq!(report.charge.class, class);
    let charged = match class {
        RefundClass::NoUserRefund => U256::ZERO,
        _ => wei(CALLDATA_GAS),
    };
    assert_eq!(escrow.balance_of(solver.address()), ETHER - charged);
    // the signature was valid, so the attempt still counts for sequencing
    assert_eq!(escrow.next_nonce(solver.address()), 2);
}

#[test]
fn test_forged_signature_is_free_and_not_sequenced() {
    let (solver, forger) = (solver_signer(0), solver_signer(1));
    let mut escrow = funded_escrow(control_config(), &[&solver]);
    let op = solver_operation(&solver, &user_operation(), 1, BID);
    let mut env = ScriptedEnvironment::new();

    let outcome =
        escrow.settle(&request(vec![sign(&forger, op, escrow.domain())]), &mut env).unwrap();

    assert!(env.called_solvers().is_empty());
    assert_eq!(outcome.solvers[0].result, ResultBitmask::INVALID_SIGNATURE);
    assert_eq!(escrow.balance_of(solver.address()), ETHER);
    assert_eq!(escrow.next_nonce(solver.address()), 1);
    assert_eq!(escrow.last_active(solver.address()), 0);
}

#[test]
fn test_signer_cannot_spend_another_accounts_collateral() {
    let (owner, signer) = (solver_signer(0), solver_signer(1));
    let mut escrow = funded_escrow(control_config(), &[&owner]);
    let mut op = solver_operation(&signer, &user_operation(), 1, BID);
    op.solver = owner.address();
    let op = sign(&signer, op, escrow.domain());
    let mut env = ScriptedEnvironment::new()
        .solver(owner.address(), reverted_with(ISolverErrors::SolverOpReverted {}));

    let outcome = escrow.settle(&request(vec![op]), &mut env).unwrap();

    assert!(env.called_solvers().is_empty());
    assert_eq!(outcome.solvers[0].result, ResultBitmask::INVALID_SIGNATURE);
    assert_eq!(outcome.solvers[0].charge.amount, U256::ZERO);
    assert_eq!(escrow.balance_of(owner.address()), ETHER);
    assert_eq!(escrow.next_nonce(owner.address()), 1);
    assert_eq!(escrow.last_active(owner.address()), 0);
    assert_eq!(escrow.balance_of(signer.address()), U256::ZERO);
    assert_pool_consistent(&escrow);
}

#[test]
fn test_underfunded_solver_pays_calldata_only() {
    let solver = solver_signer(0);
    let mut escrow = escrow_with(control_config());
    escrow.deposit(solver.address(), U256::from(1_000)).unwrap();
    let mut env = ScriptedEnvironment::new();

    let outcome = escrow.settle(&request(vec![signed(&escrow, &solver, 1)]), &mut env).unwrap();

    assert!(env.called_solvers().is_empty());
    assert_eq!(outcome.solvers[0].result, ResultBitmask::INSUFFICIENT_ESCROW);
    assert_eq!(escrow.balance_of(solver.address()), U256::from(1_000) - wei(CALLDATA_GAS));
}

#[test]
fn test_charge_never_exceeds_balance() {
    let solver = solver_signer(0);
    let mut escrow = escrow_with(control_config());
    escrow.deposit(solver.address(), U256::from(100)).unwrap();
    escrow.request_withdrawal(solver.address(), U256::from(80), 0).unwrap();

    let outcome = escrow
        .settle(&request(vec![signed(&escrow, &solver, 1)]), ScriptedEnvironment::new())
        .unwrap();

    assert_eq!(outcome.solvers[0].result, ResultBitmask::INSUFFICIENT_ESCROW);
    assert_eq!(outcome.solvers[0].charge.amount, U256::from(100));
    assert_eq!(outcome.solvers[0].charge.gas, 10);
    assert_eq!(escrow.balance_of(solver.address()), U256::ZERO);
    assert_eq!(escrow.spendable(solver.address()), U256::ZERO);
    assert_eq!(escrow.withdrawal(solver.address()).escrowed, U256::ZERO);
    assert_eq!(escrow.balance_of(BUNDLER), U256::from(100));
    assert_pool_consistent(&escrow);
}

#[test]
fn test_gas_overrun_counts_as_revert() {
    let solver = solver_signer(0);
    let mut escrow = funded_escrow(control_config(), &[&solver]);
    let env = ScriptedEnvironment::new().solver(solver.address(), SolverBehavior::OverrunGas);

    let outcome = escrow.settle(&request(vec![signed(&escrow, &solver, 1)]), env).unwrap();

    assert!(!outcome.is_solved());
    assert_eq!(
        outcome.solvers[0].result,
        ResultBitmask::EXECUTION_COMPLETED | ResultBitmask::CALL_REVERTED
    );
    assert_eq!(outcome.solvers[0].charge.gas, SOLVER_GAS_LIMIT + CALLDATA_GAS);
}

#[test]
fn test_solver_cannot_deposit_mid_settlement() {
    let solver = solver_signer(0);
    let mut escrow = funded_escrow(control_config(), &[&solver]);
    let mut env = ScriptedEnvironment { deposit_mid_call: true, ..ScriptedEnvironment::new() };

    escrow.settle(&request(vec![signed(&escrow, &solver, 1)]), &mut env).unwrap();

    assert!(matches!(
        env.calls.as_slice(),
        [_, RecordedCall::Solver { deposit_accepted: false, .. }, _]
    ));
}

#[test]
fn test_allocation_failure_is_soft() {
    let solver = solver_signer(0);
    let mut escrow = funded_escrow(control_config(), &[&solver]);
    let env = ScriptedEnvironment { fail_allocation: true, ..ScriptedEnvironment::new() };

    let outcome = escrow.settle(&request(vec![signed(&escrow, &solver, 1)]), env).unwrap();

    assert!(outcome.is_solved());
    assert!(outcome.allocation_failed);
    assert_eq!(escrow.next_nonce(solver.address()), 2);
}

#[test]
fn test_required_fulfillment_without_winner_is_fatal() {
    let solver = solver_signer(0);
    let config = ControlConfig { require_fulfillment: true, ..control_config() };
    let mut escrow = funded_escrow(config, &[&solver]);
    let env = ScriptedEnvironment::new()
        .solver(solver.address(), SolverBehavior::Revert(Bytes::new()));

    assert_eq!(
        escrow.settle(&request(vec![signed(&escrow, &solver, 1)]), env),
        Err(EscrowError::NoSolverFulfilled)
    );
    assert_eq!(escrow.balance_of(solver.address()), ETHER);
}

#[rstest]
#[case::pre_ops(ScriptedEnvironment { fail_pre_ops: true, ..ScriptedEnvironment::new() }, EscrowError::PreOpsFailed)]
#[case::user_op(ScriptedEnvironment { fail_user_op: true, ..ScriptedEnvironment::new() }, EscrowError::UserOpFailed)]
#[case::post_ops(ScriptedEnvironment { fail_post_ops: true, ..ScriptedEnvironment::new() }, EscrowError::PostOpsFailed)]
fn test_failing_hooks_are_fatal(#[case] env: ScriptedEnvironment, #[case] expected: EscrowError) {
    let solver = solver_signer(0);
    let config =
        ControlConfig { requires_pre_ops: true, requires_post_ops: true, ..control_config() };
    let mut escrow = funded_escrow(config, &[&solver]);

    assert_eq!(escrow.settle(&request(vec![signed(&escrow, &solver, 1)]), env), Err(expected));
    assert_eq!(escrow.next_nonce(solver.address()), 1);
    assert_eq!(escrow.balance_of(BUNDLER), U256::ZERO);
}

#[test]
fn test_unknown_controller_is_fatal() {
    let mut escrow = escrow_with(control_config());
    let mut request = request(Vec::new());
    request.user_op.control = USER;

    assert_eq!(
        escrow.settle(&request, ScriptedEnvironment::new()),
        Err(EscrowError::UnknownControl(USER))
    );
}

#[test]
fn test_settlement_without_solvers() {
    let mut escrow = escrow_with(control_config());
    let mut env = ScriptedEnvironment::new();

    let outcome = escrow.settle(&request(Vec::new()), &mut env).unwrap();

    assert!(!outcome.is_solved());
    assert_eq!(outcome.gas_refund, 0);
    assert_eq!(env.calls, vec![RecordedCall::UserOp(ExecutionPhase::UserOperation)]);
    assert_eq!(escrow.registry().control_config(CONTROL), Some(control_config()));
}
