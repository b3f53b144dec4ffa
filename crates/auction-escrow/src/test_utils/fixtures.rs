use alloy_primitives::{address, Address, Bytes, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::Eip712Domain;
use escrow_interfaces::{SolverOperation, UserOperation};

use crate::{ControlConfig, Escrow, EscrowConfig, SignedSolverOperation};

use super::StaticRegistry;

/// The address the test escrow is deployed at.
pub const ESCROW: Address = address!("0x6342000000000000000000000000000000000e5c");
/// The approved controller.
pub const CONTROL: Address = address!("0x3000000000000000000000000000000000000003");
/// The requesting party.
pub const USER: Address = address!("0x4000000000000000000000000000000000000004");
/// The bundler submitting settlements.
pub const BUNDLER: Address = address!("0x5000000000000000000000000000000000000005");
/// The token bids are denominated in.
pub const BID_TOKEN: Address = address!("0x6000000000000000000000000000000000000006");
/// The gas budget of a test settlement.
pub const SETTLEMENT_GAS_LIMIT: u64 = 30_000_000;
/// One ether in wei.
pub const ETHER: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Returns a deterministic signer. `index` selects one of 255 distinct keys.
pub fn solver_signer(index: u8) -> PrivateKeySigner {
    let key = B256::with_last_byte(index.saturating_add(1));
    PrivateKeySigner::from_bytes(&key).expect("small scalars are valid secp256k1 keys")
}

/// The controller configuration most tests use.
pub fn control_config() -> ControlConfig {
    ControlConfig { bid_token: BID_TOKEN, ..Default::default() }
}

/// An escrow at [`ESCROW`] with [`CONTROL`] approved as `config`.
pub fn escrow_with(config: ControlConfig) -> Escrow<StaticRegistry> {
    Escrow::new(ESCROW, EscrowConfig::default(), StaticRegistry::default().control(CONTROL, config))
}

/// A user operation settled through [`CONTROL`].
pub fn user_operation() -> UserOperation {
    UserOperation {
        from: USER,
        to: ESCROW,
        gas: 1_000_000,
        maxFeePerGas: 100,
        nonce: 1,
        deadline: u64::MAX,
        control: CONTROL,
        ..Default::default()
    }
}

/// A solver operation of `signer`, collateralized by the signer's own address, answering
/// `user_op`.
pub fn solver_operation(
    signer: &PrivateKeySigner,
    user_op: &UserOperation,
    nonce: u64,
    bid_amount: U256,
) -> SolverOperation {
    SolverOperation {
        from: signer.address(),
        to: ESCROW,
        value: U256::ZERO,
        gas: 500_000,
        maxFeePerGas: 100,
        nonce,
        deadline: u64::MAX,
        solver: signer.address(),
        control: user_op.control,
        userOpHash: user_op.hash(),
        bidToken: BID_TOKEN,
        bidAmount: bid_amount,
        data: Bytes::from_static(&[0xab; 4]),
    }
}

/// Signs `op` with `signer` under `domain`.
pub fn sign(
    signer: &PrivateKeySigner,
    op: SolverOperation,
    domain: &Eip712Domain,
) -> SignedSolverOperation {
    let hash = op.signing_hash(domain);
    let signature = signer.sign_hash_sync(&hash).expect("local signing cannot fail");
    SignedSolverOperation { op, signature: Bytes::copy_from_slice(&signature.as_bytes()) }
}
