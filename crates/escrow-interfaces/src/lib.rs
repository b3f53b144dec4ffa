//! Solidity-facing types for the auction escrow.
//!
//! This crate holds the ABI/EIP-712 definitions shared by the escrow engine and by off-engine
//! signers: the user and solver operation structs, and the failure signals a solver call may
//! revert with. Keeping them in one place guarantees both sides hash and decode identical
//! layouts.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]
#![deny(unused_must_use)]

pub use alloy_primitives;
pub use alloy_sol_types;

use alloy_primitives::{Address, B256};
use alloy_sol_types::{eip712_domain, Eip712Domain, SolStruct};

/// The EIP-712 domain name signed operations are bound to.
pub const ESCROW_DOMAIN_NAME: &str = "AuctionEscrow";

/// The EIP-712 domain version signed operations are bound to.
pub const ESCROW_DOMAIN_VERSION: &str = "1";

alloy_sol_types::sol! {
    /// The operation of the requesting party. Solver operations bind to its struct hash.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct UserOperation {
        address from;
        address to;
        uint256 value;
        uint64 gas;
        uint128 maxFeePerGas;
        uint64 nonce;
        uint64 deadline;
        address dapp;
        address control;
        bytes data;
    }

    /// A solver's bid to fulfill a [`UserOperation`].
    ///
    /// `solver` is the collateral-holding address: its escrow record is charged and its nonce is
    /// checked. The signature over the EIP-712 hash of this struct travels separately.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct SolverOperation {
        address from;
        address to;
        uint256 value;
        uint64 gas;
        uint128 maxFeePerGas;
        uint64 nonce;
        uint64 deadline;
        address solver;
        address control;
        bytes32 userOpHash;
        address bidToken;
        uint256 bidAmount;
        bytes data;
    }

    /// Failure signals a solver call reverts with. The escrow classifies an attempt by the
    /// selector of its revert data.
    interface ISolverErrors {
        error BidNotPaid();
        error SolverMsgValueTooHigh();
        error IntentUnfulfilled();
        error SolverOpReverted();
        error CallbackNotCalled();
        error AlteredControlHash();
        error PreSolverFailed();
        error PostSolverFailed();
    }
}

/// Returns the EIP-712 domain of the escrow deployed at `verifying_contract` on `chain_id`.
pub fn escrow_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    eip712_domain! {
        name: ESCROW_DOMAIN_NAME,
        version: ESCROW_DOMAIN_VERSION,
        chain_id: chain_id,
        verifying_contract: verifying_contract,
    }
}

impl UserOperation {
    /// The hash solver operations must carry in `userOpHash` to answer this operation.
    pub fn hash(&self) -> B256 {
        self.eip712_hash_struct()
    }
}

impl SolverOperation {
    /// The digest the solver signs: the EIP-712 signing hash under the escrow domain.
    pub fn signing_hash(&self, domain: &Eip712Domain) -> B256 {
        self.eip712_signing_hash(domain)
    }
}
