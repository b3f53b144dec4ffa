//! Escrowed settlement and competitive solver execution for intent auctions.
//!
//! Solvers lock collateral in the [`EscrowLedger`] and bid to fulfill a user operation. An
//! [`Escrow`] settles the user operation by attempting the solvers in order: every attempt is
//! verified, the first one that runs and pays its bid wins, and every attempt is charged for the
//! gas it made the bundler spend.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use escrow_interfaces;

pub mod constants;

mod borrow;
pub use borrow::*;

mod config;
pub use config::*;

mod error;
pub use error::*;

mod external;
pub use external::*;

mod gas;
pub use gas::*;

mod key;
pub use key::*;

mod ledger;
pub use ledger::*;

mod result;
pub use result::*;

mod settlement;
pub use settlement::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod verify;
pub use verify::*;
