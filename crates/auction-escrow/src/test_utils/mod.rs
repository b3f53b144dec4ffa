//! Test utilities for the auction escrow.

mod environment;
mod fixtures;
mod registry;

pub use environment::*;
pub use fixtures::*;
pub use registry::*;
