//! Swap execution: order submission to an external provider and status polling with
//! atomic settlement.

pub mod coordinator;
pub mod types;

pub use coordinator::*;
pub use types::*;
