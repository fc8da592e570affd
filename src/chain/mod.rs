//! Read-only chain access: transfer logs, block heights and block timestamps.

pub mod observer;
pub mod rpc;
pub mod types;

pub use observer::*;
pub use rpc::*;
pub use types::*;
