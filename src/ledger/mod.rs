//! Ledger state: portfolios, holdings, transaction records and processed-event markers.
//!
//! The ledger is consumed through the [`LedgerStore`] port so the engine never depends on
//! a concrete database. [`InMemoryLedgerStore`] is the reference implementation used by
//! the demo binary and the test suite; a persistent adapter satisfies the same contract.

pub mod store;
pub mod types;

pub use store::*;
pub use types::*;
