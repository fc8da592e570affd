//! Deposit-confirmation and portfolio-rebalancing coordination engine.
//!
//! This crate contains the core logic for a savings/investment backend: watching a
//! blockchain for incoming stablecoin transfers and crediting user ledgers exactly once,
//! and computing and executing the swaps needed to bring a drifted portfolio back to its
//! target allocation. It is composed of several modules, each responsible for one part
//! of the coordination flow:
//!
//! - `ledger`: portfolio balances, transaction records and the processed-event marker
//!   store that gates one-time credits.
//! - `chain`: read-only access to transfer logs on the chain, with an EVM JSON-RPC
//!   implementation.
//! - `deposit`: the deposit session state machine, from session creation through
//!   confirmation-depth waiting to the idempotent credit.
//! - `rebalance`: the pure drift/swap-set calculator and the service that turns a plan
//!   into submitted swaps.
//! - `swap`: submission of swap orders to an external provider and status polling with
//!   atomic settlement.
//! - `scheduler`: the recurring-job contract (`Done`/`Retry`/`Fatal`) that all polling
//!   handlers satisfy, plus a Tokio-backed reference harness.
//!
//! All services are explicitly constructed with interface-typed collaborators, so every
//! port can be substituted with an in-memory fake in tests.

pub mod assets;
pub mod chain;
pub mod config;
pub mod deposit;
pub mod ledger;
pub mod rebalance;
pub mod scheduler;
pub mod swap;
pub mod utils;
