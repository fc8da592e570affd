//! Deposit Session State Machine
//!
//! This module tracks a deposit intent from creation to credit. A session is created
//! when a user announces an incoming transfer, scans the chain for a matching transfer
//! event from its creation block onward, waits for confirmation depth, and finally
//! credits the user's ledger exactly once:
//!
//! - `session`: the `DepositSession` record, its status lifecycle and the acceptable
//!   amount band, plus the session store port.
//! - `service`: the `DepositService` implementing session creation and the re-entrant
//!   confirmation algorithm, including the processed-event idempotency gate.
//!
//! Confirmation is safe to invoke concurrently from a user-triggered call and the
//! recurring job: the processed-event marker insert is the single synchronization
//! primitive, and terminal states short-circuit without touching the ledger.

pub mod service;
pub mod session;

pub use service::*;
pub use session::*;
