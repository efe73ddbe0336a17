//! Permissionless settlement driver for encrypted marginal-price auctions.
//!
//! The driver:
//! 1. Reveals the private keys it holds for lots that have concluded
//! 2. Decrypts and sorts bids in fixed-size batches until each lot is done
//! 3. Settles fully decrypted lots
//! 4. Optionally aborts lots whose settle period has lapsed
//!
//! Every step is an ordinary call against the auction house, so the driver
//! holds no privileges beyond the keys sellers hand it.

pub mod service;

pub use service::{DriverConfig, DriverError, DriverReport, SettlementService};
