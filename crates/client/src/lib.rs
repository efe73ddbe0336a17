//! Client SDK for bidding in encrypted marginal-price auctions.
//!
//! This crate provides a high-level API for:
//! - Generating lot key pairs
//! - Sealing bids to a lot's public key
//! - Building bid calls for the auction house
//! - Simulating a complete lot from a JSON scenario

pub mod bid;
pub mod simulate;

pub use bid::{create_bid, generate_auction_keypair, BidBuilder, BidError, PreparedBid};
pub use simulate::{run_scenario, Scenario, SimulationOutcome};
