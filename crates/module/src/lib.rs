//! Auction house for encrypted marginal-price auctions.
//!
//! Sellers list a fixed capacity of a base token. Bidders escrow a quote
//! amount and submit their minimum base amount out encrypted to the lot's
//! public key, so prices stay hidden until the lot concludes. Once the seller
//! reveals the private key, bids are decrypted and sorted in batches, a single
//! clearing price is computed and each bid is settled by an individual claim.
//!
//! # Architecture
//!
//! - `call`: Message types for state-changing operations
//! - `handlers`: Lot administration, bidding and key reveal
//! - `gateway`: Storage and decryption of sealed bids
//! - `pipeline`: Resumable decrypt-and-sort step
//! - `queue`: Price-sorted accepted bids
//! - `clearing`: Marginal price computation and settlement
//! - `claims`: Per-bid payouts, refunds and fee rewards
//! - `house`: Atomic call execution and transfer effects
//! - `queries`: Read-only state access
//! - `state`: State structures and custody accounting
//! - `genesis`: Initial configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```ignore
//! use empa_module::{AuctionCall, AuctionHouse, CallContext, HouseGenesisConfig};
//!
//! let mut house = AuctionHouse::new(&HouseGenesisConfig::with_owner(owner))?;
//! let ctx = CallContext { sender: seller, timestamp: now };
//!
//! // Create a lot
//! let receipt = house.execute(&ctx, AuctionCall::Auction { routing, params, info_hash })?;
//! ```

pub mod allowlist;
pub mod call;
pub mod claims;
pub mod clearing;
pub mod error;
pub mod gateway;
pub mod genesis;
pub mod handlers;
pub mod house;
pub mod math;
pub mod pipeline;
pub mod queries;
pub mod queue;
pub mod state;

pub use allowlist::{AddressAllowlist, Allowlist, AllowlistRegistry};
pub use call::{AuctionCall, CallOutput};
pub use claims::ClaimResult;
pub use error::AuctionError;
pub use genesis::{FeeConfig, GenesisValidationError, HouseGenesisConfig, LotLimits};
pub use handlers::{CallContext, HandlerResult};
pub use house::{AuctionHouse, Receipt};
pub use pipeline::DecryptProgress;
pub use queries::{AuctionQuery, AuctionQueryResponse};
pub use state::HouseState;
