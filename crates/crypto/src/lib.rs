//! Bid encryption primitives for sealed-bid auctions.
//!
//! Bids are encrypted to a per-lot public key on the BLS12-381 G1 group with
//! an ECIES-style construction:
//!
//! 1. **Setup**: The seller generates a key pair and publishes the public key
//!    with the lot. The private key stays with the seller until conclusion.
//!
//! 2. **Encryption**: A bidder samples an ephemeral key, derives a shared
//!    point with the lot key and masks its minimum amount out with an
//!    HKDF-SHA256 key stream salted by the bid's public fields.
//!
//! 3. **Decryption**: After conclusion the private key is revealed and anyone
//!    can recompute the shared point from the ephemeral key and unmask the bid.

pub mod ecies;
pub mod error;
pub mod payload;

pub use ecies::{decrypt, derive_public_key, encrypt, generate_keypair, validate_public_key};
pub use error::CryptoError;
pub use payload::{decode_bid_payload, encode_bid_payload, open_bid, seal_bid};
