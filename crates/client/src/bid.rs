//! Bid creation and encryption.

use rand::{CryptoRng, RngCore};
use thiserror::Error;

use empa_crypto::{generate_keypair, seal_bid, validate_public_key};
use empa_module::AuctionCall;
use empa_types::{Address, G1Point, LotId, Scalar};

/// Errors that can occur during bid creation.
#[derive(Debug, Error)]
pub enum BidError {
    #[error("Invalid lot public key")]
    InvalidPublicKey,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Bid amount must be positive")]
    ZeroAmount,
}

/// A sealed bid ready for submission.
#[derive(Debug, Clone)]
pub struct PreparedBid {
    pub lot_id: LotId,
    pub bidder: Address,
    /// Quote escrowed with the bid (public)
    pub amount_in: u128,
    /// Minimum base wanted (keep secret until conclusion)
    pub min_amount_out: u128,
    /// Encrypted minimum amount out
    pub ciphertext: Vec<u8>,
    /// Ephemeral public key of the encryption
    pub bid_pubkey: G1Point,
}

impl PreparedBid {
    /// Turn the bid into a call for the auction house.
    pub fn into_call(self, referrer: Option<Address>, allowlist_proof: Vec<u8>) -> AuctionCall {
        AuctionCall::Bid {
            lot_id: self.lot_id,
            referrer,
            amount_in: self.amount_in,
            ciphertext: self.ciphertext,
            bid_pubkey: self.bid_pubkey,
            allowlist_proof,
        }
    }
}

/// Generate the key pair a seller publishes with a lot.
pub fn generate_auction_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (Scalar, G1Point) {
    generate_keypair(rng)
}

/// Create a sealed bid for a lot.
///
/// # Arguments
/// * `public_key` - The lot's public key
/// * `lot_id` - ID of the lot to bid in
/// * `bidder` - Address the bid is submitted from
/// * `amount_in` - Quote amount escrowed with the bid
/// * `min_amount_out` - Minimum base amount wanted, encrypted
/// * `rng` - Cryptographically secure random number generator
pub fn create_bid<R: RngCore + CryptoRng>(
    public_key: &G1Point,
    lot_id: LotId,
    bidder: Address,
    amount_in: u128,
    min_amount_out: u128,
    rng: &mut R,
) -> Result<PreparedBid, BidError> {
    if amount_in == 0 {
        return Err(BidError::ZeroAmount);
    }
    validate_public_key(public_key).map_err(|_| BidError::InvalidPublicKey)?;

    let sealed = seal_bid(public_key, lot_id, &bidder, amount_in, min_amount_out, rng)
        .map_err(|e| BidError::EncryptionFailed(e.to_string()))?;

    Ok(PreparedBid {
        lot_id,
        bidder,
        amount_in,
        min_amount_out,
        ciphertext: sealed.ciphertext,
        bid_pubkey: sealed.bid_pubkey,
    })
}

/// Builder for creating bids with additional options.
pub struct BidBuilder {
    public_key: G1Point,
    lot_id: LotId,
    bidder: Address,
    amount_in: u128,
    min_amount_out: u128,
}

impl BidBuilder {
    /// Create a new bid builder.
    pub fn new(public_key: G1Point, lot_id: LotId, bidder: Address) -> Self {
        Self {
            public_key,
            lot_id,
            bidder,
            amount_in: 0,
            min_amount_out: 0,
        }
    }

    /// Set the quote amount escrowed.
    pub fn amount_in(mut self, amount: u128) -> Self {
        self.amount_in = amount;
        self
    }

    /// Set the minimum base amount wanted.
    pub fn min_amount_out(mut self, amount: u128) -> Self {
        self.min_amount_out = amount;
        self
    }

    /// Build the prepared bid.
    pub fn build<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<PreparedBid, BidError> {
        create_bid(
            &self.public_key,
            self.lot_id,
            self.bidder,
            self.amount_in,
            self.min_amount_out,
            rng,
        )
    }
}
