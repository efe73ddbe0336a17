//! Encryption gateway: stores sealed bids and opens them once the lot's
//! private key is known.

use tracing::debug;

use empa_crypto::{open_bid, validate_public_key};
use empa_types::{
    Bid, BidId, EncryptedBid, G1Point, LotId, Scalar, BID_SEED_TAG_LEN, MAX_BID_CIPHERTEXT_LEN,
};

use crate::error::AuctionError;
use crate::state::HouseState;

/// Store a bid's ciphertext and ephemeral public key.
///
/// The ciphertext must be long enough to hold the seed tag and an amount,
/// and no longer than [`MAX_BID_CIPHERTEXT_LEN`].
pub fn submit(
    state: &mut HouseState,
    lot_id: LotId,
    bid_id: BidId,
    ciphertext: Vec<u8>,
    bid_pubkey: G1Point,
) -> Result<(), AuctionError> {
    if ciphertext.len() <= BID_SEED_TAG_LEN || ciphertext.len() > MAX_BID_CIPHERTEXT_LEN {
        return Err(AuctionError::InvalidParams(format!(
            "bid ciphertext length {}",
            ciphertext.len()
        )));
    }
    validate_public_key(&bid_pubkey)
        .map_err(|e| AuctionError::InvalidParams(format!("bid public key: {e}")))?;
    state.encrypted_bids.insert(
        (lot_id, bid_id),
        EncryptedBid {
            ciphertext,
            bid_pubkey,
        },
    );
    Ok(())
}

/// Open a stored bid.
///
/// Returns `None` for anything that does not decrypt to a well-formed
/// payload. A malformed bid is excluded from clearing, never an error.
pub fn decrypt(
    private_key: &Scalar,
    lot_id: LotId,
    bid_id: BidId,
    bid: &Bid,
    encrypted: &EncryptedBid,
) -> Option<u128> {
    match open_bid(private_key, lot_id, &bid.bidder, bid.amount, encrypted) {
        Ok(amount_out) => Some(amount_out),
        Err(e) => {
            debug!(lot_id, bid_id, error = %e, "bid failed to decrypt");
            None
        }
    }
}
