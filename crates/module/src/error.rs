//! Auction house error types.

use thiserror::Error;

use empa_types::{BidId, BidStatus, LotId, LotStatus, Token};

/// Errors that can occur in the auction house.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuctionError {
    #[error("Lot not found: {0}")]
    InvalidLotId(LotId),

    #[error("Bid {bid_id} not found in lot {lot_id}")]
    InvalidBidId { lot_id: LotId, bid_id: BidId },

    #[error("Lot {lot_id} is in the wrong state: {status:?}")]
    LotWrongState { lot_id: LotId, status: LotStatus },

    #[error("Bid {bid_id} is in the wrong state: {status:?}")]
    BidWrongState { bid_id: BidId, status: BidStatus },

    #[error("Lot {0} already curated")]
    AlreadyCurated(LotId),

    #[error("Lot {0} has not concluded")]
    MarketActive(LotId),

    #[error("Lot {0} is not accepting this call")]
    MarketNotActive(LotId),

    #[error("Not permitted")]
    NotPermitted,

    #[error("Private key does not match the lot's public key")]
    InvalidPrivateKey,

    #[error("Bid {0} already claimed")]
    AlreadyClaimed(BidId),

    #[error("Invalid fee: {fee} exceeds {max}")]
    InvalidFee { fee: u16, max: u16 },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Insufficient custody of token {}: need {needed}, have {available}", hex_prefix(.token))]
    InsufficientCustody {
        token: Token,
        needed: u128,
        available: u128,
    },

    #[error("Arithmetic overflow")]
    MathOverflow,
}

fn hex_prefix(token: &Token) -> String {
    token[..4].iter().map(|b| format!("{b:02x}")).collect()
}
