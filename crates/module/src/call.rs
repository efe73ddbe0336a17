//! Call message types for the auction house.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use empa_types::{
    Address, AuctionParams, BidId, FeeType, G1Point, LotId, RoutingParams, Scalar, Settlement,
    Token,
};

use crate::claims::ClaimResult;
use crate::pipeline::DecryptProgress;

/// Call messages for the auction house.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum AuctionCall {
    // === Lot Lifecycle ===
    /// Create a lot, escrowing its capacity from the sender.
    Auction {
        routing: RoutingParams,
        params: AuctionParams,
        info_hash: [u8; 32],
    },

    /// Withdraw a lot nobody has bid on (seller only).
    Cancel { lot_id: LotId },

    /// Accept curation of a lot (named curator only).
    Curate { lot_id: LotId },

    /// Unfilled settlement once the settle period has passed (anyone).
    Abort { lot_id: LotId },

    // === Bidding ===
    /// Submit a sealed bid, escrowing `amount_in` quote from the sender.
    Bid {
        lot_id: LotId,
        referrer: Option<Address>,
        amount_in: u128,
        ciphertext: Vec<u8>,
        bid_pubkey: G1Point,
        allowlist_proof: Vec<u8>,
    },

    /// Withdraw a bid before conclusion (bidder only).
    RefundBid { lot_id: LotId, bid_id: BidId },

    // === Settlement ===
    /// Reveal the lot's private key and optionally decrypt a first batch.
    SubmitPrivateKey {
        lot_id: LotId,
        private_key: Scalar,
        num_to_decrypt: u64,
    },

    /// Decrypt and sort the next batch of bids.
    DecryptAndSortBids { lot_id: LotId, num_to_decrypt: u64 },

    /// Compute the clearing price and pay the seller.
    Settle { lot_id: LotId },

    /// Pay out and refund a bid (anyone, proceeds go to the bidder).
    Claim { lot_id: LotId, bid_id: BidId },

    /// Withdraw the sender's fee rewards in a token.
    ClaimRewards { token: Token },

    // === Admin ===
    /// Set the sender's curator fee.
    SetCuratorFee { fee: u16 },

    /// Set a house fee (owner only).
    SetFee { fee_type: FeeType, fee: u16 },

    /// Set the protocol fee recipient (owner only).
    SetProtocol { protocol: Address },
}

/// Output of a successful call.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum CallOutput {
    None,
    LotCreated(LotId),
    BidSubmitted(BidId),
    /// Quote refunded or rewards withdrawn
    Amount(u128),
    Progress(DecryptProgress),
    Settled(Settlement),
    Claimed(ClaimResult),
}
