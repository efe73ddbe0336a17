//! Core type definitions for encrypted marginal-price auctions.
//!
//! This crate provides the shared data structures used across the auction
//! system: lot and bid records, key material encodings, settlement results and
//! the transfer effects emitted by the auction house.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::BTreeSet;

// =========================
// CRYPTOGRAPHIC PRIMITIVES
// =========================

/// Compressed G1 point on BLS12-381 (48 bytes)
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct G1Point(#[serde_as(as = "[_; 48]")] pub [u8; 48]);

impl Default for G1Point {
    fn default() -> Self {
        Self([0u8; 48])
    }
}

/// Scalar field element (32 bytes, little-endian)
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Scalar(#[serde_as(as = "[_; 32]")] pub [u8; 32]);

impl Default for Scalar {
    fn default() -> Self {
        Self([0u8; 32])
    }
}

/// Fixed tag occupying the high 128 bits of every bid plaintext.
///
/// A ciphertext that does not decrypt to this tag was forged or encrypted to
/// the wrong key, and its bid is excluded from clearing.
pub const BID_SEED_TAG: u128 = 0x454d_5041_5f42_4944_5f53_4545_445f_5631;

/// Length of the tag prefix in a bid plaintext.
pub const BID_SEED_TAG_LEN: usize = 16;

/// Longest bid ciphertext the house accepts. The amount field may carry
/// leading zero padding up to this length.
pub const MAX_BID_CIPHERTEXT_LEN: usize = 64;

// =========================
// IDENTIFIERS
// =========================

/// Generic address type (32 bytes)
pub type Address = [u8; 32];

/// Tokens are identified by their address.
pub type Token = Address;

/// Lot identifier, allocated sequentially from 1.
pub type LotId = u64;

/// Bid identifier, allocated sequentially from 1 within a lot.
pub type BidId = u64;

/// 100% expressed in basis points.
pub const ONE_HUNDRED_PERCENT: u16 = 10_000;

// =========================
// LIFECYCLE
// =========================

/// Lot lifecycle status
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum LotStatus {
    /// Accepting bids, or concluded and awaiting decryption
    Created,
    /// Every bid has been decrypted and sorted
    Decrypted,
    /// Clearing price recorded, claims open
    Settled,
    /// Withdrawn by the seller before any bid arrived
    Cancelled,
}

/// Bid lifecycle status
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum BidStatus {
    /// Encrypted, waiting for the private key
    Submitted,
    /// Processed by the decrypt pipeline (queued or excluded)
    Decrypted,
    /// Payout and/or refund delivered after settlement
    Claimed,
    /// Withdrawn by the bidder before conclusion
    Refunded,
}

/// Fee kinds configurable by the house owner.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum FeeType {
    Protocol,
    Referrer,
    MaxCurator,
}

// =========================
// LOT RECORDS
// =========================

/// Auction parameters for a single lot.
///
/// Prices are quote units per whole base token, i.e. scaled by
/// `10^base_token_decimals`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Lot {
    pub lot_id: LotId,
    pub minimum_price: u128,
    pub capacity: u128,
    pub quote_token_decimals: u8,
    pub base_token_decimals: u8,
    pub start: u64,
    pub conclusion: u64,
    pub status: LotStatus,
    pub min_filled: u128,
    pub min_bid_size: u128,
}

impl Lot {
    /// One whole base token in base units.
    pub fn base_scale(&self) -> u128 {
        10u128.pow(u32::from(self.base_token_decimals))
    }

    /// Whether bids are accepted at `timestamp`.
    pub fn is_live(&self, timestamp: u64) -> bool {
        self.status == LotStatus::Created
            && timestamp >= self.start
            && timestamp < self.conclusion
    }

    /// Whether the bidding window has closed at `timestamp`.
    pub fn has_concluded(&self, timestamp: u64) -> bool {
        timestamp >= self.conclusion
    }
}

/// Reference to a derivative wrapper for payouts. Never invoked by the house.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct DerivativeRef {
    pub derivative_type: Option<[u8; 7]>,
    pub wrap_derivative: bool,
    pub derivative_params: Vec<u8>,
}

/// Routing and fee data for a lot.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Routing {
    pub seller: Address,
    pub base_token: Token,
    pub quote_token: Token,
    pub curator: Option<Address>,
    /// Cached once by `curate`
    pub curator_fee: u16,
    pub curated: bool,
    /// Snapshot of the house fees at creation
    pub protocol_fee: u16,
    pub referrer_fee: u16,
    pub hooks: Option<Address>,
    pub allowlist: Option<Address>,
    pub derivative: DerivativeRef,
    /// Base units currently escrowed for this lot
    pub prefunding: u128,
    pub info_hash: [u8; 32],
}

/// Per-lot bid bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BidData {
    pub next_bid_id: BidId,
    pub next_decrypt_index: u64,
    pub marginal_price: u128,
    pub public_key: G1Point,
    pub private_key: Option<Scalar>,
    /// Submission order, never re-sorted
    pub bid_ids: Vec<BidId>,
}

impl BidData {
    pub fn new(public_key: G1Point) -> Self {
        Self {
            next_bid_id: 1,
            next_decrypt_index: 0,
            marginal_price: 0,
            public_key,
            private_key: None,
            bid_ids: Vec::new(),
        }
    }

    /// Number of bids still to be processed by the decrypt pipeline.
    pub fn remaining_to_decrypt(&self) -> u64 {
        (self.bid_ids.len() as u64).saturating_sub(self.next_decrypt_index)
    }

    /// The next `count` bids the decrypt pipeline will process.
    pub fn next_batch(&self, count: u64) -> &[BidId] {
        let len = self.bid_ids.len();
        let start = usize::try_from(self.next_decrypt_index).map_or(len, |i| i.min(len));
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        &self.bid_ids[start..start.saturating_add(count).min(len)]
    }
}

/// A bid on a lot. `min_amount_out` is zero until decrypted.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Bid {
    pub bidder: Address,
    pub amount: u128,
    pub min_amount_out: u128,
    pub referrer: Option<Address>,
    pub status: BidStatus,
}

/// Encrypted portion of a bid, stored at submission.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EncryptedBid {
    pub ciphertext: Vec<u8>,
    pub bid_pubkey: G1Point,
}

/// An accepted bid in the price-sorted queue.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct QueueEntry {
    pub bid_id: BidId,
    pub amount_in: u128,
    pub min_amount_out: u128,
    /// `amount_in / min_amount_out` scaled by the base scale, rounded up
    pub price: u128,
}

/// The one bid filled below its requested amount.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PartialFill {
    pub bid_id: BidId,
    pub payout: u128,
    pub refund: u128,
}

/// Outcome of clearing a lot.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Settlement {
    /// Zero when the lot did not clear
    pub marginal_price: u128,
    /// Quote consumed by winning bids, before fees
    pub total_in: u128,
    /// Base sold to winning bids
    pub total_out: u128,
    pub winners: BTreeSet<BidId>,
    pub partial_fill: Option<PartialFill>,
    pub total_fees: u128,
    pub curator_payout: u128,
    pub aborted: bool,
}

impl Settlement {
    /// Whether any base was sold.
    pub fn is_filled(&self) -> bool {
        self.marginal_price != 0
    }
}

// =========================
// CALL PARAMETERS
// =========================

/// Routing parameters supplied by the seller at creation.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct RoutingParams {
    pub base_token: Token,
    pub base_token_decimals: u8,
    pub quote_token: Token,
    pub quote_token_decimals: u8,
    pub curator: Option<Address>,
    pub hooks: Option<Address>,
    pub allowlist: Option<Address>,
    pub allowlist_params: Vec<u8>,
    pub derivative: DerivativeRef,
}

/// Auction parameters supplied by the seller at creation.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct AuctionParams {
    /// Zero means "now"
    pub start: u64,
    pub duration: u64,
    pub min_fill_percent: u16,
    pub min_bid_percent: u16,
    pub capacity: u128,
    pub minimum_price: u128,
    pub public_key: G1Point,
}

// =========================
// EFFECTS
// =========================

/// A token movement produced by a call. `from`/`to` equal to
/// [`HOUSE_ADDRESS`] denote the house's own custody.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Transfer {
    pub token: Token,
    pub from: Address,
    pub to: Address,
    pub amount: u128,
}

/// Address of the auction house custody account.
pub const HOUSE_ADDRESS: Address = [0xEE; 32];

// =========================
// HELPER FUNCTIONS
// =========================

/// Compute the key-derivation salt binding a ciphertext to its bid.
pub fn compute_bid_salt(lot_id: LotId, bidder: &Address, amount_in: u128) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"EMPA_BID_SALT_V1:");
    hasher.update(lot_id.to_be_bytes());
    hasher.update(bidder);
    hasher.update(amount_in.to_be_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_bid_salt() {
        let bidder = [7u8; 32];
        let salt1 = compute_bid_salt(1, &bidder, 100);
        let salt2 = compute_bid_salt(1, &bidder, 101);
        let salt3 = compute_bid_salt(2, &bidder, 100);
        let salt4 = compute_bid_salt(1, &[8u8; 32], 100);

        assert_ne!(salt1, salt2);
        assert_ne!(salt1, salt3);
        assert_ne!(salt1, salt4);
        assert_eq!(salt1, compute_bid_salt(1, &bidder, 100));
    }

    #[test]
    fn test_remaining_to_decrypt() {
        let mut bid_data = BidData::new(G1Point([1u8; 48]));
        assert_eq!(bid_data.remaining_to_decrypt(), 0);

        bid_data.bid_ids = vec![1, 2, 3];
        assert_eq!(bid_data.remaining_to_decrypt(), 3);

        bid_data.next_decrypt_index = 2;
        assert_eq!(bid_data.remaining_to_decrypt(), 1);

        bid_data.next_decrypt_index = 3;
        assert_eq!(bid_data.remaining_to_decrypt(), 0);
    }

    #[test]
    fn test_next_batch() {
        let mut bid_data = BidData::new(G1Point([1u8; 48]));
        bid_data.bid_ids = vec![1, 2, 3, 4, 5];

        assert_eq!(bid_data.next_batch(2), &[1, 2]);
        assert!(bid_data.next_batch(0).is_empty());

        bid_data.next_decrypt_index = 3;
        assert_eq!(bid_data.next_batch(u64::MAX), &[4, 5]);

        bid_data.next_decrypt_index = 5;
        assert!(bid_data.next_batch(10).is_empty());
    }

    #[test]
    fn test_g1_point_serialization() {
        let point = G1Point([42u8; 48]);
        let encoded = borsh::to_vec(&point).unwrap();
        let decoded: G1Point = borsh::from_slice(&encoded).unwrap();
        assert_eq!(point, decoded);
    }

    #[test]
    fn test_lot_window() {
        let lot = Lot {
            lot_id: 1,
            minimum_price: 1,
            capacity: 10,
            quote_token_decimals: 18,
            base_token_decimals: 6,
            start: 100,
            conclusion: 200,
            status: LotStatus::Created,
            min_filled: 0,
            min_bid_size: 0,
        };

        assert_eq!(lot.base_scale(), 1_000_000);
        assert!(!lot.is_live(99));
        assert!(lot.is_live(100));
        assert!(lot.is_live(199));
        assert!(!lot.is_live(200));
        assert!(lot.has_concluded(200));
    }

    #[test]
    fn test_settlement_json_keeps_u128() {
        let settlement = Settlement {
            marginal_price: u128::MAX,
            winners: [3, 1].into_iter().collect(),
            ..Default::default()
        };
        let json = serde_json::to_string(&settlement).unwrap();
        let decoded: Settlement = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, settlement);
        assert!(decoded.is_filled());
    }
}
