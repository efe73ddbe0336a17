//! Resumable decrypt-and-sort pipeline.
//!
//! Bids are consumed in submission order from a cursor stored in the lot's
//! bid data, so a lot with many bids can be processed over several calls of
//! any size. Every processed bid ends up `Decrypted`; only bids that decrypt
//! cleanly and pass the size and price filters enter the queue.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use empa_types::{BidStatus, LotId, LotStatus, QueueEntry};

use crate::error::AuctionError;
use crate::gateway;
use crate::handlers::{CallContext, HandlerResult};
use crate::math::mul_div_up;
use crate::state::HouseState;

/// Progress report for one pipeline step.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct DecryptProgress {
    /// Bids the cursor advanced over in this step
    pub processed: u64,
    /// Bids still to be processed
    pub remaining: u64,
    /// Whether the lot is now fully decrypted
    pub done: bool,
}

/// Handle DecryptAndSortBids call.
pub fn handle_decrypt_and_sort_bids(
    state: &mut HouseState,
    _ctx: &CallContext,
    lot_id: LotId,
    num_to_decrypt: u64,
) -> HandlerResult<DecryptProgress> {
    decrypt_and_sort_bids(state, lot_id, num_to_decrypt)
}

/// Process up to `num_to_decrypt` bids from the lot's cursor.
pub fn decrypt_and_sort_bids(
    state: &mut HouseState,
    lot_id: LotId,
    num_to_decrypt: u64,
) -> HandlerResult<DecryptProgress> {
    let lot = state
        .get_lot(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?
        .clone();
    let bid_data = state
        .get_bid_data(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;

    let private_key = match (&bid_data.private_key, lot.status) {
        (Some(key), LotStatus::Created) => key.clone(),
        _ => {
            return Err(AuctionError::LotWrongState {
                lot_id,
                status: lot.status,
            })
        }
    };

    let start = bid_data.next_decrypt_index;
    let total = bid_data.bid_ids.len() as u64;
    let batch = bid_data.next_batch(num_to_decrypt).to_vec();
    let end = start + batch.len() as u64;
    let base_scale = lot.base_scale();

    for bid_id in batch {
        let key = (lot_id, bid_id);
        let Some(bid) = state.bids.get(&key).cloned() else {
            continue;
        };
        if bid.status != BidStatus::Submitted {
            debug!(lot_id, bid_id, status = ?bid.status, "skipping bid");
            continue;
        }

        let amount_out = state
            .encrypted_bids
            .get(&key)
            .and_then(|encrypted| gateway::decrypt(&private_key, lot_id, bid_id, &bid, encrypted));

        if let Some(stored) = state.bids.get_mut(&key) {
            stored.status = BidStatus::Decrypted;
            if let Some(amount_out) = amount_out {
                stored.min_amount_out = amount_out;
            }
        }

        let Some(amount_out) = amount_out else {
            continue;
        };
        if amount_out == 0 || amount_out < lot.min_bid_size {
            debug!(lot_id, bid_id, amount_out, "bid below minimum size");
            continue;
        }
        let price = match mul_div_up(bid.amount, base_scale, amount_out) {
            Ok(price) if price >= lot.minimum_price => price,
            Ok(price) => {
                debug!(lot_id, bid_id, price, "bid below minimum price");
                continue;
            }
            Err(_) => {
                debug!(lot_id, bid_id, "bid price overflows");
                continue;
            }
        };

        state.queues.entry(lot_id).or_default().insert(QueueEntry {
            bid_id,
            amount_in: bid.amount,
            min_amount_out: amount_out,
            price,
        });
        debug!(lot_id, bid_id, price, "bid queued");
    }

    let remaining = match state.bid_data.get_mut(&lot_id) {
        Some(bid_data) => {
            bid_data.next_decrypt_index = end;
            bid_data.remaining_to_decrypt()
        }
        None => 0,
    };

    let done = remaining == 0;
    if done {
        if let Some(lot) = state.get_lot_mut(lot_id) {
            lot.status = LotStatus::Decrypted;
        }
        let queued = state.queues.get(&lot_id).map_or(0, |queue| queue.len());
        info!(lot_id, bids = total, queued, "lot decrypted");
    }

    Ok(DecryptProgress {
        processed: end - start,
        remaining,
        done,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::{create_lot, ctx, place_bid, test_state, SELLER};
    use crate::handlers::{handle_refund_bid, handle_submit_private_key};
    use empa_types::{EncryptedBid, G1Point};

    #[test]
    fn test_requires_private_key() {
        let mut state = test_state();
        let (lot_id, _, _) = create_lot(&mut state);

        let result = decrypt_and_sort_bids(&mut state, lot_id, 10);
        assert!(matches!(result, Err(AuctionError::LotWrongState { .. })));

        let result = decrypt_and_sort_bids(&mut state, 99, 10);
        assert!(matches!(result, Err(AuctionError::InvalidLotId(99))));
    }

    #[test]
    fn test_zero_bids_marks_decrypted() {
        let mut state = test_state();
        let (lot_id, secret, _) = create_lot(&mut state);
        handle_submit_private_key(&mut state, &ctx(SELLER, 1100), lot_id, secret, 0).unwrap();

        let progress = decrypt_and_sort_bids(&mut state, lot_id, 5).unwrap();
        assert_eq!(
            progress,
            DecryptProgress {
                processed: 0,
                remaining: 0,
                done: true
            }
        );
        assert_eq!(state.get_lot(lot_id).unwrap().status, LotStatus::Decrypted);

        let result = decrypt_and_sort_bids(&mut state, lot_id, 5);
        assert!(matches!(
            result,
            Err(AuctionError::LotWrongState {
                status: LotStatus::Decrypted,
                ..
            })
        ));
    }

    #[test]
    fn test_batches_and_filters() {
        let mut state = test_state();
        let (lot_id, secret, public) = create_lot(&mut state);
        let bidder = [2u8; 32];

        // price 2.0
        let good = place_bid(&mut state, lot_id, &public, bidder, 4_000_000, 2_000_000);
        // price 0.5, below the 1.0 floor
        let cheap = place_bid(&mut state, lot_id, &public, bidder, 1_000_000, 2_000_000);
        // zero amount out
        let zero = place_bid(&mut state, lot_id, &public, bidder, 1_000_000, 0);
        // refunded before conclusion
        let refunded = place_bid(&mut state, lot_id, &public, bidder, 5_000_000, 1_000_000);
        handle_refund_bid(&mut state, &ctx(bidder, 1060), lot_id, refunded).unwrap();
        // price 3.0
        let better = place_bid(&mut state, lot_id, &public, bidder, 3_000_000, 1_000_000);
        // garbage ciphertext
        let forged = place_bid(&mut state, lot_id, &public, bidder, 2_000_000, 1_000_000);
        state.encrypted_bids.insert(
            (lot_id, forged),
            EncryptedBid {
                ciphertext: vec![7u8; 32],
                bid_pubkey: public.clone(),
            },
        );

        let progress =
            handle_submit_private_key(&mut state, &ctx(SELLER, 1100), lot_id, secret, 4).unwrap();
        assert_eq!(
            progress,
            Some(DecryptProgress {
                processed: 4,
                remaining: 2,
                done: false
            })
        );
        assert_eq!(state.bid_data[&lot_id].next_decrypt_index, 4);
        assert_eq!(state.bid_data[&lot_id].remaining_to_decrypt(), 2);
        assert_eq!(state.get_lot(lot_id).unwrap().status, LotStatus::Created);

        let progress = decrypt_and_sort_bids(&mut state, lot_id, 100).unwrap();
        assert_eq!(
            progress,
            DecryptProgress {
                processed: 2,
                remaining: 0,
                done: true
            }
        );

        let ids: Vec<u64> = state.queues[&lot_id]
            .entries()
            .iter()
            .map(|e| e.bid_id)
            .collect();
        assert_eq!(ids, vec![better, good]);
        assert_eq!(state.queues[&lot_id].entries()[1].price, 2_000_000);

        assert_eq!(state.bids[&(lot_id, cheap)].status, BidStatus::Decrypted);
        assert_eq!(state.bids[&(lot_id, cheap)].min_amount_out, 2_000_000);
        assert_eq!(state.bids[&(lot_id, zero)].status, BidStatus::Decrypted);
        assert_eq!(state.bids[&(lot_id, forged)].status, BidStatus::Decrypted);
        assert_eq!(state.bids[&(lot_id, forged)].min_amount_out, 0);
        assert_eq!(state.bids[&(lot_id, refunded)].status, BidStatus::Refunded);
    }

    #[test]
    fn test_invalid_ephemeral_key_does_not_block() {
        let mut state = test_state();
        let (lot_id, secret, public) = create_lot(&mut state);
        let bid_id = place_bid(&mut state, lot_id, &public, [2u8; 32], 4_000_000, 2_000_000);
        state
            .encrypted_bids
            .get_mut(&(lot_id, bid_id))
            .unwrap()
            .bid_pubkey = G1Point([0xFF; 48]);

        handle_submit_private_key(&mut state, &ctx(SELLER, 1100), lot_id, secret, 10).unwrap();
        assert_eq!(state.get_lot(lot_id).unwrap().status, LotStatus::Decrypted);
        assert!(state.queues[&lot_id].is_empty());
    }
}
