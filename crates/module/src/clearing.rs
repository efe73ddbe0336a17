//! Marginal-price clearing and lot settlement.
//!
//! The queue is walked from the highest price down, accumulating the quote
//! amount bid. The first price at which the accumulated quote buys the whole
//! capacity becomes the uniform clearing price. Every bid above it is filled
//! in full at that price, and the bid that crossed the capacity is filled
//! with whatever capacity remains.

use std::collections::BTreeSet;

use tracing::info;

use empa_types::{Lot, LotId, LotStatus, PartialFill, QueueEntry, Settlement, ONE_HUNDRED_PERCENT};

use crate::claims::calculate_quote_fees;
use crate::error::AuctionError;
use crate::handlers::{CallContext, HandlerResult};
use crate::math::{mul_div_down, mul_div_up};
use crate::state::HouseState;

/// Clearing outcome before fees and curator payout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Clearing {
    pub marginal_price: u128,
    pub total_in: u128,
    pub total_out: u128,
    pub winners: BTreeSet<u64>,
    pub partial_fill: Option<PartialFill>,
}

impl Clearing {
    fn unfilled() -> Self {
        Self::default()
    }
}

/// Where the walk down the queue stopped.
enum Stop {
    /// Ran out of bids at or above the minimum price
    Exhausted,
    /// The bid at this index took the accumulated quote past capacity
    Crossed(usize),
    /// Earlier bids alone buy the capacity at the next bid's price, so the
    /// lot clears between the two prices
    Between(u128),
}

/// Compute the clearing price and allocation for a sorted queue.
pub fn compute_clearing(lot: &Lot, queue: &[QueueEntry]) -> Result<Clearing, AuctionError> {
    let scale = lot.base_scale();
    let capacity = lot.capacity;

    let mut total_in: u128 = 0;
    let mut included = 0usize;
    let mut last_price = 0u128;
    let mut stop = Stop::Exhausted;

    for (index, entry) in queue.iter().enumerate() {
        if entry.price < lot.minimum_price {
            break;
        }
        if total_in > 0 && mul_div_down(total_in, scale, entry.price)? >= capacity {
            stop = Stop::Between(mul_div_up(total_in, scale, capacity)?);
            break;
        }

        total_in = checked_add(total_in, entry.amount_in)?;
        included = index + 1;
        last_price = entry.price;

        if mul_div_down(total_in, scale, entry.price)? >= capacity {
            stop = Stop::Crossed(index);
            break;
        }
    }

    if included == 0 {
        return Ok(Clearing::unfilled());
    }

    let (marginal_price, marginal_index) = match stop {
        Stop::Exhausted => (last_price.max(lot.minimum_price), None),
        Stop::Crossed(index) => (last_price, Some(index)),
        Stop::Between(price) => (price, None),
    };

    let mut clearing = Clearing {
        marginal_price,
        ..Default::default()
    };

    for (index, entry) in queue[..included].iter().enumerate() {
        let full_fill = mul_div_down(entry.amount_in, scale, marginal_price)?;

        if Some(index) == marginal_index {
            // Earlier payouts are strictly below capacity here
            let remaining = capacity
                .checked_sub(clearing.total_out)
                .ok_or(AuctionError::MathOverflow)?;
            if remaining < full_fill {
                let consumed = mul_div_up(remaining, marginal_price, scale)?;
                let refund = entry
                    .amount_in
                    .checked_sub(consumed)
                    .ok_or(AuctionError::MathOverflow)?;
                clearing.partial_fill = Some(PartialFill {
                    bid_id: entry.bid_id,
                    payout: remaining,
                    refund,
                });
                clearing.total_in = checked_add(clearing.total_in, consumed)?;
                clearing.total_out = capacity;
                continue;
            }
        }

        clearing.winners.insert(entry.bid_id);
        clearing.total_in = checked_add(clearing.total_in, entry.amount_in)?;
        clearing.total_out = checked_add(clearing.total_out, full_fill)?;
    }

    if clearing.total_out < lot.min_filled {
        return Ok(Clearing::unfilled());
    }

    Ok(clearing)
}

fn checked_add(a: u128, b: u128) -> Result<u128, AuctionError> {
    a.checked_add(b).ok_or(AuctionError::MathOverflow)
}

/// Handle Settle call: clear the lot and pay the seller and curator.
pub fn handle_settle(
    state: &mut HouseState,
    ctx: &CallContext,
    lot_id: LotId,
) -> HandlerResult<Settlement> {
    let lot = state
        .get_lot(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?
        .clone();
    if !lot.has_concluded(ctx.timestamp) {
        return Err(AuctionError::MarketActive(lot_id));
    }
    if lot.status != LotStatus::Decrypted {
        return Err(AuctionError::LotWrongState {
            lot_id,
            status: lot.status,
        });
    }

    let routing = state
        .get_routing(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?
        .clone();
    let queue = state.queues.get(&lot_id).cloned().unwrap_or_default();
    let clearing = compute_clearing(&lot, queue.entries())?;

    // Fees are charged on the quote each winning bid consumes
    let mut total_fees: u128 = 0;
    for bid_id in &clearing.winners {
        let bid = state
            .get_bid(lot_id, *bid_id)
            .ok_or(AuctionError::InvalidBidId {
                lot_id,
                bid_id: *bid_id,
            })?;
        let fees = calculate_quote_fees(&routing, bid.referrer.is_some(), bid.amount)?;
        total_fees = checked_add(total_fees, fees.total())?;
    }
    if let Some(partial) = &clearing.partial_fill {
        let bid = state
            .get_bid(lot_id, partial.bid_id)
            .ok_or(AuctionError::InvalidBidId {
                lot_id,
                bid_id: partial.bid_id,
            })?;
        let consumed = bid
            .amount
            .checked_sub(partial.refund)
            .ok_or(AuctionError::MathOverflow)?;
        let fees = calculate_quote_fees(&routing, bid.referrer.is_some(), consumed)?;
        total_fees = checked_add(total_fees, fees.total())?;
    }

    let curator_payout = if routing.curated {
        mul_div_down(
            clearing.total_out,
            routing.curator_fee.into(),
            ONE_HUNDRED_PERCENT.into(),
        )?
    } else {
        0
    };

    let seller_proceeds = clearing
        .total_in
        .checked_sub(total_fees)
        .ok_or(AuctionError::MathOverflow)?;
    let seller_base_refund = routing
        .prefunding
        .checked_sub(clearing.total_out)
        .and_then(|rest| rest.checked_sub(curator_payout))
        .ok_or(AuctionError::MathOverflow)?;

    state.push(routing.quote_token, routing.seller, seller_proceeds)?;
    state.push(routing.base_token, routing.seller, seller_base_refund)?;
    if let Some(curator) = routing.curator.filter(|_| curator_payout > 0) {
        state.push(routing.base_token, curator, curator_payout)?;
    }

    let settlement = Settlement {
        marginal_price: clearing.marginal_price,
        total_in: clearing.total_in,
        total_out: clearing.total_out,
        winners: clearing.winners,
        partial_fill: clearing.partial_fill,
        total_fees,
        curator_payout,
        aborted: false,
    };

    if let Some(routing) = state.routings.get_mut(&lot_id) {
        routing.prefunding = settlement.total_out;
    }
    if let Some(bid_data) = state.bid_data.get_mut(&lot_id) {
        bid_data.marginal_price = settlement.marginal_price;
    }
    if let Some(lot) = state.get_lot_mut(lot_id) {
        lot.status = LotStatus::Settled;
    }
    state.settlements.insert(lot_id, settlement.clone());

    info!(
        lot_id,
        marginal_price = settlement.marginal_price,
        total_in = settlement.total_in,
        total_out = settlement.total_out,
        winners = settlement.winners.len(),
        partial = settlement.partial_fill.is_some(),
        "lot settled"
    );

    Ok(settlement)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE: u128 = 1_000_000;

    fn lot(capacity: u128, minimum_price: u128, min_filled: u128) -> Lot {
        Lot {
            lot_id: 1,
            minimum_price,
            capacity,
            quote_token_decimals: 6,
            base_token_decimals: 6,
            start: 0,
            conclusion: 100,
            status: LotStatus::Decrypted,
            min_filled,
            min_bid_size: 0,
        }
    }

    fn entry(bid_id: u64, amount_in: u128, min_amount_out: u128) -> QueueEntry {
        QueueEntry {
            bid_id,
            amount_in,
            min_amount_out,
            price: mul_div_up(amount_in, SCALE, min_amount_out).unwrap(),
        }
    }

    #[test]
    fn test_partial_fill() {
        let lot = lot(10 * SCALE, SCALE, 0);
        let queue = vec![entry(1, 19 * SCALE, 9 * SCALE), entry(2, 4 * SCALE, 2 * SCALE)];

        let clearing = compute_clearing(&lot, &queue).unwrap();
        assert_eq!(clearing.marginal_price, 2 * SCALE);
        assert_eq!(clearing.winners, [1].into_iter().collect());
        assert_eq!(
            clearing.partial_fill,
            Some(PartialFill {
                bid_id: 2,
                payout: SCALE / 2,
                refund: 3 * SCALE,
            })
        );
        assert_eq!(clearing.total_out, 10 * SCALE);
        assert_eq!(clearing.total_in, 20 * SCALE);
    }

    #[test]
    fn test_tied_prices_fill_in_queue_order() {
        let lot = lot(5 * SCALE / 2, SCALE, 0);
        let queue: Vec<_> = (1..=4).map(|id| entry(id, 2 * SCALE, SCALE)).collect();

        let clearing = compute_clearing(&lot, &queue).unwrap();
        assert_eq!(clearing.marginal_price, 2 * SCALE);
        assert_eq!(clearing.winners, [1, 2].into_iter().collect());
        assert_eq!(
            clearing.partial_fill,
            Some(PartialFill {
                bid_id: 3,
                payout: SCALE / 2,
                refund: SCALE,
            })
        );
        assert!(!clearing.winners.contains(&4));
        assert_eq!(clearing.total_out, 5 * SCALE / 2);
        assert_eq!(clearing.total_in, 5 * SCALE);
    }

    #[test]
    fn test_undersubscribed_uses_last_price() {
        let lot = lot(10 * SCALE, 2 * SCALE, 0);
        let queue: Vec<_> = (1..=4).map(|id| entry(id, 2 * SCALE, SCALE)).collect();

        let clearing = compute_clearing(&lot, &queue).unwrap();
        assert_eq!(clearing.marginal_price, 2 * SCALE);
        assert_eq!(clearing.winners.len(), 4);
        assert_eq!(clearing.total_out, 4 * SCALE);
        assert_eq!(clearing.total_in, 8 * SCALE);
        assert!(clearing.partial_fill.is_none());
    }

    #[test]
    fn test_empty_queue_is_unfilled() {
        let lot = lot(10 * SCALE, SCALE, 0);
        assert_eq!(compute_clearing(&lot, &[]).unwrap(), Clearing::unfilled());
    }

    #[test]
    fn test_min_filled_not_met() {
        let lot = lot(10 * SCALE, SCALE, 5 * SCALE);
        let queue = vec![entry(1, 8 * SCALE, 4 * SCALE)];
        assert_eq!(compute_clearing(&lot, &queue).unwrap(), Clearing::unfilled());
    }

    #[test]
    fn test_exact_capacity_is_full_winner() {
        let lot = lot(10 * SCALE, SCALE, 0);
        let queue = vec![entry(1, 12 * SCALE, 4 * SCALE), entry(2, 18 * SCALE, 6 * SCALE)];

        let clearing = compute_clearing(&lot, &queue).unwrap();
        assert_eq!(clearing.marginal_price, 3 * SCALE);
        assert_eq!(clearing.winners, [1, 2].into_iter().collect());
        assert!(clearing.partial_fill.is_none());
        assert_eq!(clearing.total_out, 10 * SCALE);
    }

    #[test]
    fn test_clears_between_prices() {
        // Bid 1 alone buys 10 at price 2 but only 5 at its own price 4
        let lot = lot(10 * SCALE, SCALE, 0);
        let queue = vec![entry(1, 20 * SCALE, 5 * SCALE), entry(2, 2 * SCALE, SCALE)];

        let clearing = compute_clearing(&lot, &queue).unwrap();
        assert_eq!(clearing.marginal_price, 2 * SCALE);
        assert_eq!(clearing.winners, [1].into_iter().collect());
        assert!(clearing.partial_fill.is_none());
        assert_eq!(clearing.total_out, 10 * SCALE);
        assert_eq!(clearing.total_in, 20 * SCALE);
    }

    #[test]
    fn test_clears_strictly_between_prices() {
        // 30 quote buys 10 at 3, between the bids at 5 and 1
        let lot = lot(10 * SCALE, SCALE, 0);
        let queue = vec![entry(1, 30 * SCALE, 6 * SCALE), entry(2, SCALE, SCALE)];

        let clearing = compute_clearing(&lot, &queue).unwrap();
        assert_eq!(clearing.marginal_price, 3 * SCALE);
        assert_eq!(clearing.winners, [1].into_iter().collect());
        assert_eq!(clearing.total_out, 10 * SCALE);
    }

    #[test]
    fn test_payouts_never_exceed_capacity() {
        let lot = lot(1_000_003, SCALE, 0);
        let queue = vec![
            entry(1, 777_777, 333_333),
            entry(2, 1_234_567, 555_555),
            entry(3, 999_999, 499_999),
            entry(4, 3_000_000, 1_500_000),
        ];

        let clearing = compute_clearing(&lot, &queue).unwrap();
        assert!(clearing.total_out <= lot.capacity);
        let quote: u128 = queue.iter().map(|e| e.amount_in).sum();
        assert!(clearing.total_in <= quote);
    }
}
