//! Per-bid claims and fee rewards.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::info;

use empa_types::{BidId, BidStatus, LotId, LotStatus, Routing, Token, ONE_HUNDRED_PERCENT};

use crate::error::AuctionError;
use crate::handlers::{CallContext, HandlerResult};
use crate::math::{mul_div_down, mul_div_up};
use crate::state::HouseState;

/// Amounts delivered to a bidder by a claim.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ClaimResult {
    /// Base tokens paid out
    pub payout: u128,
    /// Quote tokens refunded
    pub refund: u128,
}

/// Fees charged on the quote a bid consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuoteFees {
    /// Share credited to the bid's referrer
    pub referrer: u128,
    /// Share credited to the protocol, including the referrer share when the
    /// bid has no referrer
    pub protocol: u128,
}

impl QuoteFees {
    pub fn total(&self) -> u128 {
        self.referrer + self.protocol
    }
}

/// Split the fees on `consumed` quote between referrer and protocol.
///
/// Each share rounds up and the total never exceeds `consumed`.
pub fn calculate_quote_fees(
    routing: &Routing,
    has_referrer: bool,
    consumed: u128,
) -> Result<QuoteFees, AuctionError> {
    let hundred = u128::from(ONE_HUNDRED_PERCENT);
    let referrer_share =
        mul_div_up(consumed, routing.referrer_fee.into(), hundred)?.min(consumed);
    let protocol_share = mul_div_up(consumed, routing.protocol_fee.into(), hundred)?
        .min(consumed - referrer_share);

    Ok(if has_referrer {
        QuoteFees {
            referrer: referrer_share,
            protocol: protocol_share,
        }
    } else {
        QuoteFees {
            referrer: 0,
            protocol: referrer_share + protocol_share,
        }
    })
}

/// Handle Claim call: pay out and refund one bid after settlement.
///
/// Anyone may claim; proceeds always go to the bidder.
pub fn handle_claim(
    state: &mut HouseState,
    _ctx: &CallContext,
    lot_id: LotId,
    bid_id: BidId,
) -> HandlerResult<ClaimResult> {
    let lot = state
        .get_lot(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;
    if lot.status != LotStatus::Settled {
        return Err(AuctionError::LotWrongState {
            lot_id,
            status: lot.status,
        });
    }
    let base_scale = lot.base_scale();

    let bid = state
        .get_bid(lot_id, bid_id)
        .ok_or(AuctionError::InvalidBidId { lot_id, bid_id })?
        .clone();
    let settlement = state
        .settlements
        .get(&lot_id)
        .ok_or(AuctionError::LotWrongState {
            lot_id,
            status: LotStatus::Settled,
        })?;

    match bid.status {
        BidStatus::Claimed | BidStatus::Refunded => return Err(AuctionError::AlreadyClaimed(bid_id)),
        // Only an aborted lot can settle with bids never decrypted
        BidStatus::Submitted if !settlement.aborted => {
            return Err(AuctionError::BidWrongState {
                bid_id,
                status: bid.status,
            })
        }
        _ => {}
    }

    let (result, consumed) = if !settlement.is_filled() {
        (
            ClaimResult {
                payout: 0,
                refund: bid.amount,
            },
            0,
        )
    } else if settlement.winners.contains(&bid_id) {
        let payout = mul_div_down(bid.amount, base_scale, settlement.marginal_price)?;
        (ClaimResult { payout, refund: 0 }, bid.amount)
    } else if let Some(partial) = settlement
        .partial_fill
        .as_ref()
        .filter(|partial| partial.bid_id == bid_id)
    {
        (
            ClaimResult {
                payout: partial.payout,
                refund: partial.refund,
            },
            bid.amount.saturating_sub(partial.refund),
        )
    } else {
        (
            ClaimResult {
                payout: 0,
                refund: bid.amount,
            },
            0,
        )
    };

    let routing = state
        .get_routing(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?
        .clone();

    if consumed > 0 {
        let fees = calculate_quote_fees(&routing, bid.referrer.is_some(), consumed)?;
        if let Some(referrer) = bid.referrer {
            state.add_reward(referrer, routing.quote_token, fees.referrer)?;
        }
        let protocol = state.protocol;
        state.add_reward(protocol, routing.quote_token, fees.protocol)?;
    }

    state.push(routing.base_token, bid.bidder, result.payout)?;
    state.push(routing.quote_token, bid.bidder, result.refund)?;

    if let Some(routing) = state.routings.get_mut(&lot_id) {
        routing.prefunding = routing
            .prefunding
            .checked_sub(result.payout)
            .ok_or(AuctionError::MathOverflow)?;
    }
    if let Some(bid) = state.bids.get_mut(&(lot_id, bid_id)) {
        bid.status = BidStatus::Claimed;
    }

    info!(
        lot_id,
        bid_id,
        payout = result.payout,
        refund = result.refund,
        "bid claimed"
    );
    Ok(result)
}

/// Handle ClaimRewards call: withdraw the caller's fee balance in `token`.
pub fn handle_claim_rewards(
    state: &mut HouseState,
    ctx: &CallContext,
    token: Token,
) -> HandlerResult<u128> {
    let amount = state.take_reward(&ctx.sender, &token);
    state.push(token, ctx.sender, amount)?;
    if amount > 0 {
        info!(amount, "rewards claimed");
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clearing::handle_settle;
    use crate::handlers::tests::{
        create_lot, ctx, place_bid, test_state, BASE, OWNER, QUOTE, SELLER,
    };
    use crate::handlers::{handle_abort, handle_set_fee, handle_submit_private_key};
    use empa_types::{DerivativeRef, FeeType};

    fn routing(protocol_fee: u16, referrer_fee: u16) -> Routing {
        Routing {
            seller: SELLER,
            base_token: BASE,
            quote_token: QUOTE,
            curator: None,
            curator_fee: 0,
            curated: false,
            protocol_fee,
            referrer_fee,
            hooks: None,
            allowlist: None,
            derivative: DerivativeRef::default(),
            prefunding: 0,
            info_hash: [0u8; 32],
        }
    }

    #[test]
    fn test_quote_fees_round_up() {
        let fees = calculate_quote_fees(&routing(100, 50), true, 1_001).unwrap();
        assert_eq!(fees, QuoteFees { referrer: 6, protocol: 11 });

        let fees = calculate_quote_fees(&routing(100, 50), false, 1_001).unwrap();
        assert_eq!(fees, QuoteFees { referrer: 0, protocol: 17 });
    }

    #[test]
    fn test_quote_fees_capped() {
        let fees = calculate_quote_fees(&routing(5_000, 5_000), true, 3).unwrap();
        assert_eq!(fees.total(), 3);
        assert_eq!(fees.referrer, 2);
        assert_eq!(fees.protocol, 1);
    }

    /// Lot at capacity 10 with bids A(19, 9) and B(4, 2), settled.
    fn settled_partial_lot(state: &mut HouseState) -> (LotId, BidId, BidId) {
        let (lot_id, secret, public) = create_lot(state);
        let a = place_bid(state, lot_id, &public, [2u8; 32], 19_000_000, 9_000_000);
        let b = place_bid(state, lot_id, &public, [3u8; 32], 4_000_000, 2_000_000);
        handle_submit_private_key(state, &ctx(SELLER, 1100), lot_id, secret, 10).unwrap();
        handle_settle(state, &ctx(SELLER, 1100), lot_id).unwrap();
        (lot_id, a, b)
    }

    #[test]
    fn test_claim_partial_fill() {
        let mut state = test_state();
        let (lot_id, a, b) = settled_partial_lot(&mut state);

        let claim_a = handle_claim(&mut state, &ctx([9u8; 32], 1200), lot_id, a).unwrap();
        assert_eq!(claim_a, ClaimResult { payout: 9_500_000, refund: 0 });

        let claim_b = handle_claim(&mut state, &ctx([9u8; 32], 1200), lot_id, b).unwrap();
        assert_eq!(claim_b, ClaimResult { payout: 500_000, refund: 3_000_000 });

        // Proceeds went to the bidders, not the caller
        assert!(state.outbox.iter().all(|t| t.to != [9u8; 32]));
        assert_eq!(state.get_custody(&BASE), 0);
        assert_eq!(state.get_custody(&QUOTE), 0);

        let again = handle_claim(&mut state, &ctx([9u8; 32], 1200), lot_id, a);
        assert_eq!(again, Err(AuctionError::AlreadyClaimed(a)));
    }

    #[test]
    fn test_claim_before_settlement() {
        let mut state = test_state();
        let (lot_id, _, public) = create_lot(&mut state);
        let bid_id = place_bid(&mut state, lot_id, &public, [2u8; 32], 1, 1);

        let result = handle_claim(&mut state, &ctx([2u8; 32], 1200), lot_id, bid_id);
        assert!(matches!(result, Err(AuctionError::LotWrongState { .. })));
    }

    #[test]
    fn test_claim_fees_accrue_to_protocol() {
        let mut state = test_state();
        handle_set_fee(&mut state, &ctx(OWNER, 0), FeeType::Protocol, 100).unwrap();
        let (lot_id, a, b) = settled_partial_lot(&mut state);

        handle_claim(&mut state, &ctx([2u8; 32], 1200), lot_id, a).unwrap();
        handle_claim(&mut state, &ctx([3u8; 32], 1200), lot_id, b).unwrap();

        // 1% of 19 + 1% of 1 consumed quote
        let protocol = state.protocol;
        assert_eq!(state.get_reward(&protocol, &QUOTE), 200_000);
        assert_eq!(state.get_custody(&QUOTE), 200_000);

        let withdrawn = handle_claim_rewards(&mut state, &ctx(protocol, 1300), QUOTE).unwrap();
        assert_eq!(withdrawn, 200_000);
        assert_eq!(state.get_custody(&QUOTE), 0);
        assert_eq!(handle_claim_rewards(&mut state, &ctx(protocol, 1300), QUOTE), Ok(0));
    }

    #[test]
    fn test_claim_in_aborted_lot() {
        let mut state = test_state();
        let (lot_id, _, public) = create_lot(&mut state);
        let bid_id = place_bid(&mut state, lot_id, &public, [2u8; 32], 5_000_000, 1_000_000);

        handle_abort(&mut state, &ctx([7u8; 32], 2100), lot_id).unwrap();
        let claim = handle_claim(&mut state, &ctx([7u8; 32], 2100), lot_id, bid_id).unwrap();
        assert_eq!(claim, ClaimResult { payout: 0, refund: 5_000_000 });
        assert_eq!(state.bids[&(lot_id, bid_id)].status, BidStatus::Claimed);
    }
}
