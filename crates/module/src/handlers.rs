//! Call handlers for lot administration and bidding.
//!
//! Decryption, clearing and claims live in `pipeline`, `clearing` and
//! `claims`. The handlers here cover everything that happens before a lot's
//! private key is revealed, plus fee administration and abort.

use tracing::info;

use empa_crypto::{derive_public_key, validate_public_key};
use empa_types::{
    Address, AuctionParams, Bid, BidData, BidId, BidStatus, FeeType, G1Point, Lot, LotId,
    LotStatus, Routing, RoutingParams, Scalar, Settlement, ONE_HUNDRED_PERCENT,
};

use crate::allowlist::AllowlistRegistry;
use crate::error::AuctionError;
use crate::gateway;
use crate::math::{mul_div_down, mul_div_up};
use crate::pipeline::{decrypt_and_sort_bids, DecryptProgress};
use crate::state::HouseState;

/// Context provided by the runtime for each call.
#[derive(Clone, Debug)]
pub struct CallContext {
    /// Sender of the call
    pub sender: Address,
    /// Current timestamp
    pub timestamp: u64,
}

/// Result type for handlers.
pub type HandlerResult<T> = Result<T, AuctionError>;

/// Handle Auction call: create a lot and escrow its capacity.
pub fn handle_auction(
    state: &mut HouseState,
    ctx: &CallContext,
    routing: RoutingParams,
    params: AuctionParams,
    info_hash: [u8; 32],
) -> HandlerResult<LotId> {
    let limits = state.limits;
    for decimals in [routing.base_token_decimals, routing.quote_token_decimals] {
        if decimals < limits.min_decimals || decimals > limits.max_decimals {
            return Err(AuctionError::InvalidParams(format!(
                "token decimals {decimals} outside {}..={}",
                limits.min_decimals, limits.max_decimals
            )));
        }
    }
    if params.capacity == 0 {
        return Err(AuctionError::InvalidParams("capacity is zero".into()));
    }
    if params.minimum_price == 0 {
        return Err(AuctionError::InvalidParams("minimum price is zero".into()));
    }
    if params.min_fill_percent > ONE_HUNDRED_PERCENT
        || params.min_bid_percent > ONE_HUNDRED_PERCENT
    {
        return Err(AuctionError::InvalidParams(
            "percentage exceeds 100%".into(),
        ));
    }

    let start = if params.start == 0 {
        ctx.timestamp
    } else {
        params.start
    };
    if start < ctx.timestamp {
        return Err(AuctionError::InvalidParams("start is in the past".into()));
    }
    if params.duration < limits.min_auction_duration {
        return Err(AuctionError::InvalidParams(format!(
            "duration {} below minimum {}",
            params.duration, limits.min_auction_duration
        )));
    }
    let conclusion = start
        .checked_add(params.duration)
        .ok_or(AuctionError::MathOverflow)?;

    validate_public_key(&params.public_key)
        .map_err(|e| AuctionError::InvalidParams(format!("auction public key: {e}")))?;

    let min_filled = mul_div_down(
        params.capacity,
        params.min_fill_percent.into(),
        ONE_HUNDRED_PERCENT.into(),
    )?;
    let min_bid_size = mul_div_up(
        params.capacity,
        params.min_bid_percent.into(),
        ONE_HUNDRED_PERCENT.into(),
    )?;

    let lot_id = state.allocate_lot_id();

    state.pull(routing.base_token, ctx.sender, params.capacity)?;

    state.lots.insert(
        lot_id,
        Lot {
            lot_id,
            minimum_price: params.minimum_price,
            capacity: params.capacity,
            quote_token_decimals: routing.quote_token_decimals,
            base_token_decimals: routing.base_token_decimals,
            start,
            conclusion,
            status: LotStatus::Created,
            min_filled,
            min_bid_size,
        },
    );
    state.routings.insert(
        lot_id,
        Routing {
            seller: ctx.sender,
            base_token: routing.base_token,
            quote_token: routing.quote_token,
            curator: routing.curator,
            curator_fee: 0,
            curated: false,
            protocol_fee: state.fees.protocol_fee,
            referrer_fee: state.fees.referrer_fee,
            hooks: routing.hooks,
            allowlist: routing.allowlist,
            derivative: routing.derivative,
            prefunding: params.capacity,
            info_hash,
        },
    );
    state
        .bid_data
        .insert(lot_id, BidData::new(params.public_key));
    state.queues.insert(lot_id, Default::default());

    info!(
        lot_id,
        capacity = params.capacity,
        minimum_price = params.minimum_price,
        start,
        conclusion,
        "lot created"
    );

    Ok(lot_id)
}

/// Handle Cancel call: the seller withdraws a lot nobody has bid on.
pub fn handle_cancel(
    state: &mut HouseState,
    ctx: &CallContext,
    lot_id: LotId,
) -> HandlerResult<()> {
    let lot = state
        .get_lot(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;
    let routing = state
        .get_routing(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;

    if routing.seller != ctx.sender {
        return Err(AuctionError::NotPermitted);
    }
    if lot.status != LotStatus::Created {
        return Err(AuctionError::LotWrongState {
            lot_id,
            status: lot.status,
        });
    }
    if lot.has_concluded(ctx.timestamp) {
        return Err(AuctionError::MarketNotActive(lot_id));
    }
    let has_bids = state
        .get_bid_data(lot_id)
        .is_some_and(|data| !data.bid_ids.is_empty());
    if has_bids {
        return Err(AuctionError::LotWrongState {
            lot_id,
            status: lot.status,
        });
    }

    let (base_token, seller, refund) = (routing.base_token, routing.seller, routing.prefunding);
    state.push(base_token, seller, refund)?;

    if let Some(routing) = state.routings.get_mut(&lot_id) {
        routing.prefunding = 0;
    }
    if let Some(lot) = state.get_lot_mut(lot_id) {
        lot.status = LotStatus::Cancelled;
        lot.capacity = 0;
        lot.conclusion = ctx.timestamp;
    }

    info!(lot_id, refund, "lot cancelled");
    Ok(())
}

/// Handle Curate call: the named curator accepts the lot at their current fee.
pub fn handle_curate(
    state: &mut HouseState,
    ctx: &CallContext,
    lot_id: LotId,
) -> HandlerResult<()> {
    let lot = state
        .get_lot(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;
    let routing = state
        .get_routing(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;

    if routing.curator != Some(ctx.sender) {
        return Err(AuctionError::NotPermitted);
    }
    if routing.curated {
        return Err(AuctionError::AlreadyCurated(lot_id));
    }
    if lot.status == LotStatus::Cancelled || lot.has_concluded(ctx.timestamp) {
        return Err(AuctionError::MarketNotActive(lot_id));
    }

    let fee = state.curator_fees.get(&ctx.sender).copied().unwrap_or(0);
    let max_payout = mul_div_down(lot.capacity, fee.into(), ONE_HUNDRED_PERCENT.into())?;
    let (base_token, seller) = (routing.base_token, routing.seller);

    state.pull(base_token, seller, max_payout)?;

    if let Some(routing) = state.routings.get_mut(&lot_id) {
        routing.curated = true;
        routing.curator_fee = fee;
        routing.prefunding = routing
            .prefunding
            .checked_add(max_payout)
            .ok_or(AuctionError::MathOverflow)?;
    }

    info!(lot_id, fee, max_payout, "lot curated");
    Ok(())
}

/// Handle SetCuratorFee call.
pub fn handle_set_curator_fee(
    state: &mut HouseState,
    ctx: &CallContext,
    fee: u16,
) -> HandlerResult<()> {
    let max = state.fees.max_curator_fee;
    if fee > max {
        return Err(AuctionError::InvalidFee { fee, max });
    }
    state.curator_fees.insert(ctx.sender, fee);
    Ok(())
}

/// Handle SetFee call (owner only).
pub fn handle_set_fee(
    state: &mut HouseState,
    ctx: &CallContext,
    fee_type: FeeType,
    fee: u16,
) -> HandlerResult<()> {
    if ctx.sender != state.owner {
        return Err(AuctionError::NotPermitted);
    }

    let fees = &mut state.fees;
    let max = match fee_type {
        FeeType::Protocol => ONE_HUNDRED_PERCENT - fees.referrer_fee,
        FeeType::Referrer => ONE_HUNDRED_PERCENT - fees.protocol_fee,
        FeeType::MaxCurator => ONE_HUNDRED_PERCENT,
    };
    if fee > max {
        return Err(AuctionError::InvalidFee { fee, max });
    }

    match fee_type {
        FeeType::Protocol => fees.protocol_fee = fee,
        FeeType::Referrer => fees.referrer_fee = fee,
        FeeType::MaxCurator => fees.max_curator_fee = fee,
    }

    info!(?fee_type, fee, "fee updated");
    Ok(())
}

/// Handle SetProtocol call (owner only).
pub fn handle_set_protocol(
    state: &mut HouseState,
    ctx: &CallContext,
    protocol: Address,
) -> HandlerResult<()> {
    if ctx.sender != state.owner {
        return Err(AuctionError::NotPermitted);
    }
    state.protocol = protocol;
    Ok(())
}

/// Handle Bid call: escrow the quote amount and store the sealed bid.
#[allow(clippy::too_many_arguments)]
pub fn handle_bid(
    state: &mut HouseState,
    ctx: &CallContext,
    allowlists: &AllowlistRegistry,
    lot_id: LotId,
    referrer: Option<Address>,
    amount_in: u128,
    ciphertext: Vec<u8>,
    bid_pubkey: G1Point,
    allowlist_proof: Vec<u8>,
) -> HandlerResult<BidId> {
    let lot = state
        .get_lot(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;
    if !lot.is_live(ctx.timestamp) {
        return Err(AuctionError::MarketNotActive(lot_id));
    }
    if amount_in == 0 {
        return Err(AuctionError::InvalidParams("bid amount is zero".into()));
    }

    let routing = state
        .get_routing(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;
    if let Some(address) = routing.allowlist {
        if !allowlists.is_allowed(&address, lot_id, &ctx.sender, &allowlist_proof) {
            return Err(AuctionError::NotPermitted);
        }
    }
    let quote_token = routing.quote_token;

    let bid_id = state
        .get_bid_data(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?
        .next_bid_id;

    gateway::submit(state, lot_id, bid_id, ciphertext, bid_pubkey)?;
    state.pull(quote_token, ctx.sender, amount_in)?;
    if let Some(bid_data) = state.bid_data.get_mut(&lot_id) {
        bid_data.next_bid_id += 1;
        bid_data.bid_ids.push(bid_id);
    }
    state.bids.insert(
        (lot_id, bid_id),
        Bid {
            bidder: ctx.sender,
            amount: amount_in,
            min_amount_out: 0,
            referrer,
            status: BidStatus::Submitted,
        },
    );

    info!(lot_id, bid_id, amount_in, "bid submitted");
    Ok(bid_id)
}

/// Handle RefundBid call: the bidder withdraws before conclusion.
pub fn handle_refund_bid(
    state: &mut HouseState,
    ctx: &CallContext,
    lot_id: LotId,
    bid_id: BidId,
) -> HandlerResult<u128> {
    let lot = state
        .get_lot(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;
    if lot.has_concluded(ctx.timestamp) || lot.status != LotStatus::Created {
        return Err(AuctionError::MarketNotActive(lot_id));
    }

    let bid = state
        .get_bid(lot_id, bid_id)
        .ok_or(AuctionError::InvalidBidId { lot_id, bid_id })?;
    if bid.bidder != ctx.sender {
        return Err(AuctionError::NotPermitted);
    }
    if bid.status != BidStatus::Submitted {
        return Err(AuctionError::BidWrongState {
            bid_id,
            status: bid.status,
        });
    }

    let refund = bid.amount;
    let quote_token = state
        .get_routing(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?
        .quote_token;
    state.push(quote_token, ctx.sender, refund)?;

    if let Some(bid) = state.bids.get_mut(&(lot_id, bid_id)) {
        bid.status = BidStatus::Refunded;
    }

    info!(lot_id, bid_id, refund, "bid refunded");
    Ok(refund)
}

/// Handle SubmitPrivateKey call, optionally running a first decrypt batch.
pub fn handle_submit_private_key(
    state: &mut HouseState,
    ctx: &CallContext,
    lot_id: LotId,
    private_key: Scalar,
    num_to_decrypt: u64,
) -> HandlerResult<Option<DecryptProgress>> {
    let lot = state
        .get_lot(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;
    if !lot.has_concluded(ctx.timestamp) {
        return Err(AuctionError::MarketActive(lot_id));
    }

    let bid_data = state
        .get_bid_data(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;
    if lot.status != LotStatus::Created || bid_data.private_key.is_some() {
        return Err(AuctionError::LotWrongState {
            lot_id,
            status: lot.status,
        });
    }

    let derived = derive_public_key(&private_key).map_err(|_| AuctionError::InvalidPrivateKey)?;
    if derived != bid_data.public_key {
        return Err(AuctionError::InvalidPrivateKey);
    }

    if let Some(bid_data) = state.bid_data.get_mut(&lot_id) {
        bid_data.private_key = Some(private_key);
    }
    info!(lot_id, "private key revealed");

    if num_to_decrypt == 0 {
        return Ok(None);
    }
    decrypt_and_sort_bids(state, lot_id, num_to_decrypt).map(Some)
}

/// Handle Abort call: unfilled settlement once the settle period has lapsed.
pub fn handle_abort(state: &mut HouseState, ctx: &CallContext, lot_id: LotId) -> HandlerResult<()> {
    let lot = state
        .get_lot(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;
    if matches!(lot.status, LotStatus::Settled | LotStatus::Cancelled) {
        return Err(AuctionError::LotWrongState {
            lot_id,
            status: lot.status,
        });
    }

    let deadline = lot
        .conclusion
        .checked_add(state.limits.settle_period)
        .ok_or(AuctionError::MathOverflow)?;
    if ctx.timestamp < deadline {
        return Err(AuctionError::MarketActive(lot_id));
    }

    let routing = state
        .get_routing(lot_id)
        .ok_or(AuctionError::InvalidLotId(lot_id))?;
    let (base_token, seller, refund) = (routing.base_token, routing.seller, routing.prefunding);
    state.push(base_token, seller, refund)?;

    if let Some(routing) = state.routings.get_mut(&lot_id) {
        routing.prefunding = 0;
    }
    if let Some(lot) = state.get_lot_mut(lot_id) {
        lot.status = LotStatus::Settled;
    }
    state.settlements.insert(
        lot_id,
        Settlement {
            aborted: true,
            ..Default::default()
        },
    );

    info!(lot_id, refund, "lot aborted");
    Ok(())
}
