//! Query handlers for the auction house.
//!
//! These functions provide read-only access to house state. The `get_*`
//! listings are what the settlement driver polls.

use serde::{Deserialize, Serialize};

use empa_types::{
    Address, Bid, BidData, BidId, EncryptedBid, Lot, LotId, LotStatus, QueueEntry, Routing,
    Settlement, Token,
};

use crate::genesis::FeeConfig;
use crate::state::HouseState;

/// Query request types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuctionQuery {
    GetLot { lot_id: LotId },
    GetRouting { lot_id: LotId },
    GetBidData { lot_id: LotId },
    GetBid { lot_id: LotId, bid_id: BidId },
    GetEncryptedBid { lot_id: LotId, bid_id: BidId },
    /// Bid IDs in submission order.
    GetBidIds { lot_id: LotId },
    /// Accepted bids in price order.
    GetQueue { lot_id: LotId },
    GetSettlement { lot_id: LotId },
    GetRewards { recipient: Address, token: Token },
    GetCustody { token: Token },
    GetFees,
    GetCuratorFee { curator: Address },
}

/// Query response types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuctionQueryResponse {
    Lot(Option<Lot>),
    Routing(Option<Routing>),
    BidData(Option<BidData>),
    Bid(Option<Bid>),
    EncryptedBid(Option<EncryptedBid>),
    BidIds(Vec<BidId>),
    Queue(Vec<QueueEntry>),
    Settlement(Option<Settlement>),
    Amount(u128),
    Fees(FeeConfig),
    CuratorFee(u16),
}

/// Handle a query.
pub fn handle_query(state: &HouseState, query: AuctionQuery) -> AuctionQueryResponse {
    match query {
        AuctionQuery::GetLot { lot_id } => AuctionQueryResponse::Lot(state.get_lot(lot_id).cloned()),

        AuctionQuery::GetRouting { lot_id } => {
            AuctionQueryResponse::Routing(state.get_routing(lot_id).cloned())
        }

        AuctionQuery::GetBidData { lot_id } => {
            AuctionQueryResponse::BidData(state.get_bid_data(lot_id).cloned())
        }

        AuctionQuery::GetBid { lot_id, bid_id } => {
            AuctionQueryResponse::Bid(state.get_bid(lot_id, bid_id).cloned())
        }

        AuctionQuery::GetEncryptedBid { lot_id, bid_id } => {
            let encrypted = state.encrypted_bids.get(&(lot_id, bid_id)).cloned();
            AuctionQueryResponse::EncryptedBid(encrypted)
        }

        AuctionQuery::GetBidIds { lot_id } => {
            let ids = state
                .get_bid_data(lot_id)
                .map(|data| data.bid_ids.clone())
                .unwrap_or_default();
            AuctionQueryResponse::BidIds(ids)
        }

        AuctionQuery::GetQueue { lot_id } => {
            let entries = state
                .queues
                .get(&lot_id)
                .map(|queue| queue.entries().to_vec())
                .unwrap_or_default();
            AuctionQueryResponse::Queue(entries)
        }

        AuctionQuery::GetSettlement { lot_id } => {
            AuctionQueryResponse::Settlement(state.settlements.get(&lot_id).cloned())
        }

        AuctionQuery::GetRewards { recipient, token } => {
            AuctionQueryResponse::Amount(state.get_reward(&recipient, &token))
        }

        AuctionQuery::GetCustody { token } => AuctionQueryResponse::Amount(state.get_custody(&token)),

        AuctionQuery::GetFees => AuctionQueryResponse::Fees(state.fees),

        AuctionQuery::GetCuratorFee { curator } => {
            AuctionQueryResponse::CuratorFee(state.curator_fees.get(&curator).copied().unwrap_or(0))
        }
    }
}

fn sorted(mut ids: Vec<LotId>) -> Vec<LotId> {
    ids.sort_unstable();
    ids
}

/// Lots that have concluded but whose private key has not been revealed.
pub fn get_awaiting_private_key(state: &HouseState, current_time: u64) -> Vec<LotId> {
    sorted(
        state
            .lots
            .values()
            .filter(|lot| {
                lot.status == LotStatus::Created
                    && lot.has_concluded(current_time)
                    && state
                        .get_bid_data(lot.lot_id)
                        .is_some_and(|data| data.private_key.is_none())
            })
            .map(|lot| lot.lot_id)
            .collect(),
    )
}

/// Lots with a revealed key and bids still to decrypt.
pub fn get_pending_decryption(state: &HouseState) -> Vec<LotId> {
    sorted(
        state
            .lots
            .values()
            .filter(|lot| {
                lot.status == LotStatus::Created
                    && state
                        .get_bid_data(lot.lot_id)
                        .is_some_and(|data| data.private_key.is_some())
            })
            .map(|lot| lot.lot_id)
            .collect(),
    )
}

/// Fully decrypted lots awaiting settlement.
pub fn get_pending_settlement(state: &HouseState, current_time: u64) -> Vec<LotId> {
    sorted(
        state
            .lots
            .values()
            .filter(|lot| lot.status == LotStatus::Decrypted && lot.has_concluded(current_time))
            .map(|lot| lot.lot_id)
            .collect(),
    )
}

/// Lots past their settle period that anyone may abort.
pub fn get_abortable(state: &HouseState, current_time: u64) -> Vec<LotId> {
    let settle_period = state.limits.settle_period;
    sorted(
        state
            .lots
            .values()
            .filter(|lot| {
                matches!(lot.status, LotStatus::Created | LotStatus::Decrypted)
                    && lot
                        .conclusion
                        .checked_add(settle_period)
                        .is_some_and(|deadline| current_time >= deadline)
            })
            .map(|lot| lot.lot_id)
            .collect(),
    )
}
