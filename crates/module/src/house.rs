//! Auction house runtime.
//!
//! Owns the state and the allowlist registry and dispatches calls to their
//! handlers. Each call is atomic: the runtime checkpoints the lot the call
//! targets together with the house-wide balances, and restores that
//! checkpoint if the handler fails.

use tracing::{debug, warn};

use empa_types::{Address, BidId, LotId, Transfer};

use crate::allowlist::{Allowlist, AllowlistRegistry};
use crate::call::{AuctionCall, CallOutput};
use crate::claims::{handle_claim, handle_claim_rewards};
use crate::clearing::handle_settle;
use crate::genesis::{GenesisValidationError, HouseGenesisConfig};
use crate::handlers::{self, CallContext, HandlerResult};
use crate::pipeline::handle_decrypt_and_sort_bids;
use crate::queries::{handle_query, AuctionQuery, AuctionQueryResponse};
use crate::state::{CallScope, HouseState};

/// Result of a committed call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub output: CallOutput,
    /// Token movements the call produced, in order
    pub transfers: Vec<Transfer>,
}

/// The auction house.
pub struct AuctionHouse {
    state: HouseState,
    allowlists: AllowlistRegistry,
}

impl AuctionHouse {
    /// Create a house from a validated genesis config.
    pub fn new(config: &HouseGenesisConfig) -> Result<Self, GenesisValidationError> {
        config.validate()?;
        Ok(Self {
            state: HouseState::new(config),
            allowlists: AllowlistRegistry::default(),
        })
    }

    /// Register an allowlist that lots can name by `address`.
    pub fn register_allowlist(&mut self, address: Address, allowlist: Box<dyn Allowlist>) {
        self.allowlists.register(address, allowlist);
    }

    /// Read-only view of the state.
    pub fn state(&self) -> &HouseState {
        &self.state
    }

    /// Answer a query.
    pub fn query(&self, query: AuctionQuery) -> AuctionQueryResponse {
        handle_query(&self.state, query)
    }

    /// Execute a call atomically.
    pub fn execute(&mut self, ctx: &CallContext, call: AuctionCall) -> HandlerResult<Receipt> {
        let scope = call_scope(&self.state, &call);
        let checkpoint = self.state.checkpoint(scope.as_ref());
        self.state.outbox.clear();

        let name = call_name(&call);
        match dispatch(&mut self.state, ctx, &self.allowlists, call) {
            Ok(output) => {
                let transfers = std::mem::take(&mut self.state.outbox);
                debug!(call = name, transfers = transfers.len(), "call committed");
                Ok(Receipt { output, transfers })
            }
            Err(e) => {
                self.state.restore(checkpoint);
                warn!(call = name, error = %e, "call rejected");
                Err(e)
            }
        }
    }
}

fn dispatch(
    state: &mut HouseState,
    ctx: &CallContext,
    allowlists: &AllowlistRegistry,
    call: AuctionCall,
) -> HandlerResult<CallOutput> {
    Ok(match call {
        AuctionCall::Auction {
            routing,
            params,
            info_hash,
        } => CallOutput::LotCreated(handlers::handle_auction(
            state, ctx, routing, params, info_hash,
        )?),

        AuctionCall::Cancel { lot_id } => {
            handlers::handle_cancel(state, ctx, lot_id)?;
            CallOutput::None
        }

        AuctionCall::Curate { lot_id } => {
            handlers::handle_curate(state, ctx, lot_id)?;
            CallOutput::None
        }

        AuctionCall::Abort { lot_id } => {
            handlers::handle_abort(state, ctx, lot_id)?;
            CallOutput::None
        }

        AuctionCall::Bid {
            lot_id,
            referrer,
            amount_in,
            ciphertext,
            bid_pubkey,
            allowlist_proof,
        } => CallOutput::BidSubmitted(handlers::handle_bid(
            state,
            ctx,
            allowlists,
            lot_id,
            referrer,
            amount_in,
            ciphertext,
            bid_pubkey,
            allowlist_proof,
        )?),

        AuctionCall::RefundBid { lot_id, bid_id } => {
            CallOutput::Amount(handlers::handle_refund_bid(state, ctx, lot_id, bid_id)?)
        }

        AuctionCall::SubmitPrivateKey {
            lot_id,
            private_key,
            num_to_decrypt,
        } => {
            match handlers::handle_submit_private_key(state, ctx, lot_id, private_key, num_to_decrypt)? {
                Some(progress) => CallOutput::Progress(progress),
                None => CallOutput::None,
            }
        }

        AuctionCall::DecryptAndSortBids {
            lot_id,
            num_to_decrypt,
        } => CallOutput::Progress(handle_decrypt_and_sort_bids(
            state,
            ctx,
            lot_id,
            num_to_decrypt,
        )?),

        AuctionCall::Settle { lot_id } => CallOutput::Settled(handle_settle(state, ctx, lot_id)?),

        AuctionCall::Claim { lot_id, bid_id } => {
            CallOutput::Claimed(handle_claim(state, ctx, lot_id, bid_id)?)
        }

        AuctionCall::ClaimRewards { token } => {
            CallOutput::Amount(handle_claim_rewards(state, ctx, token)?)
        }

        AuctionCall::SetCuratorFee { fee } => {
            handlers::handle_set_curator_fee(state, ctx, fee)?;
            CallOutput::None
        }

        AuctionCall::SetFee { fee_type, fee } => {
            handlers::handle_set_fee(state, ctx, fee_type, fee)?;
            CallOutput::None
        }

        AuctionCall::SetProtocol { protocol } => {
            handlers::handle_set_protocol(state, ctx, protocol)?;
            CallOutput::None
        }
    })
}

/// Lot-level records a call may write. `None` for calls that only touch
/// house-wide settings and balances.
fn call_scope(state: &HouseState, call: &AuctionCall) -> Option<CallScope> {
    let (lot_id, bids, queue) = match *call {
        AuctionCall::Auction { .. } => (state.next_lot_id, Vec::new(), true),

        AuctionCall::Cancel { lot_id }
        | AuctionCall::Curate { lot_id }
        | AuctionCall::Abort { lot_id }
        | AuctionCall::Settle { lot_id } => (lot_id, Vec::new(), false),

        AuctionCall::Bid { lot_id, .. } => {
            let next = state.get_bid_data(lot_id).map(|data| data.next_bid_id);
            (lot_id, next.into_iter().collect(), false)
        }

        AuctionCall::RefundBid { lot_id, bid_id } | AuctionCall::Claim { lot_id, bid_id } => {
            (lot_id, vec![bid_id], false)
        }

        AuctionCall::SubmitPrivateKey {
            lot_id,
            num_to_decrypt,
            ..
        }
        | AuctionCall::DecryptAndSortBids {
            lot_id,
            num_to_decrypt,
        } => (lot_id, decrypt_batch(state, lot_id, num_to_decrypt), true),

        AuctionCall::ClaimRewards { .. }
        | AuctionCall::SetCuratorFee { .. }
        | AuctionCall::SetFee { .. }
        | AuctionCall::SetProtocol { .. } => return None,
    };
    Some(CallScope {
        lot_id,
        bids,
        queue,
    })
}

fn decrypt_batch(state: &HouseState, lot_id: LotId, count: u64) -> Vec<BidId> {
    state
        .get_bid_data(lot_id)
        .map(|data| data.next_batch(count).to_vec())
        .unwrap_or_default()
}

fn call_name(call: &AuctionCall) -> &'static str {
    match call {
        AuctionCall::Auction { .. } => "auction",
        AuctionCall::Cancel { .. } => "cancel",
        AuctionCall::Curate { .. } => "curate",
        AuctionCall::Abort { .. } => "abort",
        AuctionCall::Bid { .. } => "bid",
        AuctionCall::RefundBid { .. } => "refund_bid",
        AuctionCall::SubmitPrivateKey { .. } => "submit_private_key",
        AuctionCall::DecryptAndSortBids { .. } => "decrypt_and_sort_bids",
        AuctionCall::Settle { .. } => "settle",
        AuctionCall::Claim { .. } => "claim",
        AuctionCall::ClaimRewards { .. } => "claim_rewards",
        AuctionCall::SetCuratorFee { .. } => "set_curator_fee",
        AuctionCall::SetFee { .. } => "set_fee",
        AuctionCall::SetProtocol { .. } => "set_protocol",
    }
}
