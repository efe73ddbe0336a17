//! State structures for the auction house.

use std::collections::HashMap;
use std::hash::Hash;

use empa_types::{
    Address, Bid, BidData, BidId, EncryptedBid, Lot, LotId, Routing, Settlement, Token, Transfer,
    HOUSE_ADDRESS,
};

use crate::error::AuctionError;
use crate::genesis::{FeeConfig, HouseGenesisConfig, LotLimits};
use crate::queue::BidQueue;

/// Auction house state.
///
/// Handlers may fail halfway through a call. The runtime takes a
/// [`Checkpoint`] before each call and restores it on failure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HouseState {
    /// Next lot ID to assign
    pub next_lot_id: LotId,

    /// Owner allowed to change fees and the protocol address
    pub owner: Address,

    /// Recipient of protocol fees
    pub protocol: Address,

    /// Current fee schedule (snapshotted into each lot at creation)
    pub fees: FeeConfig,

    /// Limits for new lots
    pub limits: LotLimits,

    /// Fee each curator charges, in basis points
    pub curator_fees: HashMap<Address, u16>,

    pub lots: HashMap<LotId, Lot>,
    pub routings: HashMap<LotId, Routing>,
    pub bid_data: HashMap<LotId, BidData>,
    pub bids: HashMap<(LotId, BidId), Bid>,
    pub encrypted_bids: HashMap<(LotId, BidId), EncryptedBid>,

    /// Price-sorted accepted bids per lot
    pub queues: HashMap<LotId, BidQueue>,

    /// Clearing outcome per settled lot
    pub settlements: HashMap<LotId, Settlement>,

    /// Pull-based fee balances: (recipient, token) -> amount
    pub rewards: HashMap<(Address, Token), u128>,

    /// Tokens held by the house
    pub custody: HashMap<Token, u128>,

    /// Transfers produced by the current call
    pub outbox: Vec<Transfer>,
}

/// The lot a call may write to, and which of its bids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallScope {
    pub lot_id: LotId,
    pub bids: Vec<BidId>,
    /// Whether the call may write the lot's queue
    pub queue: bool,
}

/// Values a call may overwrite, captured before it runs.
///
/// Covers the house-wide settings and balances plus the records of a single
/// lot, so taking one does not grow with the number of lots or bids.
#[derive(Debug)]
pub struct Checkpoint {
    next_lot_id: LotId,
    owner: Address,
    protocol: Address,
    fees: FeeConfig,
    limits: LotLimits,
    curator_fees: HashMap<Address, u16>,
    rewards: HashMap<(Address, Token), u128>,
    custody: HashMap<Token, u128>,
    lot: Option<LotCheckpoint>,
}

#[derive(Debug)]
struct LotCheckpoint {
    lot_id: LotId,
    lot: Option<Lot>,
    routing: Option<Routing>,
    bid_data: Option<BidData>,
    settlement: Option<Settlement>,
    /// Outer `None` when the queue was not captured
    queue: Option<Option<BidQueue>>,
    bids: Vec<(BidId, Option<Bid>, Option<EncryptedBid>)>,
}

fn restore_entry<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, value: Option<V>) {
    match value {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

impl HouseState {
    /// Create a new house state from a genesis config.
    pub fn new(config: &HouseGenesisConfig) -> Self {
        Self {
            next_lot_id: 1,
            owner: config.owner,
            protocol: config.protocol,
            fees: config.fees,
            limits: config.limits,
            ..Default::default()
        }
    }

    /// Get the next lot ID and increment.
    pub fn allocate_lot_id(&mut self) -> LotId {
        let id = self.next_lot_id;
        self.next_lot_id += 1;
        id
    }

    /// Get lot by ID.
    pub fn get_lot(&self, lot_id: LotId) -> Option<&Lot> {
        self.lots.get(&lot_id)
    }

    /// Get mutable lot by ID.
    pub fn get_lot_mut(&mut self, lot_id: LotId) -> Option<&mut Lot> {
        self.lots.get_mut(&lot_id)
    }

    /// Get routing by lot ID.
    pub fn get_routing(&self, lot_id: LotId) -> Option<&Routing> {
        self.routings.get(&lot_id)
    }

    /// Get bid data by lot ID.
    pub fn get_bid_data(&self, lot_id: LotId) -> Option<&BidData> {
        self.bid_data.get(&lot_id)
    }

    /// Get bid by lot and bid ID.
    pub fn get_bid(&self, lot_id: LotId, bid_id: BidId) -> Option<&Bid> {
        self.bids.get(&(lot_id, bid_id))
    }

    /// Get the custody balance of a token.
    pub fn get_custody(&self, token: &Token) -> u128 {
        self.custody.get(token).copied().unwrap_or(0)
    }

    /// Get a reward balance.
    pub fn get_reward(&self, recipient: &Address, token: &Token) -> u128 {
        self.rewards.get(&(*recipient, *token)).copied().unwrap_or(0)
    }

    /// Move `amount` of `token` from `from` into house custody.
    pub fn pull(&mut self, token: Token, from: Address, amount: u128) -> Result<(), AuctionError> {
        if amount == 0 {
            return Ok(());
        }
        let balance = self.custody.entry(token).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(AuctionError::MathOverflow)?;
        self.outbox.push(Transfer {
            token,
            from,
            to: HOUSE_ADDRESS,
            amount,
        });
        Ok(())
    }

    /// Move `amount` of `token` from house custody to `to`.
    pub fn push(&mut self, token: Token, to: Address, amount: u128) -> Result<(), AuctionError> {
        if amount == 0 {
            return Ok(());
        }
        let available = self.get_custody(&token);
        let remaining = available
            .checked_sub(amount)
            .ok_or(AuctionError::InsufficientCustody {
                token,
                needed: amount,
                available,
            })?;
        self.custody.insert(token, remaining);
        self.outbox.push(Transfer {
            token,
            from: HOUSE_ADDRESS,
            to,
            amount,
        });
        Ok(())
    }

    /// Credit a reward balance. Funds stay in custody until claimed.
    pub fn add_reward(
        &mut self,
        recipient: Address,
        token: Token,
        amount: u128,
    ) -> Result<(), AuctionError> {
        if amount == 0 {
            return Ok(());
        }
        let balance = self.rewards.entry((recipient, token)).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(AuctionError::MathOverflow)?;
        Ok(())
    }

    /// Capture what a call limited to `scope` may overwrite.
    pub fn checkpoint(&self, scope: Option<&CallScope>) -> Checkpoint {
        let lot = scope.map(|scope| {
            let lot_id = scope.lot_id;
            LotCheckpoint {
                lot_id,
                lot: self.lots.get(&lot_id).cloned(),
                routing: self.routings.get(&lot_id).cloned(),
                bid_data: self.bid_data.get(&lot_id).cloned(),
                settlement: self.settlements.get(&lot_id).cloned(),
                queue: scope.queue.then(|| self.queues.get(&lot_id).cloned()),
                bids: scope
                    .bids
                    .iter()
                    .map(|&bid_id| {
                        let key = (lot_id, bid_id);
                        (
                            bid_id,
                            self.bids.get(&key).cloned(),
                            self.encrypted_bids.get(&key).cloned(),
                        )
                    })
                    .collect(),
            }
        });

        Checkpoint {
            next_lot_id: self.next_lot_id,
            owner: self.owner,
            protocol: self.protocol,
            fees: self.fees,
            limits: self.limits,
            curator_fees: self.curator_fees.clone(),
            rewards: self.rewards.clone(),
            custody: self.custody.clone(),
            lot,
        }
    }

    /// Undo every write made since `checkpoint` was taken and drop pending
    /// transfers.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.next_lot_id = checkpoint.next_lot_id;
        self.owner = checkpoint.owner;
        self.protocol = checkpoint.protocol;
        self.fees = checkpoint.fees;
        self.limits = checkpoint.limits;
        self.curator_fees = checkpoint.curator_fees;
        self.rewards = checkpoint.rewards;
        self.custody = checkpoint.custody;
        self.outbox.clear();

        let Some(saved) = checkpoint.lot else {
            return;
        };
        let lot_id = saved.lot_id;
        restore_entry(&mut self.lots, lot_id, saved.lot);
        restore_entry(&mut self.routings, lot_id, saved.routing);
        restore_entry(&mut self.bid_data, lot_id, saved.bid_data);
        restore_entry(&mut self.settlements, lot_id, saved.settlement);
        if let Some(queue) = saved.queue {
            restore_entry(&mut self.queues, lot_id, queue);
        }
        for (bid_id, bid, encrypted) in saved.bids {
            restore_entry(&mut self.bids, (lot_id, bid_id), bid);
            restore_entry(&mut self.encrypted_bids, (lot_id, bid_id), encrypted);
        }
    }

    /// Zero a reward balance, returning what it held.
    pub fn take_reward(&mut self, recipient: &Address, token: &Token) -> u128 {
        self.rewards.remove(&(*recipient, *token)).unwrap_or(0)
    }
}
