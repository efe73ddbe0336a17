//! End-to-end integration tests for encrypted marginal-price auctions.
//!
//! These tests exercise the full lot lifecycle through the auction house:
//! 1. Lot creation and curation
//! 2. Bid sealing and submission
//! 3. Key reveal and batched decryption by the settlement driver
//! 4. Settlement, claims and fee withdrawal

#![cfg(test)]

use std::collections::HashMap;

use rand::rngs::OsRng;

use empa_client::{create_bid, generate_auction_keypair};
use empa_crypto::seal_bid;
use empa_module::{
    AuctionCall, AuctionError, AuctionHouse, AuctionQuery, AuctionQueryResponse, CallContext,
    CallOutput, ClaimResult, FeeConfig, HouseGenesisConfig, LotLimits,
};
use empa_settler::{DriverConfig, SettlementService};
use empa_types::{
    Address, AuctionParams, BidId, BidStatus, DerivativeRef, FeeType, G1Point, LotId, LotStatus,
    RoutingParams, Scalar, Settlement, Token, Transfer, HOUSE_ADDRESS,
};

const OWNER: Address = [0xAA; 32];
const PROTOCOL: Address = [0xAB; 32];
const SELLER: Address = [0x01; 32];
const CURATOR: Address = [0x09; 32];
const REFERRER: Address = [0x08; 32];
const BASE: Token = [0xBB; 32];
const QUOTE: Token = [0xCC; 32];

/// One unit of a 6-decimal token.
const UNIT: u128 = 1_000_000;

const CREATED_AT: u64 = 1_000;
const CONCLUSION: u64 = 1_100;
const SETTLE_PERIOD: u64 = 1_000;

struct Harness {
    house: AuctionHouse,
    secret: Scalar,
    public: G1Point,
    lot_id: LotId,
    transfers: Vec<Transfer>,
}

struct LotSetup {
    capacity: u128,
    minimum_price: u128,
    min_fill_percent: u16,
    curator: Option<Address>,
}

impl Default for LotSetup {
    fn default() -> Self {
        Self {
            capacity: 10 * UNIT,
            minimum_price: UNIT,
            min_fill_percent: 0,
            curator: None,
        }
    }
}

fn genesis(fees: FeeConfig) -> HouseGenesisConfig {
    HouseGenesisConfig {
        owner: OWNER,
        protocol: PROTOCOL,
        fees,
        limits: LotLimits {
            min_auction_duration: 100,
            settle_period: SETTLE_PERIOD,
            ..Default::default()
        },
    }
}

impl Harness {
    fn new(fees: FeeConfig, setup: LotSetup) -> Self {
        let house = AuctionHouse::new(&genesis(fees)).unwrap();
        let (secret, public) = generate_auction_keypair(&mut OsRng);
        let mut harness = Self {
            house,
            secret,
            public,
            lot_id: 0,
            transfers: Vec::new(),
        };

        let output = harness
            .call(
                SELLER,
                CREATED_AT,
                AuctionCall::Auction {
                    routing: RoutingParams {
                        base_token: BASE,
                        base_token_decimals: 6,
                        quote_token: QUOTE,
                        quote_token_decimals: 6,
                        curator: setup.curator,
                        hooks: None,
                        allowlist: None,
                        allowlist_params: Vec::new(),
                        derivative: DerivativeRef::default(),
                    },
                    params: AuctionParams {
                        start: 0,
                        duration: CONCLUSION - CREATED_AT,
                        min_fill_percent: setup.min_fill_percent,
                        min_bid_percent: 0,
                        capacity: setup.capacity,
                        minimum_price: setup.minimum_price,
                        public_key: harness.public.clone(),
                    },
                    info_hash: [0u8; 32],
                },
            )
            .unwrap();
        harness.lot_id = match output {
            CallOutput::LotCreated(lot_id) => lot_id,
            other => panic!("unexpected output {other:?}"),
        };
        harness
    }

    fn simple(minimum_price: u128) -> Self {
        Self::new(
            FeeConfig::default(),
            LotSetup {
                minimum_price,
                ..Default::default()
            },
        )
    }

    fn call(
        &mut self,
        sender: Address,
        timestamp: u64,
        call: AuctionCall,
    ) -> Result<CallOutput, AuctionError> {
        let receipt = self.house.execute(&CallContext { sender, timestamp }, call)?;
        self.transfers.extend(receipt.transfers);
        Ok(receipt.output)
    }

    fn bid(
        &mut self,
        bidder: Address,
        amount_in: u128,
        min_amount_out: u128,
        referrer: Option<Address>,
    ) -> BidId {
        let prepared = create_bid(
            &self.public,
            self.lot_id,
            bidder,
            amount_in,
            min_amount_out,
            &mut OsRng,
        )
        .unwrap();
        match self
            .call(bidder, 1_050, prepared.into_call(referrer, Vec::new()))
            .unwrap()
        {
            CallOutput::BidSubmitted(bid_id) => bid_id,
            other => panic!("unexpected output {other:?}"),
        }
    }

    fn settle_with_batch(&mut self, batch_size: u64) -> Settlement {
        let mut driver = SettlementService::new(DriverConfig {
            batch_size,
            ..Default::default()
        })
        .unwrap();
        driver.register_key(self.lot_id, self.secret.clone());
        let settlement = driver
            .settle_lot(&mut self.house, self.lot_id, CONCLUSION)
            .unwrap();
        self.transfers.extend(driver.take_transfers());
        settlement
    }

    fn claim(&mut self, bid_id: BidId) -> Result<ClaimResult, AuctionError> {
        let lot_id = self.lot_id;
        match self.call([0x77; 32], CONCLUSION, AuctionCall::Claim { lot_id, bid_id })? {
            CallOutput::Claimed(result) => Ok(result),
            other => panic!("unexpected output {other:?}"),
        }
    }

    fn withdraw(&mut self, recipient: Address) -> u128 {
        match self
            .call(recipient, CONCLUSION, AuctionCall::ClaimRewards { token: QUOTE })
            .unwrap()
        {
            CallOutput::Amount(amount) => amount,
            other => panic!("unexpected output {other:?}"),
        }
    }

    /// Net amount of `token` each address received from the house.
    fn received(&self, token: Token) -> HashMap<Address, i128> {
        let mut net = HashMap::new();
        for transfer in self.transfers.iter().filter(|t| t.token == token) {
            let amount = transfer.amount as i128;
            *net.entry(transfer.to).or_insert(0) += amount;
            *net.entry(transfer.from).or_insert(0) -= amount;
        }
        net
    }

    fn assert_custody_empty(&self) {
        let state = self.house.state();
        assert_eq!(state.get_custody(&BASE), 0);
        assert_eq!(state.get_custody(&QUOTE), 0);
        for token in [BASE, QUOTE] {
            assert_eq!(self.received(token).get(&HOUSE_ADDRESS).copied().unwrap_or(0), 0);
        }
    }
}

/// Test a curated lot with fees and a referrer from creation to withdrawal.
#[test]
fn test_full_lot_lifecycle() {
    // ========================================
    // Phase 1: Setup - fees and curator
    // ========================================

    let fees = FeeConfig {
        protocol_fee: 100,
        referrer_fee: 50,
        max_curator_fee: 500,
    };
    let mut house = AuctionHouse::new(&genesis(FeeConfig::default())).unwrap();
    let ctx = CallContext {
        sender: OWNER,
        timestamp: 0,
    };
    house
        .execute(&ctx, AuctionCall::SetFee { fee_type: FeeType::Protocol, fee: 100 })
        .unwrap();
    house
        .execute(&ctx, AuctionCall::SetFee { fee_type: FeeType::Referrer, fee: 50 })
        .unwrap();
    house
        .execute(&ctx, AuctionCall::SetFee { fee_type: FeeType::MaxCurator, fee: 500 })
        .unwrap();
    assert!(matches!(
        house.query(AuctionQuery::GetFees),
        AuctionQueryResponse::Fees(configured) if configured == fees
    ));

    // Same configuration through genesis for the lot itself
    let mut h = Harness::new(
        fees,
        LotSetup {
            curator: Some(CURATOR),
            ..Default::default()
        },
    );
    h.call(CURATOR, 0, AuctionCall::SetCuratorFee { fee: 300 }).unwrap();
    let lot_id = h.lot_id;
    h.call(CURATOR, CREATED_AT, AuctionCall::Curate { lot_id }).unwrap();
    assert_eq!(
        h.call(CURATOR, CREATED_AT, AuctionCall::Curate { lot_id }),
        Err(AuctionError::AlreadyCurated(lot_id))
    );
    // Capacity plus the maximum curator payout
    assert_eq!(h.house.state().get_custody(&BASE), 10_300_000);

    // ========================================
    // Phase 2: Bidders submit sealed bids
    // ========================================

    let a = h.bid([0x10; 32], 19 * UNIT, 9 * UNIT, Some(REFERRER));
    let b = h.bid([0x11; 32], 4 * UNIT, 2 * UNIT, None);
    // Price 0.5 is below the floor
    let c = h.bid([0x12; 32], UNIT, 2 * UNIT, None);
    assert_eq!((a, b, c), (1, 2, 3));

    // Key cannot be revealed early
    let early = h.call(
        SELLER,
        CONCLUSION - 1,
        AuctionCall::SubmitPrivateKey {
            lot_id,
            private_key: h.secret.clone(),
            num_to_decrypt: 0,
        },
    );
    assert_eq!(early, Err(AuctionError::MarketActive(lot_id)));

    // ========================================
    // Phase 3: Decrypt and settle
    // ========================================

    let settlement = h.settle_with_batch(2);
    assert_eq!(settlement.marginal_price, 2 * UNIT);
    assert_eq!(settlement.total_in, 20 * UNIT);
    assert_eq!(settlement.total_out, 10 * UNIT);
    // Referrer 0.5% and protocol 1% of 19, protocol 1.5% of 1
    assert_eq!(settlement.total_fees, 95_000 + 190_000 + 15_000);
    assert_eq!(settlement.curator_payout, 300_000);

    let queue = h.house.query(AuctionQuery::GetQueue { lot_id });
    let AuctionQueryResponse::Queue(entries) = queue else {
        panic!("unexpected response");
    };
    assert_eq!(entries.iter().map(|e| e.bid_id).collect::<Vec<_>>(), vec![a, b]);

    let quote = h.received(QUOTE);
    assert_eq!(quote[&SELLER], 20 * UNIT as i128 - 300_000);
    let base = h.received(BASE);
    assert_eq!(base[&CURATOR], 300_000);
    // Everything escrowed was sold or paid to the curator
    assert_eq!(base[&SELLER], -(10 * UNIT as i128) - 300_000);

    // ========================================
    // Phase 4: Claims and rewards
    // ========================================

    assert_eq!(h.claim(a), Ok(ClaimResult { payout: 9_500_000, refund: 0 }));
    assert_eq!(h.claim(b), Ok(ClaimResult { payout: 500_000, refund: 3 * UNIT }));
    assert_eq!(h.claim(c), Ok(ClaimResult { payout: 0, refund: UNIT }));
    assert_eq!(h.claim(a), Err(AuctionError::AlreadyClaimed(a)));

    assert_eq!(h.withdraw(REFERRER), 95_000);
    assert_eq!(h.withdraw(PROTOCOL), 205_000);
    assert_eq!(h.withdraw(PROTOCOL), 0);

    h.assert_custody_empty();
    let quote = h.received(QUOTE);
    assert_eq!(quote[&[0x10; 32]], -(19 * UNIT as i128));
    assert_eq!(quote[&[0x11; 32]], -(UNIT as i128));
    assert_eq!(quote[&[0x12; 32]], 0);
    assert_eq!(h.received(BASE)[&[0x11; 32]], 500_000);

    println!("Lifecycle complete: price={}", settlement.marginal_price);
}

/// Any way of splitting decryption into batches yields the same result.
#[test]
fn test_batch_partition_invariance() {
    let bids: [(u128, u128); 7] = [
        (3 * UNIT, UNIT),
        (2 * UNIT, UNIT),
        (5 * UNIT, 2 * UNIT),
        (2 * UNIT, UNIT),
        (UNIT, 3 * UNIT),
        (6 * UNIT, 2 * UNIT),
        (4 * UNIT, 3 * UNIT),
    ];

    let mut results = Vec::new();
    for batch_size in [1, 2, 3, 6, 7, 100] {
        let mut h = Harness::new(
            FeeConfig::default(),
            LotSetup {
                capacity: 6 * UNIT,
                ..Default::default()
            },
        );
        for (i, (amount_in, amount_out)) in bids.iter().enumerate() {
            h.bid([0x20 + i as u8; 32], *amount_in, *amount_out, None);
        }
        let settlement = h.settle_with_batch(batch_size);
        let lot_id = h.lot_id;
        let AuctionQueryResponse::Queue(queue) = h.house.query(AuctionQuery::GetQueue { lot_id })
        else {
            panic!("unexpected response");
        };

        // Strictly ordered by price, ties by bid id
        for pair in queue.windows(2) {
            assert!(
                pair[0].price > pair[1].price
                    || (pair[0].price == pair[1].price && pair[0].bid_id < pair[1].bid_id)
            );
        }
        results.push((settlement, queue));
    }

    let (first_settlement, first_queue) = &results[0];
    assert!(first_settlement.is_filled());
    for (settlement, queue) in &results[1..] {
        assert_eq!(settlement, first_settlement);
        assert_eq!(queue, first_queue);
    }
}

/// Capacity 10, floor 2 and three bids at price 1: nothing sells.
#[test]
fn test_bids_below_floor_leave_lot_unfilled() {
    let mut h = Harness::simple(2 * UNIT);
    let bids: Vec<_> = (0..3).map(|i| h.bid([0x30 + i; 32], UNIT, UNIT, None)).collect();

    let settlement = h.settle_with_batch(10);
    assert!(!settlement.is_filled());
    assert_eq!(h.received(BASE)[&SELLER], 0);

    for bid_id in bids {
        assert_eq!(h.claim(bid_id), Ok(ClaimResult { payout: 0, refund: UNIT }));
    }
    h.assert_custody_empty();
}

/// Four bids of 2 quote for 1 base at floor 2: each fills at the floor.
#[test]
fn test_undersubscribed_lot_clears_at_floor() {
    let mut h = Harness::simple(2 * UNIT);
    let bids: Vec<_> = (0..4).map(|i| h.bid([0x40 + i; 32], 2 * UNIT, UNIT, None)).collect();

    let settlement = h.settle_with_batch(3);
    assert_eq!(settlement.marginal_price, 2 * UNIT);
    assert_eq!(settlement.total_out, 4 * UNIT);
    assert_eq!(h.received(QUOTE)[&SELLER], 8 * UNIT as i128);
    // 6 of the 10 escrowed base go back to the seller
    assert_eq!(h.received(BASE)[&SELLER], -4 * UNIT as i128);

    for bid_id in bids {
        assert_eq!(h.claim(bid_id), Ok(ClaimResult { payout: UNIT, refund: 0 }));
    }
    h.assert_custody_empty();
}

#[test]
fn test_min_fill_not_met() {
    let mut h = Harness::new(
        FeeConfig::default(),
        LotSetup {
            min_fill_percent: 5_000,
            ..Default::default()
        },
    );
    let a = h.bid([0x50; 32], 6 * UNIT, 3 * UNIT, None);

    let settlement = h.settle_with_batch(10);
    assert_eq!(settlement.marginal_price, 0);
    assert_eq!(h.received(BASE)[&SELLER], 0);
    assert_eq!(h.claim(a), Ok(ClaimResult { payout: 0, refund: 6 * UNIT }));
    h.assert_custody_empty();
}

#[test]
fn test_settle_twice_rejected() {
    let mut h = Harness::simple(UNIT);
    h.bid([0x60; 32], 2 * UNIT, UNIT, None);
    h.settle_with_batch(10);

    let lot_id = h.lot_id;
    let again = h.call(SELLER, CONCLUSION, AuctionCall::Settle { lot_id });
    assert_eq!(
        again,
        Err(AuctionError::LotWrongState {
            lot_id,
            status: LotStatus::Settled
        })
    );
}

/// Bids that do not decrypt are excluded but stay refundable.
#[test]
fn test_forged_and_refunded_bids() {
    let mut h = Harness::simple(UNIT);
    let honest = h.bid([0x70; 32], 2 * UNIT, UNIT, None);

    // Sealed for a different amount in, so the salt does not match
    let forger: Address = [0x71; 32];
    let sealed = seal_bid(&h.public, h.lot_id, &forger, 1, UNIT, &mut OsRng).unwrap();
    let lot_id = h.lot_id;
    let forged = match h
        .call(
            forger,
            1_050,
            AuctionCall::Bid {
                lot_id,
                referrer: None,
                amount_in: 5 * UNIT,
                ciphertext: sealed.ciphertext,
                bid_pubkey: sealed.bid_pubkey,
                allowlist_proof: Vec::new(),
            },
        )
        .unwrap()
    {
        CallOutput::BidSubmitted(bid_id) => bid_id,
        other => panic!("unexpected output {other:?}"),
    };

    let withdrawn = h.bid([0x72; 32], 3 * UNIT, UNIT, None);
    assert_eq!(
        h.call([0x70; 32], 1_060, AuctionCall::RefundBid { lot_id, bid_id: withdrawn }),
        Err(AuctionError::NotPermitted)
    );
    assert_eq!(
        h.call([0x72; 32], 1_060, AuctionCall::RefundBid { lot_id, bid_id: withdrawn }),
        Ok(CallOutput::Amount(3 * UNIT))
    );

    let settlement = h.settle_with_batch(1);
    assert_eq!(settlement.winners.iter().copied().collect::<Vec<_>>(), vec![honest]);

    let state = h.house.state();
    assert_eq!(state.bids[&(lot_id, forged)].status, BidStatus::Decrypted);
    assert_eq!(state.bids[&(lot_id, withdrawn)].status, BidStatus::Refunded);

    assert_eq!(h.claim(forged), Ok(ClaimResult { payout: 0, refund: 5 * UNIT }));
    assert_eq!(h.claim(withdrawn), Err(AuctionError::AlreadyClaimed(withdrawn)));
    assert_eq!(h.claim(honest), Ok(ClaimResult { payout: UNIT, refund: 0 }));
    h.assert_custody_empty();
}

#[test]
fn test_cancel_only_without_bids() {
    let mut h = Harness::simple(UNIT);
    let lot_id = h.lot_id;

    assert_eq!(
        h.call([0x02; 32], 1_010, AuctionCall::Cancel { lot_id }),
        Err(AuctionError::NotPermitted)
    );
    h.call(SELLER, 1_010, AuctionCall::Cancel { lot_id }).unwrap();
    assert_eq!(h.received(BASE)[&SELLER], 0);

    let lot = h.house.state().get_lot(lot_id).unwrap();
    assert_eq!(lot.status, LotStatus::Cancelled);
    assert_eq!(lot.capacity, 0);

    // A lot with a bid cannot be cancelled
    let mut h = Harness::simple(UNIT);
    let lot_id = h.lot_id;
    h.bid([0x80; 32], UNIT, UNIT, None);
    assert!(matches!(
        h.call(SELLER, 1_060, AuctionCall::Cancel { lot_id }),
        Err(AuctionError::LotWrongState { .. })
    ));
}

/// A lot whose key is never revealed is aborted and fully refunded.
#[test]
fn test_abort_after_settle_period() {
    let mut h = Harness::simple(UNIT);
    let lot_id = h.lot_id;
    let bid_id = h.bid([0x90; 32], 2 * UNIT, UNIT, None);

    let deadline = CONCLUSION + SETTLE_PERIOD;
    assert_eq!(
        h.call([0x91; 32], deadline - 1, AuctionCall::Abort { lot_id }),
        Err(AuctionError::MarketActive(lot_id))
    );
    h.call([0x91; 32], deadline, AuctionCall::Abort { lot_id }).unwrap();
    assert_eq!(h.received(BASE)[&SELLER], 0);

    // Key reveal is no longer possible
    let reveal = h.call(
        SELLER,
        deadline,
        AuctionCall::SubmitPrivateKey {
            lot_id,
            private_key: h.secret.clone(),
            num_to_decrypt: 10,
        },
    );
    assert!(matches!(reveal, Err(AuctionError::LotWrongState { .. })));

    assert_eq!(h.claim(bid_id), Ok(ClaimResult { payout: 0, refund: 2 * UNIT }));
    h.assert_custody_empty();
}

#[test]
fn test_wrong_private_key_rejected() {
    let mut h = Harness::simple(UNIT);
    let lot_id = h.lot_id;
    let (other, _) = generate_auction_keypair(&mut OsRng);

    let result = h.call(
        SELLER,
        CONCLUSION,
        AuctionCall::SubmitPrivateKey {
            lot_id,
            private_key: other,
            num_to_decrypt: 0,
        },
    );
    assert_eq!(result, Err(AuctionError::InvalidPrivateKey));
    assert!(h.house.state().bid_data[&lot_id].private_key.is_none());
}
