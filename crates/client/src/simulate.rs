//! Offline simulation of a complete lot.
//!
//! A scenario describes the house configuration, one lot and its bids. The
//! simulation runs the lot through a local auction house and the settlement
//! driver, claims every bid and withdraws all fee rewards.

use anyhow::{anyhow, bail, Context, Result};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::info;

use empa_module::{AuctionCall, AuctionHouse, CallContext, CallOutput, HouseGenesisConfig};
use empa_settler::{DriverConfig, SettlementService};
use empa_types::{
    Address, AuctionParams, BidId, DerivativeRef, RoutingParams, Settlement, Token, Transfer,
};

use crate::bid::{create_bid, generate_auction_keypair};

const SELLER: Address = [0x01; 32];
const BASE_TOKEN: Token = [0xBB; 32];
const QUOTE_TOKEN: Token = [0xCC; 32];
const START: u64 = 1_000;

/// A lot and its bids.
#[derive(Clone, Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub genesis: HouseGenesisConfig,
    pub lot: LotScenario,
    #[serde(default)]
    pub bids: Vec<BidScenario>,
    /// Bids decrypted per driver call
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
}

fn default_batch_size() -> u64 {
    50
}

/// Parameters of the simulated lot.
#[derive(Clone, Debug, Deserialize)]
pub struct LotScenario {
    pub capacity: u128,
    pub minimum_price: u128,
    #[serde(default)]
    pub min_fill_percent: u16,
    #[serde(default)]
    pub min_bid_percent: u16,
    #[serde(default = "default_duration")]
    pub duration: u64,
    #[serde(default = "default_decimals")]
    pub base_token_decimals: u8,
    #[serde(default = "default_decimals")]
    pub quote_token_decimals: u8,
    /// Curator address (hex), curates the lot when present
    pub curator: Option<String>,
    #[serde(default)]
    pub curator_fee: u16,
}

fn default_duration() -> u64 {
    86_400
}

fn default_decimals() -> u8 {
    18
}

/// One bid of the simulated lot.
#[derive(Clone, Debug, Deserialize)]
pub struct BidScenario {
    /// Bidder address (hex)
    pub bidder: String,
    pub amount_in: u128,
    pub min_amount_out: u128,
    /// Referrer address (hex)
    pub referrer: Option<String>,
}

/// Claim made for one bid.
#[derive(Clone, Debug, Serialize)]
pub struct BidOutcome {
    pub bid_id: BidId,
    pub bidder: String,
    pub payout: u128,
    pub refund: u128,
}

/// Result of a simulation.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationOutcome {
    pub settlement: Settlement,
    pub bids: Vec<BidOutcome>,
    /// Quote paid to the seller
    pub seller_proceeds: u128,
    /// Base returned to the seller
    pub seller_base_returned: u128,
    /// Fees withdrawn by the protocol and referrers
    pub fees_withdrawn: u128,
    /// House custody left after all claims, base then quote
    pub custody_after: (u128, u128),
}

/// Parse a 32-byte address from hex.
pub fn parse_address(value: &str) -> Result<Address> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .with_context(|| format!("invalid hex address {value}"))?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("address {value} is not 32 bytes"))
}

/// Run a scenario from lot creation to the last claim.
pub fn run_scenario<R: RngCore + CryptoRng>(
    scenario: &Scenario,
    rng: &mut R,
) -> Result<SimulationOutcome> {
    let mut house = AuctionHouse::new(&scenario.genesis).context("invalid genesis config")?;
    let (private_key, public_key) = generate_auction_keypair(rng);
    let mut transfers = Vec::new();

    let lot = &scenario.lot;
    let curator = lot.curator.as_deref().map(parse_address).transpose()?;
    let output = execute(
        &mut house,
        &mut transfers,
        SELLER,
        START,
        AuctionCall::Auction {
            routing: RoutingParams {
                base_token: BASE_TOKEN,
                base_token_decimals: lot.base_token_decimals,
                quote_token: QUOTE_TOKEN,
                quote_token_decimals: lot.quote_token_decimals,
                curator,
                hooks: None,
                allowlist: None,
                allowlist_params: Vec::new(),
                derivative: DerivativeRef::default(),
            },
            params: AuctionParams {
                start: 0,
                duration: lot.duration,
                min_fill_percent: lot.min_fill_percent,
                min_bid_percent: lot.min_bid_percent,
                capacity: lot.capacity,
                minimum_price: lot.minimum_price,
                public_key: public_key.clone(),
            },
            info_hash: [0u8; 32],
        },
    )
    .context("lot creation failed")?;
    let CallOutput::LotCreated(lot_id) = output else {
        bail!("unexpected output {output:?}");
    };
    let conclusion = START
        .checked_add(lot.duration)
        .ok_or_else(|| anyhow!("lot duration overflows"))?;

    if let Some(curator) = curator {
        let fee = AuctionCall::SetCuratorFee {
            fee: lot.curator_fee,
        };
        execute(&mut house, &mut transfers, curator, START, fee)?;
        execute(&mut house, &mut transfers, curator, START, AuctionCall::Curate { lot_id })
            .context("curation failed")?;
    }

    let mut bids = Vec::with_capacity(scenario.bids.len());
    let mut recipients = vec![house.state().protocol];
    for entry in &scenario.bids {
        let bidder = parse_address(&entry.bidder)?;
        let referrer = entry.referrer.as_deref().map(parse_address).transpose()?;
        recipients.extend(referrer);

        let prepared = create_bid(
            &public_key,
            lot_id,
            bidder,
            entry.amount_in,
            entry.min_amount_out,
            rng,
        )?;
        let call = prepared.into_call(referrer, Vec::new());
        let output = execute(&mut house, &mut transfers, bidder, START, call)
            .with_context(|| format!("bid from {} rejected", entry.bidder))?;
        if let CallOutput::BidSubmitted(bid_id) = output {
            bids.push((bid_id, entry.bidder.clone()));
        }
    }

    let mut driver = SettlementService::new(DriverConfig {
        batch_size: scenario.batch_size,
        ..Default::default()
    })?;
    driver.register_key(lot_id, private_key);
    let settlement = driver.settle_lot(&mut house, lot_id, conclusion)?;
    transfers.extend(driver.take_transfers());

    let mut outcomes = Vec::with_capacity(bids.len());
    for (bid_id, bidder) in bids {
        let claim = AuctionCall::Claim { lot_id, bid_id };
        if let CallOutput::Claimed(claim) =
            execute(&mut house, &mut transfers, SELLER, conclusion, claim)?
        {
            outcomes.push(BidOutcome {
                bid_id,
                bidder,
                payout: claim.payout,
                refund: claim.refund,
            });
        }
    }

    let mut fees_withdrawn = 0;
    recipients.sort_unstable();
    recipients.dedup();
    for recipient in recipients {
        let withdraw = AuctionCall::ClaimRewards { token: QUOTE_TOKEN };
        if let CallOutput::Amount(amount) =
            execute(&mut house, &mut transfers, recipient, conclusion, withdraw)?
        {
            fees_withdrawn += amount;
        }
    }

    let state = house.state();
    info!(
        lot_id,
        marginal_price = settlement.marginal_price,
        total_out = settlement.total_out,
        "simulation complete"
    );

    Ok(SimulationOutcome {
        seller_proceeds: received(&transfers, QUOTE_TOKEN, SELLER),
        seller_base_returned: received(&transfers, BASE_TOKEN, SELLER),
        settlement,
        bids: outcomes,
        fees_withdrawn,
        custody_after: (state.get_custody(&BASE_TOKEN), state.get_custody(&QUOTE_TOKEN)),
    })
}

fn execute(
    house: &mut AuctionHouse,
    transfers: &mut Vec<Transfer>,
    sender: Address,
    timestamp: u64,
    call: AuctionCall,
) -> Result<CallOutput> {
    let receipt = house.execute(&CallContext { sender, timestamp }, call)?;
    transfers.extend(receipt.transfers);
    Ok(receipt.output)
}

fn received(transfers: &[Transfer], token: Token, to: Address) -> u128 {
    transfers
        .iter()
        .filter(|t| t.token == token && t.to == to)
        .map(|t| t.amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    const SIX_DECIMALS: u128 = 1_000_000;

    fn scenario(json: serde_json::Value) -> Scenario {
        serde_json::from_value(json).unwrap()
    }

    fn bidder(n: u8) -> String {
        hex::encode([n; 32])
    }

    #[test]
    fn test_undersubscribed_below_floor() {
        let bids: Vec<_> = (0..3)
            .map(|i| serde_json::json!({
                "bidder": bidder(10 + i),
                "amount_in": 1_000_000u64,
                "min_amount_out": 1_000_000u64,
            }))
            .collect();
        let scenario = scenario(serde_json::json!({
            "lot": {
                "capacity": 10_000_000u64,
                "minimum_price": 2_000_000u64,
                "base_token_decimals": 6,
                "quote_token_decimals": 6,
            },
            "bids": bids,
        }));

        let outcome = run_scenario(&scenario, &mut OsRng).unwrap();
        assert!(!outcome.settlement.is_filled());
        assert_eq!(outcome.seller_base_returned, 10 * SIX_DECIMALS);
        assert_eq!(outcome.seller_proceeds, 0);
        assert!(outcome.bids.iter().all(|b| b.refund == SIX_DECIMALS && b.payout == 0));
        assert_eq!(outcome.custody_after, (0, 0));
    }

    #[test]
    fn test_four_bids_at_floor() {
        let bids: Vec<_> = (0..4)
            .map(|i| serde_json::json!({
                "bidder": bidder(10 + i),
                "amount_in": 2_000_000u64,
                "min_amount_out": 1_000_000u64,
            }))
            .collect();
        let scenario = scenario(serde_json::json!({
            "lot": {
                "capacity": 10_000_000u64,
                "minimum_price": 2_000_000u64,
                "base_token_decimals": 6,
                "quote_token_decimals": 6,
            },
            "bids": bids,
            "batch_size": 3,
        }));

        let outcome = run_scenario(&scenario, &mut OsRng).unwrap();
        assert_eq!(outcome.settlement.marginal_price, 2 * SIX_DECIMALS);
        assert_eq!(outcome.seller_proceeds, 8 * SIX_DECIMALS);
        assert_eq!(outcome.seller_base_returned, 6 * SIX_DECIMALS);
        assert!(outcome.bids.iter().all(|b| b.payout == SIX_DECIMALS && b.refund == 0));
        assert_eq!(outcome.custody_after, (0, 0));
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address(&format!("0x{}", bidder(7))).unwrap(), [7u8; 32]);
        assert!(parse_address("abcd").is_err());
        assert!(parse_address("zz").is_err());
    }
}
