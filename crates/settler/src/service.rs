//! Settlement service implementation.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use empa_module::queries::{
    get_abortable, get_awaiting_private_key, get_pending_decryption, get_pending_settlement,
};
use empa_module::{AuctionCall, AuctionError, AuctionHouse, CallContext, CallOutput};
use empa_types::{Address, LotId, Scalar, Settlement, Transfer};

/// Configuration for the settlement driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Address the driver sends calls from
    pub operator: Address,
    /// Bids decrypted per call
    pub batch_size: u64,
    /// Whether to abort lots past their settle period
    pub abort_expired: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            operator: [0u8; 32],
            batch_size: 50,
            abort_expired: true,
        }
    }
}

/// Errors raised while driving a lot.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Batch size must be positive")]
    ZeroBatchSize,

    #[error("No private key registered for lot {0}")]
    MissingKey(LotId),

    #[error("Decryption of lot {0} made no progress")]
    Stalled(LotId),

    #[error("Call {step} failed for lot {lot_id}: {source}")]
    Call {
        lot_id: LotId,
        step: &'static str,
        #[source]
        source: AuctionError,
    },
}

/// What one pass of the driver did.
#[derive(Debug, Default)]
pub struct DriverReport {
    /// Lots whose key was revealed
    pub revealed: Vec<LotId>,
    /// Lots that finished decryption
    pub decrypted: Vec<LotId>,
    /// Settled lots and their outcome
    pub settled: Vec<(LotId, Settlement)>,
    /// Lots aborted after their settle period
    pub aborted: Vec<LotId>,
    /// Lots that failed a step, left for the next pass
    pub failed: Vec<(LotId, DriverError)>,
}

/// The settlement service.
pub struct SettlementService {
    config: DriverConfig,
    keys: BTreeMap<LotId, Scalar>,
    /// Effects of committed calls not yet taken by the caller
    transfers: Vec<Transfer>,
}

impl SettlementService {
    /// Create a new settlement service.
    pub fn new(config: DriverConfig) -> Result<Self, DriverError> {
        if config.batch_size == 0 {
            return Err(DriverError::ZeroBatchSize);
        }
        Ok(Self {
            config,
            keys: BTreeMap::new(),
            transfers: Vec::new(),
        })
    }

    /// Hand the driver a lot's private key to reveal once the lot concludes.
    pub fn register_key(&mut self, lot_id: LotId, private_key: Scalar) {
        self.keys.insert(lot_id, private_key);
    }

    /// Drain the transfers produced by the driver's calls.
    pub fn take_transfers(&mut self) -> Vec<Transfer> {
        std::mem::take(&mut self.transfers)
    }

    /// Run every stage once against the house at time `now`.
    pub fn run_once(&mut self, house: &mut AuctionHouse, now: u64) -> DriverReport {
        let mut report = DriverReport::default();

        for lot_id in get_awaiting_private_key(house.state(), now) {
            if !self.keys.contains_key(&lot_id) {
                continue;
            }
            match self.reveal(house, lot_id, now) {
                Ok(()) => report.revealed.push(lot_id),
                Err(e) => fail(&mut report, lot_id, e),
            }
        }

        for lot_id in get_pending_decryption(house.state()) {
            match self.decrypt_all(house, lot_id, now) {
                Ok(()) => report.decrypted.push(lot_id),
                Err(e) => fail(&mut report, lot_id, e),
            }
        }

        for lot_id in get_pending_settlement(house.state(), now) {
            match self.settle(house, lot_id, now) {
                Ok(settlement) => report.settled.push((lot_id, settlement)),
                Err(e) => fail(&mut report, lot_id, e),
            }
        }

        if self.config.abort_expired {
            for lot_id in get_abortable(house.state(), now) {
                match self.execute(house, lot_id, now, "abort", AuctionCall::Abort { lot_id }) {
                    Ok(_) => {
                        self.keys.remove(&lot_id);
                        report.aborted.push(lot_id);
                    }
                    Err(e) => fail(&mut report, lot_id, e),
                }
            }
        }

        info!(
            revealed = report.revealed.len(),
            decrypted = report.decrypted.len(),
            settled = report.settled.len(),
            aborted = report.aborted.len(),
            failed = report.failed.len(),
            "driver pass complete"
        );
        report
    }

    /// Drive one lot from key reveal through settlement.
    pub fn settle_lot(
        &mut self,
        house: &mut AuctionHouse,
        lot_id: LotId,
        now: u64,
    ) -> Result<Settlement, DriverError> {
        let revealed = house
            .state()
            .get_bid_data(lot_id)
            .is_some_and(|data| data.private_key.is_some());
        if !revealed {
            self.reveal(house, lot_id, now)?;
        }
        self.decrypt_all(house, lot_id, now)?;
        self.settle(house, lot_id, now)
    }

    fn reveal(&mut self, house: &mut AuctionHouse, lot_id: LotId, now: u64) -> Result<(), DriverError> {
        let private_key = self
            .keys
            .get(&lot_id)
            .cloned()
            .ok_or(DriverError::MissingKey(lot_id))?;
        self.execute(
            house,
            lot_id,
            now,
            "submit_private_key",
            AuctionCall::SubmitPrivateKey {
                lot_id,
                private_key,
                num_to_decrypt: 0,
            },
        )?;
        Ok(())
    }

    fn decrypt_all(
        &mut self,
        house: &mut AuctionHouse,
        lot_id: LotId,
        now: u64,
    ) -> Result<(), DriverError> {
        loop {
            let output = self.execute(
                house,
                lot_id,
                now,
                "decrypt_and_sort_bids",
                AuctionCall::DecryptAndSortBids {
                    lot_id,
                    num_to_decrypt: self.config.batch_size,
                },
            )?;
            let CallOutput::Progress(progress) = output else {
                return Err(DriverError::Stalled(lot_id));
            };
            debug!(
                lot_id,
                processed = progress.processed,
                remaining = progress.remaining,
                "decrypt batch"
            );
            if progress.done {
                return Ok(());
            }
            if progress.processed == 0 {
                return Err(DriverError::Stalled(lot_id));
            }
        }
    }

    fn settle(
        &mut self,
        house: &mut AuctionHouse,
        lot_id: LotId,
        now: u64,
    ) -> Result<Settlement, DriverError> {
        match self.execute(house, lot_id, now, "settle", AuctionCall::Settle { lot_id })? {
            CallOutput::Settled(settlement) => {
                self.keys.remove(&lot_id);
                Ok(settlement)
            }
            _ => Err(DriverError::Stalled(lot_id)),
        }
    }

    fn execute(
        &mut self,
        house: &mut AuctionHouse,
        lot_id: LotId,
        now: u64,
        step: &'static str,
        call: AuctionCall,
    ) -> Result<CallOutput, DriverError> {
        let ctx = CallContext {
            sender: self.config.operator,
            timestamp: now,
        };
        let receipt = house.execute(&ctx, call).map_err(|source| DriverError::Call {
            lot_id,
            step,
            source,
        })?;
        self.transfers.extend(receipt.transfers);
        Ok(receipt.output)
    }
}

fn fail(report: &mut DriverReport, lot_id: LotId, error: DriverError) {
    warn!(lot_id, error = %error, "driver step failed");
    report.failed.push((lot_id, error));
}

#[cfg(test)]
mod tests {
    use super::*;
    use empa_crypto::{generate_keypair, seal_bid};
    use empa_module::HouseGenesisConfig;
    use empa_types::{AuctionParams, DerivativeRef, G1Point, LotStatus, RoutingParams};
    use rand::rngs::OsRng;

    const SELLER: Address = [1u8; 32];

    fn house() -> AuctionHouse {
        let mut config = HouseGenesisConfig::with_owner([0xAA; 32]);
        config.limits.min_auction_duration = 100;
        config.limits.settle_period = 1000;
        AuctionHouse::new(&config).unwrap()
    }

    fn create_lot(house: &mut AuctionHouse, public: G1Point) -> LotId {
        let receipt = house
            .execute(
                &CallContext {
                    sender: SELLER,
                    timestamp: 1000,
                },
                AuctionCall::Auction {
                    routing: RoutingParams {
                        base_token: [0xBB; 32],
                        base_token_decimals: 6,
                        quote_token: [0xCC; 32],
                        quote_token_decimals: 6,
                        curator: None,
                        hooks: None,
                        allowlist: None,
                        allowlist_params: Vec::new(),
                        derivative: DerivativeRef::default(),
                    },
                    params: AuctionParams {
                        start: 0,
                        duration: 100,
                        min_fill_percent: 0,
                        min_bid_percent: 0,
                        capacity: 10_000_000,
                        minimum_price: 1_000_000,
                        public_key: public,
                    },
                    info_hash: [0u8; 32],
                },
            )
            .unwrap();
        match receipt.output {
            CallOutput::LotCreated(lot_id) => lot_id,
            other => panic!("unexpected output {other:?}"),
        }
    }

    fn bid(house: &mut AuctionHouse, lot_id: LotId, public: &G1Point, bidder: Address) {
        let sealed = seal_bid(public, lot_id, &bidder, 2_000_000, 1_000_000, &mut OsRng).unwrap();
        house
            .execute(
                &CallContext {
                    sender: bidder,
                    timestamp: 1050,
                },
                AuctionCall::Bid {
                    lot_id,
                    referrer: None,
                    amount_in: 2_000_000,
                    ciphertext: sealed.ciphertext,
                    bid_pubkey: sealed.bid_pubkey,
                    allowlist_proof: Vec::new(),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = DriverConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            SettlementService::new(config),
            Err(DriverError::ZeroBatchSize)
        ));
    }

    #[test]
    fn test_run_once_settles_in_batches() {
        let mut house = house();
        let (secret, public) = generate_keypair(&mut OsRng);
        let lot_id = create_lot(&mut house, public.clone());
        for i in 0..5u8 {
            bid(&mut house, lot_id, &public, [10 + i; 32]);
        }

        let mut driver = SettlementService::new(DriverConfig {
            batch_size: 2,
            ..Default::default()
        })
        .unwrap();
        driver.register_key(lot_id, secret);

        // Nothing to do before conclusion
        let report = driver.run_once(&mut house, 1099);
        assert!(report.revealed.is_empty());
        assert!(report.settled.is_empty());

        let report = driver.run_once(&mut house, 1100);
        assert_eq!(report.revealed, vec![lot_id]);
        assert_eq!(report.decrypted, vec![lot_id]);
        assert_eq!(report.settled.len(), 1);
        assert!(report.failed.is_empty());

        let (_, settlement) = &report.settled[0];
        assert_eq!(settlement.marginal_price, 2_000_000);
        assert_eq!(settlement.total_out, 5_000_000);
        assert_eq!(house.state().get_lot(lot_id).unwrap().status, LotStatus::Settled);
    }

    #[test]
    fn test_lot_without_key_is_aborted() {
        let mut house = house();
        let (_, public) = generate_keypair(&mut OsRng);
        let lot_id = create_lot(&mut house, public.clone());
        bid(&mut house, lot_id, &public, [10; 32]);

        let mut driver = SettlementService::new(DriverConfig::default()).unwrap();
        let report = driver.run_once(&mut house, 1100);
        assert!(report.revealed.is_empty());
        assert!(report.aborted.is_empty());

        let report = driver.run_once(&mut house, 2100);
        assert_eq!(report.aborted, vec![lot_id]);
        assert!(house.state().settlements[&lot_id].aborted);

        // Escrow and the bid's quote stay in custody until claimed
        let transfers = driver.take_transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].to, SELLER);
        assert_eq!(transfers[0].amount, 10_000_000);
        assert!(driver.take_transfers().is_empty());
    }

    #[test]
    fn test_settle_lot_missing_key() {
        let mut house = house();
        let (_, public) = generate_keypair(&mut OsRng);
        let lot_id = create_lot(&mut house, public);

        let mut driver = SettlementService::new(DriverConfig::default()).unwrap();
        let result = driver.settle_lot(&mut house, lot_id, 1100);
        assert!(matches!(result, Err(DriverError::MissingKey(id)) if id == lot_id));
    }
}
