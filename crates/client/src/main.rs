//! CLI for encrypted marginal-price auctions.
//!
//! This binary provides commands for:
//! - Generating lot key pairs
//! - Sealing a bid to a lot's public key
//! - Opening a sealed bid with the lot's private key
//! - Simulating a complete lot from a JSON scenario

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use serde_json::json;
use tracing::info;

use empa_client::simulate::parse_address;
use empa_client::{create_bid, generate_auction_keypair, run_scenario, Scenario};
use empa_crypto::{derive_public_key, open_bid};
use empa_types::{EncryptedBid, G1Point, Scalar};

#[derive(Parser)]
#[command(name = "empa-cli")]
#[command(about = "CLI for encrypted marginal-price auctions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a lot key pair
    Keygen,

    /// Seal a bid to a lot's public key
    Encrypt {
        /// Lot public key (hex, 48 bytes)
        #[arg(long)]
        public_key: String,

        /// Lot ID
        #[arg(long)]
        lot_id: u64,

        /// Bidder address (hex)
        #[arg(long)]
        bidder: String,

        /// Quote amount escrowed with the bid
        #[arg(long)]
        amount_in: u128,

        /// Minimum base amount wanted (will be encrypted)
        #[arg(long)]
        min_amount_out: u128,
    },

    /// Open a sealed bid with the lot's private key
    Decrypt {
        /// Lot private key (hex, 32 bytes)
        #[arg(long)]
        private_key: String,

        /// Lot ID
        #[arg(long)]
        lot_id: u64,

        /// Bidder address (hex)
        #[arg(long)]
        bidder: String,

        /// Quote amount escrowed with the bid
        #[arg(long)]
        amount_in: u128,

        /// Ciphertext (hex)
        #[arg(long)]
        ciphertext: String,

        /// Ephemeral bid public key (hex, 48 bytes)
        #[arg(long)]
        bid_pubkey: String,
    },

    /// Run a lot from creation to the last claim
    Simulate {
        /// Scenario file (JSON)
        #[arg(long)]
        scenario: PathBuf,
    },
}

fn parse_fixed<const N: usize>(value: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .with_context(|| format!("invalid hex {what}"))?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("{what} must be {N} bytes"))
}

fn keygen_cmd() -> Result<()> {
    let (private_key, public_key) = generate_auction_keypair(&mut OsRng);
    info!("Generated lot key pair");
    let output = json!({
        "private_key": hex::encode(private_key.0),
        "public_key": hex::encode(public_key.0),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn encrypt_cmd(
    public_key: &str,
    lot_id: u64,
    bidder: &str,
    amount_in: u128,
    min_amount_out: u128,
) -> Result<()> {
    let public_key = G1Point(parse_fixed(public_key, "public key")?);
    let bidder = parse_address(bidder)?;

    let prepared = create_bid(
        &public_key,
        lot_id,
        bidder,
        amount_in,
        min_amount_out,
        &mut OsRng,
    )?;
    info!(lot_id, amount_in, "Sealed bid");

    let output = json!({
        "lot_id": lot_id,
        "amount_in": amount_in.to_string(),
        "ciphertext": hex::encode(&prepared.ciphertext),
        "bid_pubkey": hex::encode(prepared.bid_pubkey.0),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn decrypt_cmd(
    private_key: &str,
    lot_id: u64,
    bidder: &str,
    amount_in: u128,
    ciphertext: &str,
    bid_pubkey: &str,
) -> Result<()> {
    let private_key = Scalar(parse_fixed(private_key, "private key")?);
    derive_public_key(&private_key).map_err(|e| anyhow!("invalid private key: {e}"))?;
    let bidder = parse_address(bidder)?;
    let encrypted = EncryptedBid {
        ciphertext: hex::decode(ciphertext.trim_start_matches("0x"))
            .context("invalid hex ciphertext")?,
        bid_pubkey: G1Point(parse_fixed(bid_pubkey, "bid public key")?),
    };

    let amount_out = open_bid(&private_key, lot_id, &bidder, amount_in, &encrypted)
        .map_err(|e| anyhow!("bid does not decrypt: {e}"))?;
    println!("Minimum amount out: {amount_out}");
    Ok(())
}

fn simulate_cmd(path: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw).context("invalid scenario")?;

    let outcome = run_scenario(&scenario, &mut OsRng)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("empa_cli=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => keygen_cmd()?,

        Commands::Encrypt {
            public_key,
            lot_id,
            bidder,
            amount_in,
            min_amount_out,
        } => {
            encrypt_cmd(&public_key, lot_id, &bidder, amount_in, min_amount_out)?;
        }

        Commands::Decrypt {
            private_key,
            lot_id,
            bidder,
            amount_in,
            ciphertext,
            bid_pubkey,
        } => {
            decrypt_cmd(
                &private_key,
                lot_id,
                &bidder,
                amount_in,
                &ciphertext,
                &bid_pubkey,
            )?;
        }

        Commands::Simulate { scenario } => simulate_cmd(&scenario)?,
    }

    Ok(())
}
