//! Bid plaintext layout and the seal/open helpers used by bidders and the
//! auction house.
//!
//! A bid plaintext is the 16-byte big-endian [`BID_SEED_TAG`] followed by the
//! big-endian minimum amount out. The tag lets the house tell a correctly
//! encrypted bid from noise without an authentication tag.

use rand::{CryptoRng, RngCore};

use empa_types::{
    compute_bid_salt, Address, EncryptedBid, G1Point, LotId, Scalar, BID_SEED_TAG,
    BID_SEED_TAG_LEN,
};

use crate::ecies;
use crate::error::CryptoError;

/// Encode a minimum amount out as a bid plaintext.
pub fn encode_bid_payload(amount_out: u128) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(BID_SEED_TAG_LEN + 16);
    plaintext.extend_from_slice(&BID_SEED_TAG.to_be_bytes());
    plaintext.extend_from_slice(&amount_out.to_be_bytes());
    plaintext
}

/// Decode a bid plaintext into its minimum amount out.
///
/// The amount field may be longer than 16 bytes as long as the extra leading
/// bytes are zero.
pub fn decode_bid_payload(plaintext: &[u8]) -> Result<u128, CryptoError> {
    if plaintext.len() <= BID_SEED_TAG_LEN {
        return Err(CryptoError::PayloadTooShort {
            len: plaintext.len(),
        });
    }

    let (tag, amount) = plaintext.split_at(BID_SEED_TAG_LEN);
    if tag != &BID_SEED_TAG.to_be_bytes()[..] {
        return Err(CryptoError::SeedTagMismatch);
    }

    let significant = match amount.iter().position(|b| *b != 0) {
        Some(first) => &amount[first..],
        None => return Ok(0),
    };
    if significant.len() > 16 {
        return Err(CryptoError::AmountOverflow);
    }

    let mut buf = [0u8; 16];
    buf[16 - significant.len()..].copy_from_slice(significant);
    Ok(u128::from_be_bytes(buf))
}

/// Encrypt a bid's minimum amount out to a lot's public key.
pub fn seal_bid<R: RngCore + CryptoRng>(
    auction_pubkey: &G1Point,
    lot_id: LotId,
    bidder: &Address,
    amount_in: u128,
    min_amount_out: u128,
    rng: &mut R,
) -> Result<EncryptedBid, CryptoError> {
    let salt = compute_bid_salt(lot_id, bidder, amount_in);
    let plaintext = encode_bid_payload(min_amount_out);
    let (ciphertext, bid_pubkey) = ecies::encrypt(auction_pubkey, &plaintext, &salt, rng)?;

    Ok(EncryptedBid {
        ciphertext,
        bid_pubkey,
    })
}

/// Decrypt a stored bid and recover its minimum amount out.
pub fn open_bid(
    private_key: &Scalar,
    lot_id: LotId,
    bidder: &Address,
    amount_in: u128,
    encrypted: &EncryptedBid,
) -> Result<u128, CryptoError> {
    let salt = compute_bid_salt(lot_id, bidder, amount_in);
    let plaintext = ecies::decrypt(
        private_key,
        &encrypted.bid_pubkey,
        &salt,
        &encrypted.ciphertext,
    )?;
    decode_bid_payload(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecies::generate_keypair;
    use rand::rngs::OsRng;

    #[test]
    fn test_payload_layout() {
        let payload = encode_bid_payload(0x0102);
        assert_eq!(payload.len(), 32);
        assert_eq!(&payload[..16], &BID_SEED_TAG.to_be_bytes());
        assert_eq!(payload[30], 0x01);
        assert_eq!(payload[31], 0x02);
        assert_eq!(decode_bid_payload(&payload), Ok(0x0102));
    }

    #[test]
    fn test_payload_too_short() {
        let tag_only = BID_SEED_TAG.to_be_bytes();
        assert_eq!(
            decode_bid_payload(&tag_only),
            Err(CryptoError::PayloadTooShort { len: 16 })
        );
    }

    #[test]
    fn test_payload_wrong_tag() {
        let mut payload = encode_bid_payload(5);
        payload[0] ^= 0xFF;
        assert_eq!(decode_bid_payload(&payload), Err(CryptoError::SeedTagMismatch));
    }

    #[test]
    fn test_payload_wide_amount() {
        // One significant byte past 128 bits
        let mut payload = BID_SEED_TAG.to_be_bytes().to_vec();
        payload.push(1);
        payload.extend_from_slice(&[0u8; 16]);
        assert_eq!(decode_bid_payload(&payload), Err(CryptoError::AmountOverflow));

        // Zero padding is accepted
        let mut payload = BID_SEED_TAG.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0u8; 8]);
        payload.extend_from_slice(&7u128.to_be_bytes());
        assert_eq!(decode_bid_payload(&payload), Ok(7));
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let mut rng = OsRng;
        let (secret, public) = generate_keypair(&mut rng);
        let bidder = [1u8; 32];

        let sealed = seal_bid(&public, 3, &bidder, 19, 9, &mut rng).unwrap();
        assert_eq!(open_bid(&secret, 3, &bidder, 19, &sealed), Ok(9));
    }

    #[test]
    fn test_open_with_other_amount_in_fails() {
        let mut rng = OsRng;
        let (secret, public) = generate_keypair(&mut rng);
        let bidder = [1u8; 32];

        let sealed = seal_bid(&public, 3, &bidder, 19, 9, &mut rng).unwrap();
        assert!(open_bid(&secret, 3, &bidder, 20, &sealed).is_err());
        assert!(open_bid(&secret, 4, &bidder, 19, &sealed).is_err());
    }
}
