//! Elliptic-curve integrated encryption over BLS12-381 G1.
//!
//! Each lot publishes a public key `P = x·G`. A bidder samples an ephemeral
//! scalar `k`, publishes `K = k·G` next to the ciphertext and masks the
//! plaintext with a key stream derived from the shared point `k·P = x·K`.
//!
//! # Key stream
//!
//! The shared point is compressed and used as HKDF-SHA256 input keying
//! material. The HKDF salt binds the ciphertext to the bid it was submitted
//! with, so a ciphertext replayed under another bidder or amount decrypts to
//! noise. The stream is expanded to the plaintext length and XORed in.

use bls12_381::{G1Affine, G1Projective, Scalar as BlsScalar};
use ff::Field;
use group::Curve;
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;

use empa_types::{G1Point, Scalar};

use crate::error::CryptoError;

const KEY_STREAM_INFO: &[u8] = b"EMPA-BID-KEY";

/// Generate a fresh private key and its public key.
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (Scalar, G1Point) {
    let secret = random_scalar(rng);
    let public = (G1Projective::generator() * secret).to_affine();
    (Scalar(secret.to_bytes()), compress_g1(&public))
}

/// Derive the public key `priv·G` for a private key.
pub fn derive_public_key(private_key: &Scalar) -> Result<G1Point, CryptoError> {
    let secret = decode_private_key(private_key)?;
    Ok(compress_g1(&(G1Projective::generator() * secret).to_affine()))
}

/// Check that bytes encode a usable public key (on curve, not the identity).
pub fn validate_public_key(point: &G1Point) -> Result<(), CryptoError> {
    decode_public_key(point).map(|_| ())
}

/// Encrypt `plaintext` to `recipient`.
///
/// Returns the ciphertext (same length as the plaintext) and the ephemeral
/// public key needed to decrypt it.
pub fn encrypt<R: RngCore + CryptoRng>(
    recipient: &G1Point,
    plaintext: &[u8],
    salt: &[u8; 32],
    rng: &mut R,
) -> Result<(Vec<u8>, G1Point), CryptoError> {
    let recipient = decode_public_key(recipient)?;

    let ephemeral = random_scalar(rng);
    let ephemeral_pubkey = (G1Projective::generator() * ephemeral).to_affine();
    let shared = (G1Projective::from(recipient) * ephemeral).to_affine();

    let ciphertext = apply_key_stream(&shared, salt, plaintext)?;
    Ok((ciphertext, compress_g1(&ephemeral_pubkey)))
}

/// Decrypt a ciphertext produced by [`encrypt`].
///
/// The scheme carries no authentication tag: a wrong key or salt yields
/// garbage rather than an error, and callers validate the plaintext layout.
pub fn decrypt(
    private_key: &Scalar,
    ephemeral_pubkey: &G1Point,
    salt: &[u8; 32],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let secret = decode_private_key(private_key)?;
    let ephemeral = decode_public_key(ephemeral_pubkey)?;
    let shared = (G1Projective::from(ephemeral) * secret).to_affine();

    apply_key_stream(&shared, salt, ciphertext)
}

fn apply_key_stream(
    shared: &G1Affine,
    salt: &[u8; 32],
    input: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let ikm = shared.to_compressed();
    let hk = Hkdf::<Sha256>::new(Some(salt), &ikm);

    let mut stream = vec![0u8; input.len()];
    hk.expand(KEY_STREAM_INFO, &mut stream)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    Ok(input.iter().zip(stream).map(|(b, k)| b ^ k).collect())
}

/// Decode a private key, rejecting non-canonical encodings and zero.
pub fn decode_private_key(private_key: &Scalar) -> Result<BlsScalar, CryptoError> {
    let secret: Option<BlsScalar> = BlsScalar::from_bytes(&private_key.0).into();
    match secret {
        Some(secret) if !bool::from(secret.is_zero()) => Ok(secret),
        _ => Err(CryptoError::InvalidScalar),
    }
}

fn decode_public_key(point: &G1Point) -> Result<G1Affine, CryptoError> {
    let affine = decompress_g1(&point.0)?;
    if bool::from(affine.is_identity()) {
        return Err(CryptoError::InvalidG1Point);
    }
    Ok(affine)
}

/// Generate a random non-zero scalar.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> BlsScalar {
    loop {
        let mut bytes = [0u8; 64];
        rng.fill_bytes(&mut bytes);
        let scalar = BlsScalar::from_bytes_wide(&bytes);
        if !bool::from(scalar.is_zero()) {
            return scalar;
        }
    }
}

/// Compress a G1 point to bytes.
pub fn compress_g1(point: &G1Affine) -> G1Point {
    G1Point(point.to_compressed())
}

/// Decompress a G1 point from bytes.
pub fn decompress_g1(bytes: &[u8; 48]) -> Result<G1Affine, CryptoError> {
    Option::<G1Affine>::from(G1Affine::from_compressed(bytes)).ok_or(CryptoError::InvalidG1Point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let mut rng = OsRng;
        let (secret, public) = generate_keypair(&mut rng);
        let salt = [9u8; 32];
        let plaintext = b"sealed bid: 1000";

        let (ciphertext, ephemeral) = encrypt(&public, plaintext, &salt, &mut rng).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_ne!(ciphertext.as_slice(), plaintext.as_slice());

        let decrypted = decrypt(&secret, &ephemeral, &salt, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_salt_yields_noise() {
        let mut rng = OsRng;
        let (secret, public) = generate_keypair(&mut rng);
        let plaintext = b"sealed bid: 1000";

        let (ciphertext, ephemeral) = encrypt(&public, plaintext, &[1u8; 32], &mut rng).unwrap();
        let decrypted = decrypt(&secret, &ephemeral, &[2u8; 32], &ciphertext).unwrap();
        assert_ne!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_yields_noise() {
        let mut rng = OsRng;
        let (_, public) = generate_keypair(&mut rng);
        let (other_secret, _) = generate_keypair(&mut rng);
        let salt = [3u8; 32];
        let plaintext = b"sealed bid: 1000";

        let (ciphertext, ephemeral) = encrypt(&public, plaintext, &salt, &mut rng).unwrap();
        let decrypted = decrypt(&other_secret, &ephemeral, &salt, &ciphertext).unwrap();
        assert_ne!(decrypted, plaintext);
    }

    #[test]
    fn test_derive_public_key_matches_keypair() {
        let (secret, public) = generate_keypair(&mut OsRng);
        assert_eq!(derive_public_key(&secret).unwrap(), public);
    }

    #[test]
    fn test_zero_private_key_rejected() {
        assert_eq!(
            derive_public_key(&Scalar([0u8; 32])),
            Err(CryptoError::InvalidScalar)
        );
    }

    #[test]
    fn test_invalid_points_rejected() {
        assert_eq!(
            validate_public_key(&G1Point([0xAB; 48])),
            Err(CryptoError::InvalidG1Point)
        );

        let identity = compress_g1(&G1Affine::identity());
        assert_eq!(
            validate_public_key(&identity),
            Err(CryptoError::InvalidG1Point)
        );
    }
}
