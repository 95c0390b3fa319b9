//! Cryptographic primitives for the Telehash wire format
//!
//! The open handshake fixes the exact primitive set: RSA-OAEP over SHA-1
//! for key transport, RSA PKCS#1 v1.5 signatures over SHA-256, NIST P-256
//! ECDH with X9.63 uncompressed points, and AES-256-CTR for the symmetric
//! layers. Hashnames are SHA-256 of the SPKI DER encoding of an RSA
//! public key.
//!
//! Randomized operations hang off the [`Crypto`] provider value, which is
//! constructed once and threaded through the switch. [`Crypto::seeded`]
//! swaps the OS entropy source for a seeded PRNG so tests can generate
//! reproducible keys and identifiers.

use crate::types::{Hashname, IV_SIZE};
use aes::cipher::{KeyIvInit, StreamCipher};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, Pkcs1v15Sign};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use p256::PublicKey as EcPublicKey;
pub use p256::SecretKey as EcSecretKey;
pub use rsa::{RsaPrivateKey, RsaPublicKey};

/// RSA modulus size for generated identities.
pub const RSA_KEY_BITS: usize = 2048;

/// Encoded length of a P-256 public key in X9.63 uncompressed form.
pub const EC_POINT_SIZE: usize = 65;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("rsa operation failed: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("key encoding failed: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),
    #[error("key encoding failed: {0}")]
    Spki(#[from] rsa::pkcs8::spki::Error),
    #[error("invalid EC point")]
    InvalidPoint,
    #[error("signature verification failed")]
    BadSignature,
}

/// Provider for the randomized primitives.
///
/// Deterministic operations (digests, AES-CTR, ECDH, signing) are free
/// functions in this module; only key generation, IV/identifier material,
/// and OAEP encryption draw from the provider's entropy source.
pub struct Crypto {
    rng: Mutex<StdRng>,
}

impl Crypto {
    /// Provider backed by OS entropy.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Provider backed by a seeded PRNG, for reproducible tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Fill and return `len` random bytes.
    pub fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.rng.lock().fill_bytes(&mut buf);
        buf
    }

    /// Random fixed-size array, for IVs and identifiers.
    pub fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut buf = [0u8; N];
        self.rng.lock().fill_bytes(&mut buf);
        buf
    }

    /// Generate a fresh RSA keypair for a local identity.
    pub fn generate_rsa_keypair(&self) -> Result<(RsaPrivateKey, RsaPublicKey), CryptoError> {
        let mut rng = self.rng.lock();
        let private = RsaPrivateKey::new(&mut *rng, RSA_KEY_BITS)?;
        let public = private.to_public_key();
        Ok((private, public))
    }

    /// Generate a fresh P-256 keypair for one open handshake.
    pub fn generate_ec_keypair(&self) -> (EcSecretKey, EcPublicKey) {
        let mut rng = self.rng.lock();
        let secret = EcSecretKey::random(&mut *rng);
        let public = secret.public_key();
        (secret, public)
    }

    /// RSA-OAEP encryption with SHA-1 hash and MGF1 (wire compatibility).
    pub fn rsa_oaep_encrypt(
        &self,
        key: &RsaPublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut rng = self.rng.lock();
        Ok(key.encrypt(&mut *rng, Oaep::new::<Sha1>(), plaintext)?)
    }
}

impl Default for Crypto {
    fn default() -> Self {
        Self::new()
    }
}

/// RSA-OAEP decryption with SHA-1 hash and MGF1.
pub fn rsa_oaep_decrypt(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    Ok(key.decrypt(Oaep::new::<Sha1>(), ciphertext)?)
}

/// RSA PKCS#1 v1.5 signature over the SHA-256 digest of `message`.
pub fn rsa_sign(key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let digest = Sha256::digest(message);
    Ok(key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)?)
}

/// Verify an RSA PKCS#1 v1.5 signature over the SHA-256 digest of `message`.
pub fn rsa_verify(key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let digest = Sha256::digest(message);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| CryptoError::BadSignature)
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 digest over the concatenation of `parts`.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// AES-256-CTR keystream application. Encryption and decryption are the
/// same operation.
pub fn aes256ctr(key: &[u8; 32], iv: &[u8; IV_SIZE], data: &[u8]) -> Vec<u8> {
    let mut cipher = Aes256Ctr::new(&(*key).into(), &(*iv).into());
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    out
}

/// ECDH shared secret: the 32-byte x-coordinate.
pub fn ecdh_shared_secret(secret: &EcSecretKey, public: &EcPublicKey) -> [u8; 32] {
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    (*shared.raw_secret_bytes()).into()
}

/// Encode a P-256 public key in X9.63 uncompressed form (65 bytes).
pub fn encode_ec_public_key(key: &EcPublicKey) -> Vec<u8> {
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    key.to_encoded_point(false).as_bytes().to_vec()
}

/// Decode a P-256 public key from X9.63 uncompressed form.
pub fn decode_ec_public_key(bytes: &[u8]) -> Result<EcPublicKey, CryptoError> {
    EcPublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPoint)
}

/// SPKI DER encoding of an RSA public key; the hashname preimage.
pub fn rsa_public_key_der(key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    Ok(key.to_public_key_der()?.as_bytes().to_vec())
}

/// Decode an RSA public key from SPKI DER.
pub fn rsa_public_key_from_der(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    Ok(RsaPublicKey::from_public_key_der(der)?)
}

/// PKCS#8 DER encoding of an RSA private key, for identity storage.
pub fn rsa_private_key_der(key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    Ok(key.to_pkcs8_der()?.as_bytes().to_vec())
}

/// Decode an RSA private key from PKCS#8 DER.
pub fn rsa_private_key_from_der(der: &[u8]) -> Result<RsaPrivateKey, CryptoError> {
    Ok(RsaPrivateKey::from_pkcs8_der(der)?)
}

/// Derive the hashname of an RSA public key: SHA-256 of its SPKI DER
/// encoding. Pure in the key.
pub fn derive_hashname(key: &RsaPublicKey) -> Result<Hashname, CryptoError> {
    Ok(Hashname::new(sha256(&rsa_public_key_der(key)?)))
}
