//! Hashing, signing and address derivation
//!
//! Thin wrappers over `secp256k1`, `sha2`, `ripemd` and `bitcoin_hashes`. The ledger
//! engine only ever talks to these functions, never to the curve or hash crates directly.

use crate::constants::{PUBKEY_SIZE, SIGNATURE_SIZE};
use crate::error::{LedgerError, Result};
use crate::types::*;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};
use once_cell::sync::Lazy;
use rand::RngCore;
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// SHA256(x)
pub fn hash(data: &[u8]) -> Hash {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// SHA256(SHA256(x))
pub fn double_hash(data: &[u8]) -> Hash {
    let mut engine = sha256d::Hash::engine();
    engine.input(data);
    sha256d::Hash::from_engine(engine).into_inner()
}

/// Address of a public key: hex(RIPEMD160(SHA256(pubkey)))
pub fn address_of(pubkey: &[u8]) -> String {
    let sha256_hash = Sha256::digest(pubkey);
    let ripemd160_hash = Ripemd160::digest(&sha256_hash);
    hex::encode(ripemd160_hash)
}

/// Signing key pair owned by a wallet
#[derive(Debug, Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Draw a fresh key from `rng`. Out-of-range scalars are redrawn.
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        loop {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            if let Ok(secret_key) = SecretKey::from_slice(&bytes) {
                return Self::from_secret_key(secret_key);
            }
        }
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        Self { secret_key, public_key }
    }

    /// Compressed public key
    pub fn public_key_bytes(&self) -> [u8; PUBKEY_SIZE] {
        self.public_key.serialize()
    }

    pub fn address(&self) -> String {
        address_of(&self.public_key_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_SIZE]> {
        sign(&self.secret_key, message)
    }
}

/// ECDSA over SHA256(message), compact 64-byte encoding
pub fn sign(secret_key: &SecretKey, message: &[u8]) -> Result<[u8; SIGNATURE_SIZE]> {
    let digest = hash(message);
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| LedgerError::Crypto(format!("Failed to create message: {}", e)))?;
    let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, secret_key);
    Ok(signature.serialize_compact())
}

/// Verify a compact signature. Malformed keys or signatures verify as false.
pub fn verify(pubkey_bytes: &[u8], signature_bytes: &[u8], message: &[u8]) -> bool {
    let pubkey = match PublicKey::from_slice(pubkey_bytes) {
        Ok(pk) => pk,
        Err(_) => return false,
    };

    let signature = match Signature::from_compact(signature_bytes) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    let digest = hash(message);
    let message = match Message::from_digest_slice(&digest) {
        Ok(m) => m,
        Err(_) => return false,
    };

    SECP256K1_CONTEXT.verify_ecdsa(&message, &signature, &pubkey).is_ok()
}
