//! Per-peer key store

use crate::crypto::KeyPair;
use rand::RngCore;

/// Keys held by one peer. The newest key receives change and rewards.
#[derive(Debug, Clone, Default)]
pub struct Wallet {
    keys: Vec<KeyPair>,
    addresses: Vec<String>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a key, remember it and return its address
    pub fn generate_key<R: RngCore + ?Sized>(&mut self, rng: &mut R) -> String {
        let keys = KeyPair::generate(rng);
        let address = keys.address();
        self.keys.push(keys);
        self.addresses.push(address.clone());
        address
    }

    pub fn address(&self) -> Option<&str> {
        self.addresses.last().map(String::as_str)
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn owns(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a == address)
    }

    /// Signing key for `address`, if this wallet generated it
    pub fn key_for(&self, address: &str) -> Option<&KeyPair> {
        self.addresses
            .iter()
            .position(|a| a == address)
            .map(|i| &self.keys[i])
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
