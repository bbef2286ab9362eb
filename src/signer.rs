//! Order signing.
//!
//! The venue accepts orders signed by the trading key. Signing is kept
//! behind a narrow trait so the executor never touches key material:
//! `sign(payload) -> SignedOrder` plus the maker `address()`. The local
//! implementation hashes a canonical encoding of the order fields and
//! signs it with an in-process ECDSA key. Calls are fast (< 50 ms) and
//! synchronous.

use alloy_primitives::{hex, keccak256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::error::SignerError;
use crate::types::{Quote, Side};

/// Unsigned order fields, canonically encoded for hashing.
#[derive(Debug, Clone, Serialize)]
pub struct OrderPayload {
    pub salt: u64,
    pub maker: String,
    pub token_id: String,
    pub price: String,
    pub size: String,
    /// 0 = BUY, 1 = SELL (venue wire convention).
    pub side: u8,
    pub expiration: u64,
    pub nonce: u64,
}

impl OrderPayload {
    pub fn from_quote(quote: &Quote, maker: String, salt: u64, expiration: u64) -> Self {
        Self {
            salt,
            maker,
            token_id: quote.token_id.clone(),
            price: quote.price.to_string(),
            size: quote.size.to_string(),
            side: match quote.side {
                Side::Buy => 0,
                Side::Sell => 1,
            },
            expiration,
            nonce: 0,
        }
    }

    /// Deterministic byte encoding fed to the digest.
    fn canonical_bytes(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.salt,
            self.maker,
            self.token_id,
            self.price,
            self.size,
            self.side,
            self.expiration,
            self.nonce,
        )
        .into_bytes()
    }
}

/// Signed order as submitted to `POST /orders`.
#[derive(Debug, Clone, Serialize)]
pub struct SignedOrder {
    #[serde(flatten)]
    pub payload: OrderPayload,
    pub signature: String,
    pub owner: String,
}

pub trait OrderSigner: Send + Sync {
    fn sign(&self, payload: &OrderPayload) -> Result<SignedOrder, SignerError>;
    fn address(&self) -> String;
}

/// Signer backed by a local private key.
pub struct LocalKeySigner {
    inner: PrivateKeySigner,
    address: String,
}

impl LocalKeySigner {
    pub fn from_key(private_key: &SecretString) -> Result<Self, SignerError> {
        let inner: PrivateKeySigner = private_key
            .expose_secret()
            .trim()
            .parse()
            .map_err(|_| SignerError::InvalidKey("not a valid ECDSA private key".to_string()))?;
        let address = format!("{:#x}", inner.address());
        Ok(Self { inner, address })
    }
}

impl OrderSigner for LocalKeySigner {
    fn sign(&self, payload: &OrderPayload) -> Result<SignedOrder, SignerError> {
        let digest = keccak256(payload.canonical_bytes());
        let signature = self
            .inner
            .sign_hash_sync(&digest)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        Ok(SignedOrder {
            payload: payload.clone(),
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
            owner: self.address.clone(),
        })
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}
