//! The signing capability.
//!
//! The log only needs to sign a message and check a signature's pass/fail.
//! Ed25519 is the one scheme verified here; other schemes plug in by
//! implementing [`Signer`] and are rejected by [`verify_signature`] until
//! registered.

use crate::error::SignatureError;
use crate::message::{Message, Signature};
use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Scheme name carried by Ed25519 signatures.
pub const ED25519: &str = "ed25519";

/// Something that can sign messages for a log.
///
/// Signing may suspend (hardware wallets, remote signers), hence async.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, message: &Message) -> Result<Signature, SignatureError>;

    /// Public key that verifies this signer's signatures.
    fn public_key(&self) -> Vec<u8>;
}

/// In-process Ed25519 signer.
#[derive(Clone)]
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Ed25519Signer {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret(secret: &[u8; 32]) -> Self {
        Ed25519Signer {
            key: SigningKey::from_bytes(secret),
        }
    }

    /// Sign arbitrary bytes (used by session authorizations).
    pub fn sign_bytes(&self, data: &[u8]) -> Vec<u8> {
        self.key.sign(data).to_bytes().to_vec()
    }

    pub fn sign_message(&self, message: &Message) -> Result<Signature, SignatureError> {
        let bytes = message.encode()?;
        Ok(Signature::new(ED25519, self.public_key(), self.sign_bytes(&bytes)))
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Signer({:02x?})", &self.key.verifying_key().to_bytes()[..4])
    }
}

#[async_trait]
impl Signer for Ed25519Signer {
    async fn sign(&self, message: &Message) -> Result<Signature, SignatureError> {
        self.sign_message(message)
    }

    fn public_key(&self) -> Vec<u8> {
        self.key.verifying_key().to_bytes().to_vec()
    }
}

/// Check an Ed25519 signature over raw bytes.
pub fn verify_ed25519(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
    let key: [u8; 32] = public_key.try_into().map_err(|_| SignatureError::MalformedKey)?;
    let key = VerifyingKey::from_bytes(&key).map_err(|_| SignatureError::MalformedKey)?;
    let signature = ed25519_dalek::Signature::from_slice(signature)
        .map_err(|_| SignatureError::MalformedSignature)?;
    key.verify(data, &signature).map_err(|_| SignatureError::Invalid)
}

/// Verify `signature` against the canonical bytes of `message`.
pub fn verify_signature(signature: &Signature, message: &Message) -> Result<(), SignatureError> {
    match signature.scheme.as_str() {
        ED25519 => verify_ed25519(&signature.public_key, &message.encode()?, &signature.bytes),
        other => Err(SignatureError::UnsupportedScheme(other.to_string())),
    }
}
