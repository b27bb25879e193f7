//! # arbor-core
//!
//! Shared data model for the Arbor causal log.
//!
//! This crate provides:
//! - SHA-256 content hashing for messages and Merkle nodes
//! - The identifier codec: `(clock, hash)` encoded so byte order is causal-then-hash order
//! - The `Message` / `Signature` records and their canonical encoding
//! - The `Signer` capability (with an Ed25519 implementation) and the `Validator` capability
//!
//! ## Example
//!
//! ```rust
//! use arbor_core::{Message, MessageId};
//!
//! let message = Message::new("com.example.chat", 1, vec![], b"hello".to_vec());
//! let id = MessageId::for_message(None, &message).unwrap();
//!
//! assert_eq!(id.clock(), 1);
//! assert_eq!(id.to_string().parse::<MessageId>().unwrap(), id);
//! ```

mod error;
mod hash;
mod id;
mod message;
mod signer;
mod validator;

pub use error::{CodecError, SignatureError};
pub use hash::{Hash, Hasher};
pub use id::{MessageId, HASH_PREFIX_MIN, ID_LENGTH};
pub use message::{Message, Signature};
pub use signer::{verify_ed25519, verify_signature, Ed25519Signer, Signer, ED25519};
pub use validator::{AcceptAll, Validator};
