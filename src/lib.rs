//! # hybrid-envelope
//!
//! Multi-recipient envelope encryption, detached signatures and
//! forward-secure sessions.
//!
//! ## Quick Start
//!
//! ```rust
//! use hybrid_envelope::Crypto;
//!
//! let crypto = Crypto::default();
//! let alice = crypto.generate_keypair().unwrap();
//! let bob = crypto.generate_keypair().unwrap();
//!
//! let ct = crypto
//!     .sign_then_encrypt(b"secret", &alice.private_key, &[bob.public_key.clone()])
//!     .unwrap();
//! let pt = crypto
//!     .decrypt_then_verify(&ct, &bob.private_key, &[alice.public_key])
//!     .unwrap();
//!
//! assert_eq!(pt, b"secret");
//! ```
//!
//! ## Layout of an encrypted message
//!
//! A DER envelope (recipients, content cipher parameters, custom params)
//! followed by the AES-256-GCM body. The body's associated data is the
//! encoded envelope, so no header byte can change without the body failing
//! to authenticate.
//!
//! - **Key recipients**: X25519 agreement (Ed25519 keys are converted),
//!   KDF2-SHA384, AES-256-CBC key wrap, HMAC-SHA384
//! - **Password recipients**: PBKDF2-HMAC-SHA384, same wrap
//! - **Body**: one GCM context over the whole stream, or independently
//!   sealed chunks with counter-derived nonces
//!
//! ## Sessions
//!
//! [`x3dh`] derives a 64-byte secret from identity, long-term and optional
//! one-time keys; [`PfsSession`] turns it into two directional keys and
//! encrypts each message under keys derived from a fresh salt.
//!
//! ## What's NOT Provided
//!
//! - Card publication, lookup or revocation
//! - Key storage
//! - Replay or salt-reuse tracking for sessions

#![deny(unsafe_code)]

pub mod config;
pub mod der;
pub mod error;
pub mod oid;
pub mod wire;

mod aead;
mod agreement;
mod kdf;
mod recipient;

pub mod cipher;
pub mod engine;
pub mod keys;
pub mod pfs;
pub mod sign;
pub mod stream;
pub mod x3dh;

pub use cipher::{Credential, Decrypted, EnvelopeCipher};
pub use config::{ContentMode, CryptoConfig, FingerprintAlgorithm, HashAlgorithm};
pub use engine::{Crypto, SIGNATURE_PARAM, SIGNER_ID_PARAM};
pub use error::{DecodeError, Error, Result};
pub use keys::{KeyAlgorithm, Keypair, PrivateKey, PublicKey, ReceiverId};
pub use pfs::{PfsSession, SealedMessage};
pub use wire::{CustomParams, ParamValue};
pub use x3dh::SharedSecret;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
