//! X25519 key agreement, including Ed25519 keys used for agreement.
//!
//! An Ed25519 secret maps to the X25519 scalar taken from the lower half of
//! SHA-512(seed) (the same scalar Ed25519 signs with). An Ed25519 public
//! point maps to its Montgomery u-coordinate, u = (1 + y) / (1 - y). The
//! u-coordinate does not depend on the sign of x, so a point and its
//! negation convert to the same X25519 key.

use ed25519_dalek::{SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Convert an Ed25519 signing key into the X25519 secret for the same scalar.
///
/// The bytes are unclamped; X25519 clamps them on every use.
pub fn ed25519_secret_to_x25519(key: &SigningKey) -> StaticSecret {
    let scalar = Zeroizing::new(key.to_scalar_bytes());
    StaticSecret::from(*scalar)
}

/// Convert an Ed25519 public key to the matching X25519 public key.
pub fn ed25519_public_to_x25519(key: &VerifyingKey) -> X25519Public {
    X25519Public::from(key.to_montgomery().to_bytes())
}

/// X25519 Diffie-Hellman that refuses low-order peer points.
pub fn diffie_hellman(secret: &StaticSecret, public: &X25519Public) -> Result<Zeroizing<[u8; 32]>> {
    let shared = secret.diffie_hellman(public);
    if !shared.was_contributory() {
        return Err(Error::InvalidKey("non-contributory agreement"));
    }
    Ok(Zeroizing::new(*shared.as_bytes()))
}
