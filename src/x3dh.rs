//! X3DH key agreement
//!
//! ```text
//! DH1 = DH(IC_a, LTC_b)
//! DH2 = DH(EK_a, IC_b)
//! DH3 = DH(EK_a, LTC_b)
//! DH4 = DH(EK_a, OTC_b)          only when a one-time key is used
//! SK  = HKDF-SHA256(salt = none, ikm = DH1 || DH2 || DH3 [|| DH4], info = "")[0..64]
//! ```
//!
//! The responder evaluates the same products with the operands swapped.
//! Whether a one-time key takes part is not signalled anywhere: if only
//! one side supplies it the two secrets silently differ, and the first
//! message fails to decrypt.

use core::fmt;

use zeroize::Zeroizing;

use crate::agreement::diffie_hellman;
use crate::error::{Error, Result};
use crate::kdf::hkdf_sha256;
use crate::keys::{KeyAlgorithm, PrivateKey, PublicKey};

pub const SHARED_SECRET_BYTES: usize = 64;

const DH_BYTES: usize = 32;

/// 64-byte X3DH output.
pub struct SharedSecret(Zeroizing<[u8; SHARED_SECRET_BYTES]>);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_BYTES] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

fn require_identity_private(key: &PrivateKey) -> Result<()> {
    match key.algorithm() {
        KeyAlgorithm::Ed25519 => Ok(()),
        KeyAlgorithm::X25519 => Err(Error::UnsupportedKeyType),
    }
}

fn require_identity_public(key: &PublicKey) -> Result<()> {
    match key.algorithm() {
        KeyAlgorithm::Ed25519 => Ok(()),
        KeyAlgorithm::X25519 => Err(Error::UnsupportedKeyType),
    }
}

fn dh(secret: &PrivateKey, public: &PublicKey) -> Result<Zeroizing<[u8; DH_BYTES]>> {
    diffie_hellman(&secret.agreement_secret(), &public.agreement_public())
}

fn derive(products: &[Zeroizing<[u8; DH_BYTES]>]) -> Result<SharedSecret> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(products.len() * DH_BYTES));
    for p in products {
        ikm.extend_from_slice(&p[..]);
    }
    let mut out = Zeroizing::new([0u8; SHARED_SECRET_BYTES]);
    hkdf_sha256(&ikm, None, b"", &mut out[..])?;
    Ok(SharedSecret(out))
}

/// Initiator side.
pub fn initiate(
    ic_a: &PrivateKey,
    ek_a: &PrivateKey,
    ic_b: &PublicKey,
    ltc_b: &PublicKey,
    otc_b: Option<&PublicKey>,
) -> Result<SharedSecret> {
    require_identity_private(ic_a)?;
    require_identity_public(ic_b)?;

    let mut products = vec![dh(ic_a, ltc_b)?, dh(ek_a, ic_b)?, dh(ek_a, ltc_b)?];
    if let Some(otc) = otc_b {
        products.push(dh(ek_a, otc)?);
    }
    tracing::debug!(one_time_key = otc_b.is_some(), "x3dh initiated");
    derive(&products)
}

/// Responder side.
pub fn respond(
    ic_a: &PublicKey,
    ek_a: &PublicKey,
    ic_b: &PrivateKey,
    ltc_b: &PrivateKey,
    otc_b: Option<&PrivateKey>,
) -> Result<SharedSecret> {
    require_identity_public(ic_a)?;
    require_identity_private(ic_b)?;

    let mut products = vec![dh(ltc_b, ic_a)?, dh(ic_b, ek_a)?, dh(ltc_b, ek_a)?];
    if let Some(otc) = otc_b {
        products.push(dh(otc, ek_a)?);
    }
    tracing::debug!(one_time_key = otc_b.is_some(), "x3dh responded");
    derive(&products)
}
