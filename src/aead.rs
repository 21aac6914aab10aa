//! AEAD: AES-256-GCM
//!
//! One-shot seal/open for small messages, plus an incremental context for
//! bodies that are streamed. The incremental form produces exactly the bytes
//! the one-shot form does for the same key, nonce and associated data.
//!
//! GCM layout (96-bit nonce):
//!   J0   = nonce || 0x00000001
//!   body = CTR32 keystream starting at J0 + 1
//!   tag  = GHASH_H(ad, body) XOR E_K(J0)

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit as _, KeyIvInit, StreamCipher};
use aes::Aes256;
use aes_gcm::{
    aead::{Aead, Payload},
    Aes256Gcm, Nonce,
};
use getrandom::getrandom;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::wire::{AEAD_TAG_BYTES, AES_KEY_BYTES, NONCE_BYTES};

type Aes256Ctr = ctr::Ctr32BE<Aes256>;

/// Longest body one GCM context may cover: 2^32 - 2 counter blocks.
pub const GCM_MAX_BYTES: u64 = (1 << 36) - 32;

/// Fill a fresh array from the OS random source.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    getrandom(&mut out).map_err(|_| Error::RandomSource)?;
    Ok(out)
}

/// Generate a random 12-byte nonce. Used during encryption only.
pub fn nonce() -> Result<[u8; NONCE_BYTES]> {
    random_bytes()
}

pub fn aead_seal(
    key: &[u8; AES_KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| Error::InvalidKey("aes key length"))?;
    let n = Nonce::from_slice(nonce);
    let payload = Payload { msg: plaintext, aad };
    cipher.encrypt(n, payload).map_err(|_| Error::InvalidParameter("aead input too long"))
}

/// Any failure, including a short ciphertext, is a tag mismatch.
pub fn aead_open(
    key: &[u8; AES_KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| Error::TagMismatch)?;
    let n = Nonce::from_slice(nonce);
    let payload = Payload { msg: ciphertext, aad };
    cipher.decrypt(n, payload).map_err(|_| Error::TagMismatch)
}

// ---------------------------------------------------------------------------
// Incremental GCM
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Seal,
    Open,
}

/// Encrypt-update/encrypt-final GCM context.
///
/// `update` transforms bytes in place; `finalize` yields the tag (sealing)
/// and `verify` checks it (opening). On the open side the caller must treat
/// everything `update` produced as untrusted until `verify` succeeds.
pub struct GcmStream {
    ctr: Aes256Ctr,
    ghash: GHash,
    tag_mask: [u8; 16],
    pending: [u8; 16],
    pending_len: usize,
    ad_len: u64,
    ct_len: u64,
    direction: Direction,
}

impl GcmStream {
    pub fn seal(key: &[u8; AES_KEY_BYTES], nonce: &[u8; NONCE_BYTES], ad: &[u8]) -> Self {
        Self::new(key, nonce, ad, Direction::Seal)
    }

    pub fn open(key: &[u8; AES_KEY_BYTES], nonce: &[u8; NONCE_BYTES], ad: &[u8]) -> Self {
        Self::new(key, nonce, ad, Direction::Open)
    }

    fn new(key: &[u8; AES_KEY_BYTES], nonce: &[u8; NONCE_BYTES], ad: &[u8], direction: Direction) -> Self {
        let key = GenericArray::from_slice(key);
        let block_cipher = Aes256::new(key);

        let mut h = GenericArray::default();
        block_cipher.encrypt_block(&mut h);

        let mut j0 = [0u8; 16];
        j0[..NONCE_BYTES].copy_from_slice(nonce);
        j0[15] = 1;
        let mut tag_mask = GenericArray::clone_from_slice(&j0);
        block_cipher.encrypt_block(&mut tag_mask);

        let mut counter = j0;
        counter[15] = 2;
        let ctr = Aes256Ctr::new(key, GenericArray::from_slice(&counter));

        let mut ghash = GHash::new(&h);
        ghash.update_padded(ad);

        Self {
            ctr,
            ghash,
            tag_mask: tag_mask.into(),
            pending: [0u8; 16],
            pending_len: 0,
            ad_len: ad.len() as u64,
            ct_len: 0,
            direction,
        }
    }

    /// Encrypt (seal) or decrypt (open) `buf` in place.
    ///
    /// Fails without touching `buf` once the body would pass
    /// [`GCM_MAX_BYTES`].
    pub fn update(&mut self, buf: &mut [u8]) -> Result<()> {
        let ct_len = self
            .ct_len
            .checked_add(buf.len() as u64)
            .filter(|n| *n <= GCM_MAX_BYTES)
            .ok_or(Error::InvalidParameter("gcm body too long"))?;
        if self.direction == Direction::Open {
            self.absorb(buf);
            self.apply_keystream(buf)?;
        } else {
            self.apply_keystream(buf)?;
            self.absorb(buf);
        }
        self.ct_len = ct_len;
        Ok(())
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ctr
            .try_apply_keystream(buf)
            .map_err(|_| Error::InvalidParameter("gcm body too long"))
    }

    /// Feed ciphertext to GHASH in whole blocks, carrying partial blocks over.
    fn absorb(&mut self, mut data: &[u8]) {
        if self.pending_len > 0 {
            let take = (16 - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len < 16 {
                return;
            }
            let block = GenericArray::clone_from_slice(&self.pending);
            self.ghash.update(&[block]);
            self.pending_len = 0;
        }
        let whole = data.len() - data.len() % 16;
        for chunk in data[..whole].chunks_exact(16) {
            self.ghash.update(&[GenericArray::clone_from_slice(chunk)]);
        }
        let rest = &data[whole..];
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    fn tag(mut self) -> [u8; AEAD_TAG_BYTES] {
        self.ghash.update_padded(&self.pending[..self.pending_len]);
        let mut lengths = [0u8; 16];
        lengths[..8].copy_from_slice(&(self.ad_len * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&(self.ct_len * 8).to_be_bytes());
        self.ghash.update(&[GenericArray::clone_from_slice(&lengths)]);
        let mut tag: [u8; AEAD_TAG_BYTES] = self.ghash.finalize().into();
        for (t, m) in tag.iter_mut().zip(self.tag_mask.iter()) {
            *t ^= m;
        }
        tag
    }

    pub fn finalize(self) -> [u8; AEAD_TAG_BYTES] {
        self.tag()
    }

    /// Constant-time comparison against the received tag.
    pub fn verify(self, received: &[u8]) -> Result<()> {
        let expected = self.tag();
        if received.len() != AEAD_TAG_BYTES || !bool::from(expected[..].ct_eq(received)) {
            return Err(Error::TagMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];
    const NONCE: [u8; 12] = [0x24; 12];

    fn incremental_seal(pt: &[u8], ad: &[u8], split: usize) -> Vec<u8> {
        let mut ctx = GcmStream::seal(&KEY, &NONCE, ad);
        let mut out = pt.to_vec();
        for chunk in out.chunks_mut(split.max(1)) {
            ctx.update(chunk).unwrap();
        }
        out.extend_from_slice(&ctx.finalize());
        out
    }

    #[test]
    fn test_roundtrip() {
        let ct = aead_seal(&KEY, &NONCE, b"hello", b"ad").unwrap();
        assert_eq!(aead_open(&KEY, &NONCE, &ct, b"ad").unwrap(), b"hello");
    }

    #[test]
    fn test_open_short_ciphertext() {
        assert!(matches!(aead_open(&KEY, &NONCE, &[0u8; 15], b""), Err(Error::TagMismatch)));
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let pt: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let ad = b"associated data that is longer than one block";
        let expected = aead_seal(&KEY, &NONCE, &pt, ad).unwrap();
        for split in [1, 5, 15, 16, 17, 64, 999, 1000, 4096] {
            assert_eq!(incremental_seal(&pt, ad, split), expected, "split {split}");
        }
    }

    #[test]
    fn test_incremental_empty() {
        let expected = aead_seal(&KEY, &NONCE, b"", b"").unwrap();
        assert_eq!(incremental_seal(b"", b"", 16), expected);
    }

    #[test]
    fn test_incremental_open() {
        let pt = vec![0x5Au8; 333];
        let ct = aead_seal(&KEY, &NONCE, &pt, b"x").unwrap();
        let (body, tag) = ct.split_at(ct.len() - 16);

        let mut ctx = GcmStream::open(&KEY, &NONCE, b"x");
        let mut out = body.to_vec();
        for chunk in out.chunks_mut(50) {
            ctx.update(chunk).unwrap();
        }
        ctx.verify(tag).unwrap();
        assert_eq!(out, pt);
    }

    #[test]
    fn test_incremental_open_rejects_bad_tag() {
        let ct = aead_seal(&KEY, &NONCE, b"payload", b"").unwrap();
        let (body, tag) = ct.split_at(ct.len() - 16);
        let mut bad = tag.to_vec();
        bad[0] ^= 1;
        let mut ctx = GcmStream::open(&KEY, &NONCE, b"");
        let mut out = body.to_vec();
        ctx.update(&mut out).unwrap();
        assert!(matches!(ctx.verify(&bad), Err(Error::TagMismatch)));
    }

    #[test]
    fn test_body_length_limit() {
        for mut ctx in [GcmStream::seal(&KEY, &NONCE, b""), GcmStream::open(&KEY, &NONCE, b"")] {
            ctx.ct_len = GCM_MAX_BYTES - 16;
            let mut over = [0x11u8; 17];
            assert!(matches!(ctx.update(&mut over), Err(Error::InvalidParameter(_))));
            assert_eq!(over, [0x11u8; 17]);
        }
    }

    #[test]
    fn test_limit_matches_counter_space() {
        // Counter blocks 2..=u32::MAX carry the body.
        assert_eq!(GCM_MAX_BYTES, (u64::from(u32::MAX) - 1) * 16);
    }
}
