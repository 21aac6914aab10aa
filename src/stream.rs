//! Streaming content encryption.
//!
//! Whole-stream mode: one AES-256-GCM context over the entire body; the
//! 16-byte tag trails the ciphertext.
//!
//! Chunk mode: the plaintext is cut into `chunk_size` pieces and each piece
//! is sealed on its own:
//!   nonce_i = base_nonce XOR BE96(i)
//!   chunk_i = AES-256-GCM(key, nonce_i, ad, piece_i)   (len + 16 bytes)
//! Only the last chunk may be short. There is no end marker, so a body cut
//! exactly at a chunk boundary opens as a shorter plaintext.
//!
//! In both modes plaintext is written as soon as it is produced. If an
//! operation fails, whatever reached the writer must be discarded.

use std::io::{ErrorKind, Read, Write};

use crate::aead::{aead_open, aead_seal, GcmStream};
use crate::error::{Error, Result};
use crate::wire::{AEAD_TAG_BYTES, AES_KEY_BYTES, NONCE_BYTES};

const BUFFER_BYTES: usize = 64 * 1024;

/// Read until `buf` is full or the reader reports end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// Whole-stream mode
// ---------------------------------------------------------------------------

pub fn seal_stream<R: Read, W: Write>(
    key: &[u8; AES_KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    ad: &[u8],
    reader: &mut R,
    writer: &mut W,
) -> Result<()> {
    let mut ctx = GcmStream::seal(key, nonce, ad);
    let mut buf = vec![0u8; BUFFER_BYTES];
    loop {
        let n = read_full(reader, &mut buf)?;
        ctx.update(&mut buf[..n])?;
        writer.write_all(&buf[..n])?;
        if n < buf.len() {
            break;
        }
    }
    writer.write_all(&ctx.finalize())?;
    Ok(())
}

/// The final 16 bytes of the input are the tag; fewer than 16 bytes in
/// total is [`Error::TruncatedCiphertext`].
pub fn open_stream<R: Read, W: Write>(
    key: &[u8; AES_KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    ad: &[u8],
    reader: &mut R,
    writer: &mut W,
) -> Result<()> {
    let mut ctx = GcmStream::open(key, nonce, ad);
    let mut buf = vec![0u8; BUFFER_BYTES + AEAD_TAG_BYTES];
    // Bytes at the front of `buf` that may still turn out to be the tag.
    let mut held = 0;
    loop {
        let n = read_full(reader, &mut buf[held..])?;
        let available = held + n;
        if available > AEAD_TAG_BYTES {
            let ready = available - AEAD_TAG_BYTES;
            ctx.update(&mut buf[..ready])?;
            writer.write_all(&buf[..ready])?;
            buf.copy_within(ready..available, 0);
            held = AEAD_TAG_BYTES;
        } else {
            held = available;
        }
        if available < buf.len() {
            break;
        }
    }
    if held < AEAD_TAG_BYTES {
        return Err(Error::TruncatedCiphertext);
    }
    ctx.verify(&buf[..AEAD_TAG_BYTES])
}

// ---------------------------------------------------------------------------
// Chunk mode
// ---------------------------------------------------------------------------

/// Big-endian increment, wrapping to zero after the all-ones value.
pub fn increment(counter: &mut [u8; NONCE_BYTES]) {
    for b in counter.iter_mut().rev() {
        *b = b.wrapping_add(1);
        if *b != 0 {
            break;
        }
    }
}

pub fn chunk_nonce(base: &[u8; NONCE_BYTES], counter: &[u8; NONCE_BYTES]) -> [u8; NONCE_BYTES] {
    let mut nonce = *base;
    for (n, c) in nonce.iter_mut().zip(counter.iter()) {
        *n ^= c;
    }
    nonce
}

fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::InvalidParameter("chunk size must be at least 1"));
    }
    Ok(())
}

pub fn encrypt_chunked<R: Read, W: Write>(
    key: &[u8; AES_KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    ad: &[u8],
    chunk_size: usize,
    reader: &mut R,
    writer: &mut W,
) -> Result<()> {
    check_chunk_size(chunk_size)?;
    let mut buf = vec![0u8; chunk_size];
    let mut counter = [0u8; NONCE_BYTES];
    let mut index: u64 = 0;
    loop {
        let n = read_full(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        let sealed = aead_seal(key, &chunk_nonce(nonce, &counter), &buf[..n], ad)?;
        writer.write_all(&sealed)?;
        tracing::trace!(chunk = index, len = n, "sealed chunk");
        increment(&mut counter);
        index += 1;
        if n < chunk_size {
            break;
        }
    }
    Ok(())
}

pub fn decrypt_chunked<R: Read, W: Write>(
    key: &[u8; AES_KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    ad: &[u8],
    chunk_size: usize,
    reader: &mut R,
    writer: &mut W,
) -> Result<()> {
    check_chunk_size(chunk_size)?;
    let sealed_size = chunk_size
        .checked_add(AEAD_TAG_BYTES)
        .ok_or(Error::InvalidParameter("chunk size too large"))?;
    let mut buf = vec![0u8; sealed_size];
    let mut counter = [0u8; NONCE_BYTES];
    let mut index: u64 = 0;
    loop {
        let n = read_full(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        if n < AEAD_TAG_BYTES {
            return Err(Error::TruncatedCiphertext);
        }
        let plain = aead_open(key, &chunk_nonce(nonce, &counter), &buf[..n], ad)?;
        writer.write_all(&plain)?;
        tracing::trace!(chunk = index, len = plain.len(), "opened chunk");
        increment(&mut counter);
        index += 1;
        if n < sealed_size {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7; 32];
    const NONCE: [u8; 12] = [0xA5; 12];

    fn chunked(pt: &[u8], chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt_chunked(&KEY, &NONCE, b"ad", chunk, &mut &pt[..], &mut out).unwrap();
        out
    }

    #[test]
    fn test_increment_carries() {
        let mut c = [0u8; 12];
        c[11] = 0xFF;
        increment(&mut c);
        assert_eq!(c[10..], [1, 0]);
    }

    #[test]
    fn test_increment_wraps_without_panic() {
        let mut c = [0xFF; 12];
        increment(&mut c);
        assert_eq!(c, [0; 12]);
    }

    #[test]
    fn test_first_chunk_uses_base_nonce() {
        assert_eq!(chunk_nonce(&NONCE, &[0; 12]), NONCE);
        let mut one = [0u8; 12];
        one[11] = 1;
        assert_eq!(chunk_nonce(&NONCE, &one)[11], 0xA4);
    }

    #[test]
    fn test_chunk_sizes_on_wire() {
        let pt = vec![3u8; 250];
        let ct = chunked(&pt, 100);
        assert_eq!(ct.len(), 250 + 3 * 16);
        let exact = chunked(&pt[..200], 100);
        assert_eq!(exact.len(), 200 + 2 * 16);
        assert!(chunked(b"", 100).is_empty());
    }

    #[test]
    fn test_chunked_roundtrip() {
        let pt: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        for chunk in [1, 7, 16, 999, 1000, 1001] {
            let ct = chunked(&pt, chunk);
            let mut out = Vec::new();
            decrypt_chunked(&KEY, &NONCE, b"ad", chunk, &mut &ct[..], &mut out).unwrap();
            assert_eq!(out, pt, "chunk {chunk}");
        }
    }

    #[test]
    fn test_chunk_reorder_detected() {
        let pt = vec![9u8; 200];
        let ct = chunked(&pt, 100);
        let mut swapped = ct[116..].to_vec();
        swapped.extend_from_slice(&ct[..116]);
        let mut out = Vec::new();
        let result = decrypt_chunked(&KEY, &NONCE, b"ad", 100, &mut &swapped[..], &mut out);
        assert!(matches!(result, Err(Error::TagMismatch)));
    }

    #[test]
    fn test_chunk_truncated_below_tag() {
        let ct = chunked(&[1u8; 150], 100);
        let cut = &ct[..116 + 10];
        let mut out = Vec::new();
        let result = decrypt_chunked(&KEY, &NONCE, b"ad", 100, &mut &cut[..], &mut out);
        assert!(matches!(result, Err(Error::TruncatedCiphertext)));
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut out = Vec::new();
        let result = encrypt_chunked(&KEY, &NONCE, b"", 0, &mut &b"x"[..], &mut out);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_stream_roundtrip_and_equivalence() {
        let pt = vec![0x33u8; BUFFER_BYTES * 2 + 17];
        let mut ct = Vec::new();
        seal_stream(&KEY, &NONCE, b"hdr", &mut &pt[..], &mut ct).unwrap();
        assert_eq!(ct, aead_seal(&KEY, &NONCE, &pt, b"hdr").unwrap());

        let mut out = Vec::new();
        open_stream(&KEY, &NONCE, b"hdr", &mut &ct[..], &mut out).unwrap();
        assert_eq!(out, pt);
    }

    #[test]
    fn test_stream_short_input() {
        let mut out = Vec::new();
        let result = open_stream(&KEY, &NONCE, b"", &mut &[0u8; 15][..], &mut out);
        assert!(matches!(result, Err(Error::TruncatedCiphertext)));
    }

    #[test]
    fn test_stream_tamper() {
        let mut ct = Vec::new();
        seal_stream(&KEY, &NONCE, b"", &mut &b"attack at dawn"[..], &mut ct).unwrap();
        ct[3] ^= 0x10;
        let mut out = Vec::new();
        let result = open_stream(&KEY, &NONCE, b"", &mut &ct[..], &mut out);
        assert!(matches!(result, Err(Error::TagMismatch)));
    }
}
