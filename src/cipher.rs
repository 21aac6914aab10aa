//! Multi-recipient envelope cipher.
//!
//! Output layout: `Envelope TLV || body`. The body is AES-256-GCM under a
//! random content key (CEK), in whole-stream or chunk mode, with the encoded
//! Envelope as associated data. Every recipient entry wraps the same CEK.

use std::io::{Read, Write};

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::aead::{nonce, random_bytes};
use crate::config::{ContentMode, MAX_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::keys::{PrivateKey, PublicKey};
use crate::recipient;
use crate::stream;
use crate::wire::{
    self, ContentInfo, CustomParams, Envelope, ParamValue, RecipientInfo, AES_KEY_BYTES, NONCE_BYTES,
};

/// What unlocks an envelope.
#[derive(Clone, Copy, Debug)]
pub enum Credential<'a> {
    Key(&'a PrivateKey),
    Password(&'a [u8]),
}

#[derive(Debug)]
pub struct Decrypted {
    pub plaintext: Vec<u8>,
    pub custom_params: CustomParams,
}

/// Builder for one envelope. Each instance holds a fresh CEK and nonce and
/// is consumed by `encrypt`/`encrypt_stream`.
pub struct EnvelopeCipher {
    cek: Zeroizing<[u8; AES_KEY_BYTES]>,
    nonce: [u8; NONCE_BYTES],
    mode: ContentMode,
    recipients: Vec<RecipientInfo>,
    custom_params: CustomParams,
}

impl EnvelopeCipher {
    pub fn new(mode: ContentMode) -> Result<Self> {
        if let ContentMode::Chunked { chunk_size } = mode {
            if !(1..=MAX_CHUNK_SIZE).contains(&chunk_size) {
                return Err(Error::InvalidParameter("chunk size out of range"));
            }
        }
        Ok(Self {
            cek: Zeroizing::new(random_bytes()?),
            nonce: nonce()?,
            mode,
            recipients: Vec::new(),
            custom_params: CustomParams::new(),
        })
    }

    pub fn add_key_recipient(&mut self, key: &PublicKey) -> Result<&mut Self> {
        let info = recipient::wrap_for_public_key(&self.cek[..], key)?;
        self.recipients.push(RecipientInfo::PublicKey(info));
        Ok(self)
    }

    pub fn add_password_recipient(&mut self, password: &[u8], iterations: u32) -> Result<&mut Self> {
        let info = recipient::wrap_with_password(&self.cek[..], password, iterations)?;
        self.recipients.push(RecipientInfo::Password(info));
        Ok(self)
    }

    /// Custom params are authenticated with the body but not encrypted.
    pub fn set_param(&mut self, key: impl Into<String>, value: ParamValue) -> &mut Self {
        self.custom_params.insert(key.into(), value);
        self
    }

    fn header(&self) -> Result<Vec<u8>> {
        if self.recipients.is_empty() {
            return Err(Error::InvalidParameter("envelope needs at least one recipient"));
        }
        let envelope = Envelope {
            recipients: self.recipients.clone(),
            content: ContentInfo {
                nonce: self.nonce,
                mode: self.mode,
            },
            custom_params: self.custom_params.clone(),
        };
        let bytes = envelope.encode();
        // Anything larger would be refused by `wire::read_envelope`.
        if bytes.len() > wire::MAX_ENVELOPE_BYTES {
            return Err(Error::InvalidParameter("envelope header too large"));
        }
        tracing::debug!(
            recipients = self.recipients.len(),
            params = self.custom_params.len(),
            mode = ?self.mode,
            header_len = bytes.len(),
            "sealing envelope"
        );
        Ok(bytes)
    }

    pub fn encrypt(self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(plaintext.len() + 512);
        self.encrypt_stream(&mut &plaintext[..], &mut out)?;
        Ok(out)
    }

    pub fn encrypt_stream<R: Read, W: Write>(self, reader: &mut R, writer: &mut W) -> Result<()> {
        let header = self.header()?;
        writer.write_all(&header)?;
        let content = ContentInfo {
            nonce: self.nonce,
            mode: self.mode,
        };
        seal_body(&self.cek, &content, &header, reader, writer)
    }
}

fn seal_body<R: Read, W: Write>(
    cek: &[u8; AES_KEY_BYTES],
    content: &ContentInfo,
    header: &[u8],
    reader: &mut R,
    writer: &mut W,
) -> Result<()> {
    match content.mode {
        ContentMode::Stream => stream::seal_stream(cek, &content.nonce, header, reader, writer),
        ContentMode::Chunked { chunk_size } => {
            stream::encrypt_chunked(cek, &content.nonce, header, chunk_size as usize, reader, writer)
        }
    }
}

fn open_body<R: Read, W: Write>(
    cek: &[u8; AES_KEY_BYTES],
    content: &ContentInfo,
    header: &[u8],
    reader: &mut R,
    writer: &mut W,
) -> Result<()> {
    match content.mode {
        ContentMode::Stream => stream::open_stream(cek, &content.nonce, header, reader, writer),
        ContentMode::Chunked { chunk_size } => {
            stream::decrypt_chunked(cek, &content.nonce, header, chunk_size as usize, reader, writer)
        }
    }
}

// ---------------------------------------------------------------------------
// Decryption
// ---------------------------------------------------------------------------

fn cek_from(secret: Zeroizing<Vec<u8>>) -> Option<Zeroizing<[u8; AES_KEY_BYTES]>> {
    let bytes: &[u8; AES_KEY_BYTES] = secret[..].try_into().ok()?;
    Some(Zeroizing::new(*bytes))
}

/// Find the recipient entry the credential unlocks and recover the CEK.
///
/// Every miss, whether no entry matched or an entry failed to unwrap, ends
/// as [`Error::RecipientNotFound`].
pub fn unlock(envelope: &Envelope, credential: Credential<'_>) -> Result<Zeroizing<[u8; AES_KEY_BYTES]>> {
    for (index, info) in envelope.recipients.iter().enumerate() {
        let unwrapped = match (info, credential) {
            (RecipientInfo::PublicKey(r), Credential::Key(key)) => {
                let rid = key.receiver_id().as_bytes();
                if !bool::from(r.recipient_id[..].ct_eq(rid)) {
                    continue;
                }
                recipient::unwrap_with_private_key(r, key)
            }
            (RecipientInfo::Password(p), Credential::Password(password)) => {
                recipient::unwrap_with_password(p, password)
            }
            _ => continue,
        };
        match unwrapped.ok().and_then(cek_from) {
            Some(cek) => return Ok(cek),
            None => tracing::debug!(index, "recipient entry did not unwrap"),
        }
    }
    tracing::debug!(recipients = envelope.recipients.len(), "no recipient matched");
    Err(Error::RecipientNotFound)
}

/// Decrypt a complete envelope held in memory.
pub fn open(data: &[u8], credential: Credential<'_>) -> Result<Decrypted> {
    let (envelope, used) = wire::decode(data)?;
    let header = &data[..used];
    let cek = unlock(&envelope, credential)?;
    tracing::debug!(mode = ?envelope.content.mode, "opening envelope");

    let mut plaintext = Vec::with_capacity(data.len() - used);
    open_body(&cek, &envelope.content, header, &mut &data[used..], &mut plaintext)?;
    Ok(Decrypted {
        plaintext,
        custom_params: envelope.custom_params,
    })
}

/// Decrypt an envelope from `reader` into `writer`.
///
/// Plaintext is written as it is authenticated chunk by chunk (or, in
/// whole-stream mode, before the final tag is checked); on error the caller
/// must discard what was written.
pub fn open_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    credential: Credential<'_>,
) -> Result<CustomParams> {
    let (envelope, header) = wire::read_envelope(reader)?;
    let cek = unlock(&envelope, credential)?;
    tracing::debug!(mode = ?envelope.content.mode, "opening envelope stream");
    open_body(&cek, &envelope.content, &header, reader, writer)?;
    Ok(envelope.custom_params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FingerprintAlgorithm, MAX_PASSWORD_ITERATIONS, MIN_PASSWORD_ITERATIONS};
    use crate::keys::{KeyAlgorithm, Keypair};

    fn keypair() -> Keypair {
        Keypair::generate(KeyAlgorithm::Ed25519, FingerprintAlgorithm::Sha512Truncated).unwrap()
    }

    #[test]
    fn test_every_recipient_can_open() {
        let (a, b) = (keypair(), keypair());
        let mut cipher = EnvelopeCipher::new(ContentMode::Stream).unwrap();
        cipher.add_key_recipient(&a.public_key).unwrap();
        cipher.add_key_recipient(&b.public_key).unwrap();
        cipher.add_password_recipient(b"pw", MIN_PASSWORD_ITERATIONS).unwrap();
        let ct = cipher.encrypt(b"shared").unwrap();

        for cred in [
            Credential::Key(&a.private_key),
            Credential::Key(&b.private_key),
            Credential::Password(b"pw"),
        ] {
            assert_eq!(open(&ct, cred).unwrap().plaintext, b"shared");
        }
        assert!(matches!(open(&ct, Credential::Password(b"nope")), Err(Error::RecipientNotFound)));
        assert!(matches!(
            open(&ct, Credential::Key(&keypair().private_key)),
            Err(Error::RecipientNotFound)
        ));
    }

    #[test]
    fn test_no_recipients_refused() {
        let cipher = EnvelopeCipher::new(ContentMode::Stream).unwrap();
        assert!(matches!(cipher.encrypt(b"x"), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_params_travel_with_envelope() {
        let kp = keypair();
        let mut cipher = EnvelopeCipher::new(ContentMode::chunked()).unwrap();
        cipher.add_key_recipient(&kp.public_key).unwrap();
        cipher.set_param("n", ParamValue::Int(7));
        let ct = cipher.encrypt(b"body").unwrap();
        let out = open(&ct, Credential::Key(&kp.private_key)).unwrap();
        assert_eq!(out.custom_params.get("n"), Some(&ParamValue::Int(7)));
    }

    #[test]
    fn test_header_is_authenticated() {
        let kp = keypair();
        let mut cipher = EnvelopeCipher::new(ContentMode::Stream).unwrap();
        cipher.add_key_recipient(&kp.public_key).unwrap();
        cipher.set_param("label", ParamValue::Str("aaaa".into()));
        let mut ct = cipher.encrypt(b"body").unwrap();
        let pos = ct.windows(4).position(|w| w == b"aaaa").unwrap();
        ct[pos] = b'b';
        assert!(matches!(open(&ct, Credential::Key(&kp.private_key)), Err(Error::TagMismatch)));
    }

    #[test]
    fn test_open_stream_chunked() {
        let kp = keypair();
        let mut cipher = EnvelopeCipher::new(ContentMode::chunked()).unwrap();
        cipher.add_key_recipient(&kp.public_key).unwrap();
        let ct = cipher.encrypt(&[1u8; 5000]).unwrap();
        let mut out = Vec::new();
        open_stream(&mut &ct[..], &mut out, Credential::Key(&kp.private_key)).unwrap();
        assert_eq!(out, vec![1u8; 5000]);
    }

    #[test]
    fn test_chunk_size_bounds() {
        for chunk_size in [0, MAX_CHUNK_SIZE + 1, u32::MAX] {
            assert!(matches!(
                EnvelopeCipher::new(ContentMode::Chunked { chunk_size }),
                Err(Error::InvalidParameter(_))
            ));
        }
        for chunk_size in [1, MAX_CHUNK_SIZE] {
            assert!(EnvelopeCipher::new(ContentMode::Chunked { chunk_size }).is_ok());
        }
    }

    #[test]
    fn test_smallest_chunk_size_roundtrip() {
        let kp = keypair();
        let mut cipher = EnvelopeCipher::new(ContentMode::Chunked { chunk_size: 1 }).unwrap();
        cipher.add_key_recipient(&kp.public_key).unwrap();
        let ct = cipher.encrypt(b"abc").unwrap();
        assert_eq!(open(&ct, Credential::Key(&kp.private_key)).unwrap().plaintext, b"abc");
    }

    #[test]
    fn test_password_iterations_above_maximum_refused() {
        let mut cipher = EnvelopeCipher::new(ContentMode::Stream).unwrap();
        assert!(matches!(
            cipher.add_password_recipient(b"pw", MAX_PASSWORD_ITERATIONS + 1),
            Err(Error::InvalidParameter(_))
        ));
        assert!(cipher.add_password_recipient(b"pw", MIN_PASSWORD_ITERATIONS).is_ok());
    }

    #[test]
    fn test_oversized_header_refused() {
        let kp = keypair();
        let mut cipher = EnvelopeCipher::new(ContentMode::Stream).unwrap();
        cipher.add_key_recipient(&kp.public_key).unwrap();
        cipher.set_param("blob", ParamValue::Bytes(vec![0; 2 * wire::MAX_ENVELOPE_BYTES]));
        let mut out = Vec::new();
        let result = cipher.encrypt_stream(&mut &b"body"[..], &mut out);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_large_header_opens_both_ways() {
        let kp = keypair();
        let mut cipher = EnvelopeCipher::new(ContentMode::Stream).unwrap();
        cipher.add_key_recipient(&kp.public_key).unwrap();
        cipher.set_param("blob", ParamValue::Bytes(vec![0xAB; wire::MAX_ENVELOPE_BYTES / 2]));
        let ct = cipher.encrypt(b"body").unwrap();

        assert_eq!(open(&ct, Credential::Key(&kp.private_key)).unwrap().plaintext, b"body");
        let mut out = Vec::new();
        open_stream(&mut &ct[..], &mut out, Credential::Key(&kp.private_key)).unwrap();
        assert_eq!(out, b"body");
    }
}
