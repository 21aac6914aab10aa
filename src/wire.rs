//! Envelope wire format
//!
//! ```text
//! Envelope ::= SEQUENCE {
//!   version        INTEGER (0),
//!   contentInfo    SEQUENCE { OID envelopedData, [0] EXPLICIT EnvelopedData },
//!   customParams   [0] IMPLICIT SET OF CustomParam OPTIONAL }
//!
//! EnvelopedData ::= SEQUENCE {
//!   version INTEGER (2),
//!   recipientInfos SET,                      -- insertion order kept
//!   encryptedContentInfo SEQUENCE {
//!     OID data,
//!     SEQUENCE { OID aes256-GCM, OCTET STRING nonce
//!                              | SEQUENCE { OCTET STRING nonce, INTEGER chunkSize } } } }
//! ```
//!
//! The encrypted body follows the Envelope TLV directly; the encoded
//! Envelope is the body's associated data.

use std::collections::BTreeMap;
use std::io::Read;

use crate::config::{ContentMode, MAX_CHUNK_SIZE};
use crate::der::{self, Reader, Tag, Tlv, Writer};
use crate::error::DecodeError;
use crate::keys::KeyAlgorithm;
use crate::oid;

type DecodeResult<T> = core::result::Result<T, DecodeError>;

pub const ENVELOPE_VERSION: u64 = 0;
pub const ENVELOPED_DATA_VERSION: u64 = 2;
pub const KEY_RECIPIENT_VERSION: u64 = 2;
pub const PASSWORD_RECIPIENT_VERSION: u64 = 0;
pub const ENCRYPTED_KEY_VERSION: u64 = 0;

/// Context tag of a password recipient (`[3] IMPLICIT`).
pub const PASSWORD_RECIPIENT_TAG: u32 = 3;

// ---------------------------------------------------------------------------
// Component sizes
// ---------------------------------------------------------------------------

pub const NONCE_BYTES: usize = 12;
pub const AEAD_TAG_BYTES: usize = 16;
pub const AES_KEY_BYTES: usize = 32;
pub const CBC_IV_BYTES: usize = 16;
pub const HMAC_TAG_BYTES: usize = 48;
pub const X25519_KEY_BYTES: usize = 32;

/// Upper bound on an encoded envelope header, checked when sealing and when
/// reading from a stream.
pub const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

pub type CustomParams = BTreeMap<String, ParamValue>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentInfo {
    pub nonce: [u8; NONCE_BYTES],
    pub mode: ContentMode,
}

/// Public-key recipient: the CEK wrapped under an ephemeral X25519 agreement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRecipient {
    pub recipient_id: Vec<u8>,
    pub key_algorithm: KeyAlgorithm,
    pub ephemeral_key: [u8; X25519_KEY_BYTES],
    pub iv: [u8; CBC_IV_BYTES],
    pub wrapped_key: Vec<u8>,
    pub tag: [u8; HMAC_TAG_BYTES],
}

/// PBES2 parameters plus the wrapped secret and its HMAC. Used by password
/// recipients and by password-protected private keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordWrap {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub iv: [u8; CBC_IV_BYTES],
    pub wrapped_key: Vec<u8>,
    pub tag: [u8; HMAC_TAG_BYTES],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecipientInfo {
    PublicKey(KeyRecipient),
    Password(PasswordWrap),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub recipients: Vec<RecipientInfo>,
    pub content: ContentInfo,
    pub custom_params: CustomParams,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

impl Envelope {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.sequence(|w| {
            w.integer_u64(ENVELOPE_VERSION);
            w.sequence(|w| {
                w.oid(oid::ENVELOPED_DATA);
                w.explicit(0, |w| {
                    w.sequence(|w| {
                        w.integer_u64(ENVELOPED_DATA_VERSION);
                        w.constructed(Tag::SET, |w| {
                            for r in &self.recipients {
                                encode_recipient(w, r);
                            }
                        });
                        encode_content(w, &self.content);
                    })
                });
            });
            if !self.custom_params.is_empty() {
                encode_params(w, &self.custom_params);
            }
        });
        w.into_bytes()
    }
}

fn encode_recipient(w: &mut Writer, r: &RecipientInfo) {
    match r {
        RecipientInfo::PublicKey(k) => w.sequence(|w| {
            w.integer_u64(KEY_RECIPIENT_VERSION);
            w.explicit(0, |w| w.octet_string(&k.recipient_id));
            w.sequence(|w| w.oid(k.key_algorithm.oid()));
            w.octet_string(&encode_encrypted_key_with_public_key(k));
        }),
        RecipientInfo::Password(p) => {
            w.constructed(Tag::context(PASSWORD_RECIPIENT_TAG, true), |w| {
                w.integer_u64(PASSWORD_RECIPIENT_VERSION);
                encode_password_fields(w, p);
            })
        }
    }
}

fn encode_encrypted_key_with_public_key(k: &KeyRecipient) -> Vec<u8> {
    let mut w = Writer::new();
    w.sequence(|w| {
        w.integer_u64(ENCRYPTED_KEY_VERSION);
        w.sequence(|w| {
            w.sequence(|w| w.oid(oid::X25519));
            w.bit_string(&k.ephemeral_key);
        });
        w.sequence(|w| {
            w.oid(oid::KDF2);
            encode_digest_alg(w, oid::SHA384);
        });
        encode_hmac(w, &k.tag);
        w.sequence(|w| {
            w.sequence(|w| {
                w.oid(oid::AES256_CBC);
                w.octet_string(&k.iv);
            });
            w.octet_string(&k.wrapped_key);
        });
    });
    w.into_bytes()
}

fn encode_password_fields(w: &mut Writer, p: &PasswordWrap) {
    w.sequence(|w| {
        w.oid(oid::PBES2);
        w.sequence(|w| {
            w.sequence(|w| {
                w.oid(oid::PBKDF2);
                w.sequence(|w| {
                    w.octet_string(&p.salt);
                    w.integer_u64(u64::from(p.iterations));
                    w.sequence(|w| w.oid(oid::HMAC_SHA384));
                });
            });
            w.sequence(|w| {
                w.oid(oid::AES256_CBC);
                w.octet_string(&p.iv);
            });
        });
    });
    w.octet_string(&p.wrapped_key);
    encode_hmac(w, &p.tag);
}

fn encode_digest_alg(w: &mut Writer, digest: &[u8]) {
    w.sequence(|w| {
        w.oid(digest);
        w.null();
    });
}

fn encode_hmac(w: &mut Writer, tag: &[u8]) {
    w.sequence(|w| {
        encode_digest_alg(w, oid::SHA384);
        w.octet_string(tag);
    });
}

fn encode_content(w: &mut Writer, c: &ContentInfo) {
    w.sequence(|w| {
        w.oid(oid::DATA);
        w.sequence(|w| {
            w.oid(oid::AES256_GCM);
            match c.mode {
                ContentMode::Stream => w.octet_string(&c.nonce),
                ContentMode::Chunked { chunk_size } => w.sequence(|w| {
                    w.octet_string(&c.nonce);
                    w.integer_u64(u64::from(chunk_size));
                }),
            }
        });
    });
}

fn encode_params(w: &mut Writer, params: &CustomParams) {
    // SET OF members are ordered by their encodings.
    let mut members: Vec<Vec<u8>> = params
        .iter()
        .map(|(k, v)| {
            let mut m = Writer::new();
            m.sequence(|m| {
                m.utf8(k);
                match v {
                    ParamValue::Int(i) => m.explicit(0, |m| m.integer_i64(*i)),
                    ParamValue::Str(s) => m.explicit(1, |m| m.utf8(s)),
                    ParamValue::Bytes(b) => m.explicit(2, |m| m.octet_string(b)),
                }
            });
            m.into_bytes()
        })
        .collect();
    members.sort();
    w.constructed(Tag::context(0, true), |w| {
        for m in &members {
            w.raw(m);
        }
    });
}

/// Encrypted private key: `SEQUENCE { pbes2 AlgorithmIdentifier, OCTET STRING, hmac }`.
pub fn encode_encrypted_key(p: &PasswordWrap) -> Vec<u8> {
    let mut w = Writer::new();
    w.sequence(|w| encode_password_fields(w, p));
    w.into_bytes()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode the envelope at the start of `data`.
///
/// Returns the envelope and the number of bytes it occupied; whatever
/// follows is the encrypted body.
pub fn decode(data: &[u8]) -> DecodeResult<(Envelope, usize)> {
    let mut outer = Reader::new(data);
    let tlv = outer.read_any()?;
    if tlv.tag != Tag::SEQUENCE {
        return Err(DecodeError::Structural("envelope is not a sequence"));
    }
    Ok((decode_envelope_body(tlv.value)?, tlv.raw.len()))
}

/// Read exactly one envelope header from a stream.
///
/// Returns the envelope and its raw encoding (the body's associated data).
pub fn read_envelope<R: Read>(reader: &mut R) -> crate::Result<(Envelope, Vec<u8>)> {
    let raw = der::read_tlv(reader, MAX_ENVELOPE_BYTES)?;
    let (envelope, used) = decode(&raw)?;
    debug_assert_eq!(used, raw.len());
    Ok((envelope, raw))
}

fn decode_envelope_body(value: &[u8]) -> DecodeResult<Envelope> {
    let mut r = Reader::new(value);
    r.version(ENVELOPE_VERSION)?;

    let mut info = r.sequence()?;
    if info.oid()? != oid::ENVELOPED_DATA {
        return Err(DecodeError::Structural("content type is not enveloped data"));
    }
    let mut wrapper = info.explicit(0)?;
    info.finish()?;
    let mut ed = wrapper.sequence()?;
    wrapper.finish()?;

    ed.version(ENVELOPED_DATA_VERSION)?;
    let mut set = ed.set()?;
    let mut recipients = Vec::new();
    while !set.is_empty() {
        recipients.push(decode_recipient(set.read_any()?)?);
    }
    if recipients.is_empty() {
        return Err(DecodeError::Structural("no recipients"));
    }
    let content = decode_content(&mut ed.sequence()?)?;
    ed.finish()?;

    let custom_params = match r.peek_tag()? {
        Some(tag) if tag == Tag::context(0, true) => decode_params(r.read(tag)?)?,
        Some(_) => return Err(DecodeError::Structural("unexpected element after content")),
        None => CustomParams::new(),
    };
    r.finish()?;

    Ok(Envelope {
        recipients,
        content,
        custom_params,
    })
}

fn decode_recipient(tlv: Tlv<'_>) -> DecodeResult<RecipientInfo> {
    let mut r = Reader::new(tlv.value);
    if tlv.tag == Tag::SEQUENCE {
        decode_key_recipient(&mut r).map(RecipientInfo::PublicKey)
    } else if tlv.tag == Tag::context(PASSWORD_RECIPIENT_TAG, true) {
        r.version(PASSWORD_RECIPIENT_VERSION)?;
        let p = decode_password_fields(&mut r)?;
        r.finish()?;
        Ok(RecipientInfo::Password(p))
    } else {
        Err(DecodeError::UnsupportedRecipientType(tlv.tag.number))
    }
}

fn decode_key_recipient(r: &mut Reader<'_>) -> DecodeResult<KeyRecipient> {
    r.version(KEY_RECIPIENT_VERSION)?;
    let mut rid = r.explicit(0)?;
    let recipient_id = rid.octet_string()?.to_vec();
    rid.finish()?;
    if recipient_id.is_empty() {
        return Err(DecodeError::Structural("empty recipient id"));
    }
    let mut alg = r.sequence()?;
    let key_algorithm = KeyAlgorithm::from_oid(alg.oid()?)?;
    alg.finish()?;
    let encrypted = r.octet_string()?;
    r.finish()?;

    let mut outer = Reader::new(encrypted);
    let mut e = outer.sequence()?;
    outer.finish()?;
    e.version(ENCRYPTED_KEY_VERSION)?;

    let mut spki = e.sequence()?;
    let mut spki_alg = spki.sequence()?;
    spki_alg.expect_oid(oid::X25519, "ephemeral key algorithm")?;
    spki_alg.finish()?;
    let ephemeral_key = fixed::<X25519_KEY_BYTES>(spki.bit_string()?, "ephemeral key length")?;
    spki.finish()?;

    let mut kdf = e.sequence()?;
    kdf.expect_oid(oid::KDF2, "key derivation function")?;
    decode_digest_alg(&mut kdf, oid::SHA384)?;
    kdf.finish()?;

    let tag = decode_hmac(&mut e)?;

    let mut data = e.sequence()?;
    let iv = decode_cbc_alg(&mut data)?;
    let wrapped_key = wrapped(data.octet_string()?)?;
    data.finish()?;
    e.finish()?;

    Ok(KeyRecipient {
        recipient_id,
        key_algorithm,
        ephemeral_key,
        iv,
        wrapped_key,
        tag,
    })
}

fn decode_password_fields(r: &mut Reader<'_>) -> DecodeResult<PasswordWrap> {
    let mut alg = r.sequence()?;
    alg.expect_oid(oid::PBES2, "key encryption scheme")?;
    let mut params = alg.sequence()?;
    alg.finish()?;

    let mut kdf = params.sequence()?;
    kdf.expect_oid(oid::PBKDF2, "password key derivation")?;
    let mut kdf_params = kdf.sequence()?;
    kdf.finish()?;
    let salt = kdf_params.octet_string()?.to_vec();
    if salt.is_empty() {
        return Err(DecodeError::Structural("empty salt"));
    }
    let iterations = u32::try_from(kdf_params.integer_u64()?)
        .map_err(|_| DecodeError::Structural("iteration count too large"))?;
    if iterations == 0 {
        return Err(DecodeError::Structural("zero iteration count"));
    }
    let mut prf = kdf_params.sequence()?;
    prf.expect_oid(oid::HMAC_SHA384, "pbkdf2 prf")?;
    prf.finish()?;
    kdf_params.finish()?;

    let iv = decode_cbc_alg(&mut params)?;
    params.finish()?;

    let wrapped_key = wrapped(r.octet_string()?)?;
    let tag = decode_hmac(r)?;

    Ok(PasswordWrap {
        salt,
        iterations,
        iv,
        wrapped_key,
        tag,
    })
}

fn decode_digest_alg(r: &mut Reader<'_>, expected: &[u8]) -> DecodeResult<()> {
    let mut alg = r.sequence()?;
    alg.expect_oid(expected, "digest algorithm")?;
    alg.null()?;
    alg.finish()
}

fn decode_hmac(r: &mut Reader<'_>) -> DecodeResult<[u8; HMAC_TAG_BYTES]> {
    let mut h = r.sequence()?;
    decode_digest_alg(&mut h, oid::SHA384)?;
    let tag = fixed::<HMAC_TAG_BYTES>(h.octet_string()?, "hmac length")?;
    h.finish()?;
    Ok(tag)
}

fn decode_cbc_alg(r: &mut Reader<'_>) -> DecodeResult<[u8; CBC_IV_BYTES]> {
    let mut alg = r.sequence()?;
    alg.expect_oid(oid::AES256_CBC, "key wrap cipher")?;
    let iv = fixed::<CBC_IV_BYTES>(alg.octet_string()?, "iv length")?;
    alg.finish()?;
    Ok(iv)
}

fn decode_content(r: &mut Reader<'_>) -> DecodeResult<ContentInfo> {
    if r.oid()? != oid::DATA {
        return Err(DecodeError::Structural("encrypted content type is not data"));
    }
    let mut alg = r.sequence()?;
    r.finish()?;
    alg.expect_oid(oid::AES256_GCM, "content cipher")?;

    let (nonce, mode) = match alg.peek_tag()? {
        Some(t) if t == Tag::OCTET_STRING => (alg.octet_string()?, ContentMode::Stream),
        Some(t) if t == Tag::SEQUENCE => {
            let mut p = alg.sequence()?;
            let nonce = p.octet_string()?;
            let chunk_size = p.integer_u64()?;
            p.finish()?;
            let chunk_size = u32::try_from(chunk_size)
                .ok()
                .filter(|c| (1..=MAX_CHUNK_SIZE).contains(c))
                .ok_or(DecodeError::Structural("chunk size out of range"))?;
            (nonce, ContentMode::Chunked { chunk_size })
        }
        _ => return Err(DecodeError::Structural("content cipher parameters")),
    };
    alg.finish()?;

    Ok(ContentInfo {
        nonce: fixed::<NONCE_BYTES>(nonce, "nonce length")?,
        mode,
    })
}

fn decode_params(value: &[u8]) -> DecodeResult<CustomParams> {
    let mut set = Reader::new(value);
    if set.is_empty() {
        return Err(DecodeError::Structural("empty custom params"));
    }
    let mut params = CustomParams::new();
    let mut previous: Option<&[u8]> = None;
    while !set.is_empty() {
        let member = set.read_any()?;
        if member.tag != Tag::SEQUENCE {
            return Err(DecodeError::Structural("custom param is not a sequence"));
        }
        if previous.is_some_and(|p| p >= member.raw) {
            return Err(DecodeError::Syntax("custom params not in canonical order"));
        }
        previous = Some(member.raw);

        let mut m = Reader::new(member.value);
        let key = m.utf8()?.to_owned();
        let v = m.read_any()?;
        m.finish()?;
        let mut inner = Reader::new(v.value);
        let value = match v.tag {
            t if t == Tag::context(0, true) => ParamValue::Int(inner.integer_i64()?),
            t if t == Tag::context(1, true) => ParamValue::Str(inner.utf8()?.to_owned()),
            t if t == Tag::context(2, true) => ParamValue::Bytes(inner.octet_string()?.to_vec()),
            _ => return Err(DecodeError::Structural("custom param value type")),
        };
        inner.finish()?;
        if params.insert(key, value).is_some() {
            return Err(DecodeError::Structural("duplicate custom param"));
        }
    }
    Ok(params)
}

pub fn decode_encrypted_key(data: &[u8]) -> DecodeResult<PasswordWrap> {
    let mut outer = Reader::new(data);
    let mut r = outer.sequence()?;
    outer.finish()?;
    let p = decode_password_fields(&mut r)?;
    r.finish()?;
    Ok(p)
}

fn fixed<const N: usize>(bytes: &[u8], what: &'static str) -> DecodeResult<[u8; N]> {
    bytes.try_into().map_err(|_| DecodeError::Structural(what))
}

fn wrapped(bytes: &[u8]) -> DecodeResult<Vec<u8>> {
    if bytes.is_empty() || bytes.len() % CBC_IV_BYTES != 0 {
        return Err(DecodeError::Structural("wrapped key length"));
    }
    Ok(bytes.to_vec())
}
