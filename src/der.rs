//! Strict DER reader and writer.
//!
//! Only the subset the envelope needs: definite lengths, low- and high-form
//! tags, INTEGER, BIT STRING, OCTET STRING, NULL, OBJECT IDENTIFIER,
//! UTF8String, SEQUENCE, SET and context-specific wrappers.
//!
//! The reader accepts exactly one encoding per value:
//!   - lengths: short form below 128, otherwise long form with no leading
//!     zero byte, at most 4 length bytes; indefinite form is refused
//!   - tags: high form only for numbers >= 31, no leading 0x80 group,
//!     numbers >= 2^31 refused
//!   - integers: minimal two's complement

use std::io::Read;

use crate::error::{DecodeError, Error};

/// Largest tag number accepted (exclusive bound is 2^31).
pub const MAX_TAG_NUMBER: u32 = 0x7FFF_FFFF;

/// Maximum number of long-form length bytes.
const MAX_LENGTH_BYTES: usize = 4;

/// Identifier octet + 5 tag continuation bytes + length octet + 4 length bytes.
pub const MAX_HEADER_BYTES: usize = 1 + 5 + 1 + MAX_LENGTH_BYTES;

type DecodeResult<T> = core::result::Result<T, DecodeError>;

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Universal,
    Application,
    Context,
    Private,
}

impl Class {
    fn bits(self) -> u8 {
        match self {
            Class::Universal => 0x00,
            Class::Application => 0x40,
            Class::Context => 0x80,
            Class::Private => 0xC0,
        }
    }

    fn from_bits(b: u8) -> Self {
        match b & 0xC0 {
            0x00 => Class::Universal,
            0x40 => Class::Application,
            0x80 => Class::Context,
            _ => Class::Private,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag {
    pub class: Class,
    pub constructed: bool,
    pub number: u32,
}

impl Tag {
    pub const INTEGER: Tag = Tag::universal(2, false);
    pub const BIT_STRING: Tag = Tag::universal(3, false);
    pub const OCTET_STRING: Tag = Tag::universal(4, false);
    pub const NULL: Tag = Tag::universal(5, false);
    pub const OID: Tag = Tag::universal(6, false);
    pub const UTF8_STRING: Tag = Tag::universal(12, false);
    pub const SEQUENCE: Tag = Tag::universal(16, true);
    pub const SET: Tag = Tag::universal(17, true);

    pub const fn universal(number: u32, constructed: bool) -> Self {
        Tag {
            class: Class::Universal,
            constructed,
            number,
        }
    }

    pub const fn context(number: u32, constructed: bool) -> Self {
        Tag {
            class: Class::Context,
            constructed,
            number,
        }
    }

    fn encode(self, out: &mut Vec<u8>) {
        let mut first = self.class.bits();
        if self.constructed {
            first |= 0x20;
        }
        if self.number < 31 {
            out.push(first | self.number as u8);
            return;
        }
        out.push(first | 0x1F);
        let mut groups = [0u8; 5];
        let mut n = self.number;
        let mut i = groups.len();
        loop {
            i -= 1;
            groups[i] = (n & 0x7F) as u8;
            n >>= 7;
            if n == 0 {
                break;
            }
        }
        let last = groups.len() - 1;
        for (j, g) in groups.iter().enumerate().skip(i) {
            out.push(if j == last { *g } else { *g | 0x80 });
        }
    }
}

// ---------------------------------------------------------------------------
// Header parsing
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub tag: Tag,
    pub header_len: usize,
    pub value_len: usize,
}

/// Parse identifier and length octets. Does not check that the value bytes
/// are present.
pub fn parse_header(input: &[u8]) -> DecodeResult<Header> {
    let first = *input.first().ok_or(DecodeError::Truncated)?;
    let class = Class::from_bits(first);
    let constructed = first & 0x20 != 0;
    let mut pos = 1;

    let number = if first & 0x1F != 0x1F {
        u32::from(first & 0x1F)
    } else {
        let mut value: u64 = 0;
        loop {
            let b = *input.get(pos).ok_or(DecodeError::Truncated)?;
            if pos == 1 && b == 0x80 {
                return Err(DecodeError::Syntax("non-minimal tag"));
            }
            pos += 1;
            value = (value << 7) | u64::from(b & 0x7F);
            if value > u64::from(MAX_TAG_NUMBER) {
                return Err(DecodeError::Structural("tag number too large"));
            }
            if b & 0x80 == 0 {
                break;
            }
        }
        if value < 31 {
            return Err(DecodeError::Syntax("non-minimal tag"));
        }
        value as u32
    };

    let l = *input.get(pos).ok_or(DecodeError::Truncated)?;
    pos += 1;
    let value_len = if l < 0x80 {
        usize::from(l)
    } else if l == 0x80 {
        return Err(DecodeError::Syntax("indefinite length"));
    } else {
        let n = usize::from(l & 0x7F);
        if n > MAX_LENGTH_BYTES {
            return Err(DecodeError::Structural("length too large"));
        }
        let bytes = input.get(pos..pos + n).ok_or(DecodeError::Truncated)?;
        pos += n;
        if bytes[0] == 0 {
            return Err(DecodeError::Syntax("non-minimal length"));
        }
        let len = bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
        if len < 0x80 {
            return Err(DecodeError::Syntax("non-minimal length"));
        }
        usize::try_from(len).map_err(|_| DecodeError::Structural("length too large"))?
    };

    Ok(Header {
        tag: Tag {
            class,
            constructed,
            number,
        },
        header_len: pos,
        value_len,
    })
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct Tlv<'a> {
    pub tag: Tag,
    pub value: &'a [u8],
    /// Header and value together.
    pub raw: &'a [u8],
}

/// Recursive-descent cursor over a DER byte string.
#[derive(Clone, Debug)]
pub struct Reader<'a> {
    input: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    /// Tag of the next element, or `None` at the end of input.
    pub fn peek_tag(&self) -> DecodeResult<Option<Tag>> {
        if self.input.is_empty() {
            return Ok(None);
        }
        parse_header(self.input).map(|h| Some(h.tag))
    }

    pub fn read_any(&mut self) -> DecodeResult<Tlv<'a>> {
        let h = parse_header(self.input)?;
        let end = h
            .header_len
            .checked_add(h.value_len)
            .ok_or(DecodeError::Truncated)?;
        if end > self.input.len() {
            return Err(DecodeError::Truncated);
        }
        let raw = &self.input[..end];
        self.input = &self.input[end..];
        Ok(Tlv {
            tag: h.tag,
            value: &raw[h.header_len..],
            raw,
        })
    }

    /// Read an element that must carry `tag`.
    pub fn read(&mut self, tag: Tag) -> DecodeResult<&'a [u8]> {
        let tlv = self.read_any()?;
        if tlv.tag != tag {
            return Err(DecodeError::Structural("unexpected tag"));
        }
        Ok(tlv.value)
    }

    pub fn nested(&mut self, tag: Tag) -> DecodeResult<Reader<'a>> {
        self.read(tag).map(Reader::new)
    }

    pub fn sequence(&mut self) -> DecodeResult<Reader<'a>> {
        self.nested(Tag::SEQUENCE)
    }

    pub fn set(&mut self) -> DecodeResult<Reader<'a>> {
        self.nested(Tag::SET)
    }

    /// Contents of a constructed `[n]` wrapper.
    pub fn explicit(&mut self, n: u32) -> DecodeResult<Reader<'a>> {
        self.nested(Tag::context(n, true))
    }

    pub fn integer_u64(&mut self) -> DecodeResult<u64> {
        let bytes = integer_bytes(self.read(Tag::INTEGER)?)?;
        if bytes[0] & 0x80 != 0 {
            return Err(DecodeError::Structural("negative integer"));
        }
        let bytes = if bytes.len() > 1 && bytes[0] == 0 {
            &bytes[1..]
        } else {
            bytes
        };
        if bytes.len() > 8 {
            return Err(DecodeError::Structural("integer too large"));
        }
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    pub fn integer_i64(&mut self) -> DecodeResult<i64> {
        let bytes = integer_bytes(self.read(Tag::INTEGER)?)?;
        if bytes.len() > 8 {
            return Err(DecodeError::Structural("integer too large"));
        }
        let init: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
        Ok(bytes.iter().fold(init, |acc, b| (acc << 8) | i64::from(*b)))
    }

    /// INTEGER that must equal `expected`.
    pub fn version(&mut self, expected: u64) -> DecodeResult<()> {
        if self.integer_u64()? != expected {
            return Err(DecodeError::Structural("unexpected version"));
        }
        Ok(())
    }

    pub fn octet_string(&mut self) -> DecodeResult<&'a [u8]> {
        self.read(Tag::OCTET_STRING)
    }

    pub fn null(&mut self) -> DecodeResult<()> {
        if !self.read(Tag::NULL)?.is_empty() {
            return Err(DecodeError::Syntax("non-empty null"));
        }
        Ok(())
    }

    pub fn oid(&mut self) -> DecodeResult<&'a [u8]> {
        let value = self.read(Tag::OID)?;
        validate_oid(value)?;
        Ok(value)
    }

    /// OID that must equal `expected`; anything else is an unsupported `what`.
    pub fn expect_oid(&mut self, expected: &[u8], what: &'static str) -> DecodeResult<()> {
        if self.oid()? != expected {
            return Err(DecodeError::UnsupportedAlgorithm(what));
        }
        Ok(())
    }

    /// BIT STRING with no unused bits.
    pub fn bit_string(&mut self) -> DecodeResult<&'a [u8]> {
        let value = self.read(Tag::BIT_STRING)?;
        match value.split_first() {
            Some((0, bits)) => Ok(bits),
            Some(_) => Err(DecodeError::Structural("partial bit string")),
            None => Err(DecodeError::Syntax("empty bit string")),
        }
    }

    pub fn utf8(&mut self) -> DecodeResult<&'a str> {
        core::str::from_utf8(self.read(Tag::UTF8_STRING)?)
            .map_err(|_| DecodeError::Syntax("invalid utf-8"))
    }

    /// Every nested structure must be consumed exactly.
    pub fn finish(&self) -> DecodeResult<()> {
        if !self.input.is_empty() {
            return Err(DecodeError::Syntax("trailing data"));
        }
        Ok(())
    }
}

fn integer_bytes(value: &[u8]) -> DecodeResult<&[u8]> {
    match value {
        [] => Err(DecodeError::Syntax("empty integer")),
        [0x00, next, ..] if next & 0x80 == 0 => Err(DecodeError::Syntax("non-minimal integer")),
        [0xFF, next, ..] if next & 0x80 != 0 => Err(DecodeError::Syntax("non-minimal integer")),
        _ => Ok(value),
    }
}

fn validate_oid(value: &[u8]) -> DecodeResult<()> {
    if value.is_empty() {
        return Err(DecodeError::Syntax("empty object identifier"));
    }
    let mut at_start = true;
    for b in value {
        if at_start && *b == 0x80 {
            return Err(DecodeError::Syntax("non-minimal object identifier"));
        }
        at_start = b & 0x80 == 0;
    }
    if !at_start {
        return Err(DecodeError::Truncated);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn tlv(&mut self, tag: Tag, value: &[u8]) {
        tag.encode(&mut self.buf);
        encode_length(value.len(), &mut self.buf);
        self.buf.extend_from_slice(value);
    }

    /// Append an already-encoded element.
    pub fn raw(&mut self, der: &[u8]) {
        self.buf.extend_from_slice(der);
    }

    pub fn constructed(&mut self, tag: Tag, f: impl FnOnce(&mut Writer)) {
        let mut inner = Writer::new();
        f(&mut inner);
        self.tlv(tag, &inner.buf);
    }

    pub fn sequence(&mut self, f: impl FnOnce(&mut Writer)) {
        self.constructed(Tag::SEQUENCE, f)
    }

    pub fn explicit(&mut self, n: u32, f: impl FnOnce(&mut Writer)) {
        self.constructed(Tag::context(n, true), f)
    }

    pub fn integer_u64(&mut self, v: u64) {
        let bytes = v.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
        let mut value = Vec::with_capacity(9);
        if bytes[skip] & 0x80 != 0 {
            value.push(0);
        }
        value.extend_from_slice(&bytes[skip..]);
        self.tlv(Tag::INTEGER, &value);
    }

    pub fn integer_i64(&mut self, v: i64) {
        let bytes = v.to_be_bytes();
        let mut start = 0;
        while start < 7 {
            let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        self.tlv(Tag::INTEGER, &bytes[start..]);
    }

    pub fn octet_string(&mut self, v: &[u8]) {
        self.tlv(Tag::OCTET_STRING, v)
    }

    pub fn null(&mut self) {
        self.tlv(Tag::NULL, &[])
    }

    pub fn oid(&mut self, oid: &[u8]) {
        self.tlv(Tag::OID, oid)
    }

    pub fn bit_string(&mut self, bits: &[u8]) {
        let mut value = Vec::with_capacity(bits.len() + 1);
        value.push(0);
        value.extend_from_slice(bits);
        self.tlv(Tag::BIT_STRING, &value)
    }

    pub fn utf8(&mut self, s: &str) {
        self.tlv(Tag::UTF8_STRING, s.as_bytes())
    }
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Read one complete TLV from `reader` without consuming anything past it.
///
/// Values longer than `max_value_len` are refused before allocation.
pub fn read_tlv<R: Read>(reader: &mut R, max_value_len: usize) -> crate::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(MAX_HEADER_BYTES);
    read_byte(reader, &mut header)?;

    if header[0] & 0x1F == 0x1F {
        // At most five continuation bytes before parse_header rejects it.
        for _ in 0..5 {
            read_byte(reader, &mut header)?;
            if header[header.len() - 1] & 0x80 == 0 {
                break;
            }
        }
    }
    read_byte(reader, &mut header)?;
    let l = header[header.len() - 1];
    if l > 0x80 {
        let n = usize::from(l & 0x7F).min(MAX_LENGTH_BYTES + 1);
        for _ in 0..n {
            read_byte(reader, &mut header)?;
        }
    }

    let h = parse_header(&header)?;
    if h.header_len != header.len() {
        return Err(DecodeError::Syntax("malformed header").into());
    }
    if h.value_len > max_value_len {
        return Err(DecodeError::Structural("element too large").into());
    }

    let mut out = header;
    out.resize(h.header_len + h.value_len, 0);
    read_exact(reader, &mut out[h.header_len..])?;
    Ok(out)
}

fn read_byte<R: Read>(reader: &mut R, out: &mut Vec<u8>) -> crate::Result<()> {
    let mut b = [0u8; 1];
    read_exact(reader, &mut b)?;
    out.push(b[0]);
    Ok(())
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> crate::Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::MalformedEnvelope(DecodeError::Truncated),
        _ => Error::Io(e),
    })
}
