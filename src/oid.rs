//! Object identifiers used on the wire, stored as DER content octets.

pub const DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01];
pub const ENVELOPED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x03];

pub const AES256_GCM: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x01, 0x2E];
pub const AES256_CBC: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x01, 0x2A];

pub const SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
pub const SHA384: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02];
pub const SHA512: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03];

pub const HMAC_SHA384: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x02, 0x0A];
pub const PBKDF2: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x05, 0x0C];
pub const PBES2: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x05, 0x0D];

/// KDF2 from ISO/IEC 18033-2 (1.0.18033.2.5.2).
pub const KDF2: &[u8] = &[0x28, 0x81, 0x8C, 0x71, 0x02, 0x05, 0x02];

pub const ED25519: &[u8] = &[0x2B, 0x65, 0x70];
pub const X25519: &[u8] = &[0x2B, 0x65, 0x6E];

/// Human-readable name for inspection output.
pub fn name(oid: &[u8]) -> Option<&'static str> {
    let known: &[(&[u8], &str)] = &[
        (DATA, "data"),
        (ENVELOPED_DATA, "envelopedData"),
        (AES256_GCM, "aes256-GCM"),
        (AES256_CBC, "aes256-CBC"),
        (SHA256, "sha256"),
        (SHA384, "sha384"),
        (SHA512, "sha512"),
        (HMAC_SHA384, "hmacWithSHA384"),
        (PBKDF2, "pbkdf2"),
        (PBES2, "pbes2"),
        (KDF2, "kdf2"),
        (ED25519, "ed25519"),
        (X25519, "x25519"),
    ];
    known.iter().find(|(o, _)| *o == oid).map(|(_, n)| *n)
}

/// Dotted-decimal form of DER content octets.
pub fn dotted(oid: &[u8]) -> String {
    let mut arcs = Vec::new();
    let mut acc: u64 = 0;
    for b in oid {
        acc = (acc << 7) | u64::from(b & 0x7F);
        if b & 0x80 == 0 {
            arcs.push(acc);
            acc = 0;
        }
    }
    let mut out = String::new();
    if let Some((first, rest)) = arcs.split_first() {
        let (a, b) = match *first {
            v if v < 40 => (0, v),
            v if v < 80 => (1, v - 40),
            v => (2, v - 80),
        };
        out.push_str(&format!("{a}.{b}"));
        for arc in rest {
            out.push_str(&format!(".{arc}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_forms() {
        assert_eq!(dotted(AES256_GCM), "2.16.840.1.101.3.4.1.46");
        assert_eq!(dotted(ENVELOPED_DATA), "1.2.840.113549.1.7.3");
        assert_eq!(dotted(KDF2), "1.0.18033.2.5.2");
        assert_eq!(dotted(ED25519), "1.3.101.112");
        assert_eq!(dotted(X25519), "1.3.101.110");
        assert_eq!(dotted(HMAC_SHA384), "1.2.840.113549.2.10");
    }

    #[test]
    fn test_names() {
        assert_eq!(name(PBES2), Some("pbes2"));
        assert_eq!(name(&[0x2B, 0x65, 0x71]), None);
    }
}
