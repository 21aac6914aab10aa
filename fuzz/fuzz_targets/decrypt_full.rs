#![no_main]

use hybrid_envelope::{Crypto, CryptoConfig, Keypair};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

static CRYPTO: Lazy<Crypto> = Lazy::new(|| {
    Crypto::new(CryptoConfig {
        password_iterations: 10_000,
        ..CryptoConfig::default()
    })
    .unwrap()
});

static KEYPAIR: Lazy<Keypair> = Lazy::new(|| CRYPTO.generate_keypair().expect("keygen"));

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let _ = CRYPTO.decrypt(data, &KEYPAIR.private_key);

    // First byte picks a password length; the rest is the message.
    let split = (data[0] as usize) % data.len();
    let (password, message) = data[1..].split_at(split.min(data.len() - 1));
    let _ = CRYPTO.decrypt_with_password(message, password);
});
