//! Raincheck Token Fuzz Target
//!
//! Fuzzes token parsing and validation against arbitrary input.
//! Goal: Ensure no panics on arbitrary input; a forged token must never
//! validate.

#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use raincheck_core::{ClientId, MacKey, SignedToken, TokenSigner};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing must never panic.
    let Ok(token) = SignedToken::parse(raw) else {
        return;
    };

    // A parsed token from arbitrary bytes must never pass MAC
    // verification against a fixed key (the fuzzer does not know the key,
    // so a success here means verification is broken).
    let signer = TokenSigner::new(
        MacKey::from_bytes(b"fuzz fixture key".to_vec()).expect("non-empty key"),
        Duration::from_secs(1),
        Duration::from_secs(10),
    );
    let observed = ClientId::new(token.client_id().as_str());
    assert!(signer.validate(&token, &observed, 5_000).is_err());
});
