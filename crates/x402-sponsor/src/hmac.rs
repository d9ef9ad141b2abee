//! Webhook authenticity: HMAC-SHA256 over the raw request body.
//!
//! Merchants sign the exact bytes they POST with the shared webhook secret
//! and send the hex MAC in the [`crate::constants::SIGNATURE_HEADER`] header.
//! Verification happens before the body is parsed and before any ledger
//! record is created.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Sign a webhook body with the shared secret. Returns the hex-encoded MAC.
pub fn sign_body(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(&mac.finalize().into_bytes())
}

/// Verify a caller-supplied hex signature against the raw body bytes.
///
/// Comparison is constant-time via the hmac crate's `verify_slice`; a
/// signature that fails hex decoding is compared against zeros so the
/// decode path has no timing side-channel either.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);

    let claimed = hex::decode(signature).unwrap_or_else(|_| vec![0u8; 32]);
    mac.verify_slice(&claimed).is_ok()
}

/// Constant-time equality for shared tokens (metrics bearer auth).
///
/// Both sides are hashed to fixed-length digests first, so timing reveals
/// neither content nor length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().fold(String::new(), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{b:02x}");
            s
        })
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, ()> {
        if s.len() % 2 != 0 || !s.is_ascii() {
            return Err(());
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
            .collect()
    }
}
