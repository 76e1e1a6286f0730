//! HMAC-SHA256 helpers for webhook signature verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes the lowercase hex HMAC-SHA256 digest of `body` under `secret`.
pub fn compute_hmac_sha256(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a signature header against `body` using `secret`.
///
/// `signature` may carry an optional `sha256=` prefix and may be encoded as
/// hex or base64; both are tried. Comparison is constant-time via `hmac`'s
/// `verify_slice`, which rejects on length mismatch before doing so.
pub fn verify_hmac_sha256(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

    let candidate_bytes = hex::decode(signature).ok().or_else(|| {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(signature)
            .ok()
    });

    let Some(candidate_bytes) = candidate_bytes else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&candidate_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_valid_hex_signature() {
        let body = b"{\"hello\":\"world\"}";
        let secret = "shh-its-a-secret";
        let sig = compute_hmac_sha256(secret, body);
        assert!(verify_hmac_sha256(secret, body, &sig));
        assert!(verify_hmac_sha256(secret, body, &format!("sha256={sig}")));
    }

    #[test]
    fn rejects_single_byte_body_mutation() {
        let body = b"{\"hello\":\"world\"}";
        let secret = "shh-its-a-secret";
        let sig = compute_hmac_sha256(secret, body);
        let mutated = b"{\"hello\":\"worle\"}";
        assert!(!verify_hmac_sha256(secret, mutated, &sig));
    }

    #[test]
    fn rejects_single_byte_signature_mutation() {
        let body = b"{\"hello\":\"world\"}";
        let secret = "shh-its-a-secret";
        let mut sig = compute_hmac_sha256(secret, body);
        let last = sig.pop().unwrap();
        let flipped = if last == '0' { '1' } else { '0' };
        sig.push(flipped);
        assert!(!verify_hmac_sha256(secret, body, &sig));
    }

    #[test]
    fn accepts_base64_encoded_signature() {
        use base64::Engine;
        let body = b"payload";
        let secret = "k";
        let hex_sig = compute_hmac_sha256(secret, body);
        let raw = hex::decode(&hex_sig).unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(raw);
        assert!(verify_hmac_sha256(secret, body, &b64));
    }
}
