//! Webhook signature verification
//!
//! The provider signs `"{timestamp}.{raw body}"` with HMAC-SHA256 under the
//! shared webhook secret and sends `t=<ts>,v1=<hex>[,v1=...]` in the
//! signature header. Verification recomputes the tag, compares in constant
//! time and rejects timestamps outside the replay tolerance.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{CoreError, CoreResult};

type HmacSha256 = Hmac<Sha256>;

/// Replay window applied to the signed timestamp, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Verify a webhook signature header against the raw request body.
///
/// `now_unix` is the current unix time; callers pass `Utc::now().timestamp()`
/// in production and a fixed value in tests.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> CoreResult<()> {
    let parsed = parse_header(header)?;

    if (now_unix - parsed.timestamp).abs() > tolerance_secs {
        return Err(CoreError::InvalidSignature);
    }

    for candidate in &parsed.signatures {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        // verify_slice compares in constant time
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| CoreError::InvalidSignature)?;
        mac.update(parsed.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }

    Err(CoreError::InvalidSignature)
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_header(header: &str) -> CoreResult<ParsedHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    match (timestamp, signatures.is_empty()) {
        (Some(timestamp), false) => Ok(ParsedHeader {
            timestamp,
            signatures,
        }),
        _ => Err(CoreError::InvalidSignature),
    }
}

/// Produce a signature header for a payload. Test helper and contract
/// documentation for what `verify` accepts.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"type":"checkout.session.completed"}"#;
        let header = sign(body, SECRET, NOW);
        assert!(verify(body, &header, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let body = br#"{"type":"checkout.session.completed"}"#;
        let header = sign(body, SECRET, NOW);
        let tampered = br#"{"type":"customer.subscription.deleted"}"#;
        assert!(matches!(
            verify(tampered, &header, SECRET, DEFAULT_TOLERANCE_SECS, NOW),
            Err(CoreError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"{}";
        let header = sign(body, "whsec_other", NOW);
        assert!(verify(body, &header, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let body = b"{}";
        let header = sign(body, SECRET, NOW - DEFAULT_TOLERANCE_SECS - 1);
        assert!(verify(body, &header, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(verify(b"{}", "", SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
        assert!(verify(b"{}", "t=abc,v1=00", SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
        assert!(verify(b"{}", "t=1700000000", SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
        assert!(verify(b"{}", "v1=00", SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
    }

    #[test]
    fn accepts_extra_schemes_alongside_v1() {
        let body = b"{}";
        let header = format!("{},v0=deadbeef", sign(body, SECRET, NOW));
        assert!(verify(body, &header, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_ok());
    }
}
