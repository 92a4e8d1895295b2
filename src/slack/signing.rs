use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const VERSION: &str = "v0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    BadTimestamp,
    /// Request older than the replay window.
    Stale { age_secs: i64 },
    Malformed,
    Mismatch,
    Key(String),
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::BadTimestamp => f.write_str("bad request timestamp"),
            SignatureError::Stale { age_secs } => write!(f, "stale request ({}s old)", age_secs),
            SignatureError::Malformed => f.write_str("malformed signature"),
            SignatureError::Mismatch => f.write_str("signature mismatch"),
            SignatureError::Key(e) => write!(f, "HMAC error: {}", e),
        }
    }
}

impl std::error::Error for SignatureError {}

fn mac(secret: &str, timestamp: &str, body: &str) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| SignatureError::Key(e.to_string()))?;
    mac.update(format!("{}:{}:{}", VERSION, timestamp, body).as_bytes());
    Ok(mac)
}

/// Sign a request body the way the events API does.
/// Returns `v0=` followed by the hex-encoded HMAC-SHA256.
pub fn sign_request(secret: &str, timestamp: &str, body: &str) -> Result<String, SignatureError> {
    let mac = mac(secret, timestamp, body)?;
    Ok(format!("{}={}", VERSION, hex::encode(mac.finalize().into_bytes())))
}

/// Check a signed request. `now_secs` is the current unix time.
pub fn verify_request(
    secret: &str,
    timestamp: &str,
    body: &str,
    signature: &str,
    now_secs: i64,
    max_age_secs: u64,
) -> Result<(), SignatureError> {
    let sent: i64 = timestamp.parse().map_err(|_| SignatureError::BadTimestamp)?;
    let age_secs = (now_secs - sent).abs();
    if age_secs > max_age_secs as i64 {
        return Err(SignatureError::Stale { age_secs });
    }
    let hex_sig = signature
        .strip_prefix(VERSION)
        .and_then(|s| s.strip_prefix('='))
        .ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(hex_sig).map_err(|_| SignatureError::Malformed)?;
    mac(secret, timestamp, body)?
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_shape() {
        let sig = sign_request("8f742231b10e8888abcd99yyyzzz85a5", "1531420618", "token=x&team_id=T1").unwrap();
        assert!(sig.starts_with("v0="));
        assert_eq!(sig.len(), 3 + 64);
    }

    #[test]
    fn test_verify_round_trip_and_tamper() {
        let secret = "shhh";
        let body = r#"{"type":"event_callback"}"#;
        let sig = sign_request(secret, "1000", body).unwrap();
        assert_eq!(verify_request(secret, "1000", body, &sig, 1010, 300), Ok(()));
        assert_eq!(
            verify_request(secret, "1000", "{}", &sig, 1010, 300),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_request("other", "1000", body, &sig, 1010, 300),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_verify_rejects_stale_and_garbage() {
        let sig = sign_request("s", "1000", "b").unwrap();
        assert_eq!(
            verify_request("s", "1000", "b", &sig, 1301, 300),
            Err(SignatureError::Stale { age_secs: 301 })
        );
        assert_eq!(verify_request("s", "abc", "b", &sig, 1000, 300), Err(SignatureError::BadTimestamp));
        assert_eq!(verify_request("s", "1000", "b", "v1=00", 1000, 300), Err(SignatureError::Malformed));
        assert_eq!(verify_request("s", "1000", "b", "v0=zz", 1000, 300), Err(SignatureError::Malformed));
    }
}
