//! Webhook payload types and signature verification.
//!
//! The provider signs every delivery with a header of the form `t=<unix-ts>,v1=<hex hmac>`, where the MAC is
//! HMAC-SHA256 over `"{t}.{raw body}"`. Verification runs against the exact raw bytes as received; any re-parse or
//! re-serialisation of the body before verifying would change the bytes and void the signature.
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// The HTTP header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// The only event type the reconciler acts on.
pub const INTENT_SUCCEEDED: &str = "payment_intent.succeeded";

type HmacSha256 = Hmac<Sha256>;

//--------------------------------------    Event payload    ---------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider-assigned delivery id, e.g. `evt_...`. The idempotency ledger keys off this.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: PaymentIntent,
}

/// The payment-intent object embedded in the event. `amount` is in minor units of `currency`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
}

impl PaymentIntent {
    pub fn has_succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

//--------------------------------------      Signature      ---------------------------------------------------------
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("The signature header is malformed")]
    MalformedHeader,
    #[error("The signature does not match the payload")]
    InvalidSignature,
}

/// Verify `header` against the raw request `payload`. Returns the timestamp the sender signed with.
///
/// No timestamp-staleness window is enforced here; callers that want replay protection get it from the processed
/// event ledger instead.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str) -> Result<i64, SignatureError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts.parse::<i64>().map_err(|_| SignatureError::MalformedHeader)?),
            Some(("v1", sig)) => signature = Some(hex_decode(sig)?),
            // Unknown scheme prefixes (v0 etc.) are ignored.
            Some(_) => {},
            None => return Err(SignatureError::MalformedHeader),
        }
    }
    let (timestamp, signature) = match (timestamp, signature) {
        (Some(t), Some(s)) => (t, s),
        _ => return Err(SignatureError::MalformedHeader),
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::MalformedHeader)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&signature).map_err(|_| SignatureError::InvalidSignature)?;
    Ok(timestamp)
}

/// Produce a `t=...,v1=...` header for `payload`. Used by tools and tests to forge valid deliveries.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let signature = mac.finalize().into_bytes();
    let hex = signature.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("t={timestamp},v1={hex}")
}

fn hex_decode(s: &str) -> Result<Vec<u8>, SignatureError> {
    if s.len() % 2 != 0 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SignatureError::MalformedHeader);
    }
    let bytes = s
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16).expect("checked hex digit") as u8;
            let lo = (pair[1] as char).to_digit(16).expect("checked hex digit") as u8;
            (hi << 4) | lo
        })
        .collect();
    Ok(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn valid_signature_verifies() {
        let payload = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let header = signature_header(payload, SECRET, 1_700_000_000);
        assert_eq!(verify_signature(payload, &header, SECRET), Ok(1_700_000_000));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let payload = br#"{"amount":2000}"#;
        let header = signature_header(payload, SECRET, 1_700_000_000);
        let tampered = br#"{"amount":9000}"#;
        assert_eq!(verify_signature(tampered, &header, SECRET), Err(SignatureError::InvalidSignature));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = b"payload";
        let header = signature_header(payload, SECRET, 42);
        assert_eq!(verify_signature(payload, &header, "whsec_other"), Err(SignatureError::InvalidSignature));
    }

    #[test]
    fn the_timestamp_is_part_of_the_signed_material() {
        let payload = b"payload";
        let header = signature_header(payload, SECRET, 42);
        let shifted = header.replace("t=42", "t=43");
        assert_eq!(verify_signature(payload, &shifted, SECRET), Err(SignatureError::InvalidSignature));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for header in ["", "t=abc,v1=00", "t=42", "v1=00", "nonsense", "t=42,v1=xyz", "t=42,v1=abc"] {
            assert_eq!(verify_signature(b"payload", header, SECRET), Err(SignatureError::MalformedHeader), "{header}");
        }
    }

    #[test]
    fn unknown_schemes_are_ignored() {
        let payload = b"payload";
        let header = format!("{},v0=deadbeef", signature_header(payload, SECRET, 42));
        assert_eq!(verify_signature(payload, &header, SECRET), Ok(42));
    }

    #[test]
    fn event_deserializes_from_provider_shape() {
        let body = r#"{
            "id": "evt_123",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_9", "status": "succeeded", "amount": 2000, "currency": "aud" } }
        }"#;
        let event: WebhookEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.id, "evt_123");
        assert_eq!(event.event_type, INTENT_SUCCEEDED);
        assert!(event.data.object.has_succeeded());
        assert_eq!(event.data.object.amount, 2000);
    }
}
