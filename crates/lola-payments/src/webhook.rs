//! MercadoPago notification ingress: `x-signature` verification and
//! body classification.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// What a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Payment,
    /// Anything else is looked up as a preapproval (subscription).
    Subscription,
}

/// A parsed notification body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub action: String,
    pub kind: String,
    pub data_id: String,
}

impl Notification {
    /// Extract `action`, `type` and `data.id` (string or number).
    /// Returns `None` when there is no data id to look up.
    pub fn from_body(body: &Value) -> Option<Self> {
        let data_id = match &body["data"]["id"] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        if data_id.is_empty() {
            return None;
        }
        Some(Self {
            action: body["action"].as_str().unwrap_or_default().to_string(),
            kind: body["type"].as_str().unwrap_or_default().to_string(),
            data_id,
        })
    }

    pub fn topic(&self) -> Topic {
        if self.kind == "payment" || self.action.starts_with("payment.") {
            Topic::Payment
        } else {
            Topic::Subscription
        }
    }
}

/// Verify the `x-signature` header (`ts=<ts>,v1=<hex>`).
///
/// The signed manifest is `id:<data.id>;request-id:<x-request-id>;ts:<ts>;`
/// and `v1` is its HMAC-SHA256 under the webhook secret.
pub fn verify_signature(
    secret: &str,
    signature_header: Option<&str>,
    request_id: Option<&str>,
    data_id: &str,
) -> Result<()> {
    let header = signature_header
        .ok_or_else(|| PaymentError::Signature("missing x-signature header".to_string()))?;

    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key.trim() {
                "ts" => ts = Some(value.trim()),
                "v1" => v1 = Some(value.trim()),
                _ => {}
            }
        }
    }
    let ts = ts.ok_or_else(|| PaymentError::Signature("x-signature has no ts".to_string()))?;
    let v1 = v1.ok_or_else(|| PaymentError::Signature("x-signature has no v1".to_string()))?;

    let expected =
        hex::decode(v1).map_err(|_| PaymentError::Signature("v1 is not valid hex".to_string()))?;

    let manifest = format!(
        "id:{};request-id:{};ts:{};",
        data_id,
        request_id.unwrap_or_default(),
        ts
    );

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::Signature("invalid HMAC key length".to_string()))?;
    mac.update(manifest.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| PaymentError::Signature("signature mismatch".to_string()))
}
