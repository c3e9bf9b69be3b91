//! Gateway webhook payloads.
//!
//! Payloads follow the Paystack shape:
//!
//! ```text
//! { "event": "charge.success",
//!   "data": { "reference": "pay_00000003", "status": "success", "amount": 120000,
//!             "authorization": { "authorization_code": "AUTH_x", "last4": "4081", ... } } }
//! ```
//!
//! The raw body is signed with HMAC-SHA512 under the merchant secret and the hex
//! digest travels in the `x-paystack-signature` header. Nothing in the body is
//! trusted before that signature checks out.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use thiserror::Error;

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook signature missing or invalid")]
    InvalidSignature,
    #[error("malformed webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("unrecognized gateway status '{0}'")]
    UnknownStatus(String),
    #[error("secret cannot be used as an HMAC key")]
    InvalidKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub reference: String,
    pub status: String,
    /// Amount in minor units as charged by the gateway.
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub authorization: Option<CardAuthorization>,
}

/// Reusable card details returned with successful charges.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CardAuthorization {
    pub authorization_code: Option<String>,
    pub last4: Option<String>,
    pub card_type: Option<String>,
    pub bank: Option<String>,
    #[serde(default)]
    pub reusable: bool,
}

/// Which gateway flow an event belongs to, from the `event` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    /// `charge.*`: card collections.
    Charge,
    /// `transfer.*`: payouts.
    Transfer,
}

/// Final state reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failed,
}

impl WebhookEvent {
    /// Verify the signature, then parse.
    pub fn from_signed(
        secret: Option<&str>,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Self, WebhookError> {
        match (secret, signature) {
            (Some(secret), Some(signature)) if verify_signature(secret, body, signature) => {
                Ok(serde_json::from_slice(body)?)
            }
            _ => Err(WebhookError::InvalidSignature),
        }
    }

    pub fn family(&self) -> Option<EventFamily> {
        match self.event.split_once('.') {
            Some(("charge", _)) => Some(EventFamily::Charge),
            Some(("transfer", _)) => Some(EventFamily::Transfer),
            _ => None,
        }
    }

    pub fn gateway_status(&self) -> Result<GatewayStatus, WebhookError> {
        match self.data.status.as_str() {
            "success" => Ok(GatewayStatus::Success),
            "failed" | "reversed" | "abandoned" => Ok(GatewayStatus::Failed),
            other => Err(WebhookError::UnknownStatus(other.to_string())),
        }
    }
}

/// Hex HMAC-SHA512 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Success,
    Failure,
    AlreadyProcessed,
    UnknownReference,
    InvalidSignature,
    InvalidPayload,
    AmountMismatch,
    /// Valid callback the ledger could not apply; the entry stays pending.
    SettlementFailed,
}

/// Body returned to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReply {
    pub status: WebhookStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl WebhookReply {
    pub fn new(status: WebhookStatus, reference: Option<&str>) -> Self {
        Self {
            status,
            reference: reference.map(str::to_string),
        }
    }
}
