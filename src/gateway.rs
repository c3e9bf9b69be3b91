//! Payment gateway adapter seam.

use thiserror::Error;

use crate::Amount;

/// Why a payment intent is being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPurpose {
    WalletFunding,
    RequestPayment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    /// Ledger reference the gateway echoes back in its webhook.
    pub reference: String,
    pub amount: Amount,
    pub email: String,
    pub purpose: PaymentPurpose,
}

/// Where the payer completes a card payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub reference: String,
    pub authorization_url: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway rejected intent {reference}: {message}")]
    Rejected { reference: String, message: String },
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Initializes card payments with an external provider.
pub trait PaymentGateway: Send {
    fn name(&self) -> &'static str;

    fn initialize(&mut self, intent: &PaymentIntent) -> Result<Checkout, GatewayError>;
}

/// In-process gateway that accepts intents up to an optional limit.
#[derive(Debug, Default)]
pub struct MockGateway {
    /// Intents above this amount are rejected.
    pub limit: Option<Amount>,
    /// Every intent seen, accepted or not.
    pub intents: Vec<PaymentIntent>,
}

impl MockGateway {
    pub fn with_limit(limit: Amount) -> Self {
        Self {
            limit: Some(limit),
            intents: Vec::new(),
        }
    }
}

impl PaymentGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn initialize(&mut self, intent: &PaymentIntent) -> Result<Checkout, GatewayError> {
        self.intents.push(intent.clone());

        if let Some(limit) = self.limit {
            if intent.amount > limit {
                return Err(GatewayError::Rejected {
                    reference: intent.reference.clone(),
                    message: format!("amount {} above limit {limit}", intent.amount),
                });
            }
        }

        Ok(Checkout {
            reference: intent.reference.clone(),
            authorization_url: format!("https://checkout.mock/{}", intent.reference),
        })
    }
}
