//! Email verification ahead of registration.
//!
//! Verification state is kept per email inside an [`EmailVerifier`] and the proof
//! of a successful check is a [`VerifiedEmail`] value handed to registration.
//! Nothing is shared between unrelated sign-ups.

use std::collections::HashMap;

use rand_core::{OsRng, RngCore};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OnboardingError {
    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("no verification in progress for {0}")]
    NoPendingVerification(String),
    #[error("wrong verification code for {email}, {remaining} attempts left")]
    WrongCode { email: String, remaining: u8 },
    #[error("too many wrong codes for {0}, request a new one")]
    TooManyAttempts(String),
}

/// Proof that an email address passed verification. Consumed by registration.
#[derive(Debug, PartialEq, Eq)]
pub struct VerifiedEmail(String);

impl VerifiedEmail {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Debug)]
struct PendingVerification {
    code: String,
    attempts_left: u8,
}

#[derive(Debug, Default)]
pub struct EmailVerifier {
    pending: HashMap<String, PendingVerification>,
}

impl EmailVerifier {
    pub const MAX_ATTEMPTS: u8 = 5;

    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a random 6-digit code, replacing any earlier one for the same address.
    pub fn issue(&mut self, email: &str) -> Result<String, OnboardingError> {
        let email = normalize(email)?;
        let code = random_code();

        self.pending.insert(
            email,
            PendingVerification {
                code: code.clone(),
                attempts_left: Self::MAX_ATTEMPTS,
            },
        );
        Ok(code)
    }

    pub fn verify(&mut self, email: &str, code: &str) -> Result<VerifiedEmail, OnboardingError> {
        let email = normalize(email)?;
        let pending = self
            .pending
            .get_mut(&email)
            .ok_or_else(|| OnboardingError::NoPendingVerification(email.clone()))?;

        if pending.code == code.trim() {
            self.pending.remove(&email);
            return Ok(VerifiedEmail(email));
        }

        pending.attempts_left -= 1;
        if pending.attempts_left == 0 {
            self.pending.remove(&email);
            return Err(OnboardingError::TooManyAttempts(email));
        }
        Err(OnboardingError::WrongCode {
            remaining: pending.attempts_left,
            email,
        })
    }
}

/// Uniform over `000000..=999999`.
fn random_code() -> String {
    // largest multiple of 10^6 below 2^32
    const LIMIT: u32 = 4_294_000_000;
    loop {
        let n = OsRng.next_u32();
        if n < LIMIT {
            return format!("{:06}", n % 1_000_000);
        }
    }
}

fn normalize(email: &str) -> Result<String, OnboardingError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
                && !domain.contains('@')
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(OnboardingError::InvalidEmail(email))
    }
}
