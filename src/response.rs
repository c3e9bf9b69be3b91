//! Uniform envelope returned to API callers.

use serde::{Serialize, Serializer};

use crate::engine::{EngineError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    Created,
    BadRequest,
    PaymentRequired,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

impl ResponseCode {
    pub fn http_status(self) -> u16 {
        match self {
            ResponseCode::Ok => 200,
            ResponseCode::Created => 201,
            ResponseCode::BadRequest => 400,
            ResponseCode::PaymentRequired => 402,
            ResponseCode::Forbidden => 403,
            ResponseCode::NotFound => 404,
            ResponseCode::Conflict => 409,
            ResponseCode::Internal => 500,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, ResponseCode::Ok | ResponseCode::Created)
    }
}

// Serialised as the status string, e.g. "404".
impl Serialize for ResponseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.http_status())
    }
}

impl From<ErrorKind> for ResponseCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation | ErrorKind::InvalidState => ResponseCode::BadRequest,
            ErrorKind::Payment | ErrorKind::InsufficientFunds => ResponseCode::PaymentRequired,
            ErrorKind::Unauthorized => ResponseCode::Forbidden,
            ErrorKind::NotFound => ResponseCode::NotFound,
            ErrorKind::Conflict => ResponseCode::Conflict,
            ErrorKind::Internal => ResponseCode::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub is_successful: bool,
    pub response_code: ResponseCode,
    pub response_message: String,
    pub data: Option<T>,
    pub error_response: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::success(ResponseCode::Ok, data, message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::success(ResponseCode::Created, data, message)
    }

    pub fn error(code: ResponseCode, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            is_successful: false,
            response_code: code,
            response_message: message.into(),
            data: None,
            error_response: Some(detail.into()),
        }
    }

    /// Wrap an engine result; errors pick their code from [`EngineError::kind`].
    pub fn from_result(result: Result<T, EngineError>, message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::ok(data, message),
            Err(e) => Self::from(e),
        }
    }

    fn success(code: ResponseCode, data: T, message: impl Into<String>) -> Self {
        Self {
            is_successful: true,
            response_code: code,
            response_message: message.into(),
            data: Some(data),
            error_response: None,
        }
    }
}

impl<T> From<EngineError> for ApiResponse<T> {
    fn from(e: EngineError) -> Self {
        let code = ResponseCode::from(e.kind());
        Self::error(code, "request failed", e.to_string())
    }
}
