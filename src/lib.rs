pub mod amount;
pub mod charge;
pub mod command;
pub mod config;
pub mod csv;
pub mod engine;
pub mod gateway;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod onboarding;
pub mod replay;
pub mod response;
pub mod webhook;

pub use amount::Amount;
pub use command::{Command, Outcome, RequestReceipt};
pub use config::Config;
pub use engine::{Engine, EngineError, EngineHandle, ErrorKind};
pub use model::{DisputeId, RequestId, UserId};
pub use response::{ApiResponse, ResponseCode};
