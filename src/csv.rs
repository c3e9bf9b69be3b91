use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::charge::ChargeKind;
use crate::ledger::WalletId;
use crate::model::{
    DisputeId, DisputeOutcome, DisputeReason, PaymentMethod, Registration, RequestId,
};

/// Errors that can occur when parsing journal rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open journal: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized journal type '{kind}'")]
    UnrecognizedType { line: usize, kind: String },

    #[error("line {line}: {kind} missing amount")]
    MissingAmount { line: usize, kind: String },

    #[error("line {line}: {kind} missing {field}")]
    MissingField {
        line: usize,
        kind: String,
        field: &'static str,
    },

    #[error("line {line}: invalid {field} '{value}'")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },
}

/// One replayable action. Users are named by email; the replay resolves them.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    Register {
        email: String,
        registration: Registration,
    },
    Fund {
        email: String,
        amount: Amount,
    },
    /// Charge webhook for the actor's oldest open checkout.
    Callback {
        email: String,
        status: String,
        amount: Option<Amount>,
    },
    /// Transfer webhook for the actor's oldest open withdrawal.
    Transfer {
        email: String,
        status: String,
    },
    Request {
        email: String,
        creator: String,
        amount: Amount,
        method: PaymentMethod,
        fast_track: bool,
    },
    Fulfill {
        email: String,
        request: RequestId,
        video_url: String,
    },
    Decline {
        email: String,
        request: RequestId,
        reason: String,
    },
    Dispute {
        email: String,
        request: RequestId,
        reason: DisputeReason,
    },
    Resolve {
        email: String,
        dispute: DisputeId,
        outcome: DisputeOutcome,
    },
    Withdraw {
        email: String,
        amount: Amount,
    },
    Charge {
        email: String,
        kind: ChargeKind,
        percentage_bps: u32,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    actor: String,
    subject: Option<String>,
    amount: Option<f64>,
    option: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    wallet: WalletId,
    owner: &'a str,
    balance: String,
}

/// Read journal entries from a csv file
pub fn read_journal(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<JournalEntry, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        }))
}

fn parse_row(line: usize, row: InputRow) -> Result<JournalEntry, CsvError> {
    let kind = row.r#type.as_str();
    let email = row.actor.clone();
    let money = |value: f64| {
        Amount::from_major(value).ok_or_else(|| CsvError::InvalidField {
            line,
            field: "amount",
            value: value.to_string(),
        })
    };
    let amount = || {
        let value = row.amount.ok_or_else(|| CsvError::MissingAmount {
            line,
            kind: kind.to_string(),
        })?;
        money(value)
    };
    let subject = || {
        row.subject
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CsvError::MissingField {
                line,
                kind: kind.to_string(),
                field: "subject",
            })
    };
    let option = || {
        row.option
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CsvError::MissingField {
                line,
                kind: kind.to_string(),
                field: "option",
            })
    };
    let id = |value: String| {
        value.parse::<u64>().map_err(|_| CsvError::InvalidField {
            line,
            field: "subject",
            value,
        })
    };

    let entry = match kind {
        "register" => {
            let registration = match row.subject.as_deref().unwrap_or("regular") {
                "regular" | "" => Registration::Regular,
                "creator" => Registration::Creator {
                    fast_track_fee: row.amount.map(money).transpose()?.unwrap_or(Amount::ZERO),
                },
                other => {
                    return Err(CsvError::InvalidField {
                        line,
                        field: "subject",
                        value: other.to_string(),
                    });
                }
            };
            JournalEntry::Register {
                email,
                registration,
            }
        }
        "fund" => JournalEntry::Fund {
            email,
            amount: amount()?,
        },
        "callback" => JournalEntry::Callback {
            email,
            status: subject()?,
            amount: row.amount.map(money).transpose()?,
        },
        "transfer" => JournalEntry::Transfer {
            email,
            status: subject()?,
        },
        "request" => {
            let flags = row.option.as_deref().unwrap_or_default();
            let has = |flag: &str| flags.split('+').any(|f| f.trim() == flag);
            JournalEntry::Request {
                email,
                creator: subject()?,
                amount: amount()?,
                method: if has("card") {
                    PaymentMethod::Card
                } else {
                    PaymentMethod::Wallet
                },
                fast_track: has("fast"),
            }
        }
        "fulfill" => JournalEntry::Fulfill {
            email,
            request: id(subject()?)?,
            video_url: option()?,
        },
        "decline" => JournalEntry::Decline {
            email,
            request: id(subject()?)?,
            reason: option()?,
        },
        "dispute" => JournalEntry::Dispute {
            email,
            request: id(subject()?)?,
            reason: keyword(line, "option", &option()?)?,
        },
        "resolve" => JournalEntry::Resolve {
            email,
            dispute: id(subject()?)?,
            outcome: keyword(line, "option", &option()?)?,
        },
        "withdraw" => JournalEntry::Withdraw {
            email,
            amount: amount()?,
        },
        "charge" => {
            let bps = option()?;
            JournalEntry::Charge {
                email,
                kind: keyword(line, "subject", &subject()?)?,
                percentage_bps: bps.parse().map_err(|_| CsvError::InvalidField {
                    line,
                    field: "option",
                    value: bps,
                })?,
            }
        }
        other => {
            return Err(CsvError::UnrecognizedType {
                line,
                kind: other.to_string(),
            });
        }
    };
    Ok(entry)
}

/// Parse a snake_case keyword into one of the model enums.
fn keyword<T: DeserializeOwned>(line: usize, field: &'static str, value: &str) -> Result<T, CsvError> {
    let deserializer: StrDeserializer<'_, ValueError> = value.into_deserializer();
    T::deserialize(deserializer).map_err(|_| CsvError::InvalidField {
        line,
        field,
        value: value.to_string(),
    })
}

/// Write wallet balances in csv format
pub fn write_wallets<'a>(
    out: impl io::Write,
    wallets: impl IntoIterator<Item = (WalletId, &'a str, Amount)>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);

    for (wallet, owner, balance) in wallets {
        writer.serialize(OutputRow {
            wallet,
            owner,
            balance: balance.to_string(),
        })?;
    }

    writer.flush()?;
    Ok(())
}
