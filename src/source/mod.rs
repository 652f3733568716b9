//! Read-only view of the legacy ("source") schema.
//!
//! All record kinds are snapshotted into memory up front by [`load`]; the
//! translation pipeline itself is synchronous and never touches the wire.

pub mod load;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct SourceBuilding {
    pub short_name: String,
    pub street: String,
    pub number: String,
    pub zip_code: String,
}

#[derive(Debug, Clone)]
pub struct SourceSwitch {
    pub name: String,
    pub building: String,
    pub level: i32,
    pub room_number: String,
    pub management_ip: String,
}

/// Flat legacy access record loosely encoding room and switch wiring as
/// free-form string fields.
#[derive(Debug, Clone)]
pub struct SourceAccess {
    pub id: i64,
    pub building: Option<String>,
    pub floor: Option<String>,
    pub flat: Option<String>,
    pub room: Option<String>,
    pub switch: Option<String>,
    pub port: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceDirectoryEntry {
    pub uid_number: i64,
    pub gid_number: i64,
    pub home_directory: String,
}

#[derive(Debug, Clone)]
pub struct SourceAccount {
    /// Natural key of the legacy account, also its login.
    pub account: String,
    pub name: String,
    pub system_account: bool,
    /// Login of an already-migrated target user this account maps to.
    pub target_login: Option<String>,
    pub entry_date: Option<NaiveDate>,
    pub date_of_birth: Option<NaiveDate>,
    pub access_id: Option<i64>,
    pub mail: Option<String>,
    pub directory_entry: Option<SourceDirectoryEntry>,
}

#[derive(Debug, Clone)]
pub struct SourceStatementLine {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub amount_cents: i64,
    pub purpose: String,
    pub payer: String,
    /// Legacy account this line was matched to, if any.
    pub account: Option<String>,
    /// Free-form legacy name for lines whose account no longer exists.
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceFeeEntry {
    pub fee_id: i64,
    pub account: String,
    pub amount_cents: i64,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SourceSubnet {
    pub id: i64,
    pub description: Option<String>,
    pub cidr: String,
    pub gateway: Option<String>,
    pub vlan_id: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct SourceExternalResidence {
    pub account: String,
    pub street: String,
    pub zip: String,
    pub residence: String,
}

/// Everything the pipeline reads, fetched once per run.
#[derive(Debug, Default)]
pub struct SourceSnapshot {
    pub buildings: Vec<SourceBuilding>,
    pub switches: Vec<SourceSwitch>,
    pub accesses: Vec<SourceAccess>,
    pub accounts: Vec<SourceAccount>,
    pub statement_lines: Vec<SourceStatementLine>,
    pub fees: Vec<SourceFeeEntry>,
    pub subnets: Vec<SourceSubnet>,
    pub external_residences: Vec<SourceExternalResidence>,
}

impl SourceSnapshot {
    pub fn access(&self, id: i64) -> Option<&SourceAccess> {
        self.accesses.iter().find(|a| a.id == id)
    }

    pub fn residence(&self, account: &str) -> Option<&SourceExternalResidence> {
        self.external_residences.iter().find(|r| r.account == account)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed {column} in {table}: {detail}")]
    Malformed {
        table: &'static str,
        column: &'static str,
        detail: String,
    },
}

/// Parses a decimal money string (`"123.45"`, `"-7"`, `"0.5"`) into cents.
///
/// The legacy schema stores amounts as NUMERIC(.., 2); selecting them as text
/// and parsing here keeps the whole pipeline in integer arithmetic.
pub fn parse_amount_cents(raw: &str) -> Result<i64, String> {
    let trimmed = raw.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (whole, fraction) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(format!("empty amount {raw:?}"));
    }
    if fraction.len() > 2 {
        return Err(format!("more than two fraction digits in {raw:?}"));
    }
    let whole_value: i64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| format!("invalid whole part in {raw:?}"))?
    };
    let fraction_value: i64 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{fraction:0<2}");
        padded
            .parse()
            .map_err(|_| format!("invalid fraction part in {raw:?}"))?
    };
    let cents = whole_value * 100 + fraction_value;
    Ok(if negative { -cents } else { cents })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_amounts() {
        assert_eq!(parse_amount_cents("123.45"), Ok(12345));
        assert_eq!(parse_amount_cents("123"), Ok(12300));
        assert_eq!(parse_amount_cents("0.5"), Ok(50));
        assert_eq!(parse_amount_cents(" 7.00 "), Ok(700));
    }

    #[test]
    fn parses_negative_amounts() {
        assert_eq!(parse_amount_cents("-3.50"), Ok(-350));
        assert_eq!(parse_amount_cents("-3"), Ok(-300));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_amount_cents("").is_err());
        assert!(parse_amount_cents("-").is_err());
        assert!(parse_amount_cents("1.234").is_err());
        assert!(parse_amount_cents("12,34").is_err());
    }
}
