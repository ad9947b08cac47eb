use std::time::{SystemTime, UNIX_EPOCH};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::error::DomainError;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn parse_rfc3339_ms(value: &str) -> crate::DomainResult<i64> {
    let parsed = OffsetDateTime::parse(value.trim(), &Rfc3339).map_err(|err| {
        DomainError::Validation(format!("invalid timestamp `{value}`: {err}"))
    })?;
    Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
}
