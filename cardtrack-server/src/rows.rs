//! Row decoding helpers shared by the stores

use cardtrack_common::models::{ExtraColumns, UserSummary};
use cardtrack_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

/// Columns selected for a joined user summary, aliased with `prefix`
pub(crate) fn user_summary_columns(table_alias: &str, prefix: &str) -> String {
    format!(
        "{a}.id AS {p}_id, {a}.username AS {p}_username, {a}.role AS {p}_role, \
         {a}.employee_id AS {p}_employee_id, {a}.is_active AS {p}_is_active",
        a = table_alias,
        p = prefix
    )
}

/// Decode a LEFT JOINed user summary; `None` when the join found no user
pub(crate) fn user_summary(row: &SqliteRow, prefix: &str) -> Result<Option<UserSummary>> {
    let id: Option<i64> = row.try_get(format!("{}_id", prefix).as_str())?;
    let Some(id) = id else {
        return Ok(None);
    };

    Ok(Some(UserSummary {
        id,
        username: row.try_get(format!("{}_username", prefix).as_str())?,
        role: parse_stored(row.try_get(format!("{}_role", prefix).as_str())?)?,
        employee_id: row.try_get(format!("{}_employee_id", prefix).as_str())?,
        is_active: row.try_get(format!("{}_is_active", prefix).as_str())?,
    }))
}

/// Parse an enumeration read back from storage.
///
/// The schema's CHECK constraints make failure here a corrupted database,
/// not a caller mistake, so it is reported as internal.
pub(crate) fn parse_stored<T>(text: String) -> Result<T>
where
    T: FromStr<Err = Error>,
{
    text.parse()
        .map_err(|e: Error| Error::Internal(format!("stored value rejected: {}", e)))
}

pub(crate) fn decode_extra(json: &str) -> Result<ExtraColumns> {
    Ok(serde_json::from_str(json)?)
}

pub(crate) fn encode_extra(extra: &ExtraColumns) -> Result<String> {
    Ok(serde_json::to_string(extra)?)
}
