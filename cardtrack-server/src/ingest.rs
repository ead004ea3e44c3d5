//! Batch ingest
//!
//! Turns externally supplied rows (application intake or a continuation
//! upload) into store writes. Rows are isolated: each one is validated and
//! written on its own, so a bad row is reported and skipped while the rows
//! before and after it still land. Duplicate detection is left to the
//! storage layer's unique constraints.
//!
//! Columns outside the recognized set are kept verbatim in `extra_columns`.

use cardtrack_common::models::{
    CardPosition, CardType, ExtraColumns, NewApplication, NewContinuationRecord, Principal,
};
use cardtrack_common::{time, Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::applications::ApplicationStore;
use crate::continuation::ContinuationStore;
use crate::policy::{self, Operation};

/// Recognized application intake columns
pub const APPLICATION_COLUMNS: &[&str] = &[
    "DATE", "Br Code", "App ID", "Name", "Card", "Type", "Remarks", "Work On", "Inform To", "IPT",
];

/// Recognized continuation upload columns
pub const CONTINUATION_COLUMNS: &[&str] = &["App ID", "Name", "Br Code"];

/// One raw cell as delivered by a batch adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Empty,
    Bool(bool),
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl RawValue {
    /// Cell text, `None` for blank cells. Integral numbers drop the
    /// fractional part so numeric ids read back as typed (`20001`, not
    /// `20001.0`).
    pub fn render(&self) -> Option<String> {
        match self {
            RawValue::Empty => None,
            RawValue::Bool(b) => Some(b.to_string()),
            RawValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Some(format!("{}", *n as i64))
            }
            RawValue::Number(n) => Some(n.to_string()),
            RawValue::Date(d) => Some(d.to_string()),
            RawValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
        }
    }

    fn as_date(&self) -> Option<std::result::Result<NaiveDate, String>> {
        match self {
            RawValue::Date(d) => Some(Ok(*d)),
            other => other.render().map(|text| parse_date(&text)),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<NaiveDate> for RawValue {
    fn from(value: NaiveDate) -> Self {
        RawValue::Date(value)
    }
}

/// Column name → raw cell
pub type Row = BTreeMap<String, RawValue>;

/// Where a batch is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestTarget {
    Applications,
    Continuation { upload_date: NaiveDate },
}

/// Outcome of one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub created_count: usize,
    /// `Row <n>: <reason>`, 1-based, in row order
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct BatchIngest {
    applications: ApplicationStore,
    continuation: ContinuationStore,
}

impl BatchIngest {
    pub fn new(applications: ApplicationStore, continuation: ContinuationStore) -> Self {
        Self {
            applications,
            continuation,
        }
    }

    /// Ingest `rows` into `target`.
    ///
    /// Only a permission failure aborts the batch; every other failure is
    /// reported against its row.
    pub async fn ingest<I>(&self, rows: I, target: IngestTarget, actor: &Principal) -> Result<IngestReport>
    where
        I: IntoIterator<Item = Row>,
    {
        policy::require(actor, Operation::IngestBatch, None)?;

        let mut report = IngestReport::default();
        for (index, row) in rows.into_iter().enumerate() {
            let row_number = index + 1;
            let outcome = match target {
                IngestTarget::Applications => self.ingest_application(&row, actor).await,
                IngestTarget::Continuation { upload_date } => {
                    self.ingest_continuation(&row, upload_date, actor).await
                }
            };

            match outcome {
                Ok(()) => report.created_count += 1,
                Err(e) => {
                    if matches!(e, Error::Database(_) | Error::Internal(_)) {
                        warn!("Row {} failed to persist: {}", row_number, e);
                    }
                    report.errors.push(format!("Row {}: {}", row_number, e));
                }
            }
        }

        info!(
            actor = actor.id,
            ?target,
            created = report.created_count,
            rejected = report.errors.len(),
            "Batch ingest finished"
        );
        Ok(report)
    }

    async fn ingest_application(&self, row: &Row, actor: &Principal) -> Result<()> {
        let new_app = application_from_row(row, time::today())?;
        self.applications.create(new_app, actor).await?;
        Ok(())
    }

    async fn ingest_continuation(&self, row: &Row, upload_date: NaiveDate, actor: &Principal) -> Result<()> {
        let record = continuation_from_row(row, upload_date)?;
        self.continuation.insert(record, actor).await?;
        Ok(())
    }
}

/// Map an intake row onto a new application. A missing `DATE` means `today`.
pub fn application_from_row(row: &Row, today: NaiveDate) -> Result<NewApplication> {
    let date = match row.get("DATE").and_then(RawValue::as_date) {
        None => today,
        Some(Ok(date)) => date,
        Some(Err(text)) => {
            return Err(Error::Validation(format!("DATE '{}' is not a valid date", text)));
        }
    };

    let card_position: CardPosition = required(row, "Card")?.to_uppercase().parse()?;
    let card_type: CardType = required(row, "Type")?.to_uppercase().parse()?;

    Ok(NewApplication {
        app_id: required(row, "App ID")?,
        date,
        branch_code: required(row, "Br Code")?,
        customer_name: required(row, "Name")?,
        card_position,
        card_type,
        remarks: optional(row, "Remarks"),
        work_on: optional(row, "Work On"),
        inform_to: optional(row, "Inform To"),
        ipt: optional(row, "IPT"),
        extra_columns: extra_columns(row, APPLICATION_COLUMNS),
    })
}

/// Map an upload row onto a continuation record for `upload_date`
pub fn continuation_from_row(row: &Row, upload_date: NaiveDate) -> Result<NewContinuationRecord> {
    Ok(NewContinuationRecord {
        app_id: required(row, "App ID")?,
        upload_date,
        customer_name: required(row, "Name")?,
        branch_code: optional(row, "Br Code").unwrap_or_default(),
        extra_columns: extra_columns(row, CONTINUATION_COLUMNS),
    })
}

fn required(row: &Row, column: &str) -> Result<String> {
    optional(row, column)
        .ok_or_else(|| Error::Validation(format!("missing required column '{}'", column)))
}

fn optional(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(RawValue::render)
}

fn extra_columns(row: &Row, recognized: &[&str]) -> ExtraColumns {
    row.iter()
        .filter(|(column, _)| !recognized.contains(&column.as_str()))
        .filter_map(|(column, value)| value.render().map(|text| (column.clone(), text)))
        .collect()
}

/// ISO dates, optionally followed by a time of day (spreadsheet exports
/// frequently carry `00:00:00`)
fn parse_date(text: &str) -> std::result::Result<NaiveDate, String> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date);
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(datetime.date());
        }
    }
    Err(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[(&str, RawValue)]) -> Row {
        cells
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
    }

    fn intake_row() -> Row {
        row(&[
            ("DATE", "2024-07-01".into()),
            ("Br Code", 101.0.into()),
            ("App ID", 20001.0.into()),
            ("Name", "Jane Roe".into()),
            ("Card", "main".into()),
            ("Type", "Gold".into()),
            ("Remarks", RawValue::Empty),
            ("Channel", "Branch walk-in".into()),
        ])
    }

    #[test]
    fn test_render_numbers_and_blanks() {
        assert_eq!(RawValue::Number(20001.0).render().as_deref(), Some("20001"));
        assert_eq!(RawValue::Number(2.5).render().as_deref(), Some("2.5"));
        assert_eq!(RawValue::Text("   ".to_string()).render(), None);
        assert_eq!(RawValue::Empty.render(), None);
        assert_eq!(RawValue::Text(" B01 ".to_string()).render().as_deref(), Some("B01"));
    }

    #[test]
    fn test_raw_value_from_json() {
        let parsed: Row =
            serde_json::from_str(r#"{"App ID": 20001, "Name": "Jane", "DATE": "2024-07-01", "IPT": null}"#)
                .unwrap();
        assert_eq!(parsed["App ID"], RawValue::Number(20001.0));
        assert_eq!(parsed["Name"], RawValue::Text("Jane".to_string()));
        assert_eq!(parsed["DATE"], RawValue::Date(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
        assert_eq!(parsed["IPT"], RawValue::Empty);
    }

    #[test]
    fn test_application_row_mapping() {
        let new_app = application_from_row(&intake_row(), today()).unwrap();
        assert_eq!(new_app.app_id, "20001");
        assert_eq!(new_app.branch_code, "101");
        assert_eq!(new_app.date, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(new_app.card_position, CardPosition::Main);
        assert_eq!(new_app.card_type, CardType::Gold);
        assert_eq!(new_app.remarks, None);
        assert_eq!(new_app.extra_columns.len(), 1);
        assert_eq!(new_app.extra_columns["Channel"], "Branch walk-in");
    }

    #[test]
    fn test_application_row_defaults_date_to_today() {
        let mut r = intake_row();
        r.remove("DATE");
        assert_eq!(application_from_row(&r, today()).unwrap().date, today());

        r.insert("DATE".to_string(), "2024-07-02 00:00:00".into());
        assert_eq!(
            application_from_row(&r, today()).unwrap().date,
            NaiveDate::from_ymd_opt(2024, 7, 2).unwrap()
        );

        r.insert("DATE".to_string(), "next tuesday".into());
        let err = application_from_row(&r, today()).unwrap_err();
        assert!(err.to_string().contains("next tuesday"));
    }

    #[test]
    fn test_application_row_rejects_bad_enums_and_missing_fields() {
        let mut r = intake_row();
        r.insert("Type".to_string(), "Silver".into());
        assert!(matches!(application_from_row(&r, today()), Err(Error::Validation(_))));

        let mut r = intake_row();
        r.insert("Name".to_string(), RawValue::Empty);
        let err = application_from_row(&r, today()).unwrap_err();
        assert!(err.to_string().contains("'Name'"));
    }

    #[test]
    fn test_continuation_row_mapping() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 20).unwrap();
        let r = row(&[
            ("App ID", "APP20001".into()),
            ("Name", "Jane Roe".into()),
            ("Limit", 50000.0.into()),
            ("Note", RawValue::Empty),
        ]);
        let record = continuation_from_row(&r, date).unwrap();
        assert_eq!(record.branch_code, "");
        assert_eq!(record.upload_date, date);
        assert_eq!(record.extra_columns.len(), 1);
        assert_eq!(record.extra_columns["Limit"], "50000");

        let missing = row(&[("Name", "Jane Roe".into())]);
        assert!(continuation_from_row(&missing, date).is_err());
    }
}
