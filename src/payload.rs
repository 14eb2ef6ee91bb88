//! Per-entity payload schemas and conversion into store records
//!
//! Unknown fields are ignored. A non-key field that is missing, has the
//! wrong JSON type or cannot be parsed takes a default and logs a warning.
//! A missing or mistyped key field turns the record into a skip, since a
//! record without its natural key cannot be upserted.

use crate::source::ExternalRecord;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use hansard_core_store::{EntityKind, Expense, Legislator, Proposition, Record};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

/// Result of converting one external record
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Record(Record),
    Skip { reason: String },
}

/// A non-key field as it arrived
#[derive(Debug, PartialEq)]
enum Lenient<T> {
    Missing,
    Value(T),
    /// Present, but not a `T`
    Invalid,
}

impl<T> Default for Lenient<T> {
    fn default() -> Self {
        Lenient::Missing
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Lenient<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(Lenient::Missing);
        }
        Ok(serde_json::from_value(value)
            .map(Lenient::Value)
            .unwrap_or(Lenient::Invalid))
    }
}

#[derive(Debug, Deserialize)]
struct LegislatorPayload {
    id: Option<i64>,
    #[serde(default)]
    name: Lenient<String>,
    #[serde(default)]
    party: Lenient<String>,
    #[serde(default)]
    state: Lenient<String>,
    #[serde(default)]
    email: Lenient<String>,
}

#[derive(Debug, Deserialize)]
struct ExpensePayload {
    legislator_id: Option<i64>,
    document_code: Option<String>,
    year: Option<i32>,
    month: Option<u32>,
    #[serde(default)]
    expense_type: Lenient<String>,
    #[serde(default)]
    supplier: Lenient<String>,
    #[serde(default)]
    net_value: Lenient<f64>,
    #[serde(default)]
    document_date: Lenient<String>,
}

#[derive(Debug, Deserialize)]
struct PropositionPayload {
    id: Option<i64>,
    #[serde(rename = "type", default)]
    kind: Lenient<String>,
    #[serde(default)]
    number: Lenient<i64>,
    #[serde(default)]
    year: Lenient<i32>,
    #[serde(default)]
    summary: Lenient<String>,
    #[serde(default)]
    presented_at: Lenient<String>,
}

/// Collects defaulted fields so each record logs once
struct Defaults<'a> {
    entity: EntityKind,
    key: &'a str,
    missing: Vec<&'static str>,
    invalid: Vec<&'static str>,
}

impl<'a> Defaults<'a> {
    fn new(entity: EntityKind, key: &'a str) -> Self {
        Self {
            entity,
            key,
            missing: Vec::new(),
            invalid: Vec::new(),
        }
    }

    /// The field's value, or its default
    fn take<T: Default>(&mut self, field: &'static str, value: Lenient<T>) -> T {
        let value = self.optional(field, value);
        self.or_default(field, value)
    }

    /// The field's value when well-typed; an absent field is not noted
    fn optional<T>(&mut self, field: &'static str, value: Lenient<T>) -> Option<T> {
        match value {
            Lenient::Value(v) => Some(v),
            Lenient::Missing => None,
            Lenient::Invalid => {
                self.invalid.push(field);
                None
            }
        }
    }

    /// Like [`Defaults::optional`], then `parse`; unparseable text is noted
    fn parsed<T>(
        &mut self,
        field: &'static str,
        value: Lenient<String>,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        let raw = self.optional(field, value)?;
        let parsed = parse(&raw);
        if parsed.is_none() {
            self.invalid.push(field);
        }
        parsed
    }

    fn or_default<T: Default>(&mut self, field: &'static str, value: Option<T>) -> T {
        value.unwrap_or_else(|| {
            if !self.invalid.contains(&field) {
                self.missing.push(field);
            }
            T::default()
        })
    }

    fn finish(self) {
        if !self.missing.is_empty() || !self.invalid.is_empty() {
            warn!(
                entity = %self.entity,
                key = self.key,
                missing = ?self.missing,
                invalid = ?self.invalid,
                "Using defaults for missing or invalid fields"
            );
        }
    }
}

fn skip(reason: impl Into<String>) -> Conversion {
    Conversion::Skip {
        reason: reason.into(),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            parse_date(raw)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

/// Convert one external record of kind `entity`
pub fn convert(entity: EntityKind, raw: &ExternalRecord) -> Conversion {
    if !raw.is_object() {
        return skip("record is not a JSON object");
    }
    match entity {
        EntityKind::Legislator => convert_legislator(raw),
        EntityKind::Expense => convert_expense(raw),
        EntityKind::Proposition => convert_proposition(raw),
    }
}

fn convert_legislator(raw: &ExternalRecord) -> Conversion {
    let payload: LegislatorPayload = match serde_json::from_value(raw.clone()) {
        Ok(p) => p,
        Err(e) => return skip(format!("malformed legislator: {}", e)),
    };
    let Some(legislator_id) = payload.id else {
        return skip("legislator without id");
    };

    let key = legislator_id.to_string();
    let mut defaults = Defaults::new(EntityKind::Legislator, &key);
    let record = Legislator {
        legislator_id,
        name: defaults.take("name", payload.name),
        party: defaults.take("party", payload.party),
        state: defaults.take("state", payload.state),
        email: defaults
            .optional("email", payload.email)
            .filter(|e| !e.trim().is_empty()),
    };
    defaults.finish();

    Conversion::Record(Record::Legislator(record))
}

fn convert_expense(raw: &ExternalRecord) -> Conversion {
    let payload: ExpensePayload = match serde_json::from_value(raw.clone()) {
        Ok(p) => p,
        Err(e) => return skip(format!("malformed expense: {}", e)),
    };
    let (Some(legislator_id), Some(document_code), Some(year), Some(month)) = (
        payload.legislator_id,
        payload.document_code.filter(|c| !c.trim().is_empty()),
        payload.year,
        payload.month,
    ) else {
        return skip("expense without legislator_id, document_code, year or month");
    };

    let key = format!("{}/{}/{:04}-{:02}", legislator_id, document_code, year, month);
    let mut defaults = Defaults::new(EntityKind::Expense, &key);
    let net_value: f64 = defaults.take("net_value", payload.net_value);
    let record = Expense {
        legislator_id,
        document_code,
        year,
        month,
        expense_type: defaults.take("expense_type", payload.expense_type),
        supplier: defaults.take("supplier", payload.supplier),
        amount_cents: (net_value * 100.0).round() as i64,
        document_date: defaults.parsed("document_date", payload.document_date, parse_date),
    };
    defaults.finish();

    Conversion::Record(Record::Expense(record))
}

fn convert_proposition(raw: &ExternalRecord) -> Conversion {
    let payload: PropositionPayload = match serde_json::from_value(raw.clone()) {
        Ok(p) => p,
        Err(e) => return skip(format!("malformed proposition: {}", e)),
    };
    let Some(proposition_id) = payload.id else {
        return skip("proposition without id");
    };

    let key = proposition_id.to_string();
    let mut defaults = Defaults::new(EntityKind::Proposition, &key);
    let presented_at = defaults.parsed("presented_at", payload.presented_at, parse_timestamp);
    let year = defaults
        .optional("year", payload.year)
        .or(presented_at.map(|dt| dt.year()));
    let year = defaults.or_default("year", year);
    let record = Proposition {
        proposition_id,
        kind: defaults.take("type", payload.kind),
        number: defaults.take("number", payload.number),
        year,
        summary: defaults.take("summary", payload.summary),
        presented_at,
    };
    defaults.finish();

    Conversion::Record(Record::Proposition(record))
}
