//! Internal record types and their natural keys
//!
//! Every record carries a natural key. Two records with the same key are the
//! same logical fact: storing both leaves one row holding the second write's
//! non-key fields.

use crate::error::StoreError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of entity the pipeline ingests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Legislator,
    Expense,
    Proposition,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Legislator,
        EntityKind::Expense,
        EntityKind::Proposition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Legislator => "legislator",
            EntityKind::Expense => "expense",
            EntityKind::Proposition => "proposition",
        }
    }

    /// Backing table in the SQL schema
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Legislator => "legislators",
            EntityKind::Expense => "expenses",
            EntityKind::Proposition => "propositions",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legislator" | "legislators" => Ok(EntityKind::Legislator),
            "expense" | "expenses" => Ok(EntityKind::Expense),
            "proposition" | "propositions" => Ok(EntityKind::Proposition),
            _ => Err(StoreError::Corrupt {
                column: "entity_kind",
                value: s.to_string(),
            }),
        }
    }
}

/// A member of the legislature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Legislator {
    pub legislator_id: i64,
    pub name: String,
    pub party: String,
    pub state: String,
    pub email: Option<String>,
}

/// One reimbursed expense document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expense {
    pub legislator_id: i64,
    pub document_code: String,
    pub year: i32,
    pub month: u32,
    pub expense_type: String,
    pub supplier: String,
    /// Net value in cents
    pub amount_cents: i64,
    pub document_date: Option<NaiveDate>,
}

/// A bill, motion or other proposition filed in the legislature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposition {
    pub proposition_id: i64,
    pub kind: String,
    pub number: i64,
    pub year: i32,
    pub summary: String,
    pub presented_at: Option<DateTime<Utc>>,
}

/// Identity of a stored record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NaturalKey {
    Legislator(i64),
    Expense {
        legislator_id: i64,
        document_code: String,
        year: i32,
        month: u32,
    },
    Proposition(i64),
}

impl NaturalKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            NaturalKey::Legislator(_) => EntityKind::Legislator,
            NaturalKey::Expense { .. } => EntityKind::Expense,
            NaturalKey::Proposition(_) => EntityKind::Proposition,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Legislator(id) => write!(f, "legislator:{}", id),
            NaturalKey::Expense {
                legislator_id,
                document_code,
                year,
                month,
            } => write!(
                f,
                "expense:{}/{}/{:04}-{:02}",
                legislator_id, document_code, year, month
            ),
            NaturalKey::Proposition(id) => write!(f, "proposition:{}", id),
        }
    }
}

/// Any record the store accepts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Legislator(Legislator),
    Expense(Expense),
    Proposition(Proposition),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Legislator(_) => EntityKind::Legislator,
            Record::Expense(_) => EntityKind::Expense,
            Record::Proposition(_) => EntityKind::Proposition,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        match self {
            Record::Legislator(l) => NaturalKey::Legislator(l.legislator_id),
            Record::Expense(e) => NaturalKey::Expense {
                legislator_id: e.legislator_id,
                document_code: e.document_code.clone(),
                year: e.year,
                month: e.month,
            },
            Record::Proposition(p) => NaturalKey::Proposition(p.proposition_id),
        }
    }

    /// Reject records whose key fields cannot identify a row
    ///
    /// Both backends call this before writing, so a bad record fails the
    /// same way everywhere.
    pub fn validate(&self) -> Result<(), StoreError> {
        let reject = |reason: String| {
            Err(StoreError::Rejected {
                key: self.natural_key().to_string(),
                reason,
            })
        };

        match self {
            Record::Legislator(l) if l.legislator_id <= 0 => {
                reject(format!("legislator_id must be positive, got {}", l.legislator_id))
            }
            Record::Expense(e) if e.document_code.trim().is_empty() => {
                reject("document_code is empty".to_string())
            }
            Record::Expense(e) if !(1..=12).contains(&e.month) => {
                reject(format!("month out of range: {}", e.month))
            }
            Record::Proposition(p) if p.proposition_id <= 0 => reject(format!(
                "proposition_id must be positive, got {}",
                p.proposition_id
            )),
            _ => Ok(()),
        }
    }
}

impl From<Legislator> for Record {
    fn from(value: Legislator) -> Self {
        Record::Legislator(value)
    }
}

impl From<Expense> for Record {
    fn from(value: Expense) -> Self {
        Record::Expense(value)
    }
}

impl From<Proposition> for Record {
    fn from(value: Proposition) -> Self {
        Record::Proposition(value)
    }
}
