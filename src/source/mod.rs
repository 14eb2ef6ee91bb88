//! Upstream data source abstraction and its HTTP implementation
//!
//! A [`DataSource`] hands back raw JSON records (the external shape). The
//! sync layer converts them into typed records before persisting.

pub mod cache;
pub mod client;
pub mod error;

pub use cache::ResponseCache;
pub use client::ResilientClient;
pub use error::FetchError;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use hansard_core_store::EntityKind;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// One record as the upstream sent it
pub type ExternalRecord = Value;

/// Query filters for a paged listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters(BTreeMap<String, String>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter, replacing any previous value for `name`
    pub fn with(mut self, name: &str, value: impl ToString) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    /// Expenses for one calendar month
    pub fn period(year: i32, month: u32) -> Self {
        Self::new().with("year", year).with("month", month)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    /// Window from `start` to `end`, swapped if given in reverse
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// First to last day of a calendar month
    pub fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Some(Self {
            start,
            end: next.pred_opt()?,
        })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Whether the window covers exactly one calendar month
    pub fn is_whole_month(&self) -> bool {
        Window::month(self.start.year(), self.start.month()) == Some(*self)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Fetch operations the sync layer needs from the upstream
///
/// Every call takes the caller's cancellation token; a fired token yields
/// an error for which [`FetchError::is_cancellation`] is true.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// One page of a listing (1-based); an empty page means the end
    async fn list_page(
        &self,
        cancel: &CancellationToken,
        entity: EntityKind,
        filters: &Filters,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<ExternalRecord>, FetchError>;

    /// A single record; `None` when the upstream does not know the id
    async fn get_by_id(
        &self,
        cancel: &CancellationToken,
        entity: EntityKind,
        id: i64,
    ) -> Result<Option<ExternalRecord>, FetchError>;

    /// Every record dated inside `window`
    async fn list_by_window(
        &self,
        cancel: &CancellationToken,
        entity: EntityKind,
        window: &Window,
    ) -> Result<Vec<ExternalRecord>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_windows() {
        let feb = Window::month(2024, 2).unwrap();
        assert_eq!(feb.end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(feb.days(), 29);
        assert!(feb.is_whole_month());

        let dec = Window::month(2023, 12).unwrap();
        assert_eq!(dec.end, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
        assert!(Window::month(2023, 13).is_none());
    }

    #[test]
    fn test_window_normalises_order() {
        let a = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let window = Window::new(a, b);
        assert_eq!(window.start, b);
        assert_eq!(window.end, a);
        assert_eq!(window.days(), 10);
        assert!(!window.is_whole_month());
        assert_eq!(window.to_string(), "2024-05-01..2024-05-10");
    }

    #[test]
    fn test_filters_are_ordered_and_replace() {
        let filters = Filters::period(2023, 4).with("month", 5);
        let pairs: Vec<_> = filters.iter().collect();
        assert_eq!(pairs, vec![("month", "5"), ("year", "2023")]);
        assert_eq!(filters.get("year"), Some("2023"));
    }
}
