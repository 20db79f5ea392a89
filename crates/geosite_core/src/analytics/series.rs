//! Chronological series over a site's analytics history.
//!
//! # Responsibility
//! - Order unordered analytics records by calendar date.
//! - Split records into one point list per measurement.
//! - Derive the latest snapshot shown in the site summary panel.
//!
//! # Invariants
//! - Ordering is ascending by date and stable: records sharing a date keep
//!   their input order.
//! - Every series has exactly one point per input record.

use crate::model::analytics::AnalyticsRecord;
use chrono::NaiveDate;
use serde::Serialize;

/// One chart point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Per-measurement point lists, all sharing the same date axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsSeries {
    pub carbon: Vec<SeriesPoint>,
    pub biodiversity: Vec<SeriesPoint>,
    pub tree_count: Vec<SeriesPoint>,
    pub vegetation_cover: Vec<SeriesPoint>,
    pub soil_carbon: Vec<SeriesPoint>,
}

impl AnalyticsSeries {
    pub fn is_empty(&self) -> bool {
        self.carbon.is_empty()
    }

    /// Dates shared by every series, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.carbon.iter().map(|point| point.date).collect()
    }
}

/// Latest snapshot plus coverage of the history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteSummary {
    pub latest: AnalyticsRecord,
    pub record_count: usize,
    pub first_date: NaiveDate,
}

/// Returns references to `records` sorted ascending by date (stable).
pub fn sorted_by_date(records: &[AnalyticsRecord]) -> Vec<&AnalyticsRecord> {
    let mut ordered: Vec<&AnalyticsRecord> = records.iter().collect();
    ordered.sort_by_key(|record| record.date);
    ordered
}

/// Builds chronologically ordered series for every measurement.
pub fn build_series(records: &[AnalyticsRecord]) -> AnalyticsSeries {
    let ordered = sorted_by_date(records);
    let column = |value: fn(&AnalyticsRecord) -> f64| -> Vec<SeriesPoint> {
        ordered
            .iter()
            .map(|record| SeriesPoint {
                date: record.date,
                value: value(record),
            })
            .collect()
    };

    AnalyticsSeries {
        carbon: column(|record| record.carbon_sequestration_tonnes),
        biodiversity: column(|record| record.biodiversity_score),
        tree_count: column(|record| record.tree_count as f64),
        vegetation_cover: column(|record| record.vegetation_cover_percentage),
        soil_carbon: column(|record| record.soil_carbon_percentage),
    }
}

/// Record with the greatest date; the last of equal dates wins.
///
/// `None` means no summary panel is shown.
pub fn latest(records: &[AnalyticsRecord]) -> Option<&AnalyticsRecord> {
    sorted_by_date(records).last().copied()
}

pub fn summary(records: &[AnalyticsRecord]) -> Option<SiteSummary> {
    let ordered = sorted_by_date(records);
    let first = ordered.first()?;
    let last = ordered.last()?;
    Some(SiteSummary {
        latest: (*last).clone(),
        record_count: ordered.len(),
        first_date: first.date,
    })
}

#[cfg(test)]
mod tests {
    use super::{build_series, latest, summary};
    use crate::model::analytics::AnalyticsRecord;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
    }

    fn record(day: &str, carbon: f64) -> AnalyticsRecord {
        AnalyticsRecord {
            id: Uuid::new_v4(),
            site_id: Uuid::nil(),
            date: date(day),
            carbon_sequestration_tonnes: carbon,
            biodiversity_score: 50.0,
            tree_count: 10,
            vegetation_cover_percentage: 40.0,
            soil_carbon_percentage: 2.5,
            created_at: 0,
        }
    }

    #[test]
    fn series_are_sorted_ascending_by_date() {
        let records = vec![
            record("2024-03-01", 3.0),
            record("2024-01-01", 1.0),
            record("2024-02-01", 2.0),
        ];
        let series = build_series(&records);
        assert_eq!(
            series.dates(),
            vec![date("2024-01-01"), date("2024-02-01"), date("2024-03-01")]
        );
        let carbon: Vec<f64> = series.carbon.iter().map(|p| p.value).collect();
        assert_eq!(carbon, vec![1.0, 2.0, 3.0]);
        assert_eq!(series.tree_count.len(), 3);
        assert_eq!(latest(&records).unwrap().date, date("2024-03-01"));
    }

    #[test]
    fn equal_dates_keep_input_order() {
        let records = vec![record("2024-05-01", 7.0), record("2024-05-01", 9.0)];
        let series = build_series(&records);
        assert_eq!(series.carbon[0].value, 7.0);
        assert_eq!(series.carbon[1].value, 9.0);
        assert_eq!(latest(&records).unwrap().carbon_sequestration_tonnes, 9.0);
    }

    #[test]
    fn empty_history_has_no_summary() {
        assert!(build_series(&[]).is_empty());
        assert!(latest(&[]).is_none());
        assert!(summary(&[]).is_none());
    }

    #[test]
    fn summary_reports_coverage() {
        let records = vec![record("2023-11-15", 1.0), record("2023-06-01", 0.5)];
        let summary = summary(&records).unwrap();
        assert_eq!(summary.record_count, 2);
        assert_eq!(summary.first_date, date("2023-06-01"));
        assert_eq!(summary.latest.date, date("2023-11-15"));
    }
}
