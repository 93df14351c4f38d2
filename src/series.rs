use chrono::NaiveDate;
use tracing::warn;

use crate::error::CoreError;
use crate::models::{CaseRecord, LocationSeries};

/// Map an English month name to its 1-12 number.
pub fn month_from_name(name: &str) -> Option<u32> {
    let number = match name {
        "January" => 1,
        "February" => 2,
        "March" => 3,
        "April" => 4,
        "May" => 5,
        "June" => 6,
        "July" => 7,
        "August" => 8,
        "September" => 9,
        "October" => 10,
        "November" => 11,
        "December" => 12,
        _ => return None,
    };
    Some(number)
}

/// Last calendar day of the given month.
pub fn month_end(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap_or(NaiveDate::MAX)
        .pred_opt()
        .unwrap_or(NaiveDate::MAX)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// Build the regular month-end series for one location.
///
/// A recorded value of exactly zero is treated as missing and backward-filled
/// from the next known value before resampling; an unavoidable consequence is
/// that a true zero-case month cannot be told apart from absent data. The
/// sentinel is preserved here deliberately rather than reinterpreted.
pub fn prepare_series(
    location: &str,
    records: &[CaseRecord],
) -> Result<LocationSeries, CoreError> {
    let mut rows: Vec<(i32, u32, i64)> = Vec::new();
    for record in records {
        if record.location != location {
            continue;
        }
        if record.month < 1 || record.month > 12 {
            return Err(CoreError::data(format!(
                "invalid month {} for {location}",
                record.month
            )));
        }
        rows.push((record.year, record.month, record.cases));
    }

    if rows.is_empty() {
        return Err(CoreError::Model(format!("no case records for {location}")));
    }

    rows.sort_by_key(|(year, month, _)| (*year, *month));

    // Zero-as-missing, then backward fill from the next known value.
    let mut values: Vec<Option<f64>> = rows
        .iter()
        .map(|(_, _, cases)| (*cases != 0).then_some(*cases as f64))
        .collect();
    let mut carry: Option<f64> = None;
    for value in values.iter_mut().rev() {
        match value {
            Some(v) => carry = Some(*v),
            None => *value = carry,
        }
    }

    if values.iter().all(|v| v.is_none()) {
        return Err(CoreError::Model(format!(
            "no usable observations for {location}"
        )));
    }

    // Resample onto the month-end grid, averaging duplicate source months.
    let (first_year, first_month, _) = rows[0];
    let (last_year, last_month, _) = rows[rows.len() - 1];
    let mut grid: Vec<(NaiveDate, Option<f64>)> = Vec::new();
    let (mut year, mut month) = (first_year, first_month);
    loop {
        let mut sum = 0.0;
        let mut count = 0usize;
        for ((row_year, row_month, _), value) in rows.iter().zip(values.iter()) {
            if *row_year == year && *row_month == month {
                if let Some(v) = value {
                    sum += v;
                    count += 1;
                }
            }
        }
        let bucket = (count > 0).then(|| sum / count as f64);
        grid.push((month_end(year, month), bucket));
        if year == last_year && month == last_month {
            break;
        }
        (year, month) = next_month(year, month);
    }

    let points = interpolate(grid);
    let low_confidence = points.len() < 12;
    if low_confidence {
        warn!(location, points = points.len(), "limited history, forecast accuracy may be low");
    }

    Ok(LocationSeries {
        location: location.to_string(),
        points,
        low_confidence,
    })
}

/// Fill remaining gaps: linear between known neighbours, last known value
/// carried past the final observation, first known value carried back to
/// the start of the grid.
fn interpolate(grid: Vec<(NaiveDate, Option<f64>)>) -> Vec<(NaiveDate, f64)> {
    let known: Vec<(usize, f64)> = grid
        .iter()
        .enumerate()
        .filter_map(|(i, (_, v))| v.map(|v| (i, v)))
        .collect();

    grid.iter()
        .enumerate()
        .map(|(i, (date, value))| {
            let filled = value.unwrap_or_else(|| {
                let before = known.iter().rev().find(|(k, _)| *k < i);
                let after = known.iter().find(|(k, _)| *k > i);
                match (before, after) {
                    (Some((i0, v0)), Some((i1, v1))) => {
                        let span = (i1 - i0) as f64;
                        v0 + (v1 - v0) * ((i - i0) as f64 / span)
                    }
                    (Some((_, v0)), None) => *v0,
                    (None, Some((_, v1))) => *v1,
                    (None, None) => 0.0,
                }
            });
            (*date, filled)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(year: i32, month: u32, cases: i64) -> CaseRecord {
        CaseRecord {
            location: "Whitefield".to_string(),
            year,
            month,
            cases,
        }
    }

    #[test]
    fn month_names_map_to_numbers() {
        assert_eq!(month_from_name("January"), Some(1));
        assert_eq!(month_from_name("December"), Some(12));
        assert_eq!(month_from_name("Janvier"), None);
    }

    #[test]
    fn month_end_handles_year_boundary() {
        assert_eq!(month_end(2024, 12), NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert_eq!(month_end(2024, 2), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn zeros_are_backfilled_from_next_known_value() {
        let records = vec![record(2024, 1, 0), record(2024, 2, 0), record(2024, 3, 30)];
        let series = prepare_series("Whitefield", &records).unwrap();
        let values: Vec<f64> = series.points.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![30.0, 30.0, 30.0]);
    }

    #[test]
    fn trailing_zero_carries_last_known_value() {
        let records = vec![record(2024, 1, 12), record(2024, 2, 18), record(2024, 3, 0)];
        let series = prepare_series("Whitefield", &records).unwrap();
        let values: Vec<f64> = series.points.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![12.0, 18.0, 18.0]);
    }

    #[test]
    fn missing_months_are_linearly_interpolated() {
        let records = vec![record(2024, 1, 10), record(2024, 4, 40)];
        let series = prepare_series("Whitefield", &records).unwrap();
        let values: Vec<f64> = series.points.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0, 40.0]);
        assert_eq!(series.points[1].0, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn duplicate_source_months_are_averaged() {
        let records = vec![record(2024, 1, 10), record(2024, 1, 20)];
        let series = prepare_series("Whitefield", &records).unwrap();
        assert_eq!(series.points.len(), 1);
        assert_eq!(series.points[0].1, 15.0);
    }

    #[test]
    fn short_history_is_flagged_low_confidence() {
        let records = vec![record(2024, 1, 5), record(2024, 2, 8)];
        let series = prepare_series("Whitefield", &records).unwrap();
        assert!(series.low_confidence);
    }

    #[test]
    fn two_full_years_are_not_flagged() {
        let records: Vec<CaseRecord> = (0..24)
            .map(|i| record(2023 + (i / 12) as i32, (i % 12) + 1, 10 + i as i64))
            .collect();
        let series = prepare_series("Whitefield", &records).unwrap();
        assert!(!series.low_confidence);
        assert_eq!(series.points.len(), 24);
    }

    #[test]
    fn invalid_month_number_is_a_data_error() {
        let records = vec![record(2024, 13, 5)];
        let err = prepare_series("Whitefield", &records).unwrap_err();
        assert!(matches!(err, CoreError::Data(_)));
    }

    #[test]
    fn all_zero_history_is_a_model_error() {
        let records = vec![record(2024, 1, 0), record(2024, 2, 0)];
        let err = prepare_series("Whitefield", &records).unwrap_err();
        assert!(matches!(err, CoreError::Model(_)));
    }
}
