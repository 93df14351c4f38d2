use chrono::NaiveDate;

use crate::error::CoreError;
use crate::forecast::SharedForecastStore;
use crate::models::{PredictionResult, PredictionSource};
use crate::series::month_from_name;

/// Parse a month given either as an English name or a 1-12 number.
pub fn parse_month(month: &str) -> Result<u32, CoreError> {
    if let Some(number) = month_from_name(month) {
        return Ok(number);
    }
    match month.parse::<u32>() {
        Ok(number) if (1..=12).contains(&number) => Ok(number),
        _ => Err(CoreError::data(format!("invalid month: {month}"))),
    }
}

/// Answers case-count queries against the current store snapshot,
/// preferring recorded fact over forecast.
#[derive(Clone)]
pub struct Resolver {
    store: SharedForecastStore,
}

impl Resolver {
    pub fn new(store: SharedForecastStore) -> Resolver {
        Resolver { store }
    }

    pub fn locations(&self) -> Vec<String> {
        self.store.snapshot().locations().to_vec()
    }

    /// Resolve the case count for (location, month, year).
    ///
    /// A recorded observation always wins over the forecast, even when the
    /// two disagree; forecasts only answer for dates with no observation.
    pub fn resolve(
        &self,
        location: &str,
        month: &str,
        year: i32,
    ) -> Result<PredictionResult, CoreError> {
        let month = parse_month(month)?;
        let snapshot = self.store.snapshot();
        if !snapshot.knows_location(location) {
            return Err(CoreError::data(format!("location not found: {location}")));
        }

        if let Some(cases) = snapshot.actual(location, year, month) {
            return Ok(PredictionResult {
                cases,
                source: PredictionSource::Actual,
            });
        }

        let target = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| CoreError::data(format!("invalid date: {year}-{month}")))?;

        if let Some(table) = snapshot.table(location) {
            if let Some(predicted) = nearest_entry(&table.entries, target) {
                return Ok(PredictionResult {
                    cases: predicted as i64,
                    source: PredictionSource::Forecast,
                });
            }
        }

        Ok(PredictionResult {
            cases: 0,
            source: PredictionSource::Unavailable,
        })
    }
}

/// Entry closest to the target date; ties go to the earlier entry.
fn nearest_entry(entries: &[(NaiveDate, f64)], target: NaiveDate) -> Option<f64> {
    let mut best: Option<(i64, f64)> = None;
    for (date, value) in entries {
        let distance = (*date - target).num_days().abs();
        if best.map_or(true, |(best_distance, _)| distance < best_distance) {
            best = Some((distance, *value));
        }
    }
    best.map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastStore;
    use crate::models::{CaseRecord, ForecastTable};

    fn record(location: &str, year: i32, month: u32, cases: i64) -> CaseRecord {
        CaseRecord {
            location: location.to_string(),
            year,
            month,
            cases,
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn resolver_with_table(records: Vec<CaseRecord>, entries: Vec<(NaiveDate, f64)>) -> Resolver {
        let location = records[0].location.clone();
        let store = ForecastStore::with_tables(
            &records,
            vec![(location, ForecastTable { entries })],
        );
        Resolver::new(SharedForecastStore::new(store))
    }

    #[test]
    fn parses_month_names_and_numbers() {
        assert_eq!(parse_month("March").unwrap(), 3);
        assert_eq!(parse_month("11").unwrap(), 11);
        assert!(parse_month("13").is_err());
        assert!(parse_month("Marzo").is_err());
    }

    #[test]
    fn recorded_fact_beats_forecast() {
        let resolver = resolver_with_table(
            vec![record("Indiranagar", 2025, 6, 7)],
            vec![(date(2025, 6, 30), 250.0)],
        );
        let result = resolver.resolve("Indiranagar", "June", 2025).unwrap();
        assert_eq!(result.cases, 7);
        assert_eq!(result.source, PredictionSource::Actual);
    }

    #[test]
    fn forecast_answers_unobserved_months() {
        let resolver = resolver_with_table(
            vec![record("Indiranagar", 2024, 12, 40)],
            vec![(date(2025, 1, 31), 44.9), (date(2025, 2, 28), 61.0)],
        );
        let result = resolver.resolve("Indiranagar", "February", 2025).unwrap();
        assert_eq!(result.cases, 44);
        assert_eq!(result.source, PredictionSource::Forecast);
    }

    #[test]
    fn nearest_entry_prefers_the_closest_date() {
        let entries = vec![(date(2025, 1, 31), 10.0), (date(2025, 2, 28), 20.0)];
        assert_eq!(nearest_entry(&entries, date(2025, 3, 1)), Some(20.0));
        assert_eq!(nearest_entry(&entries, date(2025, 2, 1)), Some(10.0));
    }

    #[test]
    fn nearest_entry_tie_breaks_toward_the_earlier_date() {
        let entries = vec![(date(2025, 1, 1), 1.0), (date(2025, 1, 3), 3.0)];
        assert_eq!(nearest_entry(&entries, date(2025, 1, 2)), Some(1.0));
    }

    #[test]
    fn unknown_location_is_a_data_error() {
        let resolver = resolver_with_table(vec![record("Indiranagar", 2025, 1, 5)], vec![]);
        let err = resolver.resolve("Atlantis", "January", 2025).unwrap_err();
        assert!(matches!(err, CoreError::Data(_)));
    }

    #[test]
    fn missing_table_yields_unavailable_zero() {
        let records = vec![record("Indiranagar", 2025, 1, 5)];
        let store = ForecastStore::with_tables(&records, vec![]);
        let resolver = Resolver::new(SharedForecastStore::new(store));
        let result = resolver.resolve("Indiranagar", "March", 2025).unwrap();
        assert_eq!(result.cases, 0);
        assert_eq!(result.source, PredictionSource::Unavailable);
    }

    #[test]
    fn locations_come_back_sorted() {
        let records = vec![
            record("Whitefield", 2025, 1, 5),
            record("Hebbal", 2025, 1, 3),
        ];
        let store = ForecastStore::with_tables(&records, vec![]);
        let resolver = Resolver::new(SharedForecastStore::new(store));
        assert_eq!(resolver.locations(), vec!["Hebbal", "Whitefield"]);
    }
}
