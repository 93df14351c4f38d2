use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Datelike;
use tracing::{info, warn};

use crate::models::{CaseRecord, ForecastTable, LocationSeries};
use crate::series::{month_end, prepare_series};

const SEASON_LENGTH: usize = 12;
const HORIZON_MONTHS: usize = 36;

/// Fitted additive Holt-Winters state: level, trend, and one seasonal
/// index per month of the year.
#[derive(Debug, Clone)]
pub struct HoltWinters {
    level: f64,
    trend: f64,
    seasonals: Vec<f64>,
    observations: usize,
}

struct SmoothingRun {
    level: f64,
    trend: f64,
    seasonals: Vec<f64>,
    sse: f64,
    mean_residual: f64,
}

impl HoltWinters {
    /// Fit against a prepared series. Smoothing parameters are chosen by a
    /// coarse grid search minimizing one-step-ahead squared error, then the
    /// mean fitted residual is folded back into the level (bias removal).
    pub fn fit(values: &[f64]) -> HoltWinters {
        let (level0, trend0, seasonals0) = estimate_initial_state(values);

        let mut best: Option<SmoothingRun> = None;
        for alpha_step in 0..10 {
            for beta_step in 0..10 {
                for gamma_step in 0..10 {
                    let alpha = 0.05 + 0.1 * alpha_step as f64;
                    let beta = 0.05 + 0.1 * beta_step as f64;
                    let gamma = 0.05 + 0.1 * gamma_step as f64;
                    let run = smooth(values, level0, trend0, &seasonals0, alpha, beta, gamma);
                    if best.as_ref().map_or(true, |b| run.sse < b.sse) {
                        best = Some(run);
                    }
                }
            }
        }

        // values is never empty here, so the grid always produced a run.
        let mut run = best.unwrap_or_else(|| SmoothingRun {
            level: level0,
            trend: trend0,
            seasonals: seasonals0.clone(),
            sse: 0.0,
            mean_residual: 0.0,
        });
        run.level += run.mean_residual;

        HoltWinters {
            level: run.level,
            trend: run.trend,
            seasonals: run.seasonals,
            observations: values.len(),
        }
    }

    /// Out-of-sample forecast for the `horizon` months after the last
    /// observation.
    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        (1..=horizon)
            .map(|h| {
                let season = (self.observations + h - 1) % SEASON_LENGTH;
                self.level + h as f64 * self.trend + self.seasonals[season]
            })
            .collect()
    }
}

fn estimate_initial_state(values: &[f64]) -> (f64, f64, Vec<f64>) {
    let n = values.len();
    let m = SEASON_LENGTH;
    let mut seasonals = vec![0.0; m];

    if n >= 2 * m {
        let first: f64 = values[..m].iter().sum::<f64>() / m as f64;
        let second: f64 = values[m..2 * m].iter().sum::<f64>() / m as f64;
        let trend = (second - first) / m as f64;

        let full_seasons = n / m;
        for idx in 0..m {
            let mut sum = 0.0;
            for season in 0..full_seasons {
                let base: f64 =
                    values[season * m..(season + 1) * m].iter().sum::<f64>() / m as f64;
                sum += values[season * m + idx] - base;
            }
            seasonals[idx] = sum / full_seasons as f64;
        }
        (first, trend, seasonals)
    } else if n >= m {
        let level: f64 = values[..m].iter().sum::<f64>() / m as f64;
        let trend = if n > 1 {
            (values[n - 1] - values[0]) / (n - 1) as f64
        } else {
            0.0
        };
        for idx in 0..m {
            seasonals[idx] = values[idx] - level;
        }
        (level, trend, seasonals)
    } else {
        // Under one season of data: flat seasonal profile, straight-line trend.
        let trend = if n > 1 {
            (values[n - 1] - values[0]) / (n - 1) as f64
        } else {
            0.0
        };
        (values[0], trend, seasonals)
    }
}

fn smooth(
    values: &[f64],
    level0: f64,
    trend0: f64,
    seasonals0: &[f64],
    alpha: f64,
    beta: f64,
    gamma: f64,
) -> SmoothingRun {
    let mut level = level0;
    let mut trend = trend0;
    let mut seasonals = seasonals0.to_vec();
    let mut sse = 0.0;
    let mut residual_sum = 0.0;

    for (t, y) in values.iter().enumerate() {
        let idx = t % SEASON_LENGTH;
        let predicted = level + trend + seasonals[idx];
        let residual = y - predicted;
        sse += residual * residual;
        residual_sum += residual;

        let prior_level = level;
        level = alpha * (y - seasonals[idx]) + (1.0 - alpha) * (level + trend);
        trend = beta * (level - prior_level) + (1.0 - beta) * trend;
        seasonals[idx] = gamma * (y - prior_level - trend) + (1.0 - gamma) * seasonals[idx];
    }

    SmoothingRun {
        level,
        trend,
        seasonals,
        sse,
        mean_residual: residual_sum / values.len().max(1) as f64,
    }
}

/// Everything retained per location after a training pass.
#[derive(Debug, Clone)]
pub struct LocationModel {
    pub series: LocationSeries,
    pub table: ForecastTable,
}

/// One training pass over the full record set: per-location models plus
/// the exact-observation index the resolver consults first. Built
/// wholesale, never patched in place.
#[derive(Debug, Default)]
pub struct ForecastStore {
    models: HashMap<String, LocationModel>,
    actuals: HashMap<(String, i32, u32), i64>,
    locations: Vec<String>,
}

impl ForecastStore {
    pub fn train(records: &[CaseRecord]) -> ForecastStore {
        let mut store = ForecastStore::index(records);
        for location in store.locations.clone() {
            let series = match prepare_series(&location, records) {
                Ok(series) => series,
                Err(err) => {
                    warn!(%location, %err, "skipping location, series preparation failed");
                    continue;
                }
            };
            let values: Vec<f64> = series.points.iter().map(|(_, v)| *v).collect();
            let model = HoltWinters::fit(&values);
            let table = build_table(&series, model.forecast(HORIZON_MONTHS));
            info!(
                %location,
                observations = values.len(),
                horizon = table.entries.len(),
                "trained location model"
            );
            store
                .models
                .insert(location.clone(), LocationModel { series, table });
        }
        store
    }

    fn index(records: &[CaseRecord]) -> ForecastStore {
        let mut actuals = HashMap::new();
        let mut locations: Vec<String> = Vec::new();
        for record in records {
            actuals.insert(
                (record.location.clone(), record.year, record.month),
                record.cases,
            );
            if !locations.contains(&record.location) {
                locations.push(record.location.clone());
            }
        }
        locations.sort();
        ForecastStore {
            models: HashMap::new(),
            actuals,
            locations,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_tables(
        records: &[CaseRecord],
        tables: Vec<(String, ForecastTable)>,
    ) -> ForecastStore {
        let mut store = ForecastStore::index(records);
        for (location, table) in tables {
            let series = LocationSeries {
                location: location.clone(),
                points: Vec::new(),
                low_confidence: false,
            };
            store.models.insert(location, LocationModel { series, table });
        }
        store
    }

    pub fn actual(&self, location: &str, year: i32, month: u32) -> Option<i64> {
        self.actuals
            .get(&(location.to_string(), year, month))
            .copied()
    }

    pub fn knows_location(&self, location: &str) -> bool {
        self.locations.iter().any(|l| l == location)
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    pub fn table(&self, location: &str) -> Option<&ForecastTable> {
        self.models.get(location).map(|m| &m.table)
    }

    /// Locations whose training series fell short of a full season.
    pub fn low_confidence_locations(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .models
            .values()
            .filter(|m| m.series.low_confidence)
            .map(|m| m.series.location.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn build_table(series: &LocationSeries, predictions: Vec<f64>) -> ForecastTable {
    let last = series
        .points
        .last()
        .map(|(date, _)| *date)
        .unwrap_or_default();
    let (mut year, mut month) = (last.year(), last.month());

    let mut entries = Vec::with_capacity(predictions.len());
    for predicted in predictions {
        (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        entries.push((month_end(year, month), predicted));
    }
    ForecastTable { entries }
}

/// Snapshot holder shared between the query path and the scheduler loop.
/// Readers clone the current Arc; a rebuild swaps the whole store in one
/// write, so no reader ever sees a partially trained snapshot.
#[derive(Clone)]
pub struct SharedForecastStore {
    inner: Arc<RwLock<Arc<ForecastStore>>>,
}

impl SharedForecastStore {
    pub fn new(store: ForecastStore) -> SharedForecastStore {
        SharedForecastStore {
            inner: Arc::new(RwLock::new(Arc::new(store))),
        }
    }

    pub fn snapshot(&self) -> Arc<ForecastStore> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn swap(&self, store: ForecastStore) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(store);
    }
}
