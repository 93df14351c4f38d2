use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One observed (location, year, month) case count, loaded in bulk at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseRecord {
    pub location: String,
    pub year: i32,
    pub month: u32,
    pub cases: i64,
}

/// Regular month-end series for one location, produced by the series preparer.
#[derive(Debug, Clone)]
pub struct LocationSeries {
    pub location: String,
    pub points: Vec<(NaiveDate, f64)>,
    pub low_confidence: bool,
}

/// Precomputed forecast entries for the 36 months past the last observation.
#[derive(Debug, Clone)]
pub struct ForecastTable {
    pub entries: Vec<(NaiveDate, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Actual,
    Forecast,
    Unavailable,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PredictionResult {
    pub cases: i64,
    pub source: PredictionSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub const ALL: [Cadence; 3] = [Cadence::Daily, Cadence::Weekly, Cadence::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Option<Cadence> {
        match value.to_ascii_lowercase().as_str() {
            "daily" => Some(Cadence::Daily),
            "weekly" => Some(Cadence::Weekly),
            "monthly" => Some(Cadence::Monthly),
            _ => None,
        }
    }

    /// Alert type recorded in the log for this tier's batch.
    pub fn alert_type(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily_update",
            Cadence::Weekly => "weekly_update",
            Cadence::Monthly => "monthly_update",
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub location: String,
    pub subscribed_at: DateTime<Utc>,
    pub last_alert_sent: Option<DateTime<Utc>>,
    pub cadence: Cadence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    Sent,
    Failed,
    Error,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Sent => "sent",
            AlertStatus::Failed => "failed",
            AlertStatus::Error => "error",
        }
    }
}

/// One row of the append-only dispatch audit trail.
#[derive(Debug, Clone)]
pub struct AlertLogEntry {
    pub id: Uuid,
    pub subscriber_id: Option<Uuid>,
    pub alert_type: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
    pub status: String,
    pub error_detail: Option<String>,
    pub subscriber_name: Option<String>,
    pub subscriber_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
        }
    }
}
