use std::fmt::Write;

use chrono::{DateTime, Datelike, Local};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::models::{AlertStatus, Cadence, Subscriber};
use crate::resolver::Resolver;
use crate::risk;
use crate::sms::{Dispatcher, SmsTransport};

const ADVISORY_CLIP: usize = 50;

pub const OUTBREAK_ALERT_TYPE: &str = "outbreak_alert";
pub const WELCOME_ALERT_TYPE: &str = "welcome";
pub const GOODBYE_ALERT_TYPE: &str = "goodbye";

pub const TEST_MESSAGE: &str =
    "Test message from DengueWatch. Your SMS alerts are working correctly!";

/// One dispatch attempt, success or failure, ready for the audit trail.
#[derive(Debug, Clone)]
pub struct AlertAttempt {
    pub subscriber_id: Option<Uuid>,
    pub alert_type: String,
    pub message: String,
    pub status: AlertStatus,
    pub error_detail: Option<String>,
}

/// Pair a composed message with its send outcome for the audit trail.
pub fn attempt_from_outcome(
    subscriber_id: Option<Uuid>,
    alert_type: &str,
    message: String,
    outcome: &crate::sms::SendOutcome,
) -> AlertAttempt {
    AlertAttempt {
        subscriber_id,
        alert_type: alert_type.to_string(),
        message,
        status: if outcome.success {
            AlertStatus::Sent
        } else {
            AlertStatus::Failed
        },
        error_detail: outcome.error_detail.clone(),
    }
}

pub fn compose_cadence_message(
    cadence: Cadence,
    location: &str,
    cases: i64,
    tier: &str,
    advisory: &str,
) -> String {
    let mut message = String::new();
    let _ = writeln!(message, "DengueWatch {cadence} Alert!");
    let _ = writeln!(message, "Location: {location}");
    let _ = writeln!(message, "Cases: {cases}");
    let _ = writeln!(message, "Risk: {tier}");
    if advisory.chars().count() > ADVISORY_CLIP {
        let clipped: String = advisory.chars().take(ADVISORY_CLIP).collect();
        let _ = write!(message, "{clipped}...");
    } else {
        let _ = write!(message, "{advisory}");
    }
    message
}

pub fn compose_outbreak_message(location: &str, cases: i64) -> String {
    let mut message = String::new();
    let _ = writeln!(message, "URGENT DengueWatch Alert!");
    let _ = writeln!(message, "High outbreak in {location}!");
    let _ = writeln!(message, "Cases: {cases}");
    let _ = writeln!(message, "Take precautions:");
    let _ = writeln!(message, "- Use repellent");
    let _ = writeln!(message, "- Remove water");
    let _ = write!(message, "- Seek help if ill");
    message
}

pub fn compose_welcome_message(name: &str, cadence: Cadence, location: &str) -> String {
    let mut message = String::new();
    let _ = writeln!(message, "Welcome to DengueWatch, {name}!");
    let _ = writeln!(message, "You'll get {cadence} alerts for {location}.");
    let _ = write!(message, "Stay safe! Reply STOP to unsubscribe.");
    message
}

pub fn compose_goodbye_message(name: &str) -> String {
    let mut message = String::new();
    let _ = writeln!(message, "Goodbye {name}!");
    let _ = writeln!(message, "You've been unsubscribed from DengueWatch.");
    let _ = writeln!(message, "To resubscribe, visit our website.");
    let _ = write!(message, "Stay safe!");
    message
}

/// Compose and send the goodbye message for a departing subscriber. A
/// lookup miss produces no attempt, so nothing reaches the audit trail.
pub async fn deliver_goodbye<T: SmsTransport>(
    subscriber: Option<&Subscriber>,
    dispatcher: &Dispatcher<T>,
) -> Option<AlertAttempt> {
    let subscriber = subscriber?;
    let message = compose_goodbye_message(&subscriber.name);
    let outcome = dispatcher.send(&subscriber.mobile, &message).await;
    Some(attempt_from_outcome(
        Some(subscriber.id),
        GOODBYE_ALERT_TYPE,
        message,
        &outcome,
    ))
}

/// Resolve, classify, compose, and send for every subscriber in a cadence
/// batch. Subscribers are processed one at a time and a failure for one
/// never aborts the rest; every attempt comes back as a record for the
/// audit trail.
pub async fn deliver_cadence_batch<T: SmsTransport>(
    subscribers: &[Subscriber],
    resolver: &Resolver,
    dispatcher: &Dispatcher<T>,
    cadence: Cadence,
    now: DateTime<Local>,
) -> Vec<AlertAttempt> {
    let month = now.month().to_string();
    let year = now.year();

    let mut attempts = Vec::with_capacity(subscribers.len());
    for subscriber in subscribers {
        let prediction = match resolver.resolve(&subscriber.location, &month, year) {
            Ok(prediction) => prediction,
            Err(err) => {
                warn!(
                    subscriber = %subscriber.email,
                    location = %subscriber.location,
                    %err,
                    "could not resolve prediction for subscriber"
                );
                attempts.push(AlertAttempt {
                    subscriber_id: Some(subscriber.id),
                    alert_type: cadence.alert_type().to_string(),
                    message: String::new(),
                    status: AlertStatus::Error,
                    error_detail: Some(err.to_string()),
                });
                continue;
            }
        };

        let (tier, advisory) = risk::classify(prediction.cases);
        let message = compose_cadence_message(
            cadence,
            &subscriber.location,
            prediction.cases,
            tier.as_str(),
            advisory,
        );

        let outcome = dispatcher.send(&subscriber.mobile, &message).await;
        attempts.push(attempt_from_outcome(
            Some(subscriber.id),
            cadence.alert_type(),
            message,
            &outcome,
        ));
    }
    attempts
}

/// Urgent location-scoped alert, fired from the query path whenever a
/// resolved count crosses the outbreak threshold. Every matching
/// subscriber is alerted regardless of cadence; repeated triggers re-alert
/// (no dedup), which is the documented current behaviour.
pub async fn deliver_outbreak<T: SmsTransport>(
    subscribers: &[Subscriber],
    location: &str,
    cases: i64,
    dispatcher: &Dispatcher<T>,
) -> Vec<AlertAttempt> {
    let message = compose_outbreak_message(location, cases);
    let mut attempts = Vec::with_capacity(subscribers.len());
    for subscriber in subscribers {
        let outcome = dispatcher.send(&subscriber.mobile, &message).await;
        attempts.push(attempt_from_outcome(
            Some(subscriber.id),
            OUTBREAK_ALERT_TYPE,
            message.clone(),
            &outcome,
        ));
    }
    attempts
}

/// Append every attempt to the audit log, and stamp `last_alert_sent` for
/// successful sends when asked. Each write is its own statement; a failed
/// log write is reported next to the dispatch outcome it belongs to, never
/// swallowed in its place.
pub async fn persist_attempts(pool: &PgPool, attempts: &[AlertAttempt], touch_last_alert: bool) {
    for attempt in attempts {
        if let Err(err) = db::insert_alert_log(
            pool,
            attempt.subscriber_id,
            &attempt.alert_type,
            &attempt.message,
            attempt.status,
            attempt.error_detail.as_deref(),
        )
        .await
        {
            error!(
                alert_type = %attempt.alert_type,
                dispatch_status = attempt.status.as_str(),
                %err,
                "failed to write audit entry for dispatch attempt"
            );
        }

        if touch_last_alert && attempt.status == AlertStatus::Sent {
            if let Some(subscriber_id) = attempt.subscriber_id {
                if let Err(err) = db::touch_last_alert(pool, subscriber_id).await {
                    error!(%subscriber_id, %err, "failed to update last_alert_sent");
                }
            }
        }
    }
}

/// Execute one cadence tier's batch end to end. The subscriber list is
/// read up front and no store lock is held across a transport call.
pub async fn run_cadence_batch<T: SmsTransport>(
    pool: &PgPool,
    resolver: &Resolver,
    dispatcher: &Dispatcher<T>,
    cadence: Cadence,
    now: DateTime<Local>,
) -> anyhow::Result<()> {
    let subscribers = db::subscribers_by_cadence(pool, cadence).await?;
    if subscribers.is_empty() {
        info!(%cadence, "no subscribers for tier");
        return Ok(());
    }

    let attempts = deliver_cadence_batch(&subscribers, resolver, dispatcher, cadence, now).await;
    let sent = attempts
        .iter()
        .filter(|a| a.status == AlertStatus::Sent)
        .count();
    info!(%cadence, total = attempts.len(), sent, "cadence batch finished");

    persist_attempts(pool, &attempts, true).await;
    Ok(())
}

/// Fan an outbreak alert out to a location's subscribers and log each
/// attempt. A location with no subscribers produces no log entries.
pub async fn trigger_outbreak<T: SmsTransport>(
    pool: &PgPool,
    dispatcher: &Dispatcher<T>,
    location: &str,
    cases: i64,
) -> anyhow::Result<usize> {
    let subscribers = db::subscribers_by_location(pool, location).await?;
    if subscribers.is_empty() {
        return Ok(0);
    }

    let attempts = deliver_outbreak(&subscribers, location, cases, dispatcher).await;
    info!(location, cases, alerted = attempts.len(), "outbreak alert dispatched");
    persist_attempts(pool, &attempts, false).await;
    Ok(attempts.len())
}
