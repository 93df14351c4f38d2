use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{AlertLogEntry, AlertStatus, Cadence, CaseRecord, Subscriber};
use crate::series::month_from_name;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    // Two locations, three years of monthly history with a wet-season bump.
    let locations = ["Whitefield", "Koramangala"];
    for (offset, location) in locations.iter().enumerate() {
        for index in 0..36 {
            let year = 2022 + (index / 12) as i32;
            let month = (index % 12) + 1;
            let seasonal = match month {
                6..=10 => 35,
                5 | 11 => 15,
                _ => 5,
            };
            let cases = seasonal + (index as i64) / 4 + (offset as i64) * 8;
            sqlx::query(
                r#"
                INSERT INTO denguewatch.case_records (id, location, year, month, cases)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (location, year, month) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(*location)
            .bind(year)
            .bind(month as i32)
            .bind(cases)
            .execute(pool)
            .await?;
        }
    }

    let subscribers = vec![
        ("Asha Rao", "asha.rao@example.com", "9876543210", "Whitefield", "daily"),
        ("Ravi Kumar", "ravi.kumar@example.com", "9123456780", "Whitefield", "weekly"),
        ("Meera Iyer", "meera.iyer@example.com", "9012345678", "Koramangala", "monthly"),
    ];
    for (name, email, mobile, location, cadence) in subscribers {
        sqlx::query(
            r#"
            INSERT INTO denguewatch.subscribers (id, name, email, mobile, location, cadence)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .bind(mobile)
        .bind(location)
        .bind(cadence)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Import case records from a CSV file with Location, Year, Month, Cases
/// columns. Months may be English names or 1-12 numbers; unknown names are
/// rejected. Existing (location, year, month) rows are left untouched.
pub async fn import_cases(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        #[serde(rename = "Location")]
        location: String,
        #[serde(rename = "Year")]
        year: i32,
        #[serde(rename = "Month")]
        month: String,
        #[serde(rename = "Cases")]
        cases: i64,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let month = match month_from_name(&row.month) {
            Some(month) => month,
            None => row
                .month
                .parse::<u32>()
                .ok()
                .filter(|m| (1..=12).contains(m))
                .with_context(|| format!("invalid month: {}", row.month))?,
        };
        anyhow::ensure!(row.cases >= 0, "negative case count for {}", row.location);

        let result = sqlx::query(
            r#"
            INSERT INTO denguewatch.case_records (id, location, year, month, cases)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (location, year, month) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.location)
        .bind(row.year)
        .bind(month as i32)
        .bind(row.cases)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Bulk read of every case record, done once at startup before training.
pub async fn load_case_records(pool: &PgPool) -> Result<Vec<CaseRecord>, CoreError> {
    let rows = sqlx::query(
        "SELECT location, year, month, cases FROM denguewatch.case_records \
         ORDER BY location, year, month",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| CaseRecord {
            location: row.get("location"),
            year: row.get("year"),
            month: row.get::<i32, _>("month") as u32,
            cases: row.get("cases"),
        })
        .collect())
}

/// Distinct location names across all case records, sorted.
pub async fn distinct_locations(pool: &PgPool) -> Result<Vec<String>, CoreError> {
    let rows = sqlx::query(
        "SELECT DISTINCT location FROM denguewatch.case_records ORDER BY location",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|row| row.get("location")).collect())
}

fn map_subscriber(row: &sqlx::postgres::PgRow) -> Subscriber {
    let cadence: String = row.get("cadence");
    Subscriber {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        mobile: row.get("mobile"),
        location: row.get("location"),
        subscribed_at: row.get("subscribed_at"),
        last_alert_sent: row.get("last_alert_sent"),
        cadence: Cadence::parse(&cadence).unwrap_or(Cadence::Weekly),
    }
}

const SUBSCRIBER_COLUMNS: &str =
    "id, name, email, mobile, location, subscribed_at, last_alert_sent, cadence";

#[derive(Debug)]
pub enum SubscribeOutcome {
    Subscribed(Subscriber),
    AlreadySubscribed,
}

/// Maps the conflict-tolerant insert result to an outcome. A returned
/// timestamp means the row landed; no row means the email was already
/// registered and nothing was written.
fn registration_outcome(
    inserted_at: Option<DateTime<Utc>>,
    id: Uuid,
    name: &str,
    email: &str,
    mobile: &str,
    location: &str,
    cadence: Cadence,
) -> SubscribeOutcome {
    match inserted_at {
        None => SubscribeOutcome::AlreadySubscribed,
        Some(subscribed_at) => SubscribeOutcome::Subscribed(Subscriber {
            id,
            name: name.to_string(),
            email: email.to_string(),
            mobile: mobile.to_string(),
            location: location.to_string(),
            subscribed_at,
            last_alert_sent: None,
            cadence,
        }),
    }
}

/// Register a subscriber. A duplicate email is an "already subscribed"
/// outcome, not a failure; the uniqueness constraint backstops the
/// read-then-insert race.
pub async fn insert_subscriber(
    pool: &PgPool,
    name: &str,
    email: &str,
    mobile: &str,
    location: &str,
    cadence: Cadence,
) -> Result<SubscribeOutcome, CoreError> {
    if subscriber_by_email(pool, email).await?.is_some() {
        return Ok(SubscribeOutcome::AlreadySubscribed);
    }

    let id = Uuid::new_v4();
    let row = sqlx::query(
        r#"
        INSERT INTO denguewatch.subscribers (id, name, email, mobile, location, cadence)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (email) DO NOTHING
        RETURNING subscribed_at
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(mobile)
    .bind(location)
    .bind(cadence.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(registration_outcome(
        row.map(|row| row.get("subscribed_at")),
        id,
        name,
        email,
        mobile,
        location,
        cadence,
    ))
}

pub async fn subscriber_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<Subscriber>, CoreError> {
    let row = sqlx::query(&format!(
        "SELECT {SUBSCRIBER_COLUMNS} FROM denguewatch.subscribers WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(map_subscriber))
}

pub async fn list_subscribers(pool: &PgPool) -> Result<Vec<Subscriber>, CoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {SUBSCRIBER_COLUMNS} FROM denguewatch.subscribers ORDER BY subscribed_at"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_subscriber).collect())
}

pub async fn subscribers_by_cadence(
    pool: &PgPool,
    cadence: Cadence,
) -> Result<Vec<Subscriber>, CoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {SUBSCRIBER_COLUMNS} FROM denguewatch.subscribers WHERE cadence = $1 \
         ORDER BY subscribed_at"
    ))
    .bind(cadence.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_subscriber).collect())
}

pub async fn subscribers_by_location(
    pool: &PgPool,
    location: &str,
) -> Result<Vec<Subscriber>, CoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {SUBSCRIBER_COLUMNS} FROM denguewatch.subscribers WHERE location = $1 \
         ORDER BY subscribed_at"
    ))
    .bind(location)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_subscriber).collect())
}

/// Returns false when no subscriber matched the email.
pub async fn update_cadence(
    pool: &PgPool,
    email: &str,
    cadence: Cadence,
) -> Result<bool, CoreError> {
    let result = sqlx::query("UPDATE denguewatch.subscribers SET cadence = $1 WHERE email = $2")
        .bind(cadence.as_str())
        .bind(email)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn touch_last_alert(pool: &PgPool, subscriber_id: Uuid) -> Result<(), CoreError> {
    sqlx::query("UPDATE denguewatch.subscribers SET last_alert_sent = now() WHERE id = $1")
        .bind(subscriber_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_subscriber(pool: &PgPool, email: &str) -> Result<bool, CoreError> {
    let result = sqlx::query("DELETE FROM denguewatch.subscribers WHERE email = $1")
        .bind(email)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Append one audit entry. The log is insert-only; nothing updates or
/// deletes rows here.
pub async fn insert_alert_log(
    pool: &PgPool,
    subscriber_id: Option<Uuid>,
    alert_type: &str,
    message: &str,
    status: AlertStatus,
    error_detail: Option<&str>,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO denguewatch.alert_log (id, subscriber_id, alert_type, message, status, error_detail)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(subscriber_id)
    .bind(alert_type)
    .bind(message)
    .bind(status.as_str())
    .bind(error_detail)
    .execute(pool)
    .await?;
    Ok(())
}

/// Newest audit entries first, joined with subscriber identity where one
/// still exists. Entries whose subscriber was deleted (or never matched)
/// come back with the identity columns empty.
pub async fn recent_alert_logs(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<AlertLogEntry>, CoreError> {
    let rows = sqlx::query(
        r#"
        SELECT al.id, al.subscriber_id, al.alert_type, al.message, al.sent_at,
               al.status, al.error_detail, s.name AS subscriber_name,
               s.email AS subscriber_email
        FROM denguewatch.alert_log al
        LEFT JOIN denguewatch.subscribers s ON s.id = al.subscriber_id
        ORDER BY al.sent_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| AlertLogEntry {
            id: row.get("id"),
            subscriber_id: row.get("subscriber_id"),
            alert_type: row.get("alert_type"),
            message: row.get("message"),
            sent_at: row.get("sent_at"),
            status: row.get("status"),
            error_detail: row.get("error_detail"),
            subscriber_name: row.get("subscriber_name"),
            subscriber_email: row.get("subscriber_email"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn conflicting_insert_maps_to_already_subscribed() {
        let outcome = registration_outcome(
            None,
            Uuid::new_v4(),
            "Asha Rao",
            "asha.rao@example.com",
            "9876543210",
            "Whitefield",
            Cadence::Weekly,
        );
        assert!(matches!(outcome, SubscribeOutcome::AlreadySubscribed));
    }

    #[test]
    fn returned_timestamp_maps_to_a_new_registration() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let outcome = registration_outcome(
            Some(at),
            Uuid::new_v4(),
            "Asha Rao",
            "asha.rao@example.com",
            "9876543210",
            "Whitefield",
            Cadence::Daily,
        );
        match outcome {
            SubscribeOutcome::Subscribed(subscriber) => {
                assert_eq!(subscriber.email, "asha.rao@example.com");
                assert_eq!(subscriber.subscribed_at, at);
                assert_eq!(subscriber.cadence, Cadence::Daily);
                assert!(subscriber.last_alert_sent.is_none());
            }
            SubscribeOutcome::AlreadySubscribed => panic!("expected a new registration"),
        }
    }
}
