use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone};
use sqlx::PgPool;
use tracing::{error, info};

use crate::alerts;
use crate::models::Cadence;
use crate::resolver::Resolver;
use crate::sms::{Dispatcher, SmsTransport};

/// All cadence batches fire at this local hour.
pub const ALERT_HOUR: u32 = 9;

/// How often the background loop wakes to check for due tiers.
const TICK_SECONDS: u64 = 60;

/// Wall-clock source, injectable so the schedule can be driven in tests.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

fn at_alert_hour(date: NaiveDate) -> DateTime<Local> {
    let time = NaiveTime::from_hms_opt(ALERT_HOUR, 0, 0).unwrap_or_default();
    let naive = date.and_time(time);
    naive
        .and_local_timezone(Local)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&naive))
}

/// One cadence tier's recurrence state. Tiers track their next fire time
/// independently of one another.
#[derive(Debug)]
pub struct CadenceJob {
    pub cadence: Cadence,
    next_fire: DateTime<Local>,
}

impl CadenceJob {
    pub fn new(cadence: Cadence, now: DateTime<Local>) -> CadenceJob {
        let next_fire = match cadence {
            // Every calendar day at the alert hour.
            Cadence::Daily => {
                let today = at_alert_hour(now.date_naive());
                if today > now {
                    today
                } else {
                    at_alert_hour(now.date_naive() + Duration::days(1))
                }
            }
            // Mondays at the alert hour.
            Cadence::Weekly => {
                let monday_offset = now.date_naive().weekday().num_days_from_monday() as i64;
                let this_monday = at_alert_hour(now.date_naive() - Duration::days(monday_offset));
                if this_monday > now {
                    this_monday
                } else {
                    this_monday + Duration::days(7)
                }
            }
            // Fixed 30-day interval from loop start; drifts against calendar
            // months over time, which is the documented behaviour.
            Cadence::Monthly => at_alert_hour(now.date_naive() + Duration::days(30)),
        };
        CadenceJob { cadence, next_fire }
    }

    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        now >= self.next_fire
    }

    pub fn next_fire(&self) -> DateTime<Local> {
        self.next_fire
    }

    fn advance(&mut self, now: DateTime<Local>) {
        let step = match self.cadence {
            Cadence::Daily => Duration::days(1),
            Cadence::Weekly => Duration::days(7),
            Cadence::Monthly => Duration::days(30),
        };
        while self.next_fire <= now {
            self.next_fire += step;
        }
    }
}

/// The three cadence tiers plus due-check bookkeeping.
pub struct Schedule {
    jobs: Vec<CadenceJob>,
}

impl Schedule {
    pub fn new(now: DateTime<Local>) -> Schedule {
        Schedule {
            jobs: Cadence::ALL
                .iter()
                .map(|cadence| CadenceJob::new(*cadence, now))
                .collect(),
        }
    }

    /// Tiers due at `now`, each advanced past it.
    pub fn due(&mut self, now: DateTime<Local>) -> Vec<Cadence> {
        let mut due = Vec::new();
        for job in self.jobs.iter_mut() {
            if job.is_due(now) {
                due.push(job.cadence);
                job.advance(now);
            }
        }
        due
    }

    pub fn jobs(&self) -> &[CadenceJob] {
        &self.jobs
    }
}

/// Background loop: wake every minute, run any due cadence batches one
/// after another, sleep again. Batches never interleave; a failed batch is
/// logged and the loop keeps going.
pub async fn run_loop<C, T>(
    pool: PgPool,
    resolver: Resolver,
    dispatcher: Dispatcher<T>,
    clock: C,
) -> anyhow::Result<()>
where
    C: Clock,
    T: SmsTransport,
{
    let mut schedule = Schedule::new(clock.now());
    for job in schedule.jobs() {
        info!(cadence = %job.cadence, next_fire = %job.next_fire(), "cadence tier scheduled");
    }

    loop {
        tokio::time::sleep(std::time::Duration::from_secs(TICK_SECONDS)).await;
        let now = clock.now();
        for cadence in schedule.due(now) {
            info!(%cadence, "cadence batch due");
            if let Err(err) =
                alerts::run_cadence_batch(&pool, &resolver, &dispatcher, cadence, now).await
            {
                error!(%cadence, %err, "cadence batch failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Local> {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
            .and_local_timezone(Local)
            .earliest()
            .unwrap()
    }

    // 2025-06-02 is a Monday.
    #[test]
    fn daily_first_fire_is_the_next_alert_hour() {
        let job = CadenceJob::new(Cadence::Daily, local(2025, 6, 2, 8, 0));
        assert_eq!(job.next_fire(), local(2025, 6, 2, 9, 0));

        let late = CadenceJob::new(Cadence::Daily, local(2025, 6, 2, 10, 0));
        assert_eq!(late.next_fire(), local(2025, 6, 3, 9, 0));
    }

    #[test]
    fn weekly_fires_on_mondays() {
        let job = CadenceJob::new(Cadence::Weekly, local(2025, 6, 4, 12, 0));
        assert_eq!(job.next_fire(), local(2025, 6, 9, 9, 0));

        let monday_morning = CadenceJob::new(Cadence::Weekly, local(2025, 6, 2, 8, 0));
        assert_eq!(monday_morning.next_fire(), local(2025, 6, 2, 9, 0));
    }

    #[test]
    fn monthly_uses_a_fixed_thirty_day_interval() {
        let job = CadenceJob::new(Cadence::Monthly, local(2025, 6, 2, 8, 0));
        assert_eq!(job.next_fire(), local(2025, 7, 2, 9, 0));
    }

    #[test]
    fn jobs_do_not_fire_before_their_time() {
        let start = local(2025, 6, 2, 8, 0);
        let mut schedule = Schedule::new(start);
        assert!(schedule.due(local(2025, 6, 2, 8, 59)).is_empty());
    }

    #[test]
    fn due_tiers_fire_and_advance_independently() {
        let start = local(2025, 6, 2, 8, 0);
        let mut schedule = Schedule::new(start);

        // Monday 09:01: daily and weekly are due, monthly is 30 days out.
        let due = schedule.due(local(2025, 6, 2, 9, 1));
        assert_eq!(due, vec![Cadence::Daily, Cadence::Weekly]);

        // Next day only the daily tier fires again.
        let due = schedule.due(local(2025, 6, 3, 9, 1));
        assert_eq!(due, vec![Cadence::Daily]);

        // Thirty days after start the monthly tier joins the daily one.
        let due = schedule.due(local(2025, 7, 2, 9, 1));
        assert!(due.contains(&Cadence::Monthly));
        assert!(due.contains(&Cadence::Daily));
    }

    #[test]
    fn advance_skips_missed_intervals_to_the_next_future_fire() {
        let start = local(2025, 6, 2, 8, 0);
        let mut job = CadenceJob::new(Cadence::Daily, start);
        job.advance(local(2025, 6, 10, 12, 0));
        assert_eq!(job.next_fire(), local(2025, 6, 11, 9, 0));
    }

    #[test]
    fn monthly_advance_steps_thirty_days_at_a_time() {
        let start = local(2025, 1, 1, 8, 0);
        let mut job = CadenceJob::new(Cadence::Monthly, start);
        let first = job.next_fire();
        assert_eq!(first, local(2025, 1, 31, 9, 0));
        job.advance(first);
        assert_eq!(job.next_fire(), local(2025, 3, 2, 9, 0));
    }
}
