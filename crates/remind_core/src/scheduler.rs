//! Maps the passage of civil time onto sweep jobs.
//!
//! The event loop calls [`Scheduler::due_jobs`] on every tick (about once a
//! minute) with the current civil datetime. Daily jobs fire at most once per
//! civil date and catch up when the process starts after their time of day.

use crate::config::Settings;
use time::{Date, Duration, Month, PrimitiveDateTime, Time};
use tracing::debug;

pub const TICK_INTERVAL_SECS: u64 = 60;

/// How far back per-task reminders are replayed after a late or skipped tick.
pub const REMINDER_CATCH_UP_MINUTES: u16 = 15;

/// Inclusive range of wall-clock minutes on the current civil date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteWindow {
    first: Time,
    last: Time,
}

impl MinuteWindow {
    pub fn new(first: Time, last: Time) -> Self {
        Self {
            first: truncate_to_minute(first),
            last: truncate_to_minute(last),
        }
    }

    pub fn single(at: Time) -> Self {
        Self::new(at, at)
    }

    pub fn contains(&self, at: Time) -> bool {
        let at = truncate_to_minute(at);
        self.first <= at && at <= self.last
    }
}

fn clock_minute(minute_of_day: u16) -> Time {
    Time::MIDNIGHT + Duration::minutes(i64::from(minute_of_day))
}

fn minute_of_day(at: Time) -> u16 {
    u16::from(at.hour()) * 60 + u16::from(at.minute())
}

fn truncate_to_minute(at: Time) -> Time {
    clock_minute(minute_of_day(at))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    DailyReset,
    CleanupCheck,
    DailyReminder,
    BackupReminder,
    /// Per-task reminders for every minute since the previous tick.
    ReminderTimes(MinuteWindow),
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    reset_at: Time,
    daily_reminder_at: Time,
    backup_interval: Duration,
    last_reset: Option<Date>,
    last_reminder: Option<Date>,
    last_cleanup: Option<(i32, Month)>,
    last_backup: Option<PrimitiveDateTime>,
    last_minute: Option<(Date, u16)>,
}

impl Scheduler {
    pub fn new(settings: &Settings) -> Self {
        Self {
            reset_at: settings.reset_at,
            daily_reminder_at: settings.daily_reminder_at,
            backup_interval: settings.backup_interval,
            last_reset: None,
            last_reminder: None,
            last_cleanup: None,
            last_backup: None,
            last_minute: None,
        }
    }

    /// Jobs to run now, in execution order: the reset always precedes the
    /// reminders of the same tick.
    pub fn due_jobs(&mut self, now: PrimitiveDateTime) -> Vec<Job> {
        let date = now.date();
        let mut jobs = Vec::new();

        if now.time() >= self.reset_at && self.last_reset != Some(date) {
            self.last_reset = Some(date);
            jobs.push(Job::DailyReset);
        }

        let month_key = (date.year(), date.month());
        if date.day() == 1 && now.time() >= self.reset_at && self.last_cleanup != Some(month_key) {
            self.last_cleanup = Some(month_key);
            jobs.push(Job::CleanupCheck);
        }

        if now.time() >= self.daily_reminder_at && self.last_reminder != Some(date) {
            self.last_reminder = Some(date);
            jobs.push(Job::DailyReminder);
        }

        match self.last_backup {
            None => self.last_backup = Some(now),
            Some(last) if now - last >= self.backup_interval => {
                self.last_backup = Some(now);
                jobs.push(Job::BackupReminder);
            }
            Some(_) => {}
        }

        let current = minute_of_day(now.time());
        if self.last_minute != Some((date, current)) {
            let first = match self.last_minute {
                Some((last_date, last)) if last_date == date => last + 1,
                Some(_) => 0,
                None => current,
            };
            // a clock that moved backwards yields just the current minute
            let first = first
                .max(current.saturating_sub(REMINDER_CATCH_UP_MINUTES))
                .min(current);
            self.last_minute = Some((date, current));
            jobs.push(Job::ReminderTimes(MinuteWindow::new(
                clock_minute(first),
                clock_minute(current),
            )));
        }

        if jobs.len() > 1 || !matches!(jobs.first(), None | Some(Job::ReminderTimes(_))) {
            debug!(?jobs, %now, "scheduler tick");
        }
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::{Job, MinuteWindow, Scheduler};
    use crate::config::Settings;
    use time::Duration;
    use time::macros::{datetime, time};

    fn scheduler() -> Scheduler {
        Scheduler::new(&Settings::default())
    }

    fn minute(at: time::Time) -> Job {
        Job::ReminderTimes(MinuteWindow::single(at))
    }

    fn window(first: time::Time, last: time::Time) -> Job {
        Job::ReminderTimes(MinuteWindow::new(first, last))
    }

    #[test]
    fn first_tick_catches_up_daily_jobs() {
        let mut scheduler = scheduler();
        let jobs = scheduler.due_jobs(datetime!(2025-03-05 10:30));

        assert_eq!(jobs, vec![Job::DailyReset, Job::DailyReminder, minute(time!(10:30))]);
    }

    #[test]
    fn daily_jobs_fire_once_per_date() {
        let mut scheduler = scheduler();
        scheduler.due_jobs(datetime!(2025-03-05 10:30));

        assert!(scheduler.due_jobs(datetime!(2025-03-05 10:30:40)).is_empty());
        assert_eq!(scheduler.due_jobs(datetime!(2025-03-05 10:31)), vec![minute(time!(10:31))]);
        assert_eq!(
            scheduler.due_jobs(datetime!(2025-03-06 0:00)),
            vec![Job::DailyReset, Job::BackupReminder, minute(time!(00:00))]
        );
        assert_eq!(
            scheduler.due_jobs(datetime!(2025-03-06 9:00)),
            vec![Job::DailyReminder, Job::BackupReminder, window(time!(08:45), time!(09:00))]
        );
        assert_eq!(scheduler.due_jobs(datetime!(2025-03-06 9:01)), vec![minute(time!(09:01))]);
    }

    #[test]
    fn reminder_waits_for_configured_time() {
        let mut scheduler = scheduler();
        let jobs = scheduler.due_jobs(datetime!(2025-03-05 08:59));

        assert_eq!(jobs, vec![Job::DailyReset, minute(time!(08:59))]);
    }

    #[test]
    fn backup_runs_every_interval_after_start() {
        let mut scheduler = scheduler();
        let start = datetime!(2025-03-05 10:00);
        scheduler.due_jobs(start);

        let before = scheduler.due_jobs(start + Duration::hours(6) - Duration::minutes(1));
        assert!(!before.contains(&Job::BackupReminder));
        let at = scheduler.due_jobs(start + Duration::hours(6));
        assert!(at.contains(&Job::BackupReminder));
        let after = scheduler.due_jobs(start + Duration::hours(6) + Duration::minutes(1));
        assert!(!after.contains(&Job::BackupReminder));
    }

    #[test]
    fn cleanup_check_fires_on_first_of_month() {
        let mut scheduler = scheduler();
        let jobs = scheduler.due_jobs(datetime!(2025-04-01 0:00));
        assert_eq!(jobs, vec![Job::DailyReset, Job::CleanupCheck, minute(time!(00:00))]);

        let jobs = scheduler.due_jobs(datetime!(2025-04-01 0:01));
        assert!(!jobs.contains(&Job::CleanupCheck));
        let jobs = scheduler.due_jobs(datetime!(2025-04-02 0:00));
        assert!(!jobs.contains(&Job::CleanupCheck));
    }

    #[test]
    fn late_tick_covers_skipped_minutes() {
        let mut scheduler = scheduler();
        scheduler.due_jobs(datetime!(2025-03-05 10:00:50));

        let jobs = scheduler.due_jobs(datetime!(2025-03-05 10:03:10));
        assert_eq!(jobs, vec![window(time!(10:01), time!(10:03))]);

        let Job::ReminderTimes(span) = jobs[0] else {
            panic!("expected reminder window");
        };
        assert!(span.contains(time!(10:02:30)));
        assert!(!span.contains(time!(10:00)));
    }

    #[test]
    fn catch_up_is_bounded() {
        let mut scheduler = scheduler();
        scheduler.due_jobs(datetime!(2025-03-05 10:00));

        let jobs = scheduler.due_jobs(datetime!(2025-03-05 12:00));
        assert!(jobs.contains(&window(time!(11:45), time!(12:00))));
    }
}
