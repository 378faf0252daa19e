//! Timer-driven batch operations.
//!
//! Reminder sweeps isolate failures per user: a delivery or data error for
//! one user is logged, recorded in the [`SweepReport`] and the sweep moves
//! on. A failure to list users at all aborts the sweep; the next tick
//! retries it.

use crate::calendar::Calendar;
use crate::config::Settings;
use crate::error::AppError;
use crate::model::{Task, User};
use crate::notify::{Notifier, render_reminder};
use crate::scheduler::MinuteWindow;
use crate::storage::Store;
use crate::task_api;
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct SweepReport {
    pub users_seen: usize,
    /// Messages delivered.
    pub notified: usize,
    /// Users skipped because they were already notified today.
    pub skipped: usize,
    pub failures: Vec<SweepFailure>,
}

#[derive(Debug)]
pub struct SweepFailure {
    pub chat_id: i64,
    pub error: AppError,
}

impl SweepReport {
    fn fail(&mut self, user: &User, error: AppError) {
        warn!(chat_id = user.external_id, error = %error, "sweep step failed");
        self.failures.push(SweepFailure {
            chat_id: user.external_id,
            error,
        });
    }
}

/// Primary once-a-day reminder with every open due task.
pub fn daily_reminder(
    store: &Store,
    notifier: &dyn Notifier,
    calendar: &Calendar,
    now: OffsetDateTime,
) -> Result<SweepReport, AppError> {
    let report = remind_users(store, notifier, calendar, now, false)?;
    info!(
        users = report.users_seen,
        notified = report.notified,
        failures = report.failures.len(),
        "daily reminder sweep finished"
    );
    Ok(report)
}

/// Same as [`daily_reminder`] but skips users already notified today.
pub fn backup_reminder(
    store: &Store,
    notifier: &dyn Notifier,
    calendar: &Calendar,
    now: OffsetDateTime,
) -> Result<SweepReport, AppError> {
    let report = remind_users(store, notifier, calendar, now, true)?;
    info!(
        users = report.users_seen,
        notified = report.notified,
        skipped = report.skipped,
        failures = report.failures.len(),
        "backup reminder sweep finished"
    );
    Ok(report)
}

fn remind_users(
    store: &Store,
    notifier: &dyn Notifier,
    calendar: &Calendar,
    now: OffsetDateTime,
    skip_notified_today: bool,
) -> Result<SweepReport, AppError> {
    let today = calendar.date_of(now);
    let mut report = SweepReport::default();

    for user in store.list_users()? {
        report.users_seen += 1;
        let notified_today = user
            .last_notified
            .is_some_and(|at| calendar.date_of(at) == today);
        if skip_notified_today && notified_today {
            report.skipped += 1;
            continue;
        }

        match remind_user(store, notifier, calendar, &user, now) {
            Ok(true) => report.notified += 1,
            Ok(false) => {}
            Err(err) => report.fail(&user, err),
        }
    }

    Ok(report)
}

/// Sends one reminder listing the user's open tasks, then stamps
/// `last_notified` even when there was nothing to send. A failed delivery
/// leaves the stamp untouched so the backup sweep tries again.
fn remind_user(
    store: &Store,
    notifier: &dyn Notifier,
    calendar: &Calendar,
    user: &User,
    now: OffsetDateTime,
) -> Result<bool, AppError> {
    let today = calendar.date_of(now);
    let due = store.due_tasks_for(user.id, today, calendar)?;
    let open: Vec<&Task> = due
        .iter()
        .filter(|item| !item.satisfied)
        .map(|item| &item.task)
        .collect();

    let sent = !open.is_empty();
    if sent {
        notifier.deliver(user.external_id, &render_reminder(&open, today))?;
    }
    store.mark_notified(user.id, now)?;
    Ok(sent)
}

/// Per-task reminders for open due tasks whose reminder time falls in
/// `window`, the civil minutes elapsed since the previous tick.
pub fn reminder_time_tick(
    store: &Store,
    notifier: &dyn Notifier,
    calendar: &Calendar,
    now: OffsetDateTime,
    window: MinuteWindow,
) -> Result<SweepReport, AppError> {
    let today = calendar.date_of(now);
    let mut report = SweepReport::default();

    for user in store.list_users()? {
        report.users_seen += 1;
        let due = match store.due_tasks_for(user.id, today, calendar) {
            Ok(due) => due,
            Err(err) => {
                report.fail(&user, err);
                continue;
            }
        };

        for item in due.iter().filter(|item| !item.satisfied) {
            let Some(at) = item.task.reminder_time else {
                continue;
            };
            if !window.contains(at) {
                continue;
            }
            let text = format!("Reminder: #{} {}", item.task.id, item.task.title);
            match notifier.deliver(user.external_id, &text) {
                Ok(()) => report.notified += 1,
                Err(err) => report.fail(&user, err),
            }
        }
    }

    if report.notified > 0 || !report.failures.is_empty() {
        info!(
            notified = report.notified,
            failures = report.failures.len(),
            "reminder-time tick finished"
        );
    }
    Ok(report)
}

pub fn daily_reset(store: &mut Store, calendar: &Calendar, now: OffsetDateTime) -> Result<usize, AppError> {
    task_api::reset_due_tasks(store, calendar.date_of(now), calendar)
}

/// Monthly check that prunes the ledger once a year, in the configured
/// cleanup month. Returns `None` in every other month.
pub fn cleanup_check(
    store: &Store,
    settings: &Settings,
    now: OffsetDateTime,
) -> Result<Option<usize>, AppError> {
    let month = settings.calendar.date_of(now).month();
    if month != settings.cleanup_month {
        info!(%month, "cleanup check: not the cleanup month");
        return Ok(None);
    }
    task_api::prune_completions(store, settings.retention_days, now).map(Some)
}
