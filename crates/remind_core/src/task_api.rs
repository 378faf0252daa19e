use crate::calendar::{Calendar, parse_clock_time};
use crate::error::AppError;
use crate::model::{CompletionEvent, Frequency, NewTask, Task, User};
use crate::recurrence::DueTask;
use crate::storage::Store;
use time::{Date, OffsetDateTime};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Recorded { task: Task, event: CompletionEvent },
    /// The ledger already holds a completion for today; nothing was written.
    AlreadyDone(Task),
}

impl CompletionOutcome {
    pub fn task(&self) -> &Task {
        match self {
            Self::Recorded { task, .. } | Self::AlreadyDone(task) => task,
        }
    }
}

/// Builds a [`NewTask`] from raw user input.
pub fn parse_new_task(
    title: &str,
    frequency: &str,
    weekdays: Option<&str>,
    reminder_time: Option<&str>,
    points: Option<i64>,
) -> Result<NewTask, AppError> {
    let frequency = Frequency::parse(frequency, weekdays)?;
    let mut task = NewTask::new(title.trim(), frequency);
    if let Some(raw) = reminder_time.map(str::trim).filter(|raw| !raw.is_empty()) {
        task = task.with_reminder_time(parse_clock_time(raw)?);
    }
    if let Some(points) = points {
        task = task.with_points(points);
    }
    validate_new_task(&task)?;
    Ok(task)
}

fn validate_new_task(task: &NewTask) -> Result<(), AppError> {
    if task.title.trim().is_empty() {
        return Err(AppError::invalid_input("title is required"));
    }
    if task.points < 0 {
        return Err(AppError::invalid_input("points must not be negative"));
    }
    Ok(())
}

/// Accepts `3` or `#3`.
pub fn parse_task_id(raw: &str) -> Result<i64, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("id is required"));
    }
    trimmed
        .trim_start_matches('#')
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::invalid_input(format!("'{trimmed}' is not a task id")))
}

pub fn register_user(store: &Store, chat_id: i64) -> Result<(User, bool), AppError> {
    let (user, created) = store.register_user(chat_id)?;
    if created {
        info!(chat_id, user_id = user.id, "registered user");
    }
    Ok((user, created))
}

pub fn add_task(
    store: &Store,
    chat_id: i64,
    task: &NewTask,
    now: OffsetDateTime,
) -> Result<Task, AppError> {
    validate_new_task(task)?;
    let user = store.require_user(chat_id)?;
    let mut trimmed = task.clone();
    trimmed.title = task.title.trim().to_string();

    let created = store.insert_task(user.id, &trimmed, now)?;
    info!(chat_id, task_id = created.id, frequency = created.frequency.label(), "added task");
    Ok(created)
}

pub fn list_tasks(store: &Store, chat_id: i64) -> Result<Vec<Task>, AppError> {
    let user = store.require_user(chat_id)?;
    store.tasks_for_user(user.id)
}

pub fn get_task(store: &Store, chat_id: i64, task_id: i64) -> Result<Task, AppError> {
    let user = store.require_user(chat_id)?;
    store.task_for_owner(user.id, task_id)
}

pub fn delete_task(store: &Store, chat_id: i64, task_id: i64) -> Result<Task, AppError> {
    let user = store.require_user(chat_id)?;
    let removed = store.delete_task(user.id, task_id)?;
    info!(chat_id, task_id, "deleted task");
    Ok(removed)
}

/// Marks a task done at `now`. A second completion on the same civil day, or
/// any later completion of a finished `ONCE` task, is reported as
/// [`CompletionOutcome::AlreadyDone`] and leaves the ledger as is.
pub fn complete_task(
    store: &mut Store,
    chat_id: i64,
    task_id: i64,
    now: OffsetDateTime,
    calendar: &Calendar,
) -> Result<CompletionOutcome, AppError> {
    let user = store.require_user(chat_id)?;
    let task = store.task_for_owner(user.id, task_id)?;

    if store.is_satisfied_for_period(task.id, calendar.date_of(now), calendar)? {
        return Ok(CompletionOutcome::AlreadyDone(task));
    }
    if matches!(task.frequency, Frequency::Once)
        && (task.last_completed_at.is_some() || store.latest_completion(task.id)?.is_some())
    {
        return Ok(CompletionOutcome::AlreadyDone(task));
    }

    let event = store.record_completion(&task, now)?;
    let task = store.task_for_owner(user.id, task_id)?;
    info!(chat_id, task_id, "recorded completion");
    Ok(CompletionOutcome::Recorded { task, event })
}

pub fn due_tasks_for(
    store: &Store,
    chat_id: i64,
    date: Date,
    calendar: &Calendar,
) -> Result<Vec<DueTask>, AppError> {
    let user = store.require_user(chat_id)?;
    store.due_tasks_for(user.id, date, calendar)
}

/// Completion history for one of the caller's tasks, newest first.
pub fn task_history(
    store: &Store,
    chat_id: i64,
    task_id: i64,
) -> Result<(Task, Vec<CompletionEvent>), AppError> {
    let task = get_task(store, chat_id, task_id)?;
    let events = store.task_completions(task.id)?;
    Ok((task, events))
}

pub fn reset_due_tasks(store: &mut Store, date: Date, calendar: &Calendar) -> Result<usize, AppError> {
    let reset = store.reset_due_tasks(date, calendar)?;
    info!(%date, reset, "reset sweep finished");
    Ok(reset)
}

pub fn prune_completions(
    store: &Store,
    retention_days: u32,
    now: OffsetDateTime,
) -> Result<usize, AppError> {
    let removed = store.prune_older_than(retention_days, now)?;
    info!(retention_days, removed, "pruned completion ledger");
    Ok(removed)
}

pub fn rebuild_completion_cache(
    store: &mut Store,
    date: Date,
    calendar: &Calendar,
) -> Result<usize, AppError> {
    let changed = store.rebuild_completion_cache(date, calendar)?;
    info!(%date, changed, "rebuilt completion cache");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::{
        CompletionOutcome, add_task, complete_task, delete_task, due_tasks_for, list_tasks,
        parse_new_task, parse_task_id, prune_completions, rebuild_completion_cache, register_user,
        reset_due_tasks, task_history,
    };
    use crate::calendar::Calendar;
    use crate::model::{Frequency, NewTask};
    use crate::storage::Store;
    use time::macros::{date, datetime, offset, time};

    const CHAT: i64 = 624165496;

    fn registered_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        register_user(&store, CHAT).unwrap();
        store
    }

    #[test]
    fn parse_new_task_validates_every_field() {
        let task = parse_new_task(" gym ", "specific_days", Some("mon,thu"), Some("18:00"), Some(4)).unwrap();
        assert_eq!(task.title, "gym");
        assert_eq!(task.frequency.label(), "SPECIFIC_WEEKDAYS");
        assert_eq!(task.reminder_time, Some(time!(18:00)));
        assert_eq!(task.points, 4);

        assert_eq!(parse_new_task("  ", "daily", None, None, None).unwrap_err().code(), "invalid_input");
        assert_eq!(parse_new_task("x", "hourly", None, None, None).unwrap_err().code(), "invalid_input");
        assert_eq!(parse_new_task("x", "daily", None, Some("9"), None).unwrap_err().code(), "invalid_input");
        assert_eq!(parse_new_task("x", "daily", None, None, Some(-1)).unwrap_err().code(), "invalid_input");
    }

    #[test]
    fn parse_task_id_accepts_hash_prefix() {
        assert_eq!(parse_task_id("#12").unwrap(), 12);
        assert_eq!(parse_task_id(" 3 ").unwrap(), 3);
        assert_eq!(parse_task_id("abc").unwrap_err().code(), "invalid_input");
        assert_eq!(parse_task_id("0").unwrap_err().code(), "invalid_input");
        assert_eq!(parse_task_id("").unwrap_err().code(), "invalid_input");
    }

    #[test]
    fn add_task_requires_registration() {
        let store = Store::open_in_memory().unwrap();
        let err = add_task(&store, CHAT, &NewTask::new("x", Frequency::Once), datetime!(2025-01-01 0:00 UTC))
            .unwrap_err();

        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn add_task_rejects_blank_title() {
        let store = registered_store();
        let err = add_task(&store, CHAT, &NewTask::new("   ", Frequency::Once), datetime!(2025-01-01 0:00 UTC))
            .unwrap_err();

        assert_eq!(err.code(), "invalid_input");
        assert!(list_tasks(&store, CHAT).unwrap().is_empty());
    }

    #[test]
    fn complete_task_twice_same_day_is_already_done() {
        let mut store = registered_store();
        let calendar = Calendar::utc();
        let task = add_task(&store, CHAT, &NewTask::new("read", Frequency::EveryDay).with_points(2), datetime!(2025-01-01 0:00 UTC))
            .unwrap();

        let first = complete_task(&mut store, CHAT, task.id, datetime!(2025-01-02 08:00 UTC), &calendar).unwrap();
        let second = complete_task(&mut store, CHAT, task.id, datetime!(2025-01-02 20:00 UTC), &calendar).unwrap();

        assert!(matches!(first, CompletionOutcome::Recorded { .. }));
        assert!(first.task().completed);
        assert!(matches!(second, CompletionOutcome::AlreadyDone(_)));
        assert_eq!(task_history(&store, CHAT, task.id).unwrap().1.len(), 1);
        assert_eq!(store.require_user(CHAT).unwrap().points, 2);

        let next_day = complete_task(&mut store, CHAT, task.id, datetime!(2025-01-03 07:00 UTC), &calendar).unwrap();
        assert!(matches!(next_day, CompletionOutcome::Recorded { .. }));
        assert_eq!(store.require_user(CHAT).unwrap().points, 4);
    }

    #[test]
    fn finished_once_task_is_not_completed_again() {
        let mut store = registered_store();
        let calendar = Calendar::utc();
        let task = add_task(&store, CHAT, &NewTask::new("file taxes", Frequency::Once).with_points(10), datetime!(2025-01-01 0:00 UTC))
            .unwrap();

        let first = complete_task(&mut store, CHAT, task.id, datetime!(2025-01-01 09:00 UTC), &calendar).unwrap();
        assert!(matches!(first, CompletionOutcome::Recorded { .. }));
        assert!(due_tasks_for(&store, CHAT, date!(2025-01-02), &calendar).unwrap().is_empty());

        let second = complete_task(&mut store, CHAT, task.id, datetime!(2025-01-02 09:00 UTC), &calendar).unwrap();
        assert!(matches!(second, CompletionOutcome::AlreadyDone(_)));
        assert_eq!(task_history(&store, CHAT, task.id).unwrap().1.len(), 1);
        assert_eq!(store.require_user(CHAT).unwrap().points, 10);
    }

    #[test]
    fn once_task_stays_done_after_prune_and_rebuild() {
        let mut store = registered_store();
        let calendar = Calendar::utc();
        let task = add_task(&store, CHAT, &NewTask::new("renew passport", Frequency::Once), datetime!(2024-01-01 0:00 UTC))
            .unwrap();
        complete_task(&mut store, CHAT, task.id, datetime!(2024-01-01 10:00 UTC), &calendar).unwrap();

        assert_eq!(prune_completions(&store, 365, datetime!(2025-02-01 0:00 UTC)).unwrap(), 1);
        rebuild_completion_cache(&mut store, date!(2025-02-01), &calendar).unwrap();

        assert!(due_tasks_for(&store, CHAT, date!(2025-02-01), &calendar).unwrap().is_empty());
        let again = complete_task(&mut store, CHAT, task.id, datetime!(2025-02-01 10:00 UTC), &calendar).unwrap();
        assert!(matches!(again, CompletionOutcome::AlreadyDone(_)));
    }

    #[test]
    fn complete_task_day_boundary_follows_calendar() {
        let mut store = registered_store();
        let calendar = Calendar::new(offset!(+3));
        let task = add_task(&store, CHAT, &NewTask::new("read", Frequency::EveryDay), datetime!(2025-01-01 0:00 UTC))
            .unwrap();

        complete_task(&mut store, CHAT, task.id, datetime!(2025-01-02 20:00 UTC), &calendar).unwrap();
        // 21:30 UTC is already 2025-01-03 in +03:00
        let later = complete_task(&mut store, CHAT, task.id, datetime!(2025-01-02 21:30 UTC), &calendar).unwrap();

        assert!(matches!(later, CompletionOutcome::Recorded { .. }));
    }

    #[test]
    fn foreign_task_ids_are_not_found() {
        let mut store = registered_store();
        register_user(&store, 1).unwrap();
        let task = add_task(&store, CHAT, &NewTask::new("mine", Frequency::Weekly), datetime!(2025-01-01 0:00 UTC))
            .unwrap();

        let calendar = Calendar::utc();
        let err = complete_task(&mut store, 1, task.id, datetime!(2025-01-01 1:00 UTC), &calendar).unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert_eq!(delete_task(&store, 1, task.id).unwrap_err().code(), "not_found");
        assert_eq!(task_history(&store, 1, task.id).unwrap_err().code(), "not_found");
        assert!(task_history(&store, CHAT, task.id).unwrap().1.is_empty());
    }

    #[test]
    fn due_today_reflects_completion_and_reset() {
        let mut store = registered_store();
        let calendar = Calendar::utc();
        // 2025-03-03 is a Monday
        let weekly = add_task(&store, CHAT, &NewTask::new("review", Frequency::Weekly), datetime!(2025-03-03 08:00 UTC))
            .unwrap();
        complete_task(&mut store, CHAT, weekly.id, datetime!(2025-03-03 12:00 UTC), &calendar).unwrap();

        let due = due_tasks_for(&store, CHAT, date!(2025-03-03), &calendar).unwrap();
        assert_eq!(due.len(), 1);
        assert!(due[0].satisfied);

        assert_eq!(reset_due_tasks(&mut store, date!(2025-03-09), &calendar).unwrap(), 0);
        assert_eq!(reset_due_tasks(&mut store, date!(2025-03-10), &calendar).unwrap(), 1);
        assert_eq!(reset_due_tasks(&mut store, date!(2025-03-10), &calendar).unwrap(), 0);

        let due = due_tasks_for(&store, CHAT, date!(2025-03-10), &calendar).unwrap();
        assert_eq!(due.len(), 1);
        assert!(!due[0].satisfied);
        assert!(!due[0].task.completed);
    }

    #[test]
    fn delete_then_prune_leaves_other_tasks() {
        let mut store = registered_store();
        let calendar = Calendar::utc();
        let keep = add_task(&store, CHAT, &NewTask::new("keep", Frequency::EveryDay), datetime!(2025-01-01 0:00 UTC))
            .unwrap();
        let drop = add_task(&store, CHAT, &NewTask::new("drop", Frequency::EveryDay), datetime!(2025-01-01 0:00 UTC))
            .unwrap();
        complete_task(&mut store, CHAT, keep.id, datetime!(2025-01-01 9:00 UTC), &calendar).unwrap();
        complete_task(&mut store, CHAT, drop.id, datetime!(2025-01-01 9:00 UTC), &calendar).unwrap();

        let removed = delete_task(&store, CHAT, drop.id).unwrap();
        assert_eq!(removed.title, "drop");
        assert_eq!(prune_completions(&store, 0, datetime!(2025-01-02 0:00 UTC)).unwrap(), 1);

        let tasks = list_tasks(&store, CHAT).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "keep");
    }
}
