//! Recurrence rules: when a task is due, when it counts as done for the day,
//! and when its cached completion flag should be cleared.
//!
//! Everything here is a pure function of the task, a reference date and the
//! latest ledger entry. Dates are always resolved through the supplied
//! [`Calendar`].

use crate::calendar::Calendar;
use crate::model::{Frequency, Task};
use serde::Serialize;
use time::{Date, OffsetDateTime};

/// A task selected for a date, annotated with whether the ledger already
/// holds a completion on that date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueTask {
    #[serde(flatten)]
    pub task: Task,
    pub satisfied: bool,
}

/// Whether the rule puts `task` in the candidate set for `date`, ignoring
/// completions except that a `ONCE` task finished on an earlier day is gone
/// for good.
pub fn is_due_on(task: &Task, date: Date, calendar: &Calendar) -> bool {
    match task.frequency {
        Frequency::Once => task
            .last_completed_at
            .map_or(true, |at| calendar.date_of(at) >= date),
        Frequency::EveryDay => true,
        Frequency::Weekly => calendar.date_of(task.created_at).weekday() == date.weekday(),
        Frequency::Monthly => calendar.date_of(task.created_at).day() == date.day(),
        Frequency::SpecificWeekdays(days) => days.contains(date.weekday()),
    }
}

/// Day granularity for every rule: a weekly task done on Monday is only
/// satisfied on that Monday.
pub fn is_satisfied_on(
    latest_completion: Option<OffsetDateTime>,
    date: Date,
    calendar: &Calendar,
) -> bool {
    latest_completion.is_some_and(|at| calendar.date_of(at) == date)
}

/// Whether a task whose cached flag says "completed" should be flipped back
/// so it shows up as due again on `date`.
pub fn should_reset(task: &Task, date: Date, calendar: &Calendar) -> bool {
    if matches!(task.frequency, Frequency::Once) {
        return false;
    }

    let Some(last) = task.last_completed_at.map(|at| calendar.date_of(at)) else {
        // flagged completed with no timestamp
        return true;
    };

    match task.frequency {
        Frequency::Once => false,
        Frequency::EveryDay => last < date,
        Frequency::Weekly => (date - last).whole_days() >= 7,
        Frequency::Monthly => last.month() != date.month() || last.year() != date.year(),
        Frequency::SpecificWeekdays(days) => last < date && days.contains(date.weekday()),
    }
}

/// Selects the due tasks among `candidates`, pairing each with its most
/// recent ledger timestamp.
pub fn select_due<I>(candidates: I, date: Date, calendar: &Calendar) -> Vec<DueTask>
where
    I: IntoIterator<Item = (Task, Option<OffsetDateTime>)>,
{
    candidates
        .into_iter()
        .filter(|(task, _)| is_due_on(task, date, calendar))
        .map(|(task, latest)| DueTask {
            satisfied: is_satisfied_on(latest, date, calendar),
            task,
        })
        .collect()
}
