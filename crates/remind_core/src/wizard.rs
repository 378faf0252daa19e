//! Multi-step task creation dialog, one explicit state machine per chat.

use crate::calendar::parse_clock_time;
use crate::error::AppError;
use crate::model::{Frequency, NewTask, WeekdaySet};
use std::collections::HashMap;
use time::{Duration, OffsetDateTime, Time};
use tracing::debug;

const SKIP_WORDS: [&str; 2] = ["skip", "-"];
const CANCEL_WORDS: [&str; 2] = ["cancel", "/cancel"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AwaitingTitle,
    AwaitingFrequency,
    AwaitingWeekdays,
    AwaitingReminderTime,
    AwaitingPoints,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardReply {
    /// Next question for the user.
    Prompt(String),
    Finished(NewTask),
    Cancelled,
    /// The session sat idle past the timeout and was dropped.
    Expired,
}

#[derive(Debug, Clone)]
struct Session {
    step: Step,
    title: String,
    frequency: Option<Frequency>,
    reminder_time: Option<Time>,
    touched: OffsetDateTime,
}

impl Session {
    fn new(now: OffsetDateTime) -> Self {
        Self {
            step: Step::AwaitingTitle,
            title: String::new(),
            frequency: None,
            reminder_time: None,
            touched: now,
        }
    }

    /// Consumes one answer. On error the step is left unchanged.
    fn answer(&mut self, input: &str) -> Result<Option<NewTask>, AppError> {
        let input = input.trim();
        match self.step {
            Step::AwaitingTitle => {
                if input.is_empty() {
                    return Err(AppError::invalid_input("title is required"));
                }
                self.title = input.to_string();
                self.step = Step::AwaitingFrequency;
            }
            Step::AwaitingFrequency => {
                if Frequency::needs_weekdays(input) {
                    self.step = Step::AwaitingWeekdays;
                } else {
                    self.frequency = Some(Frequency::parse(input, None)?);
                    self.step = Step::AwaitingReminderTime;
                }
            }
            Step::AwaitingWeekdays => {
                self.frequency = Some(Frequency::SpecificWeekdays(WeekdaySet::parse(input)?));
                self.step = Step::AwaitingReminderTime;
            }
            Step::AwaitingReminderTime => {
                self.reminder_time = if is_skip(input) {
                    None
                } else {
                    Some(parse_clock_time(input)?)
                };
                self.step = Step::AwaitingPoints;
            }
            Step::AwaitingPoints => {
                let points = if is_skip(input) { 0 } else { parse_points(input)? };
                let frequency = self
                    .frequency
                    .ok_or_else(|| AppError::invalid_data("frequency missing at the last step"))?;
                let mut task = NewTask::new(self.title.clone(), frequency).with_points(points);
                if let Some(at) = self.reminder_time {
                    task = task.with_reminder_time(at);
                }
                return Ok(Some(task));
            }
        }
        Ok(None)
    }
}

fn is_skip(input: &str) -> bool {
    SKIP_WORDS.iter().any(|word| input.eq_ignore_ascii_case(word))
}

fn is_cancel(input: &str) -> bool {
    CANCEL_WORDS.iter().any(|word| input.trim().eq_ignore_ascii_case(word))
}

fn parse_points(input: &str) -> Result<i64, AppError> {
    input
        .parse::<i64>()
        .ok()
        .filter(|points| *points >= 0)
        .ok_or_else(|| AppError::invalid_input(format!("'{input}' is not a non-negative number")))
}

pub fn prompt_for(step: Step) -> String {
    match step {
        Step::AwaitingTitle => "What should the task be called?".to_string(),
        Step::AwaitingFrequency => format!("How often? One of: {}", Frequency::LABELS.join(", ")),
        Step::AwaitingWeekdays => "Which weekdays? e.g. MON,WED,FRI".to_string(),
        Step::AwaitingReminderTime => "Reminder time (HH:MM), or 'skip'.".to_string(),
        Step::AwaitingPoints => "Points for completing it, or 'skip' for 0.".to_string(),
    }
}

/// Open wizard sessions keyed by chat id.
#[derive(Debug)]
pub struct Wizards {
    sessions: HashMap<i64, Session>,
    timeout: Duration,
}

impl Wizards {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            timeout,
        }
    }

    pub fn is_active(&self, chat_id: i64) -> bool {
        self.sessions.contains_key(&chat_id)
    }

    pub fn step(&self, chat_id: i64) -> Option<Step> {
        self.sessions.get(&chat_id).map(|session| session.step)
    }

    /// Starts (or restarts) a session. A non-blank `title` answers the first
    /// question right away.
    pub fn start(&mut self, chat_id: i64, title: Option<&str>, now: OffsetDateTime) -> String {
        let mut session = Session::new(now);
        if let Some(title) = title.map(str::trim).filter(|title| !title.is_empty()) {
            session.title = title.to_string();
            session.step = Step::AwaitingFrequency;
        }
        let prompt = prompt_for(session.step);
        self.sessions.insert(chat_id, session);
        debug!(chat_id, "wizard started");
        prompt
    }

    pub fn advance(
        &mut self,
        chat_id: i64,
        input: &str,
        now: OffsetDateTime,
    ) -> Result<WizardReply, AppError> {
        let Some(session) = self.sessions.get_mut(&chat_id) else {
            return Err(AppError::invalid_input("no task is being created; send /add to start"));
        };

        if now - session.touched > self.timeout {
            self.sessions.remove(&chat_id);
            debug!(chat_id, "wizard expired");
            return Ok(WizardReply::Expired);
        }
        if is_cancel(input) {
            self.sessions.remove(&chat_id);
            return Ok(WizardReply::Cancelled);
        }

        session.touched = now;
        match session.answer(input)? {
            Some(task) => {
                self.sessions.remove(&chat_id);
                debug!(chat_id, "wizard finished");
                Ok(WizardReply::Finished(task))
            }
            None => Ok(WizardReply::Prompt(prompt_for(session.step))),
        }
    }

    /// Returns whether a session was open.
    pub fn cancel(&mut self, chat_id: i64) -> bool {
        self.sessions.remove(&chat_id).is_some()
    }

    /// Drops every idle session and returns the affected chats.
    pub fn expire(&mut self, now: OffsetDateTime) -> Vec<i64> {
        let timeout = self.timeout;
        let mut expired: Vec<i64> = self
            .sessions
            .iter()
            .filter(|(_, session)| now - session.touched > timeout)
            .map(|(chat_id, _)| *chat_id)
            .collect();
        expired.sort_unstable();
        for chat_id in &expired {
            self.sessions.remove(chat_id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::{Step, WizardReply, Wizards};
    use crate::model::{Frequency, WeekdaySet};
    use time::macros::{datetime, time};
    use time::{Duration, OffsetDateTime, Weekday};

    const NOW: OffsetDateTime = datetime!(2025-01-05 10:00 UTC);

    fn wizards() -> Wizards {
        Wizards::new(Duration::minutes(10))
    }

    #[test]
    fn full_dialog_with_weekdays() {
        let mut wizards = wizards();
        let prompt = wizards.start(1, None, NOW);
        assert!(prompt.contains("called"));

        assert!(matches!(wizards.advance(1, "gym", NOW).unwrap(), WizardReply::Prompt(_)));
        assert!(matches!(wizards.advance(1, "specific_days", NOW).unwrap(), WizardReply::Prompt(_)));
        assert_eq!(wizards.step(1), Some(Step::AwaitingWeekdays));
        wizards.advance(1, "mon thu", NOW).unwrap();
        wizards.advance(1, "18:30", NOW).unwrap();

        let WizardReply::Finished(task) = wizards.advance(1, "5", NOW).unwrap() else {
            panic!("expected finished task");
        };
        let days = WeekdaySet::from_days([Weekday::Monday, Weekday::Thursday]).unwrap();
        assert_eq!(task.title, "gym");
        assert_eq!(task.frequency, Frequency::SpecificWeekdays(days));
        assert_eq!(task.reminder_time, Some(time!(18:30)));
        assert_eq!(task.points, 5);
        assert!(!wizards.is_active(1));
    }

    #[test]
    fn title_argument_skips_first_question_and_skip_words_apply() {
        let mut wizards = wizards();
        wizards.start(1, Some("  water plants "), NOW);
        assert_eq!(wizards.step(1), Some(Step::AwaitingFrequency));

        wizards.advance(1, "weekly", NOW).unwrap();
        assert_eq!(wizards.step(1), Some(Step::AwaitingReminderTime));
        wizards.advance(1, "skip", NOW).unwrap();

        let WizardReply::Finished(task) = wizards.advance(1, "-", NOW).unwrap() else {
            panic!("expected finished task");
        };
        assert_eq!(task.title, "water plants");
        assert_eq!(task.frequency, Frequency::Weekly);
        assert_eq!(task.reminder_time, None);
        assert_eq!(task.points, 0);
    }

    #[test]
    fn invalid_answer_keeps_step() {
        let mut wizards = wizards();
        wizards.start(1, Some("x"), NOW);

        let err = wizards.advance(1, "fortnightly", NOW).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert_eq!(wizards.step(1), Some(Step::AwaitingFrequency));

        wizards.advance(1, "daily", NOW).unwrap();
        assert!(wizards.advance(1, "25:00", NOW).is_err());
        assert_eq!(wizards.step(1), Some(Step::AwaitingReminderTime));
        wizards.advance(1, "07:00", NOW).unwrap();
        assert!(wizards.advance(1, "-3", NOW).is_err());
        assert_eq!(wizards.step(1), Some(Step::AwaitingPoints));
    }

    #[test]
    fn cancel_at_any_step() {
        let mut wizards = wizards();
        wizards.start(1, Some("x"), NOW);
        assert_eq!(wizards.advance(1, "Cancel", NOW).unwrap(), WizardReply::Cancelled);
        assert!(!wizards.is_active(1));

        wizards.start(1, None, NOW);
        assert!(wizards.cancel(1));
        assert!(!wizards.cancel(1));
    }

    #[test]
    fn idle_session_expires() {
        let mut wizards = wizards();
        wizards.start(1, None, NOW);

        let later = NOW + Duration::minutes(11);
        assert_eq!(wizards.advance(1, "gym", later).unwrap(), WizardReply::Expired);
        assert!(wizards.advance(1, "gym", later).is_err());
    }

    #[test]
    fn expire_drops_only_idle_sessions() {
        let mut wizards = wizards();
        wizards.start(1, None, NOW);
        wizards.start(2, None, NOW + Duration::minutes(8));

        let expired = wizards.expire(NOW + Duration::minutes(12));

        assert_eq!(expired, vec![1]);
        assert!(!wizards.is_active(1));
        assert!(wizards.is_active(2));
    }

    #[test]
    fn sessions_are_independent_per_chat() {
        let mut wizards = wizards();
        wizards.start(1, Some("one"), NOW);
        wizards.start(2, None, NOW);

        wizards.advance(2, "two", NOW).unwrap();
        assert_eq!(wizards.step(1), Some(Step::AwaitingFrequency));
        assert_eq!(wizards.step(2), Some(Step::AwaitingFrequency));
    }
}
