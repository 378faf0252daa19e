//! Inbound side of the chat gateway: turns one chat message into one reply.

use remind_core::calendar::Calendar;
use remind_core::config::Settings;
use remind_core::error::AppError;
use remind_core::notify::{render_due_list, render_history, render_task_line, render_task_list};
use remind_core::storage::Store;
use remind_core::task_api::{self, CompletionOutcome};
use remind_core::wizard::{WizardReply, Wizards};
use time::OffsetDateTime;

pub const HELP: &str = "Commands:
/start - register this chat
/add [title] - create a task step by step
/done N - mark task N as done today
/delete N - delete task N
/list - all your tasks
/today - tasks due today
/history N - completions of task N
/cancel - abort task creation
/help - this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Start,
    Add(Option<String>),
    Done(String),
    Delete(String),
    List,
    Today,
    History(String),
    Cancel,
    Help,
    /// Anything that is not a command; answers the open wizard question.
    Text(String),
}

/// Parses `/command args`. Telegram-style `/command@botname` is accepted.
pub fn parse_intent(text: &str) -> Result<Intent, AppError> {
    let trimmed = text.trim();
    let Some(command_line) = trimmed.strip_prefix('/') else {
        return Ok(Intent::Text(trimmed.to_string()));
    };

    let (word, rest) = command_line
        .split_once(char::is_whitespace)
        .map(|(word, rest)| (word, rest.trim()))
        .unwrap_or((command_line, ""));
    let word = word.split('@').next().unwrap_or(word).to_ascii_lowercase();
    let argument = || (!rest.is_empty()).then(|| rest.to_string());
    let required = |name: &str| {
        argument().ok_or_else(|| AppError::invalid_input(format!("usage: /{name} N")))
    };

    match word.as_str() {
        "start" => Ok(Intent::Start),
        "add" | "new" => Ok(Intent::Add(argument())),
        "done" => required("done").map(Intent::Done),
        "delete" => required("delete").map(Intent::Delete),
        "list" => Ok(Intent::List),
        "today" => Ok(Intent::Today),
        "history" => required("history").map(Intent::History),
        "cancel" => Ok(Intent::Cancel),
        "help" => Ok(Intent::Help),
        other => Err(AppError::invalid_input(format!("unknown command /{other}; send /help"))),
    }
}

/// Conversation handler for every chat. Owns the wizard sessions.
pub struct Bot {
    calendar: Calendar,
    wizards: Wizards,
}

impl Bot {
    pub fn new(settings: &Settings) -> Self {
        Self {
            calendar: settings.calendar,
            wizards: Wizards::new(settings.wizard_timeout),
        }
    }

    pub fn wizards_mut(&mut self) -> &mut Wizards {
        &mut self.wizards
    }

    pub fn handle(
        &mut self,
        store: &mut Store,
        chat_id: i64,
        text: &str,
        now: OffsetDateTime,
    ) -> Result<String, AppError> {
        match parse_intent(text)? {
            Intent::Start => {
                let (_, created) = task_api::register_user(store, chat_id)?;
                Ok(if created {
                    format!("Welcome! You are registered.\n{HELP}")
                } else {
                    "You are already registered.".to_string()
                })
            }
            Intent::Add(title) => {
                store.require_user(chat_id)?;
                Ok(self.wizards.start(chat_id, title.as_deref(), now))
            }
            Intent::Text(text) => self.answer_wizard(store, chat_id, &text, now),
            Intent::Done(raw) => {
                let task_id = task_api::parse_task_id(&raw)?;
                match task_api::complete_task(store, chat_id, task_id, now, &self.calendar)? {
                    CompletionOutcome::Recorded { task, .. } => {
                        let total = store.require_user(chat_id)?.points;
                        Ok(format!("Done: #{} {} (+{} pt, total {total})", task.id, task.title, task.points))
                    }
                    CompletionOutcome::AlreadyDone(task) => {
                        Ok(format!("#{} {} is already done for today.", task.id, task.title))
                    }
                }
            }
            Intent::Delete(raw) => {
                let task = task_api::delete_task(store, chat_id, task_api::parse_task_id(&raw)?)?;
                Ok(format!("Deleted #{} {}", task.id, task.title))
            }
            Intent::List => Ok(render_task_list(&task_api::list_tasks(store, chat_id)?)),
            Intent::Today => {
                let today = self.calendar.date_of(now);
                let due = task_api::due_tasks_for(store, chat_id, today, &self.calendar)?;
                Ok(render_due_list(&due, today))
            }
            Intent::History(raw) => {
                let (task, events) =
                    task_api::task_history(store, chat_id, task_api::parse_task_id(&raw)?)?;
                Ok(render_history(&task, &events, &self.calendar))
            }
            Intent::Cancel => Ok(if self.wizards.cancel(chat_id) {
                "Cancelled.".to_string()
            } else {
                "Nothing to cancel.".to_string()
            }),
            Intent::Help => Ok(HELP.to_string()),
        }
    }

    fn answer_wizard(
        &mut self,
        store: &mut Store,
        chat_id: i64,
        text: &str,
        now: OffsetDateTime,
    ) -> Result<String, AppError> {
        if !self.wizards.is_active(chat_id) {
            return Err(AppError::invalid_input("send /add to create a task or /help for commands"));
        }
        match self.wizards.advance(chat_id, text, now)? {
            WizardReply::Prompt(prompt) => Ok(prompt),
            WizardReply::Finished(new_task) => {
                let task = task_api::add_task(store, chat_id, &new_task, now)?;
                Ok(format!("Added {}", render_task_line(&task)))
            }
            WizardReply::Cancelled => Ok("Cancelled.".to_string()),
            WizardReply::Expired => {
                Ok("That task draft expired. Send /add to start again.".to_string())
            }
        }
    }
}
