use crate::error::AppError;
use std::io::Write;

mod messages;

pub use messages::{render_due_list, render_history, render_reminder, render_task_line, render_task_list};

pub const DISABLE_ENV_VAR: &str = "REMINDBOT_DISABLE_NOTIFICATIONS";

/// Outbound side of the messaging gateway.
pub trait Notifier {
    fn deliver(&self, chat_id: i64, text: &str) -> Result<(), AppError>;
}

/// Writes one `[chat_id] line` per message line to stdout.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn deliver(&self, chat_id: i64, text: &str) -> Result<(), AppError> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for line in text.lines() {
            writeln!(out, "[{chat_id}] {line}").map_err(|err| AppError::delivery(err.to_string()))?;
        }
        out.flush().map_err(|err| AppError::delivery(err.to_string()))
    }
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn deliver(&self, _chat_id: i64, _text: &str) -> Result<(), AppError> {
        Ok(())
    }
}

pub fn notifier_from_env() -> Box<dyn Notifier> {
    if std::env::var(DISABLE_ENV_VAR).is_ok() {
        return Box::new(NoopNotifier);
    }
    Box::new(ConsoleNotifier)
}
