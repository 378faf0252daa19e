use crate::calendar::{Calendar, format_clock_time};
use crate::model::{CompletionEvent, Task};
use crate::recurrence::DueTask;
use time::Date;

pub fn render_task_line(task: &Task) -> String {
    let mark = if task.completed { "[x]" } else { "[ ]" };
    let mut line = format!("{mark} #{} {} ({})", task.id, task.title, task.frequency);
    if let Some(at) = task.reminder_time {
        line.push_str(&format!(" at {}", format_clock_time(at)));
    }
    if task.points > 0 {
        line.push_str(&format!(" +{}pt", task.points));
    }
    line
}

pub fn render_task_list(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "You have no tasks yet.".to_string();
    }
    let mut text = String::from("Your tasks:");
    for task in tasks {
        text.push('\n');
        text.push_str(&render_task_line(task));
    }
    text
}

pub fn render_due_list(due: &[DueTask], date: Date) -> String {
    if due.is_empty() {
        return format!("Nothing due on {date}.");
    }
    let mut text = format!("Due on {date}:");
    for item in due {
        let mark = if item.satisfied { "[x]" } else { "[ ]" };
        text.push_str(&format!("\n{mark} #{} {}", item.task.id, item.task.title));
    }
    text
}

/// Body of a reminder for tasks still open on `date`.
pub fn render_reminder(open: &[&Task], date: Date) -> String {
    let mut text = format!("Reminder for {date}: {} open task(s)", open.len());
    for task in open {
        text.push_str(&format!("\n- #{} {}", task.id, task.title));
    }
    text
}

pub fn render_history(task: &Task, events: &[CompletionEvent], calendar: &Calendar) -> String {
    if events.is_empty() {
        return format!("#{} {} has never been completed.", task.id, task.title);
    }
    let mut text = format!("#{} {} completed {} time(s):", task.id, task.title, events.len());
    for event in events {
        let local = calendar.local(event.completed_at);
        text.push_str(&format!(
            "\n- {} {}",
            local.date(),
            format_clock_time(local.time())
        ));
    }
    text
}
