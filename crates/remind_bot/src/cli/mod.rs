use clap::{Parser, Subcommand};
use remind_core::config::ConfigOverrides;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a chat as a user
    ///
    /// Example: remind_bot register 42
    Register {
        #[arg(allow_hyphen_values = true)]
        chat: i64,
    },
    /// Add a task
    ///
    /// Example: remind_bot add 42 "Water plants" --frequency weekly
    /// Example: remind_bot add 42 Gym --frequency specific_weekdays --days mon,thu --at 18:00 --points 3
    Add {
        #[arg(allow_hyphen_values = true)]
        chat: i64,
        title: String,
        #[arg(short = 'f', long, default_value = "ONCE")]
        frequency: String,
        /// Weekdays for SPECIFIC_WEEKDAYS, e.g. MON,WED
        #[arg(long)]
        days: Option<String>,
        /// Reminder time of day (HH:MM)
        #[arg(long = "at", value_name = "HH:MM")]
        at: Option<String>,
        #[arg(long)]
        points: Option<i64>,
    },
    /// Mark a task as done for today
    ///
    /// Example: remind_bot done 42 3
    Done {
        #[arg(allow_hyphen_values = true)]
        chat: i64,
        id: String,
    },
    /// Delete a task and its history
    ///
    /// Example: remind_bot delete 42 3
    Delete {
        #[arg(allow_hyphen_values = true)]
        chat: i64,
        id: String,
    },
    /// List all tasks of a chat
    ///
    /// Example: remind_bot list 42
    List {
        #[arg(allow_hyphen_values = true)]
        chat: i64,
    },
    /// Show tasks due today (or on --date)
    ///
    /// Example: remind_bot today 42
    /// Example: remind_bot today 42 --date 2025-03-10
    Today {
        #[arg(allow_hyphen_values = true)]
        chat: i64,
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<String>,
    },
    /// Show the completion history of a task
    ///
    /// Example: remind_bot history 42 3
    History {
        #[arg(allow_hyphen_values = true)]
        chat: i64,
        id: String,
    },
    /// Run one batch operation now
    ///
    /// Example: remind_bot sweep reset
    Sweep {
        #[command(subcommand)]
        sweep: SweepCommand,
    },
    /// Run the bot: read `<chat_id> <text>` lines from stdin and fire timers
    ///
    /// Example: remind_bot run
    Run,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepCommand {
    /// Remind every user of their open tasks
    Reminder,
    /// Remind users not yet notified today
    Backup,
    /// Clear completion flags whose period has elapsed
    Reset,
    /// Prune old completions if this is the cleanup month
    Cleanup,
    /// Recompute completion flags from the ledger
    Repair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    DatabasePath,
    UtcOffset,
    DailyReminderAt,
    ResetAt,
    BackupIntervalHours,
    RetentionDays,
    CleanupMonth,
    WizardTimeoutMinutes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub target: ConfigOverrideTarget,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string into a structured target.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let value = value_raw.trim().to_string();
    let canonical_field =
        canonicalize_flag_name(key_raw).ok_or_else(|| "override key cannot be empty".to_string())?;

    let target = match canonical_field.as_str() {
        "database_path" | "db" => ConfigOverrideTarget::DatabasePath,
        "utc_offset" | "offset" => ConfigOverrideTarget::UtcOffset,
        "daily_reminder_at" => ConfigOverrideTarget::DailyReminderAt,
        "reset_at" => ConfigOverrideTarget::ResetAt,
        "backup_interval_hours" => ConfigOverrideTarget::BackupIntervalHours,
        "retention_days" => ConfigOverrideTarget::RetentionDays,
        "cleanup_month" => ConfigOverrideTarget::CleanupMonth,
        "wizard_timeout_minutes" => ConfigOverrideTarget::WizardTimeoutMinutes,
        other => return Err(format!("unknown config field '{other}'")),
    };

    if value.is_empty() {
        return Err(format!("override for '{canonical_field}' needs a value"));
    }
    Ok(ParsedConfigOverride { target, value })
}

/// Folds every `--config-override` into one [`ConfigOverrides`]; later
/// values win.
pub fn collect_config_overrides(raws: &[String]) -> Result<ConfigOverrides, String> {
    let mut overrides = ConfigOverrides::default();
    for raw in raws {
        let parsed = parse_config_override(raw)?;
        let value = parsed.value;
        match parsed.target {
            ConfigOverrideTarget::DatabasePath => overrides.database_path = Some(PathBuf::from(value)),
            ConfigOverrideTarget::UtcOffset => overrides.utc_offset = Some(value),
            ConfigOverrideTarget::DailyReminderAt => overrides.daily_reminder_at = Some(value),
            ConfigOverrideTarget::ResetAt => overrides.reset_at = Some(value),
            ConfigOverrideTarget::BackupIntervalHours => {
                overrides.backup_interval_hours = Some(parse_number(&value, "backup_interval_hours")?)
            }
            ConfigOverrideTarget::RetentionDays => {
                overrides.retention_days = Some(parse_number(&value, "retention_days")?)
            }
            ConfigOverrideTarget::CleanupMonth => {
                overrides.cleanup_month = Some(parse_number(&value, "cleanup_month")?)
            }
            ConfigOverrideTarget::WizardTimeoutMinutes => {
                overrides.wizard_timeout_minutes = Some(parse_number(&value, "wizard_timeout_minutes")?)
            }
        }
    }
    Ok(overrides)
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("'{value}' is not a valid number for {field}"))
}

fn canonicalize_flag_name(name: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
