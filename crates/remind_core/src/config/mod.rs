use crate::calendar::{Calendar, parse_clock_time, parse_offset};
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::macros::time;
use time::{Duration, Month, Time};

const APP_DIR_NAME: &str = "remindbot";
const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "REMINDBOT_CONFIG_PATH";

/// Bot configuration as written in `config.json`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database_path: Option<PathBuf>,
    pub utc_offset: String,
    pub daily_reminder_at: String,
    pub reset_at: String,
    pub backup_interval_hours: u32,
    pub retention_days: u32,
    pub cleanup_month: u8,
    pub wizard_timeout_minutes: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            utc_offset: "+00:00".to_string(),
            daily_reminder_at: "09:00".to_string(),
            reset_at: "00:00".to_string(),
            backup_interval_hours: 6,
            retention_days: 365,
            cleanup_month: 1,
            wizard_timeout_minutes: 10,
        }
    }
}

/// Validated, typed view of [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub calendar: Calendar,
    pub daily_reminder_at: Time,
    pub reset_at: Time,
    pub backup_interval: Duration,
    pub retention_days: u32,
    pub cleanup_month: Month,
    pub wizard_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            calendar: Calendar::utc(),
            daily_reminder_at: time!(09:00),
            reset_at: Time::MIDNIGHT,
            backup_interval: Duration::hours(6),
            retention_days: 365,
            cleanup_month: Month::January,
            wizard_timeout: Duration::minutes(10),
        }
    }
}

impl Config {
    pub fn settings(&self) -> Result<Settings, AppError> {
        let offset = parse_offset(&self.utc_offset)
            .map_err(|err| AppError::invalid_data(format!("utc_offset: {}", err.message())))?;
        let daily_reminder_at = parse_clock_time(&self.daily_reminder_at)
            .map_err(|err| AppError::invalid_data(format!("daily_reminder_at: {}", err.message())))?;
        let reset_at = parse_clock_time(&self.reset_at)
            .map_err(|err| AppError::invalid_data(format!("reset_at: {}", err.message())))?;

        if self.backup_interval_hours == 0 {
            return Err(AppError::invalid_data("backup_interval_hours must be at least 1"));
        }
        if self.wizard_timeout_minutes == 0 {
            return Err(AppError::invalid_data("wizard_timeout_minutes must be at least 1"));
        }
        let cleanup_month = Month::try_from(self.cleanup_month)
            .map_err(|_| AppError::invalid_data("cleanup_month must be between 1 and 12"))?;

        Ok(Settings {
            calendar: Calendar::new(offset),
            daily_reminder_at,
            reset_at,
            backup_interval: Duration::hours(i64::from(self.backup_interval_hours)),
            retention_days: self.retention_days,
            cleanup_month,
            wizard_timeout: Duration::minutes(i64::from(self.wizard_timeout_minutes)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

/// Values supplied on the command line, applied on top of the file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub utc_offset: Option<String>,
    pub daily_reminder_at: Option<String>,
    pub reset_at: Option<String>,
    pub backup_interval_hours: Option<u32>,
    pub retention_days: Option<u32>,
    pub cleanup_month: Option<u8>,
    pub wizard_timeout_minutes: Option<u32>,
}

/// Per-user application directory, e.g. `~/.config/remindbot`.
pub fn app_dir() -> Result<PathBuf, AppError> {
    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata).join(APP_DIR_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home).join(".config").join(APP_DIR_NAME))
    }
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    Ok(app_dir()?.join(CONFIG_FILE_NAME))
}

/// Never fails: a missing file yields defaults, a broken one yields defaults
/// plus the error so the caller can report it.
pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
    let config: Config = serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })?;
    config
        .settings()
        .map_err(|err| AppError::invalid_data(format!("{}: {}", path.display(), err.message())))?;
    Ok(config)
}

pub fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();
    if let Some(path) = overrides.database_path.as_ref() {
        merged.database_path = Some(path.clone());
    }
    if let Some(offset) = overrides.utc_offset.as_ref() {
        merged.utc_offset = offset.clone();
    }
    if let Some(at) = overrides.daily_reminder_at.as_ref() {
        merged.daily_reminder_at = at.clone();
    }
    if let Some(at) = overrides.reset_at.as_ref() {
        merged.reset_at = at.clone();
    }
    if let Some(hours) = overrides.backup_interval_hours {
        merged.backup_interval_hours = hours;
    }
    if let Some(days) = overrides.retention_days {
        merged.retention_days = days;
    }
    if let Some(month) = overrides.cleanup_month {
        merged.cleanup_month = month;
    }
    if let Some(minutes) = overrides.wizard_timeout_minutes {
        merged.wizard_timeout_minutes = minutes;
    }
    merged
}
