use crate::error::AppError;
use std::path::{Path, PathBuf};

pub mod sqlite_store;

pub use sqlite_store::{SCHEMA_VERSION, Store};

pub const STORE_ENV_VAR: &str = "REMINDBOT_DB_PATH";
const STORE_FILE_NAME: &str = "remindbot.db";

/// Resolves the database location: environment first, then the configured
/// path, then the per-user default.
pub fn store_path(configured: Option<&Path>) -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(STORE_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }

    Ok(crate::config::app_dir()?.join(STORE_FILE_NAME))
}
