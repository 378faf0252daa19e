pub mod calendar;
pub mod config;
pub mod error;
pub mod model;
pub mod notify;
pub mod recurrence;
pub mod scheduler;
pub mod storage;
pub mod sweeps;
pub mod task_api;
pub mod wizard;
