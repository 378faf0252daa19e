use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;

fn temp_path(file_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("remindbot-{nanos}-{file_name}"))
}

fn run(db: &Path, args: &[&str]) -> Output {
    let exe = env!("CARGO_BIN_EXE_remind_bot");
    Command::new(exe)
        .args(args)
        .env("REMINDBOT_DB_PATH", db)
        .env("REMINDBOT_CONFIG_PATH", db.with_extension("missing.json"))
        .env("REMINDBOT_DISABLE_NOTIFICATIONS", "1")
        .output()
        .expect("failed to run remind_bot")
}

fn json(output: &Output) -> serde_json::Value {
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).expect("json output")
}

#[test]
fn add_requires_registered_chat() {
    let db = temp_path("cli-unregistered.db");

    let output = run(&db, &["add", "42", "Water plants"]);
    std::fs::remove_file(&db).ok();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: not_found"));
}

#[test]
fn add_list_done_history_flow() {
    let db = temp_path("cli-flow.db");
    assert!(run(&db, &["register", "42"]).status.success());

    let added = json(&run(
        &db,
        &["add", "42", "Gym", "--frequency", "specific_days", "--days", "mon,thu", "--at", "18:00", "--points", "3", "--json"],
    ));
    assert_eq!(added["id"], 1);
    assert_eq!(added["frequency"], "SPECIFIC_WEEKDAYS (MON,THU)");
    assert_eq!(added["reminder_time"], "18:00");
    assert_eq!(added["points"], 3);

    json(&run(&db, &["add", "42", "Stretch", "-f", "daily", "--json"]));

    let listed = json(&run(&db, &["list", "42", "--json"]));
    assert_eq!(listed.as_array().map(Vec::len), Some(2));

    let table = run(&db, &["list", "42"]);
    let stdout = String::from_utf8_lossy(&table.stdout);
    assert!(stdout.contains("Stretch"));
    assert!(stdout.contains("Frequency"));

    let done = json(&run(&db, &["done", "42", "#2", "--json"]));
    assert_eq!(done["status"], "recorded");
    assert_eq!(done["task"]["completed"], true);
    let again = json(&run(&db, &["done", "42", "2", "--json"]));
    assert_eq!(again["status"], "already_done");

    let history = json(&run(&db, &["history", "42", "2", "--json"]));
    assert_eq!(history["completions"].as_array().map(Vec::len), Some(1));

    let today = OffsetDateTime::now_utc().date();
    let due = run(&db, &["today", "42"]);
    let stdout = String::from_utf8_lossy(&due.stdout);
    assert!(stdout.contains(&format!("Due on {today}")));
    assert!(stdout.contains("[x] #2 Stretch"));

    let deleted = json(&run(&db, &["delete", "42", "2", "--json"]));
    assert_eq!(deleted["title"], "Stretch");
    let missing = run(&db, &["history", "42", "2"]);
    std::fs::remove_file(&db).ok();

    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("ERROR: not_found"));
}

#[test]
fn today_with_date_follows_weekday_rule() {
    let db = temp_path("cli-today.db");
    run(&db, &["register", "7"]);
    run(&db, &["add", "7", "Gym", "-f", "specific_weekdays", "--days", "MON,THU"]);

    // 2025-03-10 is a Monday, 2025-03-11 a Tuesday
    let monday = json(&run(&db, &["today", "7", "--date", "2025-03-10", "--json"]));
    let tuesday = json(&run(&db, &["today", "7", "--date", "2025-03-11", "--json"]));
    std::fs::remove_file(&db).ok();

    assert_eq!(monday.as_array().map(Vec::len), Some(1));
    assert_eq!(monday[0]["title"], "Gym");
    assert_eq!(monday[0]["satisfied"], false);
    assert_eq!(tuesday.as_array().map(Vec::len), Some(0));
}

#[test]
fn add_rejects_invalid_frequency_input() {
    let db = temp_path("cli-invalid.db");
    run(&db, &["register", "7"]);

    let no_days = run(&db, &["add", "7", "Gym", "-f", "specific_weekdays"]);
    let stray_days = run(&db, &["add", "7", "Gym", "-f", "weekly", "--days", "MON"]);
    let unknown = run(&db, &["add", "7", "Gym", "-f", "hourly"]);
    let listed = json(&run(&db, &["list", "7", "--json"]));
    std::fs::remove_file(&db).ok();

    for output in [no_days, stray_days, unknown] {
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("ERROR: invalid_input"));
    }
    assert_eq!(listed.as_array().map(Vec::len), Some(0));
}

#[test]
fn invalid_config_override_is_rejected() {
    let db = temp_path("cli-override.db");

    let output = run(&db, &["list", "7", "--config-override", "theme=dark"]);
    std::fs::remove_file(&db).ok();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown config field"));
}
