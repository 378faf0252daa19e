use clap::Parser;
use remind_bot::chat::Bot;
use remind_bot::cli::{Cli, Command, SweepCommand, collect_config_overrides};
use remind_core::calendar::{format_clock_time, format_offset, parse_date};
use remind_core::config::{Settings, load_config_with_fallback, merge_overrides};
use remind_core::error::AppError;
use remind_core::model::Task;
use remind_core::notify::{Notifier, notifier_from_env, render_due_list, render_history};
use remind_core::scheduler::{Job, Scheduler, TICK_INTERVAL_SECS};
use remind_core::storage::{Store, store_path};
use remind_core::sweeps::{self, SweepReport};
use remind_core::task_api::{self, CompletionOutcome};
use tabled::{Table, Tabled};
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Frequency")]
    frequency: String,
    #[tabled(rename = "At")]
    at: String,
    #[tabled(rename = "Points")]
    points: i64,
    #[tabled(rename = "Done")]
    done: &'static str,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            frequency: task.frequency.to_string(),
            at: task.reminder_time.map(format_clock_time).unwrap_or_else(|| "-".to_string()),
            points: task.points,
            done: if task.completed { "yes" } else { "no" },
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let rendered =
        serde_json::to_string(value).map_err(|err| AppError::invalid_data(err.to_string()))?;
    println!("{rendered}");
    Ok(())
}

fn print_tasks_plain(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
    println!("{}", Table::new(rows));
}

fn print_sweep_report(name: &str, report: &SweepReport, json: bool) -> Result<(), AppError> {
    if json {
        let failures: Vec<serde_json::Value> = report
            .failures
            .iter()
            .map(|failure| {
                serde_json::json!({
                    "chat_id": failure.chat_id,
                    "code": failure.error.code(),
                    "message": failure.error.message(),
                })
            })
            .collect();
        return print_json(&serde_json::json!({
            "sweep": name,
            "users": report.users_seen,
            "notified": report.notified,
            "skipped": report.skipped,
            "failures": failures,
        }));
    }
    println!(
        "{name} sweep: {} user(s), {} notified, {} skipped, {} failed",
        report.users_seen,
        report.notified,
        report.skipped,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  chat {}: {}", failure.chat_id, failure.error);
    }
    Ok(())
}

fn print_count(name: &str, count: usize, json: bool, label: &str) -> Result<(), AppError> {
    if json {
        print_json(&serde_json::json!({ "sweep": name, "count": count }))
    } else {
        println!("{label} {count} task(s)");
        Ok(())
    }
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn load_settings(cli: &Cli) -> Result<(Settings, Store), AppError> {
    let overrides = collect_config_overrides(&cli.config_override).map_err(AppError::invalid_input)?;
    let loaded = load_config_with_fallback();
    if let Some(err) = loaded.error.as_ref() {
        warn!(error = %err, "falling back to default configuration");
    }
    let config = merge_overrides(&loaded.config, &overrides);
    let settings = config.settings()?;
    let path = store_path(config.database_path.as_deref())?;
    let store = Store::open(&path)?;
    Ok((settings, store))
}

fn run_command(cli: Cli) -> Result<(), AppError> {
    let (settings, mut store) = load_settings(&cli)?;
    let calendar = settings.calendar;
    let json = cli.json;
    let now = OffsetDateTime::now_utc();

    match cli.command {
        Command::Register { chat } => {
            let (user, created) = task_api::register_user(&store, chat)?;
            if json {
                print_json(&serde_json::json!({ "user": user, "created": created }))?;
            } else if created {
                println!("Registered chat {chat}");
            } else {
                println!("Chat {chat} is already registered");
            }
        }
        Command::Add {
            chat,
            title,
            frequency,
            days,
            at,
            points,
        } => {
            let new_task =
                task_api::parse_new_task(&title, &frequency, days.as_deref(), at.as_deref(), points)?;
            let task = task_api::add_task(&store, chat, &new_task, now)?;
            if json {
                print_json(&task)?;
            } else {
                println!("Added task #{}: {} ({})", task.id, task.title, task.frequency);
            }
        }
        Command::Done { chat, id } => {
            let task_id = task_api::parse_task_id(&id)?;
            let outcome = task_api::complete_task(&mut store, chat, task_id, now, &calendar)?;
            let recorded = matches!(outcome, CompletionOutcome::Recorded { .. });
            let task = outcome.task();
            if json {
                let status = if recorded { "recorded" } else { "already_done" };
                print_json(&serde_json::json!({ "status": status, "task": task }))?;
            } else if recorded {
                println!("Completed task #{}: {}", task.id, task.title);
            } else {
                println!("Task #{} is already done for today: {}", task.id, task.title);
            }
        }
        Command::Delete { chat, id } => {
            let task = task_api::delete_task(&store, chat, task_api::parse_task_id(&id)?)?;
            if json {
                print_json(&task)?;
            } else {
                println!("Deleted task #{}: {}", task.id, task.title);
            }
        }
        Command::List { chat } => {
            let tasks = task_api::list_tasks(&store, chat)?;
            if json {
                print_json(&tasks)?;
            } else {
                print_tasks_plain(&tasks);
            }
        }
        Command::Today { chat, date } => {
            let date = match date {
                Some(raw) => parse_date(&raw)?,
                None => calendar.date_of(now),
            };
            let due = task_api::due_tasks_for(&store, chat, date, &calendar)?;
            if json {
                print_json(&due)?;
            } else {
                println!("{}", render_due_list(&due, date));
            }
        }
        Command::History { chat, id } => {
            let (task, events) = task_api::task_history(&store, chat, task_api::parse_task_id(&id)?)?;
            if json {
                print_json(&serde_json::json!({ "task": task, "completions": events }))?;
            } else {
                println!("{}", render_history(&task, &events, &calendar));
            }
        }
        Command::Sweep { sweep } => run_sweep(sweep, &mut store, &settings, now, json)?,
        Command::Run => run_bot(store, settings)?,
    }

    Ok(())
}

fn run_sweep(
    sweep: SweepCommand,
    store: &mut Store,
    settings: &Settings,
    now: OffsetDateTime,
    json: bool,
) -> Result<(), AppError> {
    let calendar = &settings.calendar;
    match sweep {
        SweepCommand::Reminder => {
            let notifier = notifier_from_env();
            let report = sweeps::daily_reminder(store, notifier.as_ref(), calendar, now)?;
            print_sweep_report("reminder", &report, json)
        }
        SweepCommand::Backup => {
            let notifier = notifier_from_env();
            let report = sweeps::backup_reminder(store, notifier.as_ref(), calendar, now)?;
            print_sweep_report("backup", &report, json)
        }
        SweepCommand::Reset => {
            let reset = sweeps::daily_reset(store, calendar, now)?;
            print_count("reset", reset, json, "Reset")
        }
        SweepCommand::Repair => {
            let changed = task_api::rebuild_completion_cache(store, calendar.date_of(now), calendar)?;
            print_count("repair", changed, json, "Repaired")
        }
        SweepCommand::Cleanup => {
            let pruned = sweeps::cleanup_check(store, settings, now)?;
            if json {
                return print_json(&serde_json::json!({ "sweep": "cleanup", "pruned": pruned }));
            }
            match pruned {
                Some(count) => println!("Pruned {count} completion(s)"),
                None => println!("Not the cleanup month; nothing pruned"),
            }
            Ok(())
        }
    }
}

fn run_bot(store: Store, settings: Settings) -> Result<(), AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| AppError::io(err.to_string()))?;
    runtime.block_on(event_loop(store, settings))
}

async fn event_loop(mut store: Store, settings: Settings) -> Result<(), AppError> {
    let notifier = notifier_from_env();
    let mut bot = Bot::new(&settings);
    let mut scheduler = Scheduler::new(&settings);
    let mut input = BufReader::new(tokio::io::stdin());
    let mut buf = Vec::new();
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(TICK_INTERVAL_SECS));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(offset = %format_offset(settings.calendar.offset()), "bot started");
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let now = OffsetDateTime::now_utc();
                run_due_jobs(&mut scheduler, &mut store, notifier.as_ref(), &settings, now);
                for chat_id in bot.wizards_mut().expire(now) {
                    deliver(notifier.as_ref(), chat_id, "That task draft expired. Send /add to start again.");
                }
            }
            read = input.read_until(b'\n', &mut buf) => {
                match read {
                    Ok(0) => {
                        // final line without a trailing newline
                        if !buf.is_empty() {
                            let line = String::from_utf8_lossy(&buf).into_owned();
                            handle_line(&mut bot, &mut store, notifier.as_ref(), &line);
                        }
                        break;
                    }
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).into_owned();
                        buf.clear();
                        handle_line(&mut bot, &mut store, notifier.as_ref(), &line);
                    }
                    Err(err) => {
                        buf.clear();
                        warn!(error = %err, "failed to read inbound line");
                    }
                }
            }
        }
    }
    info!("input closed, shutting down");
    Ok(())
}

/// One inbound chat message: `<chat_id> <text>`.
fn handle_line(bot: &mut Bot, store: &mut Store, notifier: &dyn Notifier, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let Some((chat, text)) = line.split_once(char::is_whitespace) else {
        eprintln!("ERROR: {}", AppError::invalid_input("expected '<chat_id> <text>'"));
        return;
    };
    let Ok(chat_id) = chat.parse::<i64>() else {
        eprintln!("ERROR: {}", AppError::invalid_input(format!("'{chat}' is not a chat id")));
        return;
    };

    let reply = match bot.handle(store, chat_id, text, OffsetDateTime::now_utc()) {
        Ok(reply) => reply,
        Err(err) => format!("ERROR: {err}"),
    };
    deliver(notifier, chat_id, &reply);
}

fn deliver(notifier: &dyn Notifier, chat_id: i64, text: &str) {
    if let Err(err) = notifier.deliver(chat_id, text) {
        warn!(chat_id, error = %err, "reply not delivered");
    }
}

fn run_due_jobs(
    scheduler: &mut Scheduler,
    store: &mut Store,
    notifier: &dyn Notifier,
    settings: &Settings,
    now: OffsetDateTime,
) {
    let calendar = &settings.calendar;
    for job in scheduler.due_jobs(calendar.local(now)) {
        let result = match job {
            Job::DailyReset => sweeps::daily_reset(store, calendar, now).map(|_| ()),
            Job::CleanupCheck => sweeps::cleanup_check(store, settings, now).map(|_| ()),
            Job::DailyReminder => sweeps::daily_reminder(store, notifier, calendar, now).map(|_| ()),
            Job::BackupReminder => sweeps::backup_reminder(store, notifier, calendar, now).map(|_| ()),
            Job::ReminderTimes(window) => {
                sweeps::reminder_time_tick(store, notifier, calendar, now, window).map(|_| ())
            }
        };
        if let Err(err) = result {
            warn!(?job, error = %err, "scheduled job failed; retrying on a later tick");
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            if !err.use_stderr() {
                err.exit();
            }
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };

    if let Err(err) = run_command(cli) {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
