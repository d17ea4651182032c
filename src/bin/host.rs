//! Headless host for the background runner.
//!
//! Reads newline-delimited JSON commands from stdin and writes responses and
//! events (execute signals, scheduler status, state transitions) as JSON
//! lines to stdout. All tracing goes to stderr and a daily log file so that
//! stdout remains a clean protocol channel.
//!
//! ```text
//! {"id":"1","command":"start","options":{"taskTitle":"Sync","parameters":{"n":1}}}
//! {"id":"2","command":"update","update":{"taskDesc":"halfway"}}
//! {"id":"3","command":"schedule_daily","hour":9,"minute":0,"options":{}}
//! {"id":"4","command":"stop"}
//! ```
//!
//! Usage: `bgrunner-host [CONFIG_PATH]`.

use bgrunner::config::RunnerConfig;
use bgrunner::events::{ChannelConsumer, run_consumer};
use bgrunner::platform::local;
use bgrunner::presenter::StatusContent;
use bgrunner::runner::{RunnerState, Transition};
use bgrunner::scheduler::ScheduleStore;
use bgrunner::{
    BackgroundRunner, ExecuteEvent, OptionStore, SchedulerEvent, StatusUpdate, TaskOptions,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type SharedWriter = Arc<Mutex<BufWriter<tokio::io::Stdout>>>;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<String>,
    #[serde(flatten)]
    command: Command,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum Command {
    Start {
        #[serde(default)]
        options: TaskOptions,
    },
    Stop,
    Update {
        update: StatusUpdate,
        #[serde(default)]
        persist: bool,
    },
    ScheduleDaily {
        hour: u8,
        minute: u8,
        #[serde(default)]
        options: TaskOptions,
    },
    CancelSchedule,
    Status,
    Signal {
        action: String,
    },
    Reclaim,
    Attach,
    Detach,
    Shutdown,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Output<'a> {
    Response {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<&'a str>,
        ok: bool,
        payload: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Execute {
        parameters: &'a Value,
    },
    Scheduler {
        #[serde(flatten)]
        event: &'a SchedulerEvent,
    },
    Transition {
        from: RunnerState,
        to: RunnerState,
    },
}

#[derive(Debug, Serialize)]
struct StatusReport {
    state: RunnerState,
    running: bool,
    status: Option<StatusContent>,
    next_fire: Option<DateTime<Local>>,
    pending_events: usize,
    battery_optimization_ignored: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();
    tracing::info!("bgrunner-host starting");

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(RunnerConfig::default_config_path);
    let config = RunnerConfig::load_or_default(&config_path)?;
    tracing::info!("configuration loaded from {}", config_path.display());

    let (fire_tx, fire_rx) = mpsc::unbounded_channel();
    let (restart_tx, restart_rx) = mpsc::unbounded_channel();
    let (scheduler_tx, scheduler_rx) = mpsc::unbounded_channel();

    let permissions = config.permissions.clone().into_shared();
    let platform = local::platform(permissions, fire_tx, restart_tx)?;
    let store = Arc::new(OptionStore::file_backed(
        config.storage.effective_options_path(),
    ));
    let schedules = Arc::new(ScheduleStore::file_backed(
        config.storage.effective_schedule_path(),
    ));
    let timeout = Duration::from_millis(config.consumer.headless_timeout_ms);
    let runner = Arc::new(BackgroundRunner::new(
        config,
        platform,
        store,
        schedules,
        Some(scheduler_tx),
    ));

    let writer: SharedWriter = Arc::new(Mutex::new(BufWriter::new(tokio::io::stdout())));
    let cancel = CancellationToken::new();
    let dispatch = Arc::clone(&runner).run_dispatch(fire_rx, restart_rx, cancel.clone());
    let scheduler_forwarder = tokio::spawn(forward_scheduler_events(scheduler_rx, Arc::clone(&writer)));
    let transition_forwarder = tokio::spawn(forward_transitions(runner.subscribe(), Arc::clone(&writer)));

    // Recover before the consumer exists; its execute event is parked and
    // flushed on attach below. This also re-arms a recorded daily schedule.
    match runner.recover_on_launch() {
        Ok(outcome) => tracing::info!("launch recovery: {outcome:?}"),
        Err(e) => tracing::warn!("launch recovery failed: {e}"),
    }

    let (exec_tx, exec_rx) = mpsc::unbounded_channel::<ExecuteEvent>();
    let consumer = Arc::new(ChannelConsumer::new(exec_tx));
    let flushed = runner.attach_consumer(&consumer);
    if flushed > 0 {
        tracing::info!("delivered {flushed} parked execute event(s)");
    }

    let exec_writer = Arc::clone(&writer);
    let consumer_task = tokio::spawn(run_consumer(exec_rx, timeout, move |event| {
        let writer = Arc::clone(&exec_writer);
        async move {
            write_json(
                &writer,
                &Output::Execute {
                    parameters: &event.parameters,
                },
            )
            .await
        }
    }));

    let reader_result = run_reader(&runner, &consumer, &writer).await;

    cancel.cancel();
    let _ = dispatch.await;
    drop(consumer);
    let _ = consumer_task.await;
    scheduler_forwarder.abort();
    transition_forwarder.abort();

    match &reader_result {
        Ok(()) => tracing::info!("bgrunner-host shut down cleanly"),
        Err(e) => tracing::error!(error = %e, "bgrunner-host exited with error"),
    }
    reader_result
}

/// Install stderr logging plus a daily-rolling file under the logs dir.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("bgrunner-host")
        .filename_suffix("log")
        .build(bgrunner::runner_dirs::logs_dir());

    match appender {
        Ok(appender) => {
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(file_writer),
                )
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            tracing::warn!("file logging disabled: {e}");
            None
        }
    }
}

/// Read stdin line-by-line and answer each command.
async fn run_reader(
    runner: &Arc<BackgroundRunner>,
    consumer: &Arc<ChannelConsumer>,
    writer: &SharedWriter,
) -> anyhow::Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            tracing::info!("stdin closed (EOF); shutting down");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(raw_line = %trimmed, "failed to parse command: {e}");
                respond(writer, None, Err(anyhow::anyhow!("invalid command: {e}"))).await?;
                continue;
            }
        };

        let shutdown = matches!(request.command, Command::Shutdown);
        let result = execute(runner, consumer, request.command);
        respond(writer, request.id.as_deref(), result).await?;
        if shutdown {
            tracing::info!("shutdown requested");
            break;
        }
    }
    Ok(())
}

fn execute(
    runner: &BackgroundRunner,
    consumer: &Arc<ChannelConsumer>,
    command: Command,
) -> anyhow::Result<Value> {
    let payload = match command {
        Command::Start { options } => json!({ "outcome": runner.start(options)? }),
        Command::Stop => json!({ "outcome": runner.stop()? }),
        Command::Update { update, persist } => {
            let outcome = if persist {
                runner.update_status_and_persist(&update)?
            } else {
                runner.update_status(&update)
            };
            json!({ "outcome": outcome })
        }
        Command::ScheduleDaily {
            hour,
            minute,
            options,
        } => json!({ "next_fire": runner.schedule_daily(hour, minute, &options)? }),
        Command::CancelSchedule => json!({ "cancelled": runner.cancel_schedule()? }),
        Command::Status => serde_json::to_value(StatusReport {
            state: runner.state(),
            running: runner.is_running(),
            status: runner.current_status(),
            next_fire: runner.scheduler().next_fire(),
            pending_events: runner.queue().pending_len(),
            battery_optimization_ignored: runner.is_battery_optimization_ignored(),
        })?,
        Command::Signal { action } => json!({ "outcome": runner.handle_restart_action(&action)? }),
        Command::Reclaim => json!({ "restart_requested": runner.on_reclaim()? }),
        Command::Attach => json!({ "flushed": runner.attach_consumer(consumer) }),
        Command::Detach => {
            runner.detach_consumer();
            json!({})
        }
        Command::Shutdown => json!({}),
    };
    Ok(payload)
}

async fn respond(
    writer: &SharedWriter,
    id: Option<&str>,
    result: anyhow::Result<Value>,
) -> anyhow::Result<()> {
    let output = match result {
        Ok(payload) => Output::Response {
            id,
            ok: true,
            payload,
            error: None,
        },
        Err(e) => Output::Response {
            id,
            ok: false,
            payload: Value::Null,
            error: Some(format!("{e:#}")),
        },
    };
    write_json(writer, &output).await
}

async fn forward_scheduler_events(
    mut rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    writer: SharedWriter,
) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = write_json(&writer, &Output::Scheduler { event: &event }).await {
            tracing::warn!("failed to write scheduler event; stopping forwarder: {e}");
            break;
        }
    }
}

async fn forward_transitions(mut rx: broadcast::Receiver<Transition>, writer: SharedWriter) {
    loop {
        match rx.recv().await {
            Ok(Transition { from, to }) => {
                if let Err(e) = write_json(&writer, &Output::Transition { from, to }).await {
                    tracing::warn!("failed to write transition; stopping forwarder: {e}");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(lagged = n, "transition forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Write one JSON line to stdout and flush.
async fn write_json<T: Serialize>(writer: &SharedWriter, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string(value)?;
    let mut w = writer.lock().await;
    w.write_all(json.as_bytes()).await?;
    w.write_all(b"\n").await?;
    w.flush().await?;
    Ok(())
}
