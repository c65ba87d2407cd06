/*
[INPUT]:  CLI arguments, optional YAML job list, OS shutdown signal
[OUTPUT]: A running conversion queue logging every field-change event
[POS]:    Demo binary - plays the application shell around taskdeck-core
[UPDATE]: When changing CLI flags, the job file schema, or the event loop
*/

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskdeck_core::{
    Field, FieldValue, StatusLabels, TaskManager, TaskStatus, WorkerTask,
};

#[derive(Parser, Debug)]
#[command(name = "convert-demo", version, about = "taskdeck conversion queue demo")]
struct Cli {
    /// YAML job list; a built-in set of fake conversions is used when omitted.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    /// Acknowledge failed jobs automatically so the queue keeps advancing.
    #[arg(long = "auto-ack")]
    auto_ack: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct DemoConfig {
    #[serde(default)]
    labels: StatusLabels,
    jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct JobConfig {
    name: String,
    source: String,
    #[serde(default = "default_steps")]
    steps: u32,
    #[serde(default = "default_step_ms")]
    step_ms: u64,
    /// Step at which the fake conversion fails, for exercising the
    /// acknowledgment flow.
    #[serde(default)]
    fail_at: Option<u32>,
}

fn default_steps() -> u32 {
    20
}

fn default_step_ms() -> u64 {
    150
}

fn default_config() -> DemoConfig {
    DemoConfig {
        labels: StatusLabels::default(),
        jobs: vec![
            JobConfig {
                name: "convert intro".into(),
                source: "intro.mov".into(),
                steps: 12,
                step_ms: 120,
                fail_at: None,
            },
            JobConfig {
                name: "convert broken clip".into(),
                source: "clip.avi".into(),
                steps: 10,
                step_ms: 100,
                fail_at: Some(4),
            },
            JobConfig {
                name: "convert outro".into(),
                source: "outro.mov".into(),
                steps: 8,
                step_ms: 120,
                fail_at: None,
            },
        ],
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    let config = match &args.config_path {
        Some(path) => load_config(path)?,
        None => default_config(),
    };
    info!(job_count = config.jobs.len(), "job list loaded");

    let manager = TaskManager::with_labels(config.labels.clone());
    let mut events = manager.watch();

    for job in &config.jobs {
        manager.push(build_job(&manager, job.clone()));
    }
    manager.set_queue(true);

    loop {
        tokio::select! {
            change = events.recv() => match change {
                Ok(change) => {
                    log_change(&change)?;
                    if args.auto_ack {
                        acknowledge_failures(&manager, &change);
                    }
                    if change.field == Field::CurrentTask
                        && change.value == FieldValue::TaskRef(None)
                    {
                        info!("queue drained");
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            result = tokio::signal::ctrl_c() => {
                result.context("install SIGINT handler")?;
                info!("received SIGINT, stopping queue");
                manager.stop();
                break;
            }
        }
    }

    let snapshot = manager.snapshot();
    info!(
        queued = snapshot.queued,
        total_enqueued = snapshot.total_enqueued,
        "shutting down"
    );
    Ok(())
}

fn build_job(manager: &TaskManager, job: JobConfig) -> Arc<WorkerTask> {
    let name = job.name.clone();
    WorkerTask::new(name, manager.labels(), move |probe| async move {
        for step in 0..job.steps {
            if job.fail_at == Some(step) {
                return Err(anyhow!(
                    "simulated failure converting {} at segment {}",
                    job.source,
                    step + 1
                ));
            }
            probe.set_target(format!("{} [segment {}/{}]", job.source, step + 1, job.steps));
            probe.set_percentage(f64::from(step) / f64::from(job.steps));
            sleep(Duration::from_millis(job.step_ms)).await;
        }
        probe.set_message(format!("{} converted", job.source));
        Ok(())
    })
}

/// On a Failed status event, acknowledge the failed head and evict it so
/// the queue keeps moving.
fn acknowledge_failures(manager: &TaskManager, change: &taskdeck_core::FieldChange) {
    if change.field != Field::Status
        || change.value != FieldValue::Status(TaskStatus::Failed)
    {
        return;
    }
    if let Some(task) = manager.current_task() {
        if task.core().status() == TaskStatus::Failed {
            warn!(task_id = %task.core().id(), message = %task.core().message(), "acknowledging failed job");
            task.core().set_handled(true);
            manager.remove(task.core().id());
        }
    }
}

fn log_change(change: &taskdeck_core::FieldChange) -> Result<()> {
    let rendered = serde_json::to_string(change).context("render event")?;
    info!(event = %rendered, "field change");
    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<DemoConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read job list {}", path.display()))?;
    serde_yaml::from_str(&content).context("parse job list")
}
