//! areaudit - audit one student against one area of study.
//!
//! Usage:
//!   areaudit --area major.yaml --student student.json
//!   areaudit --area major.yaml --student student.json --estimate-only
//!   areaudit --student student.json --transcript-only

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use areaudit_core::{Constants, Student};
use areaudit_solver::{run_audit, AreaOfStudy, AuditEvent, AuditOptions};

#[derive(Parser)]
#[command(
    name = "areaudit",
    about = "Degree-audit solver: checks a transcript against an area of study",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Area specification file (YAML or JSON)
    #[arg(long)]
    area: Option<PathBuf>,

    /// Student record file (JSON)
    #[arg(long)]
    student: PathBuf,

    /// Log level
    #[arg(long, default_value = "warn", value_parser = ["error", "warn", "info", "debug"])]
    loglevel: String,

    /// Emit the iteration estimate and stop
    #[arg(long, default_value_t = false)]
    estimate_only: bool,

    /// Dump the parsed transcript and stop
    #[arg(long, default_value_t = false)]
    transcript_only: bool,
}

fn load_document(path: &PathBuf) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    if is_yaml {
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    } else {
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

fn print_transcript(student: &Student) {
    println!("course,clbid,credits,name,year,term,type,gereqs,is_repeat,in_gpa");
    for c in &student.courses {
        println!(
            "{},{},{},{},{},{},{},{},{},{}",
            c.course(),
            c.clbid,
            c.credits,
            c.name,
            c.year,
            c.term,
            c.sub_type.as_str(),
            c.gereqs.join(";"),
            c.is_repeat,
            c.is_in_gpa,
        );
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.loglevel.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let student_doc = load_document(&cli.student)?;
    let student = Student::load(&student_doc)?;

    if cli.transcript_only {
        print_transcript(&student);
        return Ok(ExitCode::SUCCESS);
    }

    let area_path = cli
        .area
        .context("--area is required unless --transcript-only is given")?;
    let area_doc = load_document(&area_path)?;
    let constants = Constants::new(student.matriculation);
    let area = AreaOfStudy::load(&area_doc, &constants, &student.areas)?;

    let options = AuditOptions {
        estimate_only: cli.estimate_only,
        ..AuditOptions::default()
    };

    let cancel = CancellationToken::new();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<AuditEvent>();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling the audit");
                cancel.cancel();
            }
        });
    }

    let audit_handle = {
        let area = area.clone();
        let student = student.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            run_audit(&area, &student, &options, &cancel, &events_tx)
        })
    };

    let mut cancelled = false;
    while let Some(event) = events_rx.recv().await {
        match event {
            AuditEvent::Start { stnum, area_code } => {
                info!("auditing #{stnum} against {area_code}");
            }
            AuditEvent::Estimate { iterations } => {
                info!("estimate: {iterations} iterations");
                if cli.estimate_only {
                    println!("{iterations}");
                }
            }
            AuditEvent::Progress {
                iters,
                avg_iter_ms,
                ..
            } => {
                info!("{iters} audits at {avg_iter_ms:.2}ms per audit");
            }
            AuditEvent::Result { .. } => {}
            AuditEvent::NoAuditsCompleted => {
                error!("no audits completed");
            }
            AuditEvent::Cancelled => {
                cancelled = true;
            }
        }
    }

    let best = audit_handle.await.context("audit worker panicked")??;

    if cancelled {
        return Ok(ExitCode::from(130));
    }
    if cli.estimate_only {
        return Ok(ExitCode::SUCCESS);
    }

    match best {
        Some(result) => {
            println!("{}", serde_json::to_string_pretty(&result.to_json())?);
            if result.is_ok() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        None => Ok(ExitCode::FAILURE),
    }
}
