//! The audit driver: iterate limited transcripts × solutions, audit each,
//! retain the best result, and emit progress events.
//!
//! The solver runs on one thread; parallelism across audits is the caller's
//! business (independent audits share no state). Cancellation is observed
//! at every yielded-solution boundary.

use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use areaudit_core::{Result, Student};

use crate::area::{AreaOfStudy, AreaResult};
use crate::context::AuditContext;
use crate::solve::is_better;

#[derive(Debug, Clone)]
pub enum AuditEvent {
    Start {
        stnum: String,
        area_code: String,
    },
    Estimate {
        iterations: u64,
    },
    Progress {
        iters: u64,
        elapsed_ms: u64,
        avg_iter_ms: f64,
    },
    Result {
        result: Box<AreaResult>,
        iters: u64,
        elapsed_ms: u64,
    },
    NoAuditsCompleted,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AuditOptions {
    /// Emit the estimate and stop.
    pub estimate_only: bool,
    /// Emit a progress event at least every this many iterations…
    pub progress_every_iters: u64,
    /// …or whenever this much wall time has passed.
    pub progress_interval: Duration,
}

impl Default for AuditOptions {
    fn default() -> Self {
        AuditOptions {
            estimate_only: false,
            progress_every_iters: 1_000,
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// Run one audit to completion (or cancellation).
///
/// Specification and data errors return `Err` and never poison other
/// audits; claim conflicts never surface here, being normal control
/// flow inside the solver.
pub fn run_audit(
    area: &AreaOfStudy,
    student: &Student,
    options: &AuditOptions,
    cancel: &CancellationToken,
    events: &UnboundedSender<AuditEvent>,
) -> Result<Option<AreaResult>> {
    let _ = events.send(AuditEvent::Start {
        stnum: student.stnum.clone(),
        area_code: area.code.clone(),
    });

    let estimate = area.estimate(student);
    info!(stnum = %student.stnum, code = %area.code, estimate, "audit started");
    let _ = events.send(AuditEvent::Estimate {
        iterations: estimate,
    });
    if options.estimate_only {
        return Ok(None);
    }

    let started = Instant::now();
    let mut last_progress = started;
    let mut iterations: u64 = 0;
    let mut best: Option<AreaResult> = None;
    let progress_every = options.progress_every_iters.max(1);

    let forced = AreaOfStudy::forced_clbids(student);
    for limited in area.limit.limited_transcripts(&student.courses, &forced) {
        let solve_ctx = area.solve_context(student, limited);

        for solution in area.result.solutions(&solve_ctx) {
            if cancel.is_cancelled() {
                info!(stnum = %student.stnum, code = %area.code, "audit cancelled");
                let _ = events.send(AuditEvent::Cancelled);
                return Ok(None);
            }

            let mut audit_ctx = AuditContext::new(solve_ctx.clone(), area.multicountable.clone());
            let result = area.audit_solution(&solution, &mut audit_ctx)?;
            iterations += 1;

            if iterations % progress_every == 0
                || last_progress.elapsed() >= options.progress_interval
            {
                last_progress = Instant::now();
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let _ = events.send(AuditEvent::Progress {
                    iters: iterations,
                    elapsed_ms,
                    avg_iter_ms: elapsed_ms as f64 / iterations as f64,
                });
            }

            let better = match &best {
                None => true,
                Some(incumbent) => is_better(&result.result, &incumbent.result),
            };
            if better {
                debug!(rank = %result.rank(), status = ?result.status(), "new best result");
                best = Some(result);
            }
        }
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &best {
        Some(result) => {
            info!(
                stnum = %student.stnum,
                code = %area.code,
                iterations,
                elapsed_ms,
                ok = result.is_ok(),
                "audit finished"
            );
            let _ = events.send(AuditEvent::Result {
                result: Box::new(result.clone()),
                iters: iterations,
                elapsed_ms,
            });
        }
        None => {
            info!(stnum = %student.stnum, code = %area.code, "no audits completed");
            let _ = events.send(AuditEvent::NoAuditsCompleted);
        }
    }

    Ok(best)
}
