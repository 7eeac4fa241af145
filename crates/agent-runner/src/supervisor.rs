//! Run supervision
//!
//! One supervised execution per claimed run: spawn the executor, relay
//! its events, watch the stop token, and report the terminal status
//! back to the coordinator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use ao_core::api::{
    BindSessionRequest, ClaimedRun, ReportStatusRequest, ReportedStatus, SessionEventRequest,
};

use crate::active::ActiveRuns;
use crate::client::{backoff_delay, CoordinatorApi};
use crate::config::RunnerIdentity;
use crate::output::{log_event_data, parse_line, ExecutorEvent, OutputCollector};
use crate::payload::build_payload;
use crate::process::{spawn, OutputLine, OutputStream};

const RUNNING_REPORT_ATTEMPTS: u32 = 2;
const TERMINAL_REPORT_ATTEMPTS: u32 = 3;

/// Everything a supervised run needs besides the run itself.
#[derive(Clone)]
pub struct RunContext {
    pub client: Arc<dyn CoordinatorApi>,
    pub active: Arc<ActiveRuns>,
    pub identity: RunnerIdentity,
    pub executor_command: String,
    pub stop_grace: Duration,
}

struct RunOutcome {
    status: ReportedStatus,
    error: Option<String>,
    result: Option<String>,
}

/// Execute one claimed run to completion. Never returns an error: every
/// failure mode ends in a terminal status report instead.
pub async fn execute_run(ctx: RunContext, run: ClaimedRun) {
    let handle = ctx.active.insert(run.run_id, run.session_id);
    info!(
        run_id = %run.run_id,
        session_id = %run.session_id,
        agent = %run.agent_name,
        "Executing run"
    );

    let payload = build_payload(&run, &ctx.identity);
    let workdir = PathBuf::from(
        payload
            .project_dir
            .clone()
            .unwrap_or_else(|| ctx.identity.project_dir.clone()),
    );
    let payload_json = match serde_json::to_string(&payload) {
        Ok(json) => json,
        Err(e) => {
            report_terminal(
                &ctx,
                &run,
                RunOutcome {
                    status: ReportedStatus::Failed,
                    error: Some(format!("Failed to encode executor payload: {e}")),
                    result: None,
                },
            )
            .await;
            ctx.active.remove(run.run_id);
            return;
        }
    };

    let env = vec![(
        "AGENT_ORCHESTRATOR_API_URL".to_string(),
        ctx.identity.gateway_url.clone(),
    )];
    let (mut child, mut rx) = match spawn(&ctx.executor_command, &workdir, &env, &payload_json).await
    {
        Ok(spawned) => spawned,
        Err(e) => {
            report_terminal(
                &ctx,
                &run,
                RunOutcome {
                    status: ReportedStatus::Failed,
                    error: Some(format!("Failed to start executor: {e}")),
                    result: None,
                },
            )
            .await;
            ctx.active.remove(run.run_id);
            return;
        }
    };
    debug!(run_id = %run.run_id, pid = ?child.pid(), "Executor started");

    report_status(
        &ctx,
        run.run_id,
        ReportStatusRequest {
            status: ReportedStatus::Running,
            error: None,
            result: None,
        },
        RUNNING_REPORT_ATTEMPTS,
    )
    .await;

    let mut collector = OutputCollector::new();

    let mut stopped = false;
    tokio::select! {
        _ = pump_lines(&mut rx, &mut collector, &ctx, &run) => {}
        _ = handle.stop.cancelled() => {
            stopped = true;
        }
    }

    if stopped {
        info!(run_id = %run.run_id, "Stop requested, terminating executor");
        if let Err(e) = child.terminate() {
            warn!(run_id = %run.run_id, "Soft terminate failed: {e}");
        }
        let graceful =
            tokio::time::timeout(ctx.stop_grace, pump_lines(&mut rx, &mut collector, &ctx, &run))
                .await;
        if graceful.is_err() {
            warn!(run_id = %run.run_id, "Executor ignored terminate, killing");
            if let Err(e) = child.kill().await {
                warn!(run_id = %run.run_id, "Kill failed: {e}");
            }
            pump_lines(&mut rx, &mut collector, &ctx, &run).await;
        }
    }

    let exit_code = match child.wait().await {
        Ok(code) => code,
        Err(e) => {
            warn!(run_id = %run.run_id, "Wait on executor failed: {e}");
            -1
        }
    };

    let outcome = decide_outcome(stopped, exit_code, &collector);
    info!(
        run_id = %run.run_id,
        exit_code,
        status = ?outcome.status,
        "Run finished"
    );
    report_terminal(&ctx, &run, outcome).await;
    ctx.active.remove(run.run_id);
}

/// Drain executor output until both pipes close, relaying session
/// bindings and log events to the coordinator as they arrive.
async fn pump_lines(
    rx: &mut mpsc::Receiver<OutputLine>,
    collector: &mut OutputCollector,
    ctx: &RunContext,
    run: &ClaimedRun,
) {
    while let Some(OutputLine { stream, line }) = rx.recv().await {
        if stream == OutputStream::Stderr {
            debug!(run_id = %run.run_id, "executor stderr: {line}");
            collector.note_stderr(&line);
            continue;
        }
        match collector.note_stdout(parse_line(&line)) {
            Some(ExecutorEvent::SessionBound {
                executor_session_id,
            }) => {
                let req = BindSessionRequest {
                    executor_session_id,
                    executor_type: Some(ctx.identity.profile.as_str().to_string()),
                    hostname: Some(ctx.identity.hostname.clone()),
                };
                if let Err(e) = ctx.client.bind_session(run.session_id, &req).await {
                    warn!(run_id = %run.run_id, "Session bind failed: {e}");
                }
            }
            Some(ExecutorEvent::Log { level, message }) => {
                let req = SessionEventRequest {
                    event_type: "log".to_string(),
                    data: log_event_data(run.run_id, level.as_deref(), &message),
                };
                if let Err(e) = ctx.client.append_event(run.session_id, &req).await {
                    warn!(run_id = %run.run_id, "Log relay failed: {e}");
                }
            }
            Some(ExecutorEvent::Result { .. }) => {}
            None => {
                debug!(run_id = %run.run_id, "executor stdout: {line}");
            }
        }
    }
}

fn decide_outcome(stopped: bool, exit_code: i32, collector: &OutputCollector) -> RunOutcome {
    if stopped {
        return RunOutcome {
            status: ReportedStatus::Stopped,
            error: None,
            result: None,
        };
    }
    if collector.saw_malformed_result {
        return RunOutcome {
            status: ReportedStatus::Failed,
            error: Some("Executor emitted a malformed result event".to_string()),
            result: None,
        };
    }
    if exit_code != 0 {
        let mut error = format!("Executor exited with code {exit_code}");
        if !collector.stderr_tail.is_empty() {
            error.push('\n');
            error.push_str(&collector.stderr_tail.join());
        }
        return RunOutcome {
            status: ReportedStatus::Failed,
            error: Some(error),
            result: None,
        };
    }
    match &collector.result {
        Some((crate::output::ResultStatus::Failed, summary)) => RunOutcome {
            status: ReportedStatus::Failed,
            error: Some(
                summary
                    .clone()
                    .unwrap_or_else(|| "Executor reported failure".to_string()),
            ),
            result: None,
        },
        Some((crate::output::ResultStatus::Completed, summary)) => RunOutcome {
            status: ReportedStatus::Completed,
            error: None,
            result: summary.clone(),
        },
        None => RunOutcome {
            status: ReportedStatus::Completed,
            error: None,
            result: None,
        },
    }
}

async fn report_terminal(ctx: &RunContext, run: &ClaimedRun, outcome: RunOutcome) {
    let req = ReportStatusRequest {
        status: outcome.status,
        error: outcome.error,
        result: outcome.result,
    };
    report_status(ctx, run.run_id, req, TERMINAL_REPORT_ATTEMPTS).await;
}

/// Report with bounded retries. Interim statuses tolerate loss; a
/// terminal report that exhausts its retries is logged loudly because
/// the coordinator will consider the run live until then.
async fn report_status(
    ctx: &RunContext,
    run_id: uuid::Uuid,
    req: ReportStatusRequest,
    attempts: u32,
) {
    for attempt in 0..attempts {
        match ctx.client.report_status(run_id, &req).await {
            Ok(()) => return,
            Err(e) => {
                warn!(
                    run_id = %run_id,
                    attempt = attempt + 1,
                    "Status report failed: {e}"
                );
                if attempt + 1 < attempts {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
            }
        }
    }
    error!(run_id = %run_id, status = ?req.status, "Giving up on status report");
}
