//! Runner daemon entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_runner::active::ActiveRuns;
use agent_runner::client::CoordinatorApi;
use agent_runner::config::detect_hostname;
use agent_runner::facade::{self, FacadeState};
use agent_runner::gateway::{self, GatewayState};
use agent_runner::heartbeat::run_heartbeat_loop;
use agent_runner::poller::Poller;
use agent_runner::profile::print_profile_table;
use agent_runner::supervisor::RunContext;
use agent_runner::{Cli, HttpCoordinatorClient, RunnerConfig, RunnerIdentity};
use ao_core::api::RegisterRunnerRequest;

const REGISTER_ATTEMPTS: u32 = 3;
const REGISTER_RETRY_PAUSE: Duration = Duration::from_secs(2);
const DRAIN_WINDOW: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.profile_list {
        print_profile_table();
        return Ok(());
    }

    let default_filter = if cli.verbose {
        "agent_runner=debug"
    } else {
        "agent_runner=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RunnerConfig::from_cli(&cli)?;
    let hostname = detect_hostname();
    let project_dir = config.project_dir.to_string_lossy().to_string();
    let client = Arc::new(HttpCoordinatorClient::new(&config.coordinator_url));

    // Loopback servers come up first: their addresses go into the
    // executor environment and the ${runner.*} values.
    let gateway_state = GatewayState {
        client: client.clone(),
        hostname: hostname.clone(),
        executor_type: config.profile.as_str().to_string(),
    };
    let (gateway_addr, _gateway_task) = gateway::serve(gateway_state, 0)
        .await
        .context("Failed to bind session gateway")?;

    let orchestrator_mcp_url = match &config.external_mcp_url {
        Some(url) => {
            info!(url = %url, "Using external MCP server");
            url.clone()
        }
        None => {
            let facade_state = FacadeState {
                client: client.clone(),
            };
            let (facade_addr, _facade_task) = facade::serve(facade_state, config.mcp_port)
                .await
                .context("Failed to bind orchestration facade")?;
            format!("http://{facade_addr}/mcp")
        }
    };

    let register_req = RegisterRunnerRequest {
        hostname: hostname.clone(),
        project_dir: project_dir.clone(),
        executor_type: config.profile.as_str().to_string(),
        tags: config.tags.clone(),
    };

    let mut runner_id = None;
    for attempt in 0..REGISTER_ATTEMPTS {
        match client.register(&register_req).await {
            Ok(summary) => {
                runner_id = Some(summary.runner_id);
                break;
            }
            Err(e) => {
                warn!(attempt = attempt + 1, "Registration failed: {e}");
                if attempt + 1 < REGISTER_ATTEMPTS {
                    tokio::time::sleep(REGISTER_RETRY_PAUSE).await;
                }
            }
        }
    }
    let Some(runner_id) = runner_id else {
        bail!(
            "Could not register with coordinator at {}",
            config.coordinator_url
        );
    };
    info!(
        runner_id = %runner_id,
        gateway = %gateway_addr,
        mcp = %orchestrator_mcp_url,
        profile = config.profile.as_str(),
        "Runner registered"
    );

    let identity = RunnerIdentity {
        runner_id,
        hostname,
        project_dir,
        profile: config.profile,
        gateway_url: format!("http://{gateway_addr}"),
        orchestrator_mcp_url,
    };

    let active = Arc::new(ActiveRuns::new());
    let shutdown = CancellationToken::new();

    let heartbeat_task = tokio::spawn(run_heartbeat_loop(
        client.clone() as Arc<dyn CoordinatorApi>,
        active.clone(),
        register_req.clone(),
        config.heartbeat_interval,
        shutdown.child_token(),
    ));

    let ctx = RunContext {
        client: client.clone(),
        active: active.clone(),
        identity,
        executor_command: config.profile.command(),
        stop_grace: config.stop_grace,
    };
    let poller = Poller::new(
        ctx,
        register_req,
        config.poll_timeout_secs,
        config.require_matching_tags,
        config.max_concurrent_runs,
        shutdown.child_token(),
    );
    let poller_task = tokio::spawn(poller.run());

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received");

    // Stop claiming and heartbeating, let in-flight runs drain, then
    // cancel whatever is left.
    shutdown.cancel();
    let drain_deadline = tokio::time::Instant::now() + DRAIN_WINDOW;
    while !active.is_empty() && tokio::time::Instant::now() < drain_deadline {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    if !active.is_empty() {
        warn!(
            remaining = active.len(),
            "Drain window elapsed, stopping remaining runs"
        );
        active.cancel_all();
        let stop_deadline =
            tokio::time::Instant::now() + config.stop_grace + Duration::from_secs(2);
        while !active.is_empty() && tokio::time::Instant::now() < stop_deadline {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    if let Err(e) = client.deregister().await {
        warn!("Deregistration failed: {e}");
    }
    let _ = poller_task.await;
    let _ = heartbeat_task.await;
    info!("Runner stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
