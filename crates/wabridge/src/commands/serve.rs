//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use wabridge::background::BackgroundTasks;
use wabridge::config::{self, Config};
use wabridge::connector::{SubprocessClient, SubprocessConfig};
use wabridge::lifecycle::{ControllerOptions, LifecycleController};
use wabridge::server::{self, AppState};
use wabridge::webhook::{NotifierIdentity, WebhookNotifier, WebhookTarget, WebhookTargets};

/// How long pending webhook deliveries may run after the server stops.
const DELIVERY_GRACE: Duration = Duration::from_secs(10);

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("Failed to load config '{config_path}'"))?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }

    let config_path_ref = Path::new(config_path);
    let auth_dir = config::resolve_path(config_path_ref, &config.session.auth_dir);
    // Bare command names are looked up on PATH; paths are relative to the config file
    let command = if config.session.command.contains('/') {
        config::resolve_path(config_path_ref, Path::new(&config.session.command))
            .to_string_lossy()
            .to_string()
    } else {
        config.session.command.clone()
    };

    if config.instance.api_key.is_none() {
        warn!("No instance.api_key configured; the instance API only accepts loopback clients");
    }

    // Webhook delivery
    let background_tasks = BackgroundTasks::new();
    let webhooks = WebhookTargets::new(WebhookTarget::from_config(&config.webhook));
    let notifier = WebhookNotifier::new(
        webhooks.clone(),
        NotifierIdentity {
            instance: config.instance.name.clone(),
            api_key: config.instance.api_key.clone(),
            server_url: config.instance.server_url.clone(),
        },
        Duration::from_secs(config.webhook.timeout_seconds),
        background_tasks.clone(),
    )
    .context("Failed to build webhook client")?;

    // Session client and lifecycle controller
    let client = SubprocessClient::new(SubprocessConfig {
        command,
        args: config.session.args.clone(),
        env: config.session.env.clone(),
        auth_dir,
        send_timeout: config.session.send_timeout(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (lifecycle, controller_task) = LifecycleController::spawn(
        Arc::new(client),
        Arc::new(notifier),
        ControllerOptions {
            print_qr: config.session.print_qr,
            reconnect: config.session.reconnect.clone(),
        },
        shutdown_rx,
    );

    if config.session.connect_on_start {
        let outcome = lifecycle.request_connect().await?;
        info!(outcome = ?outcome, "Initial connect requested");
    }

    let state = AppState {
        lifecycle,
        webhooks,
        instance_name: config.instance.name.clone(),
        api_key: config.instance.api_key.clone(),
        started_at: Utc::now(),
    };
    let app = server::build_app(state, config.server.request_timeout_seconds);

    let ip: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server.host '{}'", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(addr = %addr, instance = %config.instance.name, "Starting server");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Stop the controller; it shuts the session client down on its way out
    let _ = shutdown_tx.send(true);
    if let Err(e) = controller_task.await {
        warn!(error = %e, "Lifecycle controller task failed");
    }

    // Let in-flight webhook deliveries finish
    background_tasks.shutdown(DELIVERY_GRACE).await;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
