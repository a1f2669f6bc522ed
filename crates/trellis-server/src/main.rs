//! Trellis server binary.
//!
//! Wires the board core to in-memory collaborators and runs the
//! gateway. Deployments with a real persistence store, user system or
//! activity pipeline swap the trait implementations at this boundary;
//! the dev server seeds a small user directory and prints the issued
//! tokens so clients can connect immediately.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trellis_activity::{ActivityRecorder, ActivitySink, MemoryActivitySink};
use trellis_board::TaskService;
use trellis_config::{Config, LogFormat};
use trellis_core::{CredentialVerifier, Limits, Principal, Role, User, UserDirectory, UserId};
use trellis_events::Fanout;
use trellis_gateway::{Gateway, GatewayConfig, RoomRouter, SessionRegistry};
use trellis_storage::{
    MemoryTaskStore, MemoryUserDirectory, StaticCredentialVerifier, TaskStore,
};

/// Real-time collaborative task board server.
#[derive(Debug, Parser)]
#[command(name = "trellis-server", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "TRELLIS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address from the config file.
    #[arg(long)]
    listen: Option<String>,

    /// Seed N demo users (one admin) and print their tokens.
    #[arg(long, default_value_t = 3)]
    seed_users: u32,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn domain_limits(config: &Config) -> Limits {
    Limits {
        max_title_len: config.limits.max_title_len,
        max_desc_len: config.limits.max_desc_len,
        max_tags: config.limits.max_tags,
        max_tag_len: config.limits.max_tag_len,
        max_comment_len: config.limits.max_comment_len,
        reserved_titles: config.limits.reserved_titles.clone(),
    }
}

fn seed_demo_users(
    directory: &MemoryUserDirectory,
    verifier: &StaticCredentialVerifier,
    count: u32,
) -> anyhow::Result<()> {
    for index in 0..count {
        let role = if index == 0 { Role::Admin } else { Role::Member };
        let user = User {
            id: UserId::new(),
            display_name: format!("demo-{index}"),
            role,
            is_active: true,
        };
        let token = format!("demo-token-{index}");
        directory.seed(user.clone()).context("seeding demo user")?;
        verifier
            .issue(
                token.clone(),
                Principal {
                    user_id: user.id,
                    role,
                },
            )
            .map_err(|e| anyhow::anyhow!("issuing demo token: {e}"))?;
        info!(user_id = %user.id, ?role, token, "Seeded demo user");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = trellis_config::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    init_tracing(&config);

    // In-memory collaborators; a production deployment replaces these
    // with its own store, user system and activity pipeline.
    let store = Arc::new(MemoryTaskStore::new());
    let users = Arc::new(MemoryUserDirectory::new());
    let sink = Arc::new(MemoryActivitySink::new());
    let verifier = Arc::new(StaticCredentialVerifier::new(config.auth.token_ttl_secs));
    seed_demo_users(&users, &verifier, args.seed_users)?;

    let registry = Arc::new(SessionRegistry::new());
    let router = Arc::new(RoomRouter::new(Arc::clone(&registry)));
    let recorder = Arc::new(ActivityRecorder::new(
        sink as Arc<dyn ActivitySink>,
        Arc::clone(&router) as Arc<dyn Fanout>,
        config.activity.ring_size,
    ));
    let service = Arc::new(TaskService::new(
        store as Arc<dyn TaskStore>,
        users as Arc<dyn UserDirectory>,
        recorder,
        domain_limits(&config),
    ));

    let gateway = Arc::new(Gateway::new(
        service,
        verifier as Arc<dyn CredentialVerifier>,
        registry,
        router,
        GatewayConfig {
            outbound_queue_depth: config.server.outbound_queue_depth,
            handshake_timeout: Duration::from_secs(config.server.handshake_timeout_secs),
            activity_retention_days: config.activity.retention_days,
        },
    ));

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding {}", config.server.listen))?;
    info!(listen = %config.server.listen, "Trellis server starting");

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = tokio::spawn(Arc::clone(&gateway).run(listener, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(());
    let _ = server.await;

    Ok(())
}
