//! keeld - Keel volume plugin daemon.
//!
//! Serves the volume plugin protocol on a Unix socket and the admin REST API
//! over TCP.

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use keel::{BackendRegistry, DaemonConfig, LifecycleController, SqliteRegistry, SystemMount};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod shutdown;

use api::AppState;
use shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    /// State root holding the registry and local volumes
    #[arg(long, env = "KEEL_ROOT")]
    root: Option<PathBuf>,

    /// Registry database path
    #[arg(long, env = "KEEL_DATABASE")]
    database: Option<PathBuf>,

    /// Volume root as seen by the container runtime
    #[arg(long, env = "VOLUME_ROOT")]
    host_volumes: Option<PathBuf>,

    /// Plugin socket path
    #[arg(long, env = "KEEL_SOCKET")]
    socket: Option<PathBuf>,

    /// Admin API listen address
    #[arg(long, env = "KEEL_ADMIN_LISTEN")]
    admin_listen: Option<SocketAddr>,

    /// Do not serve the admin API
    #[arg(long)]
    no_admin: bool,

    /// Bound on a single attach or detach, in seconds
    #[arg(long, env = "KEEL_TIMEOUT")]
    timeout: Option<u64>,

    /// Register the SMB backend
    #[arg(long, env = "KEEL_ENABLE_SMB")]
    enable_smb: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)?,
            None => DaemonConfig::default(),
        };

        if let Some(root) = &self.root {
            config = config.with_root(root);
        }
        if let Some(database) = &self.database {
            config.database = Some(database.clone());
        }
        if let Some(host_volumes) = &self.host_volumes {
            config = config.with_host_volumes(host_volumes);
        }
        if let Some(socket) = &self.socket {
            config.socket.clone_from(socket);
        }
        if let Some(admin_listen) = self.admin_listen {
            config.admin_listen = admin_listen;
        }
        if self.no_admin {
            config.admin_enabled = false;
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        if self.enable_smb {
            config = config.with_smb();
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Bind the plugin socket, replacing a stale one, with mode 0660.
fn bind_socket(path: &Path) -> anyhow::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to remove {}", path.display()));
        }
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind socket {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))
        .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    Ok(listener)
}

/// Run one API server. Its exit, clean or not, shuts the others down.
fn spawn_server<F>(name: &'static str, shutdown: Shutdown, server: F) -> JoinHandle<()>
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match server.await {
            Ok(()) => tracing::debug!(server = name, "Server stopped"),
            Err(e) => tracing::error!(server = name, error = %e, "Server exited with error"),
        }
        shutdown.trigger();
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = args.load_config()?;
    let paths = config.paths();
    paths
        .create_dirs()
        .with_context(|| format!("failed to create {}", paths.root.display()))?;

    let registry = Arc::new(SqliteRegistry::open(&config.database_path()).await?);
    let mount = Arc::new(SystemMount::new(config.operation_timeout()));
    let backends = BackendRegistry::standard(mount.clone(), config.enable_smb);
    tracing::info!(
        root = %paths.root.display(),
        volumes = %paths.volumes.display(),
        host_volumes = %paths.host_volumes.display(),
        backends = ?backends.supported(),
        "Volume registry ready"
    );

    let controller = Arc::new(LifecycleController::new(registry.clone(), backends, paths));
    if let Err(e) = controller.reconcile(mount.as_ref()).await {
        tracing::warn!(error = %e, "Startup reconciliation failed");
    }
    let state = AppState::new(controller);
    let shutdown = shutdown::listen();

    let listener = bind_socket(&config.socket)?;
    let plugin_app = api::plugin_app(state.clone());
    let plugin_shutdown = shutdown.clone();
    tracing::info!(socket = %config.socket.display(), "Plugin API listening");
    let plugin_handle = spawn_server("plugin", shutdown.clone(), async move {
        axum::serve(listener, plugin_app)
            .with_graceful_shutdown(plugin_shutdown.wait())
            .await
    });

    let admin_handle = if config.admin_enabled {
        let listener = TcpListener::bind(config.admin_listen)
            .await
            .with_context(|| format!("failed to bind {}", config.admin_listen))?;
        let admin_app = api::admin_app(state);
        let admin_shutdown = shutdown.clone();
        tracing::info!(addr = %config.admin_listen, "Admin API listening");
        Some(spawn_server("admin", shutdown.clone(), async move {
            axum::serve(listener, admin_app)
                .with_graceful_shutdown(admin_shutdown.wait())
                .await
        }))
    } else {
        tracing::info!("Admin API disabled");
        None
    };

    tracing::info!("keeld started");

    plugin_handle.await.context("plugin server task failed")?;
    if let Some(handle) = admin_handle {
        handle.await.context("admin server task failed")?;
    }

    if let Err(e) = std::fs::remove_file(&config.socket) {
        tracing::warn!(error = %e, socket = %config.socket.display(), "Failed to remove socket");
    }
    registry.close().await;
    tracing::info!("keeld stopped");
    Ok(())
}
