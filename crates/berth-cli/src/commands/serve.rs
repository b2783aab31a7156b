//! `berth serve` - boot the orchestrator and serve the control API
//!
//! Boot order matters here: the registry database comes up first (embedded
//! migrations run at connection time), Docker connectivity is validated
//! before anything else so a dead daemon fails the boot with an actionable
//! message instead of failing the first provision, and the plugin system
//! assembles the HTTP surface last. The orchestrator plugin re-reserves
//! every stored port assignment during initialization, so by the time the
//! listener binds the allocator can no longer double-assign.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use berth_core::plugin::PluginManager;
use berth_core::OrchestratorSettings;
use berth_orchestrator::OrchestratorPlugin;
use berth_runtime::docker::DockerRuntime;
use berth_runtime::ContainerRuntime;
use clap::Args;
use tokio::net::TcpListener;
use tracing::{debug, info};
use utoipa_swagger_ui::SwaggerUi;

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the control API to
    #[arg(long, default_value = "127.0.0.1:7070", env = "BERTH_ADDRESS")]
    pub address: String,

    /// Database connection URL (defaults to sqlite in the data directory)
    #[arg(long, env = "BERTH_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Data directory for the registry database
    #[arg(long, env = "BERTH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Docker network tenant containers attach to
    #[arg(long, default_value = "berth", env = "BERTH_DOCKER_NETWORK")]
    pub docker_network: String,

    /// Host published in tenant service URLs
    #[arg(long, default_value = "127.0.0.1", env = "BERTH_PUBLIC_HOST")]
    pub public_host: String,

    /// Seconds between health monitor cycles (default 30)
    #[arg(long, env = "BERTH_HEALTH_INTERVAL_SECS")]
    pub health_interval_secs: Option<u64>,

    /// Seconds a released port stays quarantined before reuse (default 30)
    #[arg(long, env = "BERTH_PORT_QUARANTINE_SECS")]
    pub port_quarantine_secs: Option<u64>,

    /// Auto-restarts the monitor may spend per service within one window (default 3)
    #[arg(long, env = "BERTH_MAX_AUTO_RESTARTS")]
    pub max_auto_restarts: Option<u32>,

    /// Auto-restart budget window in seconds (default 600)
    #[arg(long, env = "BERTH_RESTART_WINDOW_SECS")]
    pub restart_window_secs: Option<u64>,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let data_dir = self.resolve_data_dir()?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let database_url = self
            .database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite://{}/berth.db?mode=rwc", data_dir.display()));

        debug!("Connecting to registry database");
        let db = berth_database::establish_connection(&database_url)
            .await
            .with_context(|| format!("Failed to open registry database at {database_url}"))?;
        debug!("Registry database ready");

        debug!("Checking Docker daemon connectivity");
        let docker = connect_docker().await?;
        let runtime = Arc::new(DockerRuntime::new(docker, self.docker_network.clone()));
        runtime.ensure_network_exists().await.with_context(|| {
            format!(
                "Failed to ensure Docker network '{}' exists",
                self.docker_network
            )
        })?;
        debug!("Docker network '{}' ready", self.docker_network);

        let settings = Arc::new(self.settings());

        let mut plugin_manager = PluginManager::new();
        let service_context = plugin_manager.service_context();
        service_context.register_service(db);
        service_context.register_service::<dyn ContainerRuntime>(runtime);
        service_context.register_service(settings);

        debug!("Registering OrchestratorPlugin");
        plugin_manager.register_plugin(Box::new(OrchestratorPlugin::new()));

        plugin_manager
            .initialize_plugins()
            .await
            .map_err(|e| anyhow::anyhow!("Plugin initialization failed: {e}"))?;
        debug!("All plugins initialized");

        let app = plugin_manager
            .build_application()
            .map_err(|e| anyhow::anyhow!("Failed to build application: {e}"))?
            .merge(swagger_router(&plugin_manager)?);

        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind {}", self.address))?;
        info!("Berth control API listening on {}", self.address);
        info!("API docs served at http://{}/swagger-ui", self.address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("Server stopped");
        Ok(())
    }

    fn resolve_data_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".berth"))
            .ok_or_else(|| anyhow::anyhow!("Cannot determine a home directory; pass --data-dir"))
    }

    /// Orchestrator defaults, overridden by whichever knobs were given.
    fn settings(&self) -> OrchestratorSettings {
        let mut settings = OrchestratorSettings::default();
        settings.public_host = self.public_host.clone();
        if let Some(secs) = self.health_interval_secs {
            settings.health_interval_secs = secs;
        }
        if let Some(secs) = self.port_quarantine_secs {
            settings.port_quarantine_secs = secs;
        }
        if let Some(count) = self.max_auto_restarts {
            settings.max_auto_restarts = count;
        }
        if let Some(secs) = self.restart_window_secs {
            settings.restart_window_secs = secs;
        }
        settings
    }
}

/// Connect to Docker and prove the daemon answers before taking traffic.
/// `connect_with_defaults` is lazy, so `version()` is what actually talks
/// to the socket.
async fn connect_docker() -> anyhow::Result<Arc<bollard::Docker>> {
    let docker = bollard::Docker::connect_with_defaults().map_err(|e| {
        anyhow::anyhow!(
            "❌ Docker dependency check FAILED\n\n\
            Berth requires Docker to be running and accessible.\n\n\
            Error details: {}\n\n\
            Solutions:\n\
            1. Ensure the Docker daemon is running\n\
               - macOS: Check Docker Desktop application\n\
               - Linux: Run 'sudo systemctl start docker'\n\n\
            2. Verify Docker socket permissions\n\
               - Linux: Run 'sudo usermod -aG docker $USER'\n\n\
            3. Check Docker environment variables\n\
               - DOCKER_HOST may need to be set\n\n\
            Tenant containers cannot be managed until Docker is accessible.",
            e
        )
    })?;

    let version = docker
        .version()
        .await
        .map_err(|e| anyhow::anyhow!("Docker daemon did not answer a version probe: {e}"))?;
    debug!(
        "✓ Docker daemon is accessible (version {})",
        version.version.unwrap_or_else(|| "unknown".to_string())
    );

    Ok(Arc::new(docker))
}

fn swagger_router(plugin_manager: &PluginManager) -> anyhow::Result<Router> {
    let api_doc: utoipa::openapi::OpenApi = plugin_manager
        .get_unified_openapi()
        .map_err(|e| anyhow::anyhow!("Failed to build unified OpenAPI schema: {e}"))?;
    Ok(Router::new().merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc)))
}

/// In-flight lifecycle operations run on detached tasks and finish on their
/// own; shutting down only has to stop accepting new connections.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl-c signal");
    info!("Received Ctrl+C, shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        cmd: ServeCommand,
    }

    #[test]
    fn test_knob_flags_override_settings_defaults() {
        let cli = TestCli::parse_from([
            "berth",
            "--public-host",
            "tenants.example.com",
            "--health-interval-secs",
            "5",
            "--max-auto-restarts",
            "1",
        ]);

        let settings = cli.cmd.settings();
        assert_eq!(settings.public_host, "tenants.example.com");
        assert_eq!(settings.health_interval_secs, 5);
        assert_eq!(settings.max_auto_restarts, 1);
        // untouched knobs keep their defaults
        assert_eq!(settings.port_quarantine_secs, 30);
        assert_eq!(settings.restart_window_secs, 600);
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let cli = TestCli::parse_from(["berth", "--data-dir", "/tmp/berth-test"]);
        let dir = cli.cmd.resolve_data_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/berth-test"));
    }
}
