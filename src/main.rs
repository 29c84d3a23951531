use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use service_registry::client::{ClientConfig, RegistryClient};
use service_registry::config::RegistryConfig;
use service_registry::metrics;
use service_registry::server::RegistryServer;

#[derive(Parser)]
#[command(
    name = "registry",
    version,
    about = "Service discovery registry with round-robin load balancing and health checks",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Registry base URL used by client commands
    #[arg(
        long,
        global = true,
        env = "REGISTRY_SERVICE_URL",
        default_value = "http://localhost:5000"
    )]
    registry_url: String,

    /// Client request timeout in seconds
    #[arg(long, global = true, default_value = "5")]
    timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registry server
    Serve {
        /// Bind host (overrides REGISTRY_BIND_HOST)
        #[arg(long)]
        host: Option<IpAddr>,

        /// Bind port (overrides REGISTRY_SERVICE_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds between health check cycles
        #[arg(long)]
        health_interval: Option<u64>,

        /// Timeout for a single health probe in seconds
        #[arg(long)]
        probe_timeout: Option<u64>,
    },

    /// Register a service instance
    Register {
        /// Logical service name
        #[arg(short, long)]
        name: String,

        /// Base URL of the instance
        #[arg(short, long)]
        url: String,

        /// Instance label (generated when omitted)
        #[arg(long)]
        instance_id: Option<String>,
    },

    /// Unregister one instance, or the whole service when --url is omitted
    Unregister {
        /// Logical service name
        #[arg(short, long)]
        name: String,

        /// Base URL of the instance to remove
        #[arg(short, long)]
        url: Option<String>,
    },

    /// List every registered service
    Services,

    /// Pick a healthy instance of a service
    Discover {
        /// Logical service name
        name: String,
    },

    /// Check that the registry is alive
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            health_interval,
            probe_timeout,
        } => {
            tracing::info!(
                host = ?host,
                port = ?port,
                health_interval = ?health_interval,
                probe_timeout = ?probe_timeout,
                "Starting serve command"
            );
            serve(host, port, health_interval, probe_timeout).await?;
        }

        Commands::Register {
            name,
            url,
            instance_id,
        } => {
            let client = connect(&cli.registry_url, cli.timeout)?;
            register(&client, name, url, instance_id).await?;
        }

        Commands::Unregister { name, url } => {
            let client = connect(&cli.registry_url, cli.timeout)?;
            unregister(&client, name, url).await?;
        }

        Commands::Services => {
            let client = connect(&cli.registry_url, cli.timeout)?;
            let services = client
                .list_services()
                .await
                .context("Failed to list services")?;
            println!("{}", serde_json::to_string_pretty(&services)?);
        }

        Commands::Discover { name } => {
            let client = connect(&cli.registry_url, cli.timeout)?;
            let instance = client
                .discover(&name)
                .await
                .with_context(|| format!("Failed to discover {name}"))?;
            println!("{}", serde_json::to_string_pretty(&instance)?);
        }

        Commands::Ping => {
            let client = connect(&cli.registry_url, cli.timeout)?;
            ping(&client).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "service_registry=debug,registry=debug,tower_http=debug,info"
    } else {
        "service_registry=info,registry=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

async fn serve(
    host: Option<IpAddr>,
    port: Option<u16>,
    health_interval: Option<u64>,
    probe_timeout: Option<u64>,
) -> Result<()> {
    let mut config = RegistryConfig::from_env().context("Failed to load configuration")?;
    if let Some(host) = host {
        config.bind_address.set_ip(host);
    }
    if let Some(port) = port {
        config.bind_address.set_port(port);
    }
    if let Some(secs) = health_interval {
        config.health_check_interval_secs = secs;
    }
    if let Some(secs) = probe_timeout {
        config.probe_timeout_secs = secs;
    }

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    let server = RegistryServer::new(config)?;
    println!("{}", server.info().display());

    server.start_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn connect(registry_url: &str, timeout_secs: u64) -> Result<RegistryClient> {
    let config = ClientConfig::new(registry_url).with_timeout(Duration::from_secs(timeout_secs));
    Ok(RegistryClient::new(config)?)
}

async fn register(
    client: &RegistryClient,
    name: String,
    url: String,
    instance_id: Option<String>,
) -> Result<()> {
    tracing::info!(name = %name, url = %url, "Registering instance");
    let response = client
        .register(&name, &url, instance_id.as_deref())
        .await
        .with_context(|| format!("Failed to register {name} at {url}"))?;
    println!("{} (instance_id: {})", response.message, response.instance_id);
    Ok(())
}

async fn unregister(client: &RegistryClient, name: String, url: Option<String>) -> Result<()> {
    tracing::info!(name = %name, url = ?url, "Unregistering");
    let response = match url {
        Some(url) => client.unregister_instance(&name, &url).await,
        None => client.unregister_service(&name).await,
    }
    .with_context(|| format!("Failed to unregister {name}"))?;
    println!("{}", response.message);
    Ok(())
}

async fn ping(client: &RegistryClient) -> Result<()> {
    let health = client
        .health()
        .await
        .with_context(|| format!("Registry at {} is unreachable", client.registry_url()))?;
    println!(
        "{} is {} (version {}, up {}s)",
        health.service, health.status, health.version, health.uptime_secs
    );
    Ok(())
}
