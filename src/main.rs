use std::{net::SocketAddr, path::PathBuf, process};

use clap::Parser;
use tenantgate::{
    AppState,
    auth::{KeyRemediation, SigningKey, generate_secret},
    build_app,
    config::{DeploymentMode, TenantGateConfig},
    directory::hash_password,
    observability,
};
use tokio_util::sync::CancellationToken;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "tenantgate.toml";

/// CLI arguments for the tenantgate security pipeline
#[derive(Parser, Debug)]
#[command(version, about = "Multi-tenant request security pipeline", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./tenantgate.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true, env = "TENANTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override `server.mode` (production, development, test)
    #[arg(short, long, global = true, env = "TENANTGATE_MODE")]
    mode: Option<DeploymentMode>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the server (default)
    Serve,
    /// Load and validate the configuration, including the signing secret,
    /// then exit
    CheckConfig,
    /// Print a freshly generated signing secret
    Keygen,
    /// Read a password from stdin and print its Argon2 hash for
    /// `[[directory.users]]`
    HashPassword,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(args.config, args.mode).await,
        Command::CheckConfig => run_check_config(args.config, args.mode),
        Command::Keygen => println!("{}", generate_secret()),
        Command::HashPassword => run_hash_password(),
    }
}

fn run_hash_password() {
    let mut line = String::new();
    if let Err(e) = std::io::stdin().read_line(&mut line) {
        eprintln!("Failed to read password: {e}");
        process::exit(1);
    }
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        eprintln!("Error: empty password");
        process::exit(1);
    }

    match hash_password(password) {
        Ok(hash) => println!("{hash}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn load_config(path: Option<PathBuf>, mode: Option<DeploymentMode>) -> TenantGateConfig {
    let path = path.or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    });

    let mut config = match &path {
        Some(path) => match TenantGateConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => TenantGateConfig::default(),
    };

    if let Some(mode) = mode {
        config.server.mode = mode;
        // Mode affects validation (untrusted sources, proxy trust)
        if let Err(e) = config.validate() {
            eprintln!("Invalid configuration for mode {}: {}", mode.as_str(), e);
            process::exit(1);
        }
    }

    config
}

fn run_check_config(path: Option<PathBuf>, mode: Option<DeploymentMode>) {
    let config = load_config(path, mode);

    match SigningKey::from_config(config.auth.signing_secret.as_deref(), config.server.mode) {
        Ok(key) => match key.remediation() {
            None => println!("Signing secret: ok"),
            Some(KeyRemediation::Extended { original_len }) => println!(
                "Signing secret: {original_len} characters, would be padded at startup \
                 (fatal in production)"
            ),
            Some(KeyRemediation::Generated { reason }) => println!(
                "Signing secret: {reason}; a random one would be generated at startup \
                 (fatal in production)"
            ),
        },
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }

    println!(
        "Configuration valid (mode: {}, store: {}, tenants: {}, users: {})",
        config.server.mode.as_str(),
        config.cache.backend_name(),
        config.directory.tenants.len(),
        config.directory.users.len(),
    );
}

async fn run_server(path: Option<PathBuf>, mode: Option<DeploymentMode>) {
    let config = load_config(path, mode);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {e}");
        process::exit(1);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    if !config.server.trusted_proxies.is_configured() && !config.server.host.is_loopback() {
        tracing::info!(
            "No trusted proxies configured; client IPs are taken from the socket. \
             Configure [server.trusted_proxies] when running behind a load balancer."
        );
    }

    let bind_addr = SocketAddr::new(config.server.host, config.server.port);
    let state = match AppState::from_config(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    let shutdown = state.shutdown.clone();
    let app = build_app(state);

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, address = %bind_addr, "Failed to bind");
            process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await;

    if let Err(e) = served {
        tracing::error!(error = %e, "Server error");
        process::exit(1);
    }
    tracing::info!("Shutdown complete");
}

/// Wait for SIGINT/SIGTERM, then cancel pending login delays so in-flight
/// requests drain promptly.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received, draining requests");
    shutdown.cancel();
}
