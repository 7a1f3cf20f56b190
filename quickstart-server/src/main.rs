mod api;
mod crypto;
mod profile;
mod settings;
mod webserver;

use crate::api::AppState;
use crate::settings::Settings;
use clap::{Parser, Subcommand};
use quickstart_lib::{BootstrapOutcome, BootstrapService, DocumentStore, SledStore};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::{info, warn, Level};

/// Execution environment in which the store is assumed to be provisioned already.
const TESTING_ENVIRONMENT: &str = "Testing";

#[derive(Parser)]
#[command(name = "quickstart")]
#[command(about = "User profile REST service", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "LEVEL", default_value_t = Level::INFO)]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the profile API server")]
    Start {
        #[arg(long, value_name = "API_SERVER_HOSTNAME")]
        host: Option<String>,

        #[arg(long, value_name = "API_SERVER_PORT")]
        port: Option<u16>,

        #[arg(
            long,
            value_name = "ENVIRONMENT",
            env = "QUICKSTART_ENVIRONMENT",
            default_value = "Production"
        )]
        environment: String,

        /// Exit instead of serving when the store could not be fully prepared.
        #[arg(long)]
        require_bootstrap: bool,
    },
}

fn should_bootstrap(environment: &str) -> bool {
    environment != TESTING_ENVIRONMENT
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing
    let collector = tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(collector)?;

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::Start {
            host,
            port,
            environment,
            require_bootstrap,
        } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            info!(%environment, store = ?settings.couchbase, "Starting profile service");

            let store = SledStore::connect(&settings.couchbase).await?;

            if should_bootstrap(&environment) {
                match BootstrapService::new(&store, &settings.couchbase).run().await {
                    BootstrapOutcome::Ready => {}
                    outcome @ BootstrapOutcome::Degraded(_) if require_bootstrap => {
                        anyhow::bail!("store bootstrap failed: {}", outcome);
                    }
                    outcome => warn!("Serving with a {} store", outcome),
                }
            } else {
                info!("Skipping bootstrap in {} environment", environment);
            }

            let state = AppState::new(
                Arc::new(store),
                &settings.couchbase,
                settings.security.bcrypt_cost,
            );
            let app = webserver::router(state, &settings.cors)?;

            let addr: SocketAddr =
                format!("{}:{}", settings.server.host, settings.server.port).parse()?;
            webserver::start_webserver(addr, app).await?;
        }
    }

    Ok(())
}
