//! Identilink operator CLI: run the gateway, query it, inspect the store

mod client;
mod clusters;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use identilink_core::ServiceConfig;
use identilink_gateway::{init_tracing, start_gateway, ServeArgs};
use identilink_store::{ContactStore, SqliteContactStore};

use client::GatewayClient;

#[derive(Parser)]
#[command(name = "identilink", about = "Contact identity resolution service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        #[command(flatten)]
        args: ServeArgs,
    },
    /// Send one observation to a running gateway
    Identify {
        #[arg(long, default_value = "http://127.0.0.1:80")]
        url: String,
        #[arg(short, long)]
        email: Option<String>,
        #[arg(short, long)]
        phone: Option<String>,
    },
    /// Check a running gateway
    Health {
        #[arg(long, default_value = "http://127.0.0.1:80")]
        url: String,
    },
    /// List the clusters stored in a SQLite database
    Clusters {
        /// Database path (default: config/IDENTILINK_DATABASE)
        #[arg(short, long)]
        database: Option<PathBuf>,
        /// Print consolidated views as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { args } => {
            let _guard = init_tracing(args.log_file.as_deref())?;
            let config = args.resolve_config()?;
            start_gateway(config).await?;
        }

        Commands::Identify { url, email, phone } => {
            let (status, body) = GatewayClient::new(&url)
                .identify(email.as_deref(), phone.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            if status != 200 {
                anyhow::bail!("gateway answered {status}");
            }
        }

        Commands::Health { url } => {
            let body = GatewayClient::new(&url).health().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Clusters { database, json } => {
            let path = match database {
                Some(path) => path,
                None => {
                    let mut config = ServiceConfig::default();
                    config.apply_env()?;
                    config.store.path
                }
            };
            if !path.exists() {
                anyhow::bail!("no database at {}", path.display());
            }
            let store = SqliteContactStore::open(&path, Duration::from_millis(250))?;
            let clusters = clusters::load_clusters(&store)?;
            if json {
                let views: Vec<_> = clusters.iter().filter_map(|c| c.view()).collect();
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                for cluster in &clusters {
                    print!("{}", clusters::render(cluster));
                }
                println!("{} clusters", clusters.len());
            }
            store.close()?;
        }

        Commands::Version => {
            println!("identilink v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
