use std::net::SocketAddr;
use std::sync::Arc;

use chat_references::auth::TokenTable;
use chat_references::server;
use chat_references::settings::LabelSettings;
use chat_references::storage::SqliteEntityStore;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "chat_references")]
#[command(about = "Chat reference store and attachment service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Serve {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        /// sqlite URL; defaults to a file under $XDG_DATA_HOME
        #[arg(long)]
        database_url: Option<String>,
        /// Expose Prometheus metrics on this address
        #[arg(long)]
        metrics_listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { listen, database_url, metrics_listen } => {
            let addr: SocketAddr = listen.parse()?;
            if let Some(metrics_addr) = metrics_listen {
                let metrics_addr: SocketAddr = metrics_addr.parse()?;
                PrometheusBuilder::new().with_http_listener(metrics_addr).install()?;
            }
            let store = SqliteEntityStore::initialize(database_url).await?;
            let state = server::AppState::new(Arc::new(store), LabelSettings::from_env());
            server::serve(addr, state, TokenTable::from_env()).await?;
        }
    }
    Ok(())
}
