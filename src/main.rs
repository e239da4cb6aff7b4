use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use courier_gateway::{DataUrlRenderer, GatewayConfig, SessionRegistry};
use courier_store::Database;
use courier_telemetry::{init_telemetry, TelemetryConfig};
use courier_transport::{CredentialStore, MockTransport};

/// Multi-tenant messaging gateway.
#[derive(Parser, Debug)]
#[command(name = "courier", version)]
struct Args {
    /// HTTP/WebSocket listen port.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// Data directory (database, credentials, logs). Defaults to ~/.courier.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Country code prepended when normalizing destination addresses.
    #[arg(long, default_value = "972")]
    country_code: String,

    /// Disable the SQLite warn+ log sink.
    #[arg(long)]
    no_log_db: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let data_dir = args.data_dir.unwrap_or_else(|| dirs_home().join(".courier"));
    let db_dir = data_dir.join("database");
    std::fs::create_dir_all(&db_dir).expect("Failed to create database directory");

    let _telemetry = init_telemetry(TelemetryConfig {
        log_to_sqlite: !args.no_log_db,
        log_db_path: db_dir.join("logs.db"),
        ..Default::default()
    });

    tracing::info!("Starting courier gateway");

    let db_path = db_dir.join("courier.db");
    let db = Database::open(&db_path).expect("Failed to open database");
    tracing::info!(path = %db_path.display(), "Database opened");

    let creds = Arc::new(CredentialStore::new(data_dir.join("credentials")));

    // Protocol engine seam. The real engine lives out of process; this
    // build wires the in-process stand-in.
    let transport = Arc::new(MockTransport::new());

    let gateway_config = GatewayConfig {
        default_country_code: args.country_code,
        ..Default::default()
    };
    let registry = SessionRegistry::new(
        db.clone(),
        transport,
        creds,
        Arc::new(DataUrlRenderer),
        gateway_config,
    );

    let config = courier_server::ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = courier_server::start(config, registry, db)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "courier ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
