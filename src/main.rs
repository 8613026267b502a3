use clap::Parser;
use remote_sqlite::{create_router, DatabaseConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "remote-sqlite")]
#[command(about = "Serve an SQLite database over the remote statement protocol", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8090)]
    port: u16,

    /// Path to the SQLite database file
    #[arg(long, default_value = "./data.sqlite3")]
    db: String,

    /// Open the database read-only
    #[arg(long)]
    readonly: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remote_sqlite=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DatabaseConfig::new(args.db, args.readonly);
    tracing::info!(path = %config.path, readonly = config.readonly, "serving database");

    let app = create_router(config);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
