use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paygate::config::Config;
use paygate::db::{create_pool, init_db, AppState};
use paygate::handlers;
use paygate::queue::Queues;
use paygate::workers;

#[derive(Parser, Debug)]
#[command(name = "paygate")]
#[command(about = "Asynchronous payment gateway core")]
struct Cli {
    /// Delete the database on exit (useful for fresh starts in dev)
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paygate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.processing.test_mode {
        tracing::info!(
            "TEST MODE: payments settle deterministically ({})",
            if config.processing.test_payment_success {
                "success"
            } else {
                "failure"
            }
        );
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let http_client = reqwest::Client::builder()
        .timeout(config.delivery.timeout)
        .build()
        .expect("Failed to build HTTP client");

    let state = AppState {
        db: db_pool.clone(),
        queues: Queues::new(db_pool),
        processing: config.processing,
        delivery: config.delivery,
        idempotency_ttl_secs: config.idempotency_ttl.as_secs() as i64,
        http_client,
    };

    workers::spawn_all(&state, config.payment_workers, config.webhook_workers);

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral;
    let db_path = config.database_path.clone();
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Paygate listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    // In-flight jobs were not acked; they are redelivered on the next start,
    // which is safe because every state mutation is CAS-guarded.

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
