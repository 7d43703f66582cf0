use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use midya::auth::token;
use midya::config::{Cli, Command, Config};
use midya::db;
use midya::provision::{self, CreateOwnerOutcome};
use midya::routes;
use midya::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(config.db_path())?;
    db::run_migrations(&pool)?;

    // Provisioning subcommand runs and exits without serving
    if let Some(Command::CreateOwner {
        username,
        email,
        password,
    }) = &cli.command
    {
        match provision::create_owner(&pool, username, email, password)? {
            CreateOwnerOutcome::Created => {
                tracing::info!("Created owner user '{}'", username);
            }
            CreateOwnerOutcome::AlreadyExists => {
                tracing::warn!("User '{}' already exists", username);
            }
        }
        return Ok(());
    }

    tracing::info!("Data directory: {}", data_dir.display());

    // Build app state
    let state = AppState {
        db: pool,
        config: config.clone(),
    };

    // Build router
    let mut app = Router::new()
        .route("/assets/{*path}", get(routes::assets::serve))
        .merge(routes::pages::router())
        .nest("/accounts", routes::accounts::router())
        .nest("/social", routes::social::router());

    // Test-only seed endpoint: creates a user + token, returns session cookie
    if std::env::var("MIDYA_TEST_SEED").is_ok() {
        app = app.route("/test/seed", get(test_seed));
    }

    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Test-only: seed an admin user + token and return the session cookie.
/// Only mounted when MIDYA_TEST_SEED env var is set.
async fn test_seed(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.get().unwrap();
    let user_id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT OR IGNORE INTO users (id, username, email, password_hash, role)
         VALUES (?1, 'testuser', 'testuser@example.com', 'x', 'admin')",
        rusqlite::params![user_id],
    )
    .unwrap();

    // Get the actual user id (may already exist from a previous seed call)
    let uid: String = conn
        .query_row(
            "SELECT id FROM users WHERE username = 'testuser'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    drop(conn);

    let api_token = token::get_or_create(&state.db, &uid).unwrap();

    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age=3600",
        state.config.auth.cookie_name, api_token
    );

    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        format!(
            "{{\"user_id\":\"{}\",\"username\":\"testuser\",\"token\":\"{}\"}}",
            uid, api_token
        ),
    )
}
