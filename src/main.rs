use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use runplan_api::database::manager::DatabaseManager;
use runplan_api::handlers;
use runplan_api::middleware::jwt_auth_middleware;

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runplan_api=info,tower_http=info".into()),
        )
        .init();

    let config = runplan_api::config::config();
    tracing::info!("Starting Run Plan API in {:?} mode", config.environment);

    let app = app();

    // Allow tests or deployments to override port via env
    let port = std::env::var("RUNPLAN_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    println!("Run Plan API listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}

fn app() -> Router {
    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth/login", post(handlers::public::auth::login))
        // Protected API
        .merge(plan_routes())
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn plan_routes() -> Router {
    use handlers::plans;

    Router::new()
        .route("/api/plans", get(plans::list))
        .route("/api/plans/presets", get(plans::presets))
        .route("/api/plans/wizard/new/:code", get(plans::wizard_new))
        .route("/api/plans/delete-context/:ids", get(plans::delete_context))
        .route("/api/plans/save/:id", post(plans::save))
        .route("/api/plans/batch-upload", post(plans::batch_upload))
        .route("/api/plans/:id", get(plans::get).delete(plans::delete))
        .route("/api/plans/:id/wizard", get(plans::wizard_existing))
        .route("/api/plans/:id/review", get(plans::review))
        .route("/api/plans/:id/batch-csv", get(plans::batch_csv))
        .layer(axum::middleware::from_fn(jwt_auth_middleware))
}

async fn root() -> axum::response::Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    axum::response::Json(json!({
        "success": true,
        "data": {
            "name": "Run Plan API",
            "version": version,
            "description": "Run planning backend for sequencing instruments",
            "endpoints": {
                "home": "/ (public)",
                "auth": "/auth/login (public - token acquisition)",
                "plans": "/api/plans[/:id] (protected)",
                "wizard": "/api/plans/wizard/new/:code, /api/plans/:id/wizard (protected)",
                "review": "/api/plans/:id/review (protected)",
                "batch": "/api/plans/:id/batch-csv, /api/plans/batch-upload (protected)",
            }
        }
    }))
}

async fn health() -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check().await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            axum::response::Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::response::Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
