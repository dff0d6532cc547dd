use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use martingale::application::simulation::{SimulationService, TradeRequest};
use martingale::config::SimulationConfig;
use martingale::domain::errors::TradeError;
use martingale::persistence;
use martingale::task_runner::{run_periodic, CircuitBreakerConfig};

type SharedService = Arc<SimulationService>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "martingale=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SimulationConfig::from_env();
    info!(
        min_active_assets = config.min_active_assets,
        initial_cash = config.initial_cash,
        "starting market simulation"
    );

    let pool = persistence::init_database(&config.database_url).await?;
    let service = Arc::new(SimulationService::bootstrap(config.clone(), pool).await?);

    spawn_background_loops(&service);

    let app = Router::new()
        .route("/", get(|| async { "Martingale market simulator is running" }))
        .route("/health", get(health))
        .route("/assets", get(list_assets))
        .route("/assets/history", get(asset_histories))
        .route("/portfolio/:user_id", get(get_portfolio))
        .route("/performance/:user_id", get(get_performance))
        .route("/performance/:user_id/history", get(get_performance_history))
        .route("/transactions/:user_id", get(get_transactions))
        .route("/settlements/:user_id", get(get_settlements))
        .route("/trade/:user_id", post(execute_trade))
        .layer(TraceLayer::new_for_http())
        .with_state(service);

    let addr = config.bind_address.clone();
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down");
    Ok(())
}

fn spawn_background_loops(service: &SharedService) {
    let config = service.config().clone();

    let tick_service = service.clone();
    tokio::spawn(async move {
        run_periodic(
            "price_tick",
            Duration::from_secs(config.price_update_interval_seconds),
            CircuitBreakerConfig::default(),
            move || {
                let service = tick_service.clone();
                async move {
                    service.tick_prices().await;
                    Ok(())
                }
            },
        )
        .await;
    });

    let sweep_service = service.clone();
    let sweep_interval = config.expiration_check_interval_seconds;
    tokio::spawn(async move {
        run_periodic(
            "expiration_sweep",
            Duration::from_secs(sweep_interval),
            CircuitBreakerConfig::default(),
            move || {
                let service = sweep_service.clone();
                async move { service.process_expirations().await.map_err(|e| e.to_string()) }
            },
        )
        .await;
    });

    let cleanup_service = service.clone();
    let cleanup_interval = config.cleanup_interval_seconds;
    tokio::spawn(async move {
        run_periodic(
            "asset_cleanup",
            Duration::from_secs(cleanup_interval),
            CircuitBreakerConfig::default(),
            move || {
                let service = cleanup_service.clone();
                async move {
                    service
                        .cleanup_old_assets()
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
            },
        )
        .await;
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    error!("request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
}

fn trade_error_response(e: TradeError) -> ApiError {
    let status = match &e {
        TradeError::UnknownAsset(_) => StatusCode::NOT_FOUND,
        TradeError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_assets(State(service): State<SharedService>) -> Json<serde_json::Value> {
    Json(serde_json::json!(service.list_assets().await))
}

async fn asset_histories(
    State(service): State<SharedService>,
    Query(query): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!(service.asset_histories(query.limit).await))
}

async fn get_portfolio(
    State(service): State<SharedService>,
    Path(user_id): Path<i64>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!(service.portfolio_view(user_id).await))
}

async fn get_performance(
    State(service): State<SharedService>,
    Path(user_id): Path<i64>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!(service.performance(user_id).await))
}

async fn get_performance_history(
    State(service): State<SharedService>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let series = service
        .performance_series(user_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!(series)))
}

async fn get_transactions(
    State(service): State<SharedService>,
    Path(user_id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let transactions = service
        .recent_transactions(user_id, query.limit)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!(transactions)))
}

async fn get_settlements(
    State(service): State<SharedService>,
    Path(user_id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settlements = service
        .recent_settlements(user_id, query.limit)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!(settlements)))
}

async fn execute_trade(
    State(service): State<SharedService>,
    Path(user_id): Path<i64>,
    Json(request): Json<TradeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = service
        .execute_trade(user_id, &request)
        .await
        .map_err(trade_error_response)?;
    Ok(Json(serde_json::json!(outcome)))
}
