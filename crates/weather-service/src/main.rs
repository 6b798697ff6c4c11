mod config;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use wear_core::cache::WeatherCacheService;
use wear_core::kv::RedisKvStore;
use wear_core::upstream::OpenWeatherClient;
use wear_core::AppResult;

use config::Settings;

/// Operator-facing CLI flags, layered over the `config`-crate-loaded
/// `Settings` (the handful of things worth overriding at the command line).
#[derive(Parser, Debug)]
#[command(about = "Weather service: fetches, caches, and serves weather snapshots")]
struct Args {
    /// Port to listen on, overriding the configured value
    #[arg(short, long, env = "PORT", value_name = "PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info", value_name = "LEVEL")]
    log_level: String,

    /// Validate configuration and exit without starting the server
    #[arg(long, help = "Validate configuration without starting the server")]
    check: bool,
}

#[derive(Clone)]
struct AppState {
    cache: Arc<WeatherCacheService>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthBody { status: "ok" })
}

async fn weather_by_city(
    State(state): State<AppState>,
    Path(city): Path<String>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.cache.by_city(&city, None).await?;
    Ok(Json(snapshot))
}

async fn weather_by_city_country(
    State(state): State<AppState>,
    Path((city, country)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.cache.by_city(&city, Some(&country)).await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct ProximityQuery {
    lat: f64,
    lon: f64,
}

async fn weather_by_proximity(
    State(state): State<AppState>,
    Query(params): Query<ProximityQuery>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.cache.by_proximity(params.lat, params.lon).await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct ForecastQuery {
    country_code: Option<String>,
}

async fn forecast_by_city(
    State(state): State<AppState>,
    Path(city): Path<String>,
    Query(params): Query<ForecastQuery>,
) -> AppResult<impl IntoResponse> {
    let forecast = state
        .cache
        .forecast_by_city(&city, params.country_code.as_deref())
        .await?;
    Ok(Json(forecast))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    let mut settings = Settings::load()?;
    if let Some(port) = args.port {
        settings.port = port;
    }

    if args.check {
        println!("configuration OK, would listen on port {}", settings.port);
        return Ok(());
    }

    let kv = Arc::new(RedisKvStore::connect(&settings.redis_url).await?);
    let provider = Arc::new(OpenWeatherClient::new(
        settings.openweather_base_url.clone(),
        settings.openweather_api_key.clone(),
        settings.openweather_backoff_factor,
    ));
    let cache = Arc::new(WeatherCacheService::new(kv, provider, settings.proximity_precision));

    let cancel = CancellationToken::new();
    let refresh_task = tokio::spawn(cache.clone().run_background_refresh(cancel.clone()));

    let state = AppState { cache };

    let app = Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/weather/city/{city}", get(weather_by_city))
        .route(
            "/api/v1/weather/city/{city}/country/{country_code}",
            get(weather_by_city_country),
        )
        .route("/api/v1/weather/proximity", post(weather_by_proximity))
        .route("/api/v1/weather/city/{city}/forecast", get(forecast_by_city))
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("weather service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    refresh_task.await.ok();

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    cancel.cancel();
}
