mod config;
mod weather_client;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use wear_core::catalog::AssetCatalog;
use wear_core::engine::RecommendationEngine;
use wear_core::kv::RedisKvStore;
use wear_core::preferences::Preferences;
use wear_core::types::{Gender, WeatherSnapshot};
use wear_core::upstream::ChatLlmClient;
use wear_core::AppResult;

use config::Settings;
use weather_client::WeatherServiceClient;

/// Operator-facing CLI flags, layered over the `config`-crate-loaded
/// `Settings` (the handful of things worth overriding at the command line).
#[derive(Parser, Debug)]
#[command(about = "Recommendation service: turns weather + preferences into outfits")]
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
    engine: Arc<RecommendationEngine>,
    weather: Arc<WeatherServiceClient>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthBody { status: "ok" })
}

#[derive(Debug, Deserialize)]
struct SimpleQuery {
    location: String,
}

async fn recommendations_simple(
    State(state): State<AppState>,
    Query(params): Query<SimpleQuery>,
) -> AppResult<impl IntoResponse> {
    let weather = state.weather.get_weather(&params.location).await?;
    let response = state
        .engine
        .recommend_simple(Some(params.location), weather)
        .await?;
    Ok(Json(response))
}

/// Body shape for `/recommendations/complex`, matching spec.md §6
/// (`{location, preferred_colors[], preferred_styles[], gender,
/// fit_preference}`).
#[derive(Debug, Deserialize)]
struct ComplexRequest {
    location: String,
    #[serde(default)]
    gender: Option<Gender>,
    #[serde(default)]
    preferred_styles: Vec<String>,
    #[serde(default)]
    preferred_colors: Vec<String>,
    #[serde(default)]
    fit_preference: Option<String>,
}

async fn recommendations_complex(
    State(state): State<AppState>,
    Json(request): Json<ComplexRequest>,
) -> AppResult<impl IntoResponse> {
    let preferences = Preferences {
        gender: request.gender,
        styles: request.preferred_styles,
        colors: request.preferred_colors,
        fit: request.fit_preference,
    };
    let weather = state.weather.get_weather(&request.location).await?;
    let response = state
        .engine
        .recommend(Some(request.location), weather, preferences)
        .await?;
    Ok(Json(response))
}

/// Body shape for `/recommendations/custom`, matching spec.md §6
/// (`{weather_data, gender, preferred_styles[], preferred_colors[],
/// fit_preferences}`) — the weather snapshot is supplied directly by the
/// caller rather than looked up, grounded in `recommend_categorized`'s
/// "externally supplied snapshot" contract (spec.md §4.6).
#[derive(Debug, Deserialize)]
struct CustomRequest {
    weather_data: WeatherSnapshot,
    #[serde(default)]
    gender: Option<Gender>,
    #[serde(default)]
    preferred_styles: Vec<String>,
    #[serde(default)]
    preferred_colors: Vec<String>,
    #[serde(default)]
    fit_preferences: Option<String>,
}

async fn recommendations_custom(
    State(state): State<AppState>,
    Json(request): Json<CustomRequest>,
) -> AppResult<impl IntoResponse> {
    let preferences = Preferences {
        gender: request.gender,
        styles: request.preferred_styles,
        colors: request.preferred_colors,
        fit: request.fit_preferences,
    };
    let response = state
        .engine
        .recommend_categorized(request.weather_data, preferences)
        .await?;
    Ok(Json(response))
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

    let catalog = Arc::new(AssetCatalog::new(PathBuf::from(&settings.assets_path)));
    // Fail fast on startup if the catalog doesn't parse rather than on the
    // first request.
    catalog.snapshot().await?;

    let llm = Arc::new(ChatLlmClient::new(
        settings.llm_base_url.clone(),
        settings.llm_api_key.clone(),
        settings.llm_model.clone(),
    ));
    let kv = Arc::new(RedisKvStore::connect(&settings.redis_url).await?);
    let engine = Arc::new(
        RecommendationEngine::new(catalog, llm)
            .with_cache(kv)
            .with_max_recommendations(settings.max_recommendations),
    );
    let weather = Arc::new(WeatherServiceClient::new(settings.weather_service_url.clone()));

    let state = AppState { engine, weather };

    let app = Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/recommendations/simple", post(recommendations_simple))
        .route("/api/v1/recommendations/complex", post(recommendations_complex))
        .route("/api/v1/recommendations/custom", post(recommendations_custom))
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("recommendation service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
}
