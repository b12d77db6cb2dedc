//! API Service - Read-only API over the Dubai population data
//!
//! Endpoints:
//! - GET /health - Health check with database connectivity
//! - GET /population/emirate - Emirate totals per year
//! - GET /population/sector/:sector_name - Sector totals per year
//! - GET /population/community/:community_code - Community rows per year
//! - GET /anomalies - Year-over-year growth outliers
//!
//! Population endpoints take an optional `years` filter, repeated
//! (`years=2019&years=2020`) or comma-separated (`years=2019,2020`).

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use db::schema::{
    ANOMALY_REPORT_VIEW, COMMUNITY_POPULATION_VIEW, EMIRATE_POPULATION_VIEW,
    SECTOR_POPULATION_VIEW,
};
use db::{DbConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_ANOMALY_THRESHOLD: f64 = 1.5;

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    pool: PgPool,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct EmiratePopulation {
    year: i32,
    total_population: f64,
    density: Option<f64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct SectorPopulation {
    sector_name: String,
    year: i32,
    total_population: f64,
    density: Option<f64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct CommunityPopulation {
    community_code: String,
    community_name: String,
    sector_name: String,
    year: i32,
    population: f64,
    density: Option<f64>,
    is_estimated: bool,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct Anomaly {
    community_code: String,
    community_name: String,
    year: i32,
    population: f64,
    prev_population: Option<f64>,
    growth_rate: f64,
    resolved: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct AnomaliesQuery {
    threshold: Option<f64>,
    resolved: Option<bool>,
}

/// Collect every `years` value; `None` when the filter is absent.
fn parse_years(params: &[(String, String)]) -> Result<Option<Vec<i32>>, String> {
    let mut years = Vec::new();
    for (key, value) in params {
        if key != "years" {
            continue;
        }
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let year = part
                .parse::<i32>()
                .map_err(|_| format!("Invalid year '{}'", part))?;
            years.push(year);
        }
    }

    if years.is_empty() {
        Ok(None)
    } else {
        years.sort_unstable();
        years.dedup();
        Ok(Some(years))
    }
}

// ============================================================================
// SQL
// ============================================================================

fn emirate_sql(filter_years: bool) -> String {
    let mut query = format!(
        "SELECT year, total_population::float8 AS total_population, density::float8 AS density FROM {}",
        EMIRATE_POPULATION_VIEW
    );
    if filter_years {
        query.push_str(" WHERE year = ANY($1)");
    }
    query.push_str(" ORDER BY year");
    query
}

fn sector_sql(filter_years: bool) -> String {
    let mut query = format!(
        "SELECT sector_name, year, total_population::float8 AS total_population, density::float8 AS density \
         FROM {} WHERE sector_name = $1",
        SECTOR_POPULATION_VIEW
    );
    if filter_years {
        query.push_str(" AND year = ANY($2)");
    }
    query.push_str(" ORDER BY year");
    query
}

fn community_sql(filter_years: bool) -> String {
    let mut query = format!(
        "SELECT community_code, community_name, sector_name, year, population::float8 AS population, \
         density::float8 AS density, is_estimated FROM {} WHERE community_code = $1",
        COMMUNITY_POPULATION_VIEW
    );
    if filter_years {
        query.push_str(" AND year = ANY($2)");
    }
    query.push_str(" ORDER BY year");
    query
}

fn anomalies_sql(filter_resolved: bool) -> String {
    let mut query = format!(
        "SELECT community_code, community_name, year, population::float8 AS population, \
         prev_population::float8 AS prev_population, growth_rate::float8 AS growth_rate, resolved \
         FROM {} WHERE ABS(growth_rate) > $1",
        ANOMALY_REPORT_VIEW
    );
    if filter_resolved {
        query.push_str(" AND resolved = $2");
    }
    query.push_str(" ORDER BY ABS(growth_rate) DESC");
    query
}

// ============================================================================
// Handlers
// ============================================================================

async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Dubai Population API - see /population/emirate, /population/sector/:name, \
                  /population/community/:code, /anomalies",
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match db::ping(&state.pool).await {
        Ok(()) => Json(HealthResponse {
            status: "healthy",
            database: "connected",
            version: env!("CARGO_PKG_VERSION"),
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    database: "disconnected",
                    version: env!("CARGO_PKG_VERSION"),
                }),
            )
                .into_response()
        }
    }
}

async fn emirate_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let years = match parse_years(&params) {
        Ok(y) => y,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let sql = emirate_sql(years.is_some());
    let mut q = sqlx::query_as::<_, EmiratePopulation>(&sql);
    if let Some(years) = &years {
        q = q.bind(years);
    }

    match q.fetch_all(&state.pool).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "emirate query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn sector_handler(
    State(state): State<Arc<AppState>>,
    Path(sector_name): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let years = match parse_years(&params) {
        Ok(y) => y,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let sql = sector_sql(years.is_some());
    let mut q = sqlx::query_as::<_, SectorPopulation>(&sql).bind(&sector_name);
    if let Some(years) = &years {
        q = q.bind(years);
    }

    match q.fetch_all(&state.pool).await {
        Ok(rows) if rows.is_empty() => error_response(
            StatusCode::NOT_FOUND,
            format!("No data found for sector '{}'", sector_name),
        ),
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(sector = %sector_name, error = %e, "sector query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn community_handler(
    State(state): State<Arc<AppState>>,
    Path(community_code): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let years = match parse_years(&params) {
        Ok(y) => y,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let sql = community_sql(years.is_some());
    let mut q = sqlx::query_as::<_, CommunityPopulation>(&sql).bind(&community_code);
    if let Some(years) = &years {
        q = q.bind(years);
    }

    match q.fetch_all(&state.pool).await {
        Ok(rows) if rows.is_empty() => error_response(
            StatusCode::NOT_FOUND,
            format!("No data found for community '{}'", community_code),
        ),
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(community_code = %community_code, error = %e, "community query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn anomalies_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnomaliesQuery>,
) -> Response {
    let threshold = params.threshold.unwrap_or(DEFAULT_ANOMALY_THRESHOLD);

    let sql = anomalies_sql(params.resolved.is_some());
    let mut q = sqlx::query_as::<_, Anomaly>(&sql).bind(threshold);
    if let Some(resolved) = params.resolved {
        q = q.bind(resolved);
    }

    match q.fetch_all(&state.pool).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "anomaly query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    // CORS for dashboard clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/population/emirate", get(emirate_handler))
        .route("/population/sector/:sector_name", get(sector_handler))
        .route("/population/community/:community_code", get(community_handler))
        .route("/anomalies", get(anomalies_handler))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("api=info,db=info,sqlx=warn"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

    println!("=== Dubai Population API ===");
    println!("Connecting to database...");

    let pool = db::connect(&DbConfig::from_env(10), &RetryPolicy::from_env()).await?;

    println!("Database connected");

    let app = router(Arc::new(AppState { pool }));

    println!("API listening on http://{}", bind);
    println!("\nEndpoints:");
    println!("  GET /health");
    println!("  GET /population/emirate?years=");
    println!("  GET /population/sector/:sector_name?years=");
    println!("  GET /population/community/:community_code?years=");
    println!("  GET /anomalies?threshold=&resolved=");

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}
