//! HTTP Handlers
//!
//! Login, server info, configuration generation and health.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use wgkit_engine::{CommandRunner, SystemRunner};
use wgkit_provision::{AllocatedAddress, ClientIdentity, ProvisionError, ProvisioningService};

use crate::auth::{require_auth, Claims, JwtKeys};
use crate::users::UserStore;

/// Origins allowed to call the API from a browser
const ALLOWED_ORIGINS: [&str; 2] = ["http://localhost", "http://localhost:3000"];

/// Application state shared across handlers
pub struct AppState<R: CommandRunner = SystemRunner> {
    pub provisioning: ProvisioningService<R>,
    pub users: UserStore,
    pub jwt: JwtKeys,
}

/// Build the full API router
pub fn router<R: CommandRunner>(state: Arc<AppState<R>>) -> Router {
    let protected = Router::new()
        .route("/api/server", get(server_handler::<R>))
        .route("/api/generate-config", post(generate_config_handler::<R>))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth::<R>));

    let cors = CorsLayer::new()
        .allow_origin(ALLOWED_ORIGINS.map(HeaderValue::from_static))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/api/login", post(login_handler::<R>))
        .route("/api/health", get(health_handler::<R>))
        .merge(protected)
        .fallback(not_found_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Login response
#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub user: UserSummary,
}

#[derive(Serialize)]
pub struct UserSummary {
    pub id: u64,
    pub email: String,
}

#[derive(Serialize)]
pub struct ServerResponse {
    pub success: bool,
    pub server: ServerInfo,
}

/// Public part of the server descriptor
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub country: String,
    pub ip: String,
    pub public_key: String,
    pub port: u16,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateConfigResponse {
    pub success: bool,
    pub config: String,
    pub client_public_key: String,
    #[serde(rename = "clientIP")]
    pub client_ip: AllocatedAddress,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    #[serde(rename = "allocatedIPs")]
    pub allocated_ips: usize,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Every failure the API reports, rendered as JSON
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    Unauthorized(&'static str),
    NotFound,
    Internal {
        error: &'static str,
        details: Option<String>,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            Self::NotFound => (StatusCode::NOT_FOUND, "Endpoint not found", None),
            Self::Internal { error, details } => (StatusCode::INTERNAL_SERVER_ERROR, error, details),
        };
        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ProvisionError> for ApiError {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::IncompleteServerConfig(_) => Self::Internal {
                error: "Server configuration is incomplete",
                details: Some(e.to_string()),
            },
            other => Self::Internal {
                error: "Failed to generate WireGuard configuration",
                details: Some(other.to_string()),
            },
        }
    }
}

/// POST /api/login
pub async fn login_handler<R: CommandRunner>(
    State(state): State<Arc<AppState<R>>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    const MISSING: ApiError = ApiError::BadRequest("Email and password are required");

    let Json(request) = payload.map_err(|_| MISSING)?;
    let (email, password) = match (request.email, request.password) {
        (Some(e), Some(p)) if !e.is_empty() && !p.is_empty() => (e, p),
        _ => return Err(MISSING),
    };

    info!("Login attempt for: {}", email);

    let lookup = state.clone();
    let lookup_email = email.clone();
    let user = tokio::task::spawn_blocking(move || lookup.users.verify(&lookup_email, &password))
        .await
        .map_err(|e| {
            error!("Login task failed: {}", e);
            ApiError::Internal {
                error: "Internal server error during login",
                details: None,
            }
        })?
        .ok_or_else(|| {
            warn!("Login rejected for: {}", email);
            ApiError::Unauthorized("Invalid email or password")
        })?;

    let token = state.jwt.issue(&user).map_err(|e| {
        error!("Login error: {}", e);
        ApiError::Internal {
            error: "Internal server error during login",
            details: None,
        }
    })?;

    info!("Login successful for: {}", email);

    Ok(Json(LoginResponse {
        success: true,
        token,
        user: UserSummary {
            id: user.id,
            email: user.email,
        },
    }))
}

/// GET /api/server
pub async fn server_handler<R: CommandRunner>(
    State(state): State<Arc<AppState<R>>>,
    Extension(claims): Extension<Claims>,
) -> Json<ServerResponse> {
    info!("Fetching server info for user: {}", claims.email);

    let server = state.provisioning.server();
    Json(ServerResponse {
        success: true,
        server: ServerInfo {
            name: server.name.clone(),
            country: server.country.clone(),
            ip: server.address.clone(),
            public_key: server.public_key.to_string(),
            port: server.port,
        },
    })
}

/// POST /api/generate-config
pub async fn generate_config_handler<R: CommandRunner>(
    State(state): State<Arc<AppState<R>>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<GenerateConfigResponse>, ApiError> {
    info!("Generating WireGuard config for user: {}", claims.email);

    let generated = state
        .provisioning
        .generate(&ClientIdentity::from(claims.user_id))
        .await
        .map_err(|e| {
            error!("Error generating config: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(GenerateConfigResponse {
        success: true,
        config: generated.config.into_string(),
        client_public_key: generated.client_public_key.to_string(),
        client_ip: generated.client_address,
    }))
}

/// GET /api/health
pub async fn health_handler<R: CommandRunner>(State(state): State<Arc<AppState<R>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        allocated_ips: state.provisioning.allocated_count(),
    })
}

pub async fn not_found_handler() -> ApiError {
    ApiError::NotFound
}
