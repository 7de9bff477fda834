//! notesync-api - HTTP API server for notesync
//!
//! Every note operation flows through the same pipeline: authenticate the
//! bearer token, count the request against the verified identity's rate
//! window, serve reads through the per-owner cache, run the store operation,
//! and invalidate the owner's cache entry before any accepted write returns.

use std::net::SocketAddr;

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use notesync_api::auth::{self, TokenService};
use notesync_api::services::{NotesCache, RateDecision, RateLimiter};
use notesync_core::{CreateNoteRequest, Note, NoteRepository, UpdateNoteRequest, UserRepository, UserSummary};
use notesync_db::Database;

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so IDs sort chronologically — useful for
/// log correlation and debugging production incidents.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Application state shared across handlers.
///
/// Cache and rate limiter are constructed once at startup and injected here;
/// handlers and middleware never reach for a shared global client.
#[derive(Clone)]
struct AppState {
    db: Database,
    /// Verifies bearer tokens and signs new ones at login.
    tokens: TokenService,
    /// Per-owner note list cache.
    cache: NotesCache,
    /// Fixed-window limiter keyed by verified user id.
    rate_limiter: RateLimiter,
}

// =============================================================================
// CORS CONFIGURATION HELPER
// =============================================================================

/// Parse allowed origins from comma-separated environment variable.
///
/// `ALLOWED_ORIGINS` - Comma-separated list of allowed origins. Defaults to
/// the local development frontend.
fn parse_allowed_origins() -> Vec<HeaderValue> {
    let origins_str = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());

    origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "notesync_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "notesync_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("notesync-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            } else {
                layer = layer.with_ansi(false); // no ANSI in files
            }
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/notesync".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .unwrap_or(3000);

    // Connect to database
    info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;
    info!("Database connected");

    // Run pending database migrations on startup
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    // Token verification key; refuses to start without one
    let tokens = TokenService::from_env()?;

    // Cache and rate limiter share the Redis instance but hold their own
    // managed connections
    let cache = NotesCache::from_env().await;
    let rate_limiter = RateLimiter::from_env().await;

    let state = AppState {
        db,
        tokens,
        cache,
        rate_limiter,
    };

    // Build router. Note routes and /auth/me go through the pipeline
    // middleware; registration, login, and health stay outside it (no token
    // exists yet at registration, and health must not consume quota).
    let protected = Router::new()
        .route("/api/v1/notes", get(list_notes).post(create_note))
        .route(
            "/api/v1/notes/:id",
            get(get_note).patch(update_note).delete(delete_note),
        )
        .route("/auth/me", get(current_user))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            pipeline_middleware,
        ));

    let app = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Authentication collaborator surface
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .merge(protected)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(CatchPanicLayer::new())
        .layer({
            let allowed_origins = parse_allowed_origins();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed_origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .allow_credentials(true)
                .max_age(std::time::Duration::from_secs(3600))
        })
        // Notes are short text; 1 MB is generous
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .with_state(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// =============================================================================
// REQUEST PIPELINE MIDDLEWARE
// =============================================================================

/// Verified caller identity, inserted by the pipeline middleware.
#[derive(Debug, Clone)]
struct CurrentUser {
    id: Uuid,
    email: String,
}

/// Authenticate, then rate-limit, in that order.
///
/// The limiter only ever sees identities the token service vouched for: an
/// unauthenticated caller is rejected before it can touch any counter, so it
/// can neither evade its own quota nor drain someone else's.
async fn pipeline_middleware(
    State(state): State<AppState>,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, ApiError> {
    // 1. Authenticate via the token service
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match auth_header {
        Some(h) if h.starts_with("Bearer ") => h.trim_start_matches("Bearer ").trim(),
        _ => {
            return Err(ApiError::Unauthorized(
                "Authentication required".to_string(),
            ))
        }
    };

    let user_id = state.tokens.verify(token)?;

    // A token can outlive its account; resolve it against the store.
    let user = match state.db.users.fetch(user_id).await {
        Ok(user) => user,
        Err(notesync_core::Error::NotFound(_)) => {
            return Err(ApiError::Unauthorized(
                "Could not validate credentials".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    };

    // 2. Count the request against the verified identity's window
    if let RateDecision::Limited { retry_after_secs } = state.rate_limiter.allow(user.id).await? {
        tracing::warn!(user_id = %user.id, "Rate limit exceeded");
        return Err(ApiError::RateLimited { retry_after_secs });
    }

    request.extensions_mut().insert(CurrentUser {
        id: user.id,
        email: user.email,
    });
    Ok(next.run(request).await)
}

/// Extractor for the verified identity placed by [`pipeline_middleware`].
///
/// Usage:
/// ```ignore
/// async fn my_handler(AuthUser(user): AuthUser) -> impl IntoResponse {
///     // user.id is the verified owner for every store operation
/// }
/// ```
struct AuthUser(CurrentUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
    }
}

// =============================================================================
// HEALTH CHECK
// =============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// AUTH HANDLERS
// =============================================================================

#[derive(Debug, Deserialize)]
struct RegisterBody {
    email: String,
    password: String,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::Validation("A valid email is required".to_string()));
    }
    if body.password.is_empty() {
        return Err(ApiError::Validation("Password must not be empty".to_string()));
    }

    let password_hash = auth::hash_password(&body.password)?;
    let user = state.db.users.insert(&email, &password_hash).await?;

    Ok((StatusCode::CREATED, Json(UserSummary::from(&user))))
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse, ApiError> {
    // One error for "no such user" and "wrong password"
    let user = state
        .db
        .users
        .find_by_email(body.email.trim())
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Incorrect email or password".to_string()))?;

    if !auth::verify_password(&user.password_hash, &body.password) {
        return Err(ApiError::Unauthorized(
            "Incorrect email or password".to_string(),
        ));
    }

    let access_token = state.tokens.issue(user.id)?;
    Ok(Json(serde_json::json!({
        "access_token": access_token,
        "token_type": "bearer",
    })))
}

async fn current_user(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(serde_json::json!({
        "id": user.id,
        "email": user.email,
    }))
}

// =============================================================================
// NOTE HANDLERS
// =============================================================================

/// Longest accepted title; matches the storage column.
const MAX_TITLE_LEN: usize = 255;

fn validate_title(title: &Option<String>) -> Result<(), ApiError> {
    if let Some(title) = title {
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(ApiError::Validation(format!(
                "title must be at most {} characters",
                MAX_TITLE_LEN
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CreateNoteBody {
    title: Option<String>,
    content: Option<String>,
}

async fn create_note(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateNoteBody>,
) -> Result<impl IntoResponse, ApiError> {
    validate_title(&body.title)?;

    let note = state
        .db
        .notes
        .insert(
            user.id,
            CreateNoteRequest {
                title: body.title,
                content: body.content,
            },
        )
        .await?;

    // Accepted write: the owner's snapshot is stale the moment we answer.
    state.cache.invalidate(user.id).await?;

    Ok((StatusCode::CREATED, Json(note)))
}

async fn list_notes(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(cached) = state.cache.get::<Vec<Note>>(user.id).await {
        debug!(owner_id = %user.id, cache_hit = true, "Serving note list from cache");
        return Ok(Json(cached));
    }

    let notes = state.db.notes.list(user.id).await?;

    // Populate after the read; failures only cost the next request a query.
    state.cache.set(user.id, &notes).await;

    Ok(Json(notes))
}

async fn get_note(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let note = state.db.notes.fetch(id, user.id).await?;
    Ok(Json(note))
}

#[derive(Debug, Deserialize)]
struct UpdateNoteBody {
    /// Version the caller last observed; the update is rejected with a
    /// conflict if the stored version moved on.
    expected_version: i32,
    title: Option<String>,
    content: Option<String>,
    archived: Option<bool>,
}

async fn update_note(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateNoteBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.expected_version < 1 {
        return Err(ApiError::Validation(
            "expected_version must be >= 1".to_string(),
        ));
    }
    validate_title(&body.title)?;

    let note = state
        .db
        .notes
        .update(
            id,
            user.id,
            body.expected_version,
            UpdateNoteRequest {
                title: body.title,
                content: body.content,
                archived: body.archived,
            },
        )
        .await?;

    state.cache.invalidate(user.id).await?;

    Ok(Json(note))
}

async fn delete_note(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.notes.delete(id, user.id).await?;

    state.cache.invalidate(user.id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
enum ApiError {
    Database(notesync_core::Error),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Validation(String),
    RateLimited { retry_after_secs: u64 },
    ServiceUnavailable(String),
}

impl From<notesync_core::Error> for ApiError {
    fn from(err: notesync_core::Error) -> Self {
        match &err {
            notesync_core::Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            notesync_core::Error::NoteNotFound(id) => {
                ApiError::NotFound(format!("Note {} not found", id))
            }
            notesync_core::Error::Conflict(_) => {
                ApiError::Conflict("Note has been modified by another process".to_string())
            }
            notesync_core::Error::InvalidInput(msg) => ApiError::Validation(msg.clone()),
            notesync_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg.clone()),
            notesync_core::Error::RateLimited(_) => ApiError::RateLimited {
                retry_after_secs: 60,
            },
            notesync_core::Error::Cache(msg) => ApiError::ServiceUnavailable(msg.clone()),
            notesync_core::Error::Database(sqlx_err) => {
                let msg = sqlx_err.to_string();
                if msg.contains("duplicate key") || msg.contains("unique constraint") {
                    return ApiError::Conflict(
                        "A user with this email already exists".to_string(),
                    );
                }
                ApiError::Database(err)
            }
            _ => ApiError::Database(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::Database(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            ApiError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded. Try again later.".to_string(),
            ),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        let mut response = (status, body).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
