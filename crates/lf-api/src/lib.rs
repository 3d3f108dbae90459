use std::env;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    extract::State,
    extract::connect_info::ConnectInfo,
    http::Method,
    http::Request,
    http::header::{CONTENT_TYPE, HeaderName, HeaderValue},
    middleware,
    middleware::Next,
    response::Response,
    routing::{get, post},
};
use clap::Parser;
use dotenvy::dotenv;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
};
use lf_common::{
    EmbeddingProvider, EnrichmentConfig, EnrichmentMode, HttpEmbeddingProvider,
    InMemoryPostStore, LocalImageStore, PgPostStore, PostService, PostStore, ProviderConfig,
    RankingConfig,
    logging::{init_tracing_subscriber, install_tracing_panic_hook},
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod error;
pub mod handlers;

use error::ApiError;
use handlers::{health, posts, search};

const SHUTDOWN_DRAIN_GRACE: Duration = Duration::from_millis(200);
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Parser)]
#[command(name = "lf-api", about = "Lost-and-found post and match search API")]
struct Cli {
    /// PostgreSQL connection string; posts are kept in memory when absent
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Server port
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Comma separated list of allowed CORS origins
    #[arg(long, env = "LF_CORS_ORIGINS", default_value = "http://localhost:3000")]
    cors_origins: String,

    /// Directory for uploaded images
    #[arg(long, env = "LF_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Request body limit in bytes (covers multipart uploads)
    #[arg(long, env = "LF_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    fn from_cli(cli: Cli) -> Result<Self, ApiError> {
        let cors_origins = cli
            .cors_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect::<Vec<_>>();

        if cors_origins.iter().any(|origin| origin == "*") {
            return Err(ApiError::BadRequest(
                "LF_CORS_ORIGINS must list explicit origins when credentials are enabled".into(),
            ));
        }

        if cli.max_upload_bytes == 0 {
            return Err(ApiError::BadRequest(
                "LF_MAX_UPLOAD_BYTES must be positive".into(),
            ));
        }

        Ok(Self {
            database_url: cli.database_url.filter(|url| !url.trim().is_empty()),
            port: cli.port,
            cors_origins,
            upload_dir: cli.upload_dir,
            max_upload_bytes: cli.max_upload_bytes,
        })
    }

    pub fn for_tests(upload_dir: PathBuf) -> Self {
        Self {
            database_url: None,
            port: 8080,
            cors_origins: vec!["http://localhost:3000".into()],
            upload_dir,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

type IpRateLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock, NoOpMiddleware>;

#[derive(Clone)]
pub struct RateLimits {
    global: Arc<IpRateLimiter>,
    search: Arc<IpRateLimiter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub global_per_sec: u64,
    pub global_burst: u32,
    pub search_per_sec: u64,
    pub search_burst: u32,
}

impl RateLimitConfig {
    fn parse_env<T: std::str::FromStr + PartialOrd + Default>(name: &str) -> Option<T> {
        env::var(name)
            .ok()
            .and_then(|value| value.trim().parse::<T>().ok())
            .filter(|value| *value > T::default())
    }

    fn from_env() -> Self {
        Self {
            global_per_sec: Self::parse_env("LF_RATE_LIMIT_GLOBAL_PER_SEC").unwrap_or(20),
            global_burst: Self::parse_env("LF_RATE_LIMIT_GLOBAL_BURST").unwrap_or(40),
            search_per_sec: Self::parse_env("LF_RATE_LIMIT_SEARCH_PER_SEC").unwrap_or(2),
            search_burst: Self::parse_env("LF_RATE_LIMIT_SEARCH_BURST").unwrap_or(5),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PostService>,
    pub config: AppConfig,
    pub(crate) rate_limits: RateLimits,
    pub readiness: Arc<AtomicBool>,
}

pub type SharedState = Arc<AppState>;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-request-id")])
        .allow_credentials(true)
}

fn build_ip_limiter(per_second: u64, burst_size: u32) -> Arc<IpRateLimiter> {
    let nanos_per_token = (1_000_000_000u64 / per_second.max(1)).max(1);
    let burst = NonZeroU32::new(burst_size).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(Duration::from_nanos(nanos_per_token))
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst);

    Arc::new(RateLimiter::keyed(quota))
}

pub fn default_rate_limits() -> RateLimits {
    let cfg = RateLimitConfig::from_env();
    RateLimits {
        global: build_ip_limiter(cfg.global_per_sec, cfg.global_burst),
        search: build_ip_limiter(cfg.search_per_sec, cfg.search_burst),
    }
}

fn request_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

fn enforce_rate_limit(limiter: &IpRateLimiter, ip: Option<IpAddr>) -> Result<(), ApiError> {
    if let Some(client_ip) = ip {
        if limiter.check_key(&client_ip).is_err() {
            return Err(ApiError::TooManyRequests("rate limit exceeded".into()));
        }
    }

    Ok(())
}

async fn global_rate_limit(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    enforce_rate_limit(&state.rate_limits.global, request_ip(&req))?;
    Ok(next.run(req).await)
}

async fn search_rate_limit(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    enforce_rate_limit(&state.rate_limits.search, request_ip(&req))?;
    Ok(next.run(req).await)
}

async fn attach_request_id_context(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    Ok(error::with_request_id(request_id, next.run(req)).await)
}

pub fn create_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let request_id_header = HeaderName::from_static("x-request-id");
    let trace_header = request_id_header.clone();

    let trace = TraceLayer::new_for_http().make_span_with(move |request: &Request<Body>| {
        let request_id = request
            .headers()
            .get(&trace_header)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
            status = tracing::field::Empty,
        )
    });

    let api_routes = Router::new()
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route("/posts/:id", get(posts::get_post))
        .route("/posts/:id/matches", get(posts::post_matches))
        .route(
            "/search/image",
            post(search::search_by_image).route_layer(middleware::from_fn_with_state(
                state.clone(),
                search_rate_limit,
            )),
        );

    Router::new()
        .route("/health", get(health::readyz))
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz))
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            global_rate_limit,
        ))
        .layer(middleware::from_fn(attach_request_id_context))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(trace)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(
            request_id_header,
            MakeRequestUuid,
        ))
        .layer(cors)
        .with_state(state)
}

/// State for router tests: in-memory store, inline enrichment and the given
/// provider. Uploads land in a per-process temp directory.
pub fn test_state_with_provider(provider: Arc<dyn EmbeddingProvider>) -> SharedState {
    let upload_dir = env::temp_dir().join(format!("lf-api-test-{}", std::process::id()));
    let images = LocalImageStore::new(&upload_dir).expect("temp upload dir should be writable");

    let service = PostService::new(
        Arc::new(InMemoryPostStore::new()),
        provider,
        Arc::new(images),
        RankingConfig::default(),
        EnrichmentConfig {
            mode: EnrichmentMode::Inline,
            provider_timeout: Duration::from_millis(500),
            ..EnrichmentConfig::default()
        },
    );

    Arc::new(AppState {
        service: Arc::new(service),
        config: AppConfig::for_tests(upload_dir),
        rate_limits: default_rate_limits(),
        readiness: Arc::new(AtomicBool::new(true)),
    })
}

/// Like [`test_state_with_provider`] with an HTTP provider pointed at a
/// closed local port, so every embedding attempt fails fast.
pub fn test_state() -> SharedState {
    let provider = HttpEmbeddingProvider::new(ProviderConfig {
        endpoint: "http://127.0.0.1:9/embed".into(),
        timeout: Duration::from_millis(300),
    })
    .expect("http client should build");

    test_state_with_provider(Arc::new(provider))
}

async fn build_service(config: &AppConfig) -> Result<PostService, ApiError> {
    let store: Arc<dyn PostStore> = match &config.database_url {
        Some(url) => Arc::new(PgPostStore::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set; posts are kept in memory only");
            Arc::new(InMemoryPostStore::new())
        }
    };

    let provider = HttpEmbeddingProvider::new(ProviderConfig::from_env()?)
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    info!(
        endpoint = %provider.config().endpoint,
        timeout_ms = provider.config().timeout.as_millis() as u64,
        "embedding provider configured"
    );

    let images = LocalImageStore::new(&config.upload_dir)
        .map_err(|err| ApiError::Internal(format!("upload dir unavailable: {err}")))?;
    info!(upload_dir = %images.root().display(), "image store ready");

    Ok(PostService::new(
        store,
        Arc::new(provider),
        Arc::new(images),
        RankingConfig::from_env()?,
        EnrichmentConfig::from_env()?,
    ))
}

pub async fn run() -> Result<(), ApiError> {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    let cli = Cli::parse();
    let config = AppConfig::from_cli(cli)?;
    lf_metrics::init_metrics("LF_METRICS_PORT", 9100);

    let service = build_service(&config).await?;

    let state = Arc::new(AppState {
        service: Arc::new(service),
        config: config.clone(),
        rate_limits: default_rate_limits(),
        readiness: Arc::new(AtomicBool::new(true)),
    });

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let app = create_router(state.clone());

    info!(%addr, "lf-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(())
}

async fn shutdown_signal(state: SharedState) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown requested; draining");
    state.readiness.store(false, Ordering::SeqCst);

    let pending = state.service.pending_enrichment();
    if pending > 0 {
        warn!(pending, "enrichment jobs still queued at shutdown; they will not run");
    }

    // Readiness probes see 503 for this window before the listener closes.
    tokio::time::sleep(SHUTDOWN_DRAIN_GRACE).await;
}
