use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post, MethodRouter};
use axum::Router;
use tower_http::cors::{AllowHeaders, AllowMethods, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::routes::{route_catalog, HttpMethod, RouteDefinition};
use crate::config::{CorsOrigin, ServiceConfig};
use crate::model::remote::{RemoteModelConfig, RemoteModelLoader};
use crate::model::{ModelHandle, SharedModelLoader};
use crate::pipeline::geometry::GeometrySettings;
use crate::pipeline::mask::DEFAULT_MASK_THRESHOLD;
use crate::pipeline::orchestrator::{InpaintOrchestrator, OrchestratorSettings};

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub route_count: usize,
    pub orchestrator: Arc<InpaintOrchestrator>,
}

impl AppState {
    pub fn new(route_count: usize, orchestrator: Arc<InpaintOrchestrator>) -> Self {
        Self {
            service_name: "inpaint-service",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            route_count,
            orchestrator,
        }
    }

    pub fn model_id(&self) -> &str {
        self.orchestrator.model().model_id()
    }
}

/// Router backed by the remote diffusion worker named in `config`.
pub fn build_router(config: &ServiceConfig) -> Router {
    let loader: SharedModelLoader = Arc::new(RemoteModelLoader::new(
        RemoteModelConfig::from_service_config(config),
    ));
    build_router_with_loader(config, loader)
}

pub fn build_router_with_loader(config: &ServiceConfig, loader: SharedModelLoader) -> Router {
    let settings = OrchestratorSettings {
        geometry: GeometrySettings::default(),
        mask_threshold: DEFAULT_MASK_THRESHOLD,
        serialize_inference: config.serialize_inference,
    };
    let orchestrator = InpaintOrchestrator::new(Arc::new(ModelHandle::new(loader)), settings);
    let catalog = route_catalog();
    let state = AppState::new(catalog.len(), Arc::new(orchestrator));
    build_router_with_catalog(catalog, state, config)
}

fn build_router_with_catalog(
    catalog: Vec<RouteDefinition>,
    state: AppState,
    config: &ServiceConfig,
) -> Router {
    let mut router = Router::new();
    for route in catalog {
        router = router.route(route.path, method_router_for(&route));
    }

    router
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(cors_layer(&config.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: ServiceConfig) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    let app = build_router(&config);
    info!(
        bind = %addr,
        host = %config.host,
        model = %config.model_id,
        device = %config.device,
        endpoint = config.model_endpoint.as_ref().map(|url| url.as_str()).unwrap_or("unset"),
        "starting inpaint-service HTTP surface"
    );
    axum::serve(listener, app).await
}

fn method_router_for(route: &RouteDefinition) -> MethodRouter<AppState> {
    match (route.method, route.path) {
        (HttpMethod::Get, "/health") => get(crate::api::system::health_handler),
        (HttpMethod::Get, "/models") => get(crate::api::system::list_models_handler),
        (HttpMethod::Post, "/inpaint") => post(crate::api::inpaint::inpaint_json_handler),
        (HttpMethod::Post, "/inpaint/upload") => {
            post(crate::api::inpaint::inpaint_upload_handler)
        }
        (HttpMethod::Get, _) => get(crate::api::system::not_found_handler),
        (HttpMethod::Post, _) => post(crate::api::system::not_found_handler),
    }
}

/// Credentials are only allowed with an exact origin; browsers reject them
/// alongside a wildcard.
fn cors_layer(origin: &CorsOrigin) -> CorsLayer {
    match origin {
        CorsOrigin::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsOrigin::Exact(raw) => match HeaderValue::from_str(raw) {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(AllowMethods::mirror_request())
                .allow_headers(AllowHeaders::mirror_request())
                .allow_credentials(true),
            Err(err) => {
                warn!(origin = %raw, error = %err, "ignoring unusable CORS origin");
                CorsLayer::new()
            }
        },
    }
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
