use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use abi::{
    Entity, ErrorResponse, NOTIFICATIONS_ROUTE, OPTIONS_ROUTE, Permission, TASKS_ROUTE,
    ThumbnailOption, ThumbnailTask,
};
use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{get, post},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use crate::{
    logging::Category,
    runner::{DryRunTaskRunner, NotificationStore, TaskRunContext, TaskRunner},
    security::{ApiKeyRegistry, PermissionGate},
    services::{EntitySearchService, EntityService, ServiceError},
    store::InMemoryStore,
};

mod handlers;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub state_path: Option<PathBuf>,
    pub api_keys: ApiKeyRegistry,
    pub max_notifications: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            api_keys: ApiKeyRegistry::default(),
            max_notifications: 200,
        }
    }
}

#[derive(Clone)]
pub struct ServerState {
    options: Arc<dyn EntityService<ThumbnailOption>>,
    option_search: Arc<dyn EntitySearchService<ThumbnailOption>>,
    tasks: Arc<dyn EntityService<ThumbnailTask>>,
    task_search: Arc<dyn EntitySearchService<ThumbnailTask>>,
    runner: Arc<dyn TaskRunner>,
    gate: Arc<dyn PermissionGate>,
    notifications: NotificationStore,
    metrics: Arc<ServerMetrics>,
}

struct ServerMetrics {
    started_at: Instant,
    requests_denied_total: AtomicU64,
    entities_saved_total: AtomicU64,
    delete_requests_total: AtomicU64,
    searches_total: AtomicU64,
    task_runs_started_total: AtomicU64,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            requests_denied_total: AtomicU64::new(0),
            entities_saved_total: AtomicU64::new(0),
            delete_requests_total: AtomicU64::new(0),
            searches_total: AtomicU64::new(0),
            task_runs_started_total: AtomicU64::new(0),
        }
    }
}

impl ServerState {
    /// Wires the in-memory store, the dry-run runner and the api-key gate from
    /// `config`. Use the `with_*` methods to swap any seam.
    pub fn new(config: ServerConfig) -> Self {
        let store = InMemoryStore::new(config.state_path);
        Self {
            options: Arc::new(store.clone()),
            option_search: Arc::new(store.clone()),
            tasks: Arc::new(store.clone()),
            task_search: Arc::new(store),
            runner: Arc::new(DryRunTaskRunner),
            gate: Arc::new(config.api_keys),
            notifications: NotificationStore::new(config.max_notifications),
            metrics: Arc::new(ServerMetrics::default()),
        }
    }

    pub fn with_option_services(
        mut self,
        service: Arc<dyn EntityService<ThumbnailOption>>,
        search: Arc<dyn EntitySearchService<ThumbnailOption>>,
    ) -> Self {
        self.options = service;
        self.option_search = search;
        self
    }

    pub fn with_task_services(
        mut self,
        service: Arc<dyn EntityService<ThumbnailTask>>,
        search: Arc<dyn EntitySearchService<ThumbnailTask>>,
    ) -> Self {
        self.tasks = service;
        self.task_search = search;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.gate = gate;
        self
    }

    fn authorize(&self, headers: &HeaderMap, required: Permission) -> Result<(), HandlerError> {
        self.gate.authorize(headers, required).map_err(|denied| {
            self.metrics
                .requests_denied_total
                .fetch_add(1, Ordering::Relaxed);
            warn!("{} denied permission={required} reason={denied}", Category::Auth);
            (
                denied.status_code(),
                Json(ErrorResponse {
                    error: denied.to_string(),
                }),
            )
        })
    }

    fn run_context(&self) -> TaskRunContext {
        TaskRunContext {
            tasks: self.tasks.clone(),
            options: self.options.clone(),
            runner: self.runner.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

/// An entity kind served by the generic CRUD + search handlers.
trait Resource: Entity + Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const LABEL: &'static str;

    fn service(state: &ServerState) -> Arc<dyn EntityService<Self>>;
    fn search_service(state: &ServerState) -> Arc<dyn EntitySearchService<Self>>;
}

impl Resource for ThumbnailOption {
    const LABEL: &'static str = "option";

    fn service(state: &ServerState) -> Arc<dyn EntityService<Self>> {
        state.options.clone()
    }

    fn search_service(state: &ServerState) -> Arc<dyn EntitySearchService<Self>> {
        state.option_search.clone()
    }
}

impl Resource for ThumbnailTask {
    const LABEL: &'static str = "task";

    fn service(state: &ServerState) -> Arc<dyn EntityService<Self>> {
        state.tasks.clone()
    }

    fn search_service(state: &ServerState) -> Arc<dyn EntitySearchService<Self>> {
        state.task_search.clone()
    }
}

pub fn build_server_app(state: ServerState) -> Router {
    use handlers::*;

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            OPTIONS_ROUTE,
            post(create_handler::<ThumbnailOption>)
                .put(update_handler::<ThumbnailOption>)
                .delete(delete_handler::<ThumbnailOption>),
        )
        .route(
            &format!("{OPTIONS_ROUTE}/search"),
            post(search_handler::<ThumbnailOption>),
        )
        .route(
            &format!("{OPTIONS_ROUTE}/{{id}}"),
            get(get_handler::<ThumbnailOption>),
        )
        .route(
            TASKS_ROUTE,
            post(create_handler::<ThumbnailTask>)
                .put(update_handler::<ThumbnailTask>)
                .delete(delete_handler::<ThumbnailTask>),
        )
        .route(
            &format!("{TASKS_ROUTE}/search"),
            post(search_handler::<ThumbnailTask>),
        )
        .route(&format!("{TASKS_ROUTE}/run"), post(run_tasks_handler))
        .route(
            &format!("{TASKS_ROUTE}/{{id}}"),
            get(get_handler::<ThumbnailTask>),
        )
        .route(
            &format!("{NOTIFICATIONS_ROUTE}/{{id}}"),
            get(get_notification_handler),
        )
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(state)
}

fn service_error(err: ServiceError) -> HandlerError {
    warn!("service call failed: {err}");
    (
        err.status_code(),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: &str) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn not_found(message: &str) -> HandlerError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn internal_error(message: String) -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}
