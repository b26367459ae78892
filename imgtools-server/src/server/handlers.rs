use abi::{SearchCriteria, SearchResult, TaskRunRequest, ThumbnailNotification};
use axum::{
    extract::{Path, RawQuery, Request, State},
    http::header::CONTENT_TYPE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::info;

use super::*;
use crate::{
    logging::{Category, MethodLabel, StatusLabel},
    runner::{new_run_notification, spawn_task_run},
    services::get_by_id,
};

#[derive(Serialize)]
pub(super) struct StatusResponse {
    status: &'static str,
}

pub(super) async fn access_log_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status();
    if path != "/healthz" {
        info!(
            "{} {} {} {} {}ms",
            Category::Access,
            MethodLabel(method.as_str()),
            path,
            StatusLabel(status.as_u16()),
            started.elapsed().as_millis()
        );
    }
    response
}

pub(super) async fn healthz_handler() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

pub(super) async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let metrics = &state.metrics;
    let body = format!(
        concat!(
            "imgtools_uptime_seconds {}\n",
            "imgtools_requests_denied_total {}\n",
            "imgtools_entities_saved_total {}\n",
            "imgtools_delete_requests_total {}\n",
            "imgtools_searches_total {}\n",
            "imgtools_task_runs_started_total {}\n"
        ),
        metrics.started_at.elapsed().as_secs(),
        metrics.requests_denied_total.load(Ordering::Relaxed),
        metrics.entities_saved_total.load(Ordering::Relaxed),
        metrics.delete_requests_total.load(Ordering::Relaxed),
        metrics.searches_total.load(Ordering::Relaxed),
        metrics.task_runs_started_total.load(Ordering::Relaxed),
    );
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

pub(super) async fn create_handler<R: Resource>(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(entity): Json<R>,
) -> Result<Json<R>, HandlerError> {
    state.authorize(&headers, Permission::Create)?;
    let saved = save_one(&state, entity).await?;
    Ok(Json(saved))
}

pub(super) async fn update_handler<R: Resource>(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(entity): Json<R>,
) -> Result<StatusCode, HandlerError> {
    state.authorize(&headers, Permission::Update)?;
    if entity.is_new() {
        return Err(bad_request(&format!("{} id is required for update", R::LABEL)));
    }
    save_one(&state, entity).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn delete_handler<R: Resource>(
    State(state): State<ServerState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, HandlerError> {
    state.authorize(&headers, Permission::Delete)?;
    let ids = parse_ids(query.as_deref());
    R::service(&state)
        .remove_by_ids(&ids)
        .await
        .map_err(service_error)?;
    state
        .metrics
        .delete_requests_total
        .fetch_add(1, Ordering::Relaxed);
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn get_handler<R: Resource>(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Option<R>>, HandlerError> {
    state.authorize(&headers, Permission::Read)?;
    let service = R::service(&state);
    let found = get_by_id(service.as_ref(), &id)
        .await
        .map_err(service_error)?;
    Ok(Json(found))
}

pub(super) async fn search_handler<R: Resource>(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(criteria): Json<SearchCriteria>,
) -> Result<Json<SearchResult<R>>, HandlerError> {
    state.authorize(&headers, Permission::Read)?;
    let page = R::search_service(&state)
        .search(&criteria)
        .await
        .map_err(service_error)?;
    state.metrics.searches_total.fetch_add(1, Ordering::Relaxed);
    Ok(Json(SearchResult {
        result: page.results,
        total_count: page.total_count,
    }))
}

pub(super) async fn run_tasks_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(request): Json<TaskRunRequest>,
) -> Result<Json<ThumbnailNotification>, HandlerError> {
    state.authorize(&headers, Permission::Update)?;
    if request.task_ids.iter().all(|id| id.trim().is_empty()) {
        return Err(bad_request("taskIds cannot be empty"));
    }

    let notification = new_run_notification(&request);
    state.notifications.insert(notification.clone()).await;
    state
        .metrics
        .task_runs_started_total
        .fetch_add(1, Ordering::Relaxed);
    info!(
        "{} queued notification_id={} tasks={}",
        Category::Run,
        notification.id,
        request.task_ids.len()
    );
    spawn_task_run(state.run_context(), request, notification.id.clone());
    Ok(Json(notification))
}

pub(super) async fn get_notification_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ThumbnailNotification>, HandlerError> {
    state.authorize(&headers, Permission::Read)?;
    let Some(notification) = state.notifications.get(&id).await else {
        return Err(not_found("notification not found"));
    };
    Ok(Json(notification))
}

async fn save_one<R: Resource>(state: &ServerState, entity: R) -> Result<R, HandlerError> {
    let saved = R::service(state)
        .save_or_update(vec![entity])
        .await
        .map_err(service_error)?;
    state
        .metrics
        .entities_saved_total
        .fetch_add(1, Ordering::Relaxed);
    saved
        .into_iter()
        .next()
        .ok_or_else(|| internal_error(format!("{} save returned no record", R::LABEL)))
}

/// Accepts `ids=a&ids=b` and `ids=a,b`; blank entries are dropped.
fn parse_ids(query: Option<&str>) -> Vec<String> {
    let Some(query) = query else {
        return Vec::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key == "ids")
        .flat_map(|(_, value)| {
            value
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}
