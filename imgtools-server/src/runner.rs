use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use abi::{
    NOTIFY_TYPE_THUMBNAIL_PROCESS, TaskRunRequest, ThumbnailNotification, ThumbnailOption,
    ThumbnailTask,
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{logging::Category, services::EntityService};

/// Thumbnail generation engine. The server only orchestrates runs; producing
/// the image variants is up to the implementation.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Returns the number of thumbnails produced for `task`.
    async fn run(
        &self,
        task: &ThumbnailTask,
        options: &[ThumbnailOption],
        regenerate: bool,
    ) -> Result<usize, String>;
}

/// Logs what a run would generate and touches no files.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunTaskRunner;

#[async_trait]
impl TaskRunner for DryRunTaskRunner {
    async fn run(
        &self,
        task: &ThumbnailTask,
        options: &[ThumbnailOption],
        regenerate: bool,
    ) -> Result<usize, String> {
        if task.work_path.trim().is_empty() {
            return Err("work path is empty".to_string());
        }
        for option in options {
            info!(
                "{} dry-run work_path={} option={} suffix={} regenerate={regenerate}",
                Category::Run,
                task.work_path,
                option.name,
                option.file_suffix
            );
        }
        Ok(options.len())
    }
}

/// Run notifications, newest kept; finished ones are pruned past `capacity`.
#[derive(Clone)]
pub struct NotificationStore {
    inner: Arc<RwLock<HashMap<String, ThumbnailNotification>>>,
    capacity: usize,
}

impl NotificationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn get(&self, id: &str) -> Option<ThumbnailNotification> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn insert(&self, notification: ThumbnailNotification) {
        let mut guard = self.inner.write().await;
        guard.insert(notification.id.clone(), notification);
        if guard.len() > self.capacity {
            let mut finished = guard
                .values()
                .filter(|item| item.is_finished())
                .map(|item| (item.created_unix_ms, item.id.clone()))
                .collect::<Vec<_>>();
            finished.sort_unstable();
            let excess = guard.len() - self.capacity;
            for (_, id) in finished.into_iter().take(excess) {
                guard.remove(&id);
            }
        }
    }

    async fn update(&self, id: &str, apply: impl FnOnce(&mut ThumbnailNotification)) {
        if let Some(notification) = self.inner.write().await.get_mut(id) {
            apply(notification);
        }
    }
}

/// Everything a background run needs, cloned out of the server state.
#[derive(Clone)]
pub(crate) struct TaskRunContext {
    pub tasks: Arc<dyn EntityService<ThumbnailTask>>,
    pub options: Arc<dyn EntityService<ThumbnailOption>>,
    pub runner: Arc<dyn TaskRunner>,
    pub notifications: NotificationStore,
}

pub(crate) fn new_run_notification(request: &TaskRunRequest) -> ThumbnailNotification {
    ThumbnailNotification {
        id: Uuid::new_v4().to_string(),
        notify_type: NOTIFY_TYPE_THUMBNAIL_PROCESS.to_string(),
        title: "Thumbnail generation".to_string(),
        description: if request.regenerate {
            "Regenerating all thumbnails".to_string()
        } else {
            "Generating missing thumbnails".to_string()
        },
        created_unix_ms: now_unix_ms(),
        finished: None,
        processed_count: 0,
        total_count: request.task_ids.len(),
        errors: Vec::new(),
    }
}

pub(crate) fn spawn_task_run(
    context: TaskRunContext,
    request: TaskRunRequest,
    notification_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        execute_task_run(context, request, notification_id).await;
    })
}

async fn execute_task_run(
    context: TaskRunContext,
    request: TaskRunRequest,
    notification_id: String,
) {
    info!(
        "{} started notification_id={notification_id} tasks={} regenerate={}",
        Category::Run,
        request.task_ids.len(),
        request.regenerate
    );
    let mut produced_total = 0usize;

    for task_id in &request.task_ids {
        let outcome = run_single_task(&context, task_id, request.regenerate).await;
        let error = match outcome {
            Ok(produced) => {
                produced_total += produced;
                None
            }
            Err(message) => {
                warn!(
                    "{} task failed notification_id={notification_id} task_id={task_id} err={message}",
                    Category::Run
                );
                Some(format!("{task_id}: {message}"))
            }
        };
        context
            .notifications
            .update(&notification_id, |notification| {
                notification.processed_count += 1;
                notification.errors.extend(error);
            })
            .await;
    }

    let finished_at = now_unix_ms();
    context
        .notifications
        .update(&notification_id, |notification| {
            notification.finished = Some(finished_at);
            notification.description = format!(
                "Processed {} of {} tasks, {produced_total} thumbnails",
                notification.processed_count, notification.total_count
            );
        })
        .await;
    info!(
        "{} finished notification_id={notification_id} thumbnails={produced_total}",
        Category::Run
    );
}

async fn run_single_task(
    context: &TaskRunContext,
    task_id: &str,
    regenerate: bool,
) -> Result<usize, String> {
    let task = crate::services::get_by_id(context.tasks.as_ref(), task_id)
        .await
        .map_err(|err| err.to_string())?
        .ok_or_else(|| "task not found".to_string())?;

    let options = context
        .options
        .get_by_ids(&task.thumbnail_option_ids)
        .await
        .map_err(|err| err.to_string())?;
    if options.len() != task.thumbnail_option_ids.len() {
        warn!(
            "{} task_id={task_id} references {} missing options",
            Category::Run,
            task.thumbnail_option_ids.len() - options.len()
        );
    }

    let produced = context.runner.run(&task, &options, regenerate).await?;

    // Stamp only the record that is stored now; a delete during the run wins.
    let finished_at = now_unix_ms();
    let stamped = context
        .tasks
        .update_existing(
            task_id,
            Box::new(move |task: &mut ThumbnailTask| task.last_run_unix_ms = Some(finished_at)),
        )
        .await
        .map_err(|err| err.to_string())?;
    if stamped.is_none() {
        warn!("{} task_id={task_id} removed during run", Category::Run);
    }
    Ok(produced)
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
