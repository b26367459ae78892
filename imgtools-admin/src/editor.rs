use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use abi::{SearchCriteria, TaskRunRequest, ThumbnailNotification, ThumbnailOption, ThumbnailTask};
use tracing::{debug, info, warn};

use crate::{
    api_client::{ApiError, TaskApi},
    notifications::{NotificationBus, Subscription},
    shell::{AssetEntry, BladeHost, CloseDecision},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditorPhase {
    Loading,
    Clean,
    Dirty,
    Saving,
    Closed,
}

#[derive(Debug)]
pub enum EditorError {
    Api(ApiError),
    NotFound(String),
    NotSavable,
    /// The action needs a persisted task.
    Unsaved(&'static str),
    Closed,
}

impl std::fmt::Display for EditorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditorError::Api(err) => write!(f, "{err}"),
            EditorError::NotFound(id) => write!(f, "task {id} not found"),
            EditorError::NotSavable => write!(f, "nothing to save or the form is invalid"),
            EditorError::Unsaved(action) => write!(f, "{action} requires a saved task"),
            EditorError::Closed => write!(f, "editor session is closed"),
        }
    }
}

impl std::error::Error for EditorError {}

impl From<ApiError> for EditorError {
    fn from(err: ApiError) -> Self {
        EditorError::Api(err)
    }
}

/// Edit session for one thumbnail task.
///
/// `current` is the working copy the form binds to and `original` is the last
/// persisted snapshot; the session is dirty when they differ and the host
/// grants update permission.
pub struct TaskEditor {
    api: Arc<dyn TaskApi>,
    host: Arc<dyn BladeHost>,
    bus: NotificationBus,
    current_entity_id: Option<String>,
    is_new: bool,
    original: ThumbnailTask,
    current: ThumbnailTask,
    option_list: Vec<ThumbnailOption>,
    loading: bool,
    saving: bool,
    closed: bool,
    can_import: Arc<AtomicBool>,
    run_subscription: Option<Subscription>,
    progress_notification_id: Option<String>,
}

impl TaskEditor {
    fn session(
        api: Arc<dyn TaskApi>,
        host: Arc<dyn BladeHost>,
        bus: NotificationBus,
        current_entity_id: Option<String>,
    ) -> Self {
        Self {
            api,
            host,
            bus,
            is_new: current_entity_id.is_none(),
            current_entity_id,
            original: ThumbnailTask::default(),
            current: ThumbnailTask::default(),
            option_list: Vec::new(),
            loading: true,
            saving: false,
            closed: false,
            can_import: Arc::new(AtomicBool::new(false)),
            run_subscription: None,
            progress_notification_id: None,
        }
    }

    /// Starts a session on an empty, unsaved task.
    pub async fn open_new(
        api: Arc<dyn TaskApi>,
        host: Arc<dyn BladeHost>,
        bus: NotificationBus,
    ) -> Result<Self, EditorError> {
        let mut editor = Self::session(api, host, bus, None);
        editor.refresh(false).await?;
        Ok(editor)
    }

    pub async fn open_existing(
        api: Arc<dyn TaskApi>,
        host: Arc<dyn BladeHost>,
        bus: NotificationBus,
        id: &str,
    ) -> Result<Self, EditorError> {
        let mut editor = Self::session(api, host, bus, Some(id.to_string()));
        editor.refresh(false).await?;
        Ok(editor)
    }

    /// Reloads the task (unless it is new) and the option list. The working
    /// copy is replaced, so unsaved edits are lost.
    pub async fn refresh(&mut self, parent_refresh: bool) -> Result<(), EditorError> {
        if self.closed {
            return Err(EditorError::Closed);
        }
        self.loading = true;
        self.report_phase();
        let result = self.load().await;
        self.loading = false;
        self.report_phase();
        if let Err(err) = result {
            if let EditorError::Api(api_err) = &err {
                self.host.set_error(Some(api_err.user_message()));
            }
            return Err(err);
        }
        if parent_refresh {
            self.host.refresh_parent().await;
        }
        Ok(())
    }

    async fn load(&mut self) -> Result<(), EditorError> {
        if let Some(id) = self.current_entity_id.clone().filter(|_| !self.is_new) {
            let task = self
                .api
                .get_task(&id)
                .await?
                .ok_or_else(|| EditorError::NotFound(id.clone()))?;
            self.original = task.clone();
            self.current = task;
        }
        let options = self
            .api
            .search_options(&SearchCriteria {
                skip: 0,
                ..SearchCriteria::default()
            })
            .await?;
        self.option_list = options.result;
        Ok(())
    }

    pub fn phase(&self) -> EditorPhase {
        if self.closed {
            EditorPhase::Closed
        } else if self.saving {
            EditorPhase::Saving
        } else if self.loading {
            EditorPhase::Loading
        } else if self.is_dirty() {
            EditorPhase::Dirty
        } else {
            EditorPhase::Clean
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.host.has_update_permission() && self.current != self.original
    }

    pub fn can_save(&self) -> bool {
        !self.closed && !self.saving && self.is_dirty() && self.host.validate(&self.current)
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn current_entity_id(&self) -> Option<&str> {
        self.current_entity_id.as_deref()
    }

    pub fn current(&self) -> &ThumbnailTask {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut ThumbnailTask {
        &mut self.current
    }

    pub fn original(&self) -> &ThumbnailTask {
        &self.original
    }

    pub fn option_list(&self) -> &[ThumbnailOption] {
        &self.option_list
    }

    pub fn can_import(&self) -> bool {
        self.can_import.load(Ordering::SeqCst)
    }

    pub fn progress_notification_id(&self) -> Option<&str> {
        self.progress_notification_id.as_deref()
    }

    /// Persists the working copy, then reloads it and refreshes the parent
    /// blade. On failure the edits stay in place.
    pub async fn save(&mut self) -> Result<(), EditorError> {
        if self.closed {
            return Err(EditorError::Closed);
        }
        if !self.can_save() {
            return Err(EditorError::NotSavable);
        }

        self.saving = true;
        self.report_phase();
        self.host.set_error(None);
        let outcome = if self.is_new {
            self.api
                .create_task(&self.current)
                .await
                .map(|stored| stored.id)
        } else {
            self.api
                .update_task(&self.current)
                .await
                .map(|()| self.current_entity_id.clone())
        };
        self.saving = false;

        let id = match outcome {
            Ok(Some(id)) => id,
            Ok(None) => {
                self.report_phase();
                warn!("task save returned no id");
                return Err(EditorError::Api(ApiError::Decode(
                    "saved task has no id".to_string(),
                )));
            }
            Err(err) => {
                self.report_phase();
                warn!("task save failed: {err}");
                self.host.set_error(Some(err.user_message()));
                return Err(err.into());
            }
        };

        info!("task saved id={id} created={}", self.is_new);
        self.is_new = false;
        self.current.id = Some(id.clone());
        self.current_entity_id = Some(id);
        self.refresh(true).await
    }

    /// Discards edits by copying the snapshot back over the working copy.
    pub fn reset(&mut self) {
        self.current = self.original.clone();
    }

    /// Returns `Ok(false)` when the operator declines.
    pub async fn delete(&mut self) -> Result<bool, EditorError> {
        if self.closed {
            return Err(EditorError::Closed);
        }
        let Some(id) = self.persisted_id() else {
            return Err(EditorError::Unsaved("delete"));
        };
        if !self.host.confirm_delete(&self.current).await {
            return Ok(false);
        }

        self.host.set_error(None);
        if let Err(err) = self.api.delete_tasks(std::slice::from_ref(&id)).await {
            warn!("task delete failed id={id}: {err}");
            self.host.set_error(Some(err.user_message()));
            return Err(err.into());
        }
        info!("task deleted id={id}");
        self.close_session();
        self.host.refresh_parent().await;
        Ok(true)
    }

    /// Launches a run for this task and tracks its notification on the bus.
    /// Returns `Ok(None)` when the regenerate prompt is dismissed.
    pub async fn run_task(&mut self) -> Result<Option<ThumbnailNotification>, EditorError> {
        if self.closed {
            return Err(EditorError::Closed);
        }
        let Some(id) = self.persisted_id() else {
            return Err(EditorError::Unsaved("run"));
        };
        let Some(regenerate) = self.host.confirm_task_run(&self.current).await else {
            return Ok(None);
        };

        self.host.set_error(None);
        let request = TaskRunRequest {
            task_ids: vec![id.clone()],
            regenerate,
        };
        let notification = match self.api.run_tasks(&request).await {
            Ok(notification) => notification,
            Err(err) => {
                warn!("task run failed id={id}: {err}");
                self.host.set_error(Some(err.user_message()));
                return Err(err.into());
            }
        };

        info!(
            "task run started id={id} notification_id={} regenerate={regenerate}",
            notification.id
        );
        self.host.show_progress(&notification);
        self.track_notification(&notification.id);
        Ok(Some(notification))
    }

    fn track_notification(&mut self, notification_id: &str) {
        self.can_import.store(false, Ordering::SeqCst);
        let can_import = self.can_import.clone();
        let tracked = notification_id.to_string();
        // Replacing the handle drops the previous run's listener.
        self.run_subscription = Some(self.bus.subscribe(move |notification| {
            if notification.id == tracked {
                can_import.store(notification.is_finished(), Ordering::SeqCst);
            }
        }));
        self.progress_notification_id = Some(notification_id.to_string());
    }

    /// Applies a picker selection. Only a single folder changes the work path.
    pub fn select_work_folder(&mut self, selection: &[AssetEntry]) -> bool {
        match selection {
            [entry] if entry.is_folder() => {
                self.current.work_path = entry.relative_url.clone();
                true
            }
            _ => {
                debug!("ignored folder selection of {} entries", selection.len());
                false
            }
        }
    }

    pub fn open_option_management(&self) {
        self.host.open_option_list(&self.current);
    }

    /// Returns `Ok(false)` when closing was cancelled or the save it asked for
    /// failed.
    pub async fn close(&mut self) -> Result<bool, EditorError> {
        if self.closed {
            return Ok(true);
        }
        if self.is_dirty() {
            let can_save = self.can_save();
            match self.host.confirm_save_before_close(can_save).await {
                CloseDecision::Save if can_save => {
                    if self.save().await.is_err() {
                        return Ok(false);
                    }
                }
                CloseDecision::Save | CloseDecision::Cancel => return Ok(false),
                CloseDecision::Discard => {}
            }
        }
        self.close_session();
        Ok(true)
    }

    fn close_session(&mut self) {
        self.closed = true;
        self.report_phase();
        self.run_subscription = None;
        self.host.close();
    }

    fn report_phase(&self) {
        self.host.phase_changed(self.phase());
    }

    fn persisted_id(&self) -> Option<String> {
        if self.is_new {
            return None;
        }
        self.current_entity_id.clone()
    }
}
