#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use abi::{
    NOTIFY_TYPE_THUMBNAIL_PROCESS, SearchCriteria, SearchResult, TaskRunRequest,
    ThumbnailNotification, ThumbnailOption, ThumbnailTask,
};
use admin::{
    ApiError, BladeHost, CloseDecision, EditorPhase, NotificationBus, TaskApi, TaskEditor,
};
use async_trait::async_trait;

/// Ordered record of api and host calls shared by the fakes.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal_entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

pub struct FakeTaskApi {
    journal: Journal,
    pub tasks: Mutex<HashMap<String, ThumbnailTask>>,
    pub options: Mutex<Vec<ThumbnailOption>>,
    pub next_ids: Mutex<VecDeque<String>>,
    pub notification_ids: Mutex<VecDeque<String>>,
    pub run_requests: Mutex<Vec<TaskRunRequest>>,
    pub option_searches: Mutex<Vec<SearchCriteria>>,
    /// Returned by the next mutating call instead of performing it.
    pub fail_next: Mutex<Option<ApiError>>,
    /// Returned by every notification poll; `None` answers 404.
    pub notification_error: Mutex<Option<ApiError>>,
    pub notification_polls: AtomicUsize,
}

impl FakeTaskApi {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            tasks: Mutex::new(HashMap::new()),
            options: Mutex::new(Vec::new()),
            next_ids: Mutex::new(VecDeque::new()),
            notification_ids: Mutex::new(VecDeque::new()),
            run_requests: Mutex::new(Vec::new()),
            option_searches: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            notification_error: Mutex::new(None),
            notification_polls: AtomicUsize::new(0),
        }
    }

    pub fn with_next_id(self, id: &str) -> Self {
        self.next_ids.lock().unwrap().push_back(id.to_string());
        self
    }

    pub fn with_notification_id(self, id: &str) -> Self {
        self.notification_ids.lock().unwrap().push_back(id.to_string());
        self
    }

    pub fn with_task(self, task: ThumbnailTask) -> Self {
        let id = task.id.clone().expect("seeded task needs an id");
        self.tasks.lock().unwrap().insert(id, task);
        self
    }

    pub fn with_option(self, option: ThumbnailOption) -> Self {
        self.options.lock().unwrap().push(option);
        self
    }

    pub fn fail_next_with(&self, err: ApiError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    pub fn fail_notifications_with(&self, err: ApiError) {
        *self.notification_error.lock().unwrap() = Some(err);
    }

    pub fn notification_polls(&self) -> usize {
        self.notification_polls.load(Ordering::SeqCst)
    }

    pub fn stored(&self, id: &str) -> Option<ThumbnailTask> {
        self.tasks.lock().unwrap().get(id).cloned()
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    fn take_failure(&self) -> Result<(), ApiError> {
        match self.fail_next.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TaskApi for FakeTaskApi {
    async fn get_task(&self, id: &str) -> Result<Option<ThumbnailTask>, ApiError> {
        self.record(format!("api.get:{id}"));
        Ok(self.stored(id))
    }

    async fn create_task(&self, task: &ThumbnailTask) -> Result<ThumbnailTask, ApiError> {
        self.record("api.create".to_string());
        self.take_failure()?;
        let mut stored = task.clone();
        let id = self
            .next_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("task-{}", self.tasks.lock().unwrap().len() + 1));
        stored.id = Some(id.clone());
        self.tasks.lock().unwrap().insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_task(&self, task: &ThumbnailTask) -> Result<(), ApiError> {
        let id = task.id.clone().unwrap_or_default();
        self.record(format!("api.update:{id}"));
        self.take_failure()?;
        self.tasks.lock().unwrap().insert(id, task.clone());
        Ok(())
    }

    async fn delete_tasks(&self, ids: &[String]) -> Result<(), ApiError> {
        self.record(format!("api.delete:{}", ids.join(",")));
        self.take_failure()?;
        let mut tasks = self.tasks.lock().unwrap();
        for id in ids {
            tasks.remove(id);
        }
        Ok(())
    }

    async fn search_tasks(
        &self,
        _criteria: &SearchCriteria,
    ) -> Result<SearchResult<ThumbnailTask>, ApiError> {
        let result = self.tasks.lock().unwrap().values().cloned().collect::<Vec<_>>();
        Ok(SearchResult {
            total_count: result.len(),
            result,
        })
    }

    async fn run_tasks(&self, request: &TaskRunRequest) -> Result<ThumbnailNotification, ApiError> {
        self.record(format!("api.run:{}", request.task_ids.join(",")));
        self.take_failure()?;
        self.run_requests.lock().unwrap().push(request.clone());
        let id = self
            .notification_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "notification".to_string());
        Ok(ThumbnailNotification {
            id,
            notify_type: NOTIFY_TYPE_THUMBNAIL_PROCESS.to_string(),
            total_count: request.task_ids.len(),
            ..ThumbnailNotification::default()
        })
    }

    async fn get_notification(&self, id: &str) -> Result<ThumbnailNotification, ApiError> {
        self.notification_polls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.notification_error.lock().unwrap().clone() {
            return Err(err);
        }
        Err(ApiError::Status {
            status: 404,
            message: format!("notification {id} not found"),
        })
    }

    async fn search_options(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<SearchResult<ThumbnailOption>, ApiError> {
        self.option_searches.lock().unwrap().push(criteria.clone());
        let result = self.options.lock().unwrap().clone();
        Ok(SearchResult {
            total_count: result.len(),
            result,
        })
    }
}

pub struct FakeHost {
    journal: Journal,
    pub update_permission: AtomicBool,
    pub close_decision: Mutex<CloseDecision>,
    pub delete_answer: AtomicBool,
    pub run_answer: Mutex<Option<bool>>,
    pub close_prompts: Mutex<Vec<bool>>,
    pub errors: Mutex<Vec<Option<String>>>,
    pub progress: Mutex<Vec<String>>,
    /// Kept apart from the journal so call-order assertions stay unchanged.
    pub phases: Mutex<Vec<EditorPhase>>,
}

impl FakeHost {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            update_permission: AtomicBool::new(true),
            close_decision: Mutex::new(CloseDecision::Cancel),
            delete_answer: AtomicBool::new(true),
            run_answer: Mutex::new(Some(false)),
            close_prompts: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            progress: Mutex::new(Vec::new()),
            phases: Mutex::new(Vec::new()),
        }
    }

    pub fn set_update_permission(&self, granted: bool) {
        self.update_permission.store(granted, Ordering::SeqCst);
    }

    pub fn answer_close_with(&self, decision: CloseDecision) {
        *self.close_decision.lock().unwrap() = decision;
    }

    pub fn answer_delete_with(&self, confirmed: bool) {
        self.delete_answer.store(confirmed, Ordering::SeqCst);
    }

    pub fn answer_run_with(&self, answer: Option<bool>) {
        *self.run_answer.lock().unwrap() = answer;
    }

    /// Latest banner text, `None` when it was cleared or never set.
    pub fn last_error(&self) -> Option<String> {
        self.errors.lock().unwrap().last().cloned().flatten()
    }

    pub fn progress_ids(&self) -> Vec<String> {
        self.progress.lock().unwrap().clone()
    }

    pub fn phases(&self) -> Vec<EditorPhase> {
        self.phases.lock().unwrap().clone()
    }

    pub fn clear_phases(&self) {
        self.phases.lock().unwrap().clear();
    }

    pub fn close_prompts(&self) -> Vec<bool> {
        self.close_prompts.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl BladeHost for FakeHost {
    fn has_update_permission(&self) -> bool {
        self.update_permission.load(Ordering::SeqCst)
    }

    async fn confirm_save_before_close(&self, can_save: bool) -> CloseDecision {
        self.close_prompts.lock().unwrap().push(can_save);
        *self.close_decision.lock().unwrap()
    }

    async fn confirm_delete(&self, _task: &ThumbnailTask) -> bool {
        self.delete_answer.load(Ordering::SeqCst)
    }

    async fn confirm_task_run(&self, _task: &ThumbnailTask) -> Option<bool> {
        *self.run_answer.lock().unwrap()
    }

    fn set_error(&self, message: Option<String>) {
        self.errors.lock().unwrap().push(message);
    }

    fn show_progress(&self, notification: &ThumbnailNotification) {
        self.progress.lock().unwrap().push(notification.id.clone());
    }

    async fn refresh_parent(&self) {
        self.record("host.refresh_parent".to_string());
    }

    fn close(&self) {
        self.record("host.close".to_string());
    }

    fn open_option_list(&self, task: &ThumbnailTask) {
        self.record(format!("host.open_option_list:{}", task.name));
    }

    fn phase_changed(&self, phase: EditorPhase) {
        self.phases.lock().unwrap().push(phase);
    }
}

pub struct Harness {
    pub journal: Journal,
    pub api: Arc<FakeTaskApi>,
    pub host: Arc<FakeHost>,
    pub bus: NotificationBus,
}

impl Harness {
    pub fn new(configure: impl FnOnce(FakeTaskApi) -> FakeTaskApi) -> Self {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        Self {
            api: Arc::new(configure(FakeTaskApi::new(journal.clone()))),
            host: Arc::new(FakeHost::new(journal.clone())),
            bus: NotificationBus::new(),
            journal,
        }
    }

    pub async fn open_new(&self) -> TaskEditor {
        TaskEditor::open_new(self.api.clone(), self.host.clone(), self.bus.clone())
            .await
            .expect("new editor should open")
    }

    pub async fn open_existing(&self, id: &str) -> TaskEditor {
        TaskEditor::open_existing(self.api.clone(), self.host.clone(), self.bus.clone(), id)
            .await
            .expect("existing editor should open")
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }

    pub fn journal(&self) -> Vec<String> {
        journal_entries(&self.journal)
    }
}

pub fn saved_task(id: &str) -> ThumbnailTask {
    ThumbnailTask {
        id: Some(id.to_string()),
        name: "Catalog".to_string(),
        work_path: "catalog/img".to_string(),
        thumbnail_option_ids: vec!["small".to_string()],
        last_run_unix_ms: None,
    }
}
