use serde::{Deserialize, Serialize};

pub const API_KEY_HEADER: &str = "api_key";
pub const OPTIONS_ROUTE: &str = "/api/image/thumbnails/options";
pub const TASKS_ROUTE: &str = "/api/image/thumbnails/tasks";
pub const NOTIFICATIONS_ROUTE: &str = "/api/platform/pushnotifications";
pub const NOTIFY_TYPE_THUMBNAIL_PROCESS: &str = "ThumbnailProcess";
pub const DEFAULT_SEARCH_TAKE: usize = 20;

/// Named permissions checked by every option/task endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "thumbnail:read")]
    Read,
    #[serde(rename = "thumbnail:create")]
    Create,
    #[serde(rename = "thumbnail:update")]
    Update,
    #[serde(rename = "thumbnail:delete")]
    Delete,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::Read,
        Permission::Create,
        Permission::Update,
        Permission::Delete,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Permission::Read => "thumbnail:read",
            Permission::Create => "thumbnail:create",
            Permission::Update => "thumbnail:update",
            Permission::Delete => "thumbnail:delete",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|permission| permission.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeMethod {
    #[default]
    FixedSize,
    FixedWidth,
    FixedHeight,
    Crop,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorPosition {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    #[default]
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

/// One resized image variant. An absent or blank id marks an unsaved record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub file_suffix: String,
    #[serde(default)]
    pub resize_method: ResizeMethod,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub anchor_position: Option<AnchorPosition>,
    #[serde(default)]
    pub jpeg_quality: Option<u8>,
}

/// Applies a set of thumbnail options to every image under `work_path`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub work_path: String,
    #[serde(default)]
    pub thumbnail_option_ids: Vec<String>,
    #[serde(default)]
    pub last_run_unix_ms: Option<u64>,
}

/// Records addressed by an opaque string id.
pub trait Entity {
    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: String);

    fn is_new(&self) -> bool {
        self.id().map(str::trim).is_none_or(str::is_empty)
    }
}

impl Entity for ThumbnailOption {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

impl Entity for ThumbnailTask {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(default)]
    pub keyword: Option<String>,
    /// `field` or `field:desc`. Unknown fields fall back to name order.
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_take")]
    pub take: usize,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            keyword: None,
            sort: None,
            skip: 0,
            take: DEFAULT_SEARCH_TAKE,
        }
    }
}

pub type ThumbnailOptionSearchCriteria = SearchCriteria;
pub type ThumbnailTaskSearchCriteria = SearchCriteria;

/// One page of matches; `total_count` spans every page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult<T> {
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
    #[serde(default)]
    pub total_count: usize,
}

impl<T> Default for SearchResult<T> {
    fn default() -> Self {
        Self {
            result: Vec::new(),
            total_count: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunRequest {
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub regenerate: bool,
}

/// Progress record of one task run. `finished` stays `None` while work is pending.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailNotification {
    pub id: String,
    #[serde(default)]
    pub notify_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_unix_ms: u64,
    #[serde(default)]
    pub finished: Option<u64>,
    #[serde(default)]
    pub processed_count: usize,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ThumbnailNotification {
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

const fn default_take() -> usize {
    DEFAULT_SEARCH_TAKE
}
