use abi::{ThumbnailNotification, ThumbnailTask};
use async_trait::async_trait;

use crate::editor::EditorPhase;

/// Answer to the "save before closing?" prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseDecision {
    Save,
    Discard,
    Cancel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetEntryType {
    Folder,
    Blob,
}

/// One item returned by the host's asset picker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetEntry {
    pub name: String,
    pub entry_type: AssetEntryType,
    pub relative_url: String,
}

impl AssetEntry {
    pub fn folder(name: &str, relative_url: &str) -> Self {
        Self {
            name: name.to_string(),
            entry_type: AssetEntryType::Folder,
            relative_url: relative_url.to_string(),
        }
    }

    pub fn blob(name: &str, relative_url: &str) -> Self {
        Self {
            name: name.to_string(),
            entry_type: AssetEntryType::Blob,
            relative_url: relative_url.to_string(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.entry_type == AssetEntryType::Folder
    }
}

/// The admin shell hosting an editor blade: prompts, error banner, progress
/// view and navigation.
#[async_trait]
pub trait BladeHost: Send + Sync {
    fn has_update_permission(&self) -> bool;

    /// Form validity gate. Save stays unreachable while this is false.
    fn validate(&self, task: &ThumbnailTask) -> bool {
        !task.name.trim().is_empty() && !task.work_path.trim().is_empty()
    }

    /// `can_save` is false when the Save choice must be offered disabled.
    async fn confirm_save_before_close(&self, can_save: bool) -> CloseDecision;

    async fn confirm_delete(&self, task: &ThumbnailTask) -> bool;

    /// `Some(regenerate)` to run, `None` when the prompt is dismissed.
    async fn confirm_task_run(&self, task: &ThumbnailTask) -> Option<bool>;

    /// `None` clears the banner.
    fn set_error(&self, message: Option<String>);

    fn show_progress(&self, notification: &ThumbnailNotification);

    async fn refresh_parent(&self);

    fn close(&self);

    fn open_option_list(&self, task: &ThumbnailTask);

    /// Called on every load, save and close transition, e.g. to grey out the
    /// toolbar while a request is in flight.
    fn phase_changed(&self, _phase: EditorPhase) {}
}
