mod api_client;
mod editor;
mod notifications;
mod shell;

pub use api_client::{ApiError, HttpTaskApi, TaskApi};
pub use editor::{EditorError, EditorPhase, TaskEditor};
pub use notifications::{
    NotificationBus, NotificationWatchConfig, Subscription, WatchOutcome, run_notification_watch,
    spawn_notification_watch,
};
pub use shell::{AssetEntry, AssetEntryType, BladeHost, CloseDecision};
