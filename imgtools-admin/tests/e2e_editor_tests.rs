mod common;

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use abi::ThumbnailOption;
use admin::{
    EditorPhase, HttpTaskApi, NotificationBus, NotificationWatchConfig, TaskApi, TaskEditor,
    WatchOutcome, spawn_notification_watch,
};
use common::{FakeHost, Journal};
use imgtools_server::{ApiKeyRegistry, PermissionSet, ServerConfig, ServerState, build_server_app};
use tokio::task::JoinHandle;

const ADMIN_KEY: &str = "e2e-admin";

async fn spawn_server() -> (SocketAddr, JoinHandle<()>) {
    let config = ServerConfig {
        api_keys: ApiKeyRegistry::new().with_key(ADMIN_KEY, PermissionSet::all()),
        ..ServerConfig::default()
    };
    let app = build_server_app(ServerState::new(config));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server should run");
    });
    (addr, handle)
}

fn http_api(addr: SocketAddr) -> Arc<HttpTaskApi> {
    Arc::new(HttpTaskApi::new(&format!("http://{addr}")).with_api_key(ADMIN_KEY))
}

#[tokio::test]
async fn editor_round_trip_against_live_server() {
    let (addr, handle) = spawn_server().await;
    let api = http_api(addr);
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let host = Arc::new(FakeHost::new(journal));
    let bus = NotificationBus::new();

    let option = reqwest::Client::new()
        .post(format!("http://{addr}/api/image/thumbnails/options"))
        .header("api_key", ADMIN_KEY)
        .json(&ThumbnailOption {
            name: "small".to_string(),
            file_suffix: "_sm".to_string(),
            width: Some(120),
            ..ThumbnailOption::default()
        })
        .send()
        .await
        .expect("option create should complete")
        .json::<ThumbnailOption>()
        .await
        .expect("option should decode");
    let option_id = option.id.clone().expect("option id should be assigned");

    let mut editor = TaskEditor::open_new(api.clone(), host.clone(), bus.clone())
        .await
        .expect("editor should open");
    assert_eq!(editor.option_list(), [option]);

    editor.current_mut().name = "Catalog".to_string();
    editor.current_mut().work_path = "catalog/img".to_string();
    editor.current_mut().thumbnail_option_ids = vec![option_id];
    editor.save().await.expect("save should succeed");

    let task_id = editor
        .current_entity_id()
        .expect("server should assign an id")
        .to_string();
    assert!(!editor.is_new());
    assert_eq!(editor.phase(), EditorPhase::Clean);

    host.answer_run_with(Some(false));
    let notification = editor
        .run_task()
        .await
        .expect("run should start")
        .expect("prompt was confirmed");
    let watch = spawn_notification_watch(
        api.clone(),
        bus.clone(),
        notification.id.clone(),
        NotificationWatchConfig {
            poll_interval_ms: 50,
            ..NotificationWatchConfig::default()
        },
    );
    let outcome = tokio::time::timeout(Duration::from_secs(5), watch)
        .await
        .expect("watch should finish")
        .expect("watch task should not panic");
    assert_eq!(outcome, WatchOutcome::Finished);
    assert!(editor.can_import());

    let reloaded = api
        .get_task(&task_id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert!(reloaded.last_run_unix_ms.is_some());

    assert!(editor.delete().await.expect("delete should succeed"));
    assert_eq!(api.get_task(&task_id).await.expect("get should succeed"), None);
    assert_eq!(bus.listener_count(), 0);

    handle.abort();
}

#[tokio::test]
async fn missing_permission_surfaces_status_in_host() {
    let (addr, handle) = spawn_server().await;
    let api = Arc::new(HttpTaskApi::new(&format!("http://{addr}")).with_api_key("unknown"));
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let host = Arc::new(FakeHost::new(journal));

    let result = TaskEditor::open_new(api, host.clone(), NotificationBus::new()).await;

    assert!(result.is_err());
    assert_eq!(host.last_error().as_deref(), Some("Error 401"));

    handle.abort();
}
