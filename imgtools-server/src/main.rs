use std::{env, net::SocketAddr, path::PathBuf};

use imgtools_server::{ApiKeyRegistry, ServerConfig, ServerState, build_server_app, init_logging};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if wants_version_flag() {
        println!("{}", binary_version_text());
        return Ok(());
    }

    init_logging()?;
    info!("{}", binary_version_text());

    let addr = parse_addr("IMGTOOLS_ADDR", "0.0.0.0:9200")?;
    let api_keys = match env::var("IMGTOOLS_API_KEYS") {
        Ok(value) => ApiKeyRegistry::parse(&value)?,
        Err(_) => ApiKeyRegistry::default(),
    };
    if api_keys.is_empty() {
        warn!("IMGTOOLS_API_KEYS is empty; every option and task request will be rejected");
    }
    let config = ServerConfig {
        state_path: parse_state_path("IMGTOOLS_STATE_PATH", ".imgtools/state.json"),
        api_keys,
        max_notifications: parse_usize("IMGTOOLS_MAX_NOTIFICATIONS", 200)?,
    };

    let state = ServerState::new(config);
    let app = build_server_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("image tools server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn parse_addr(key: &str, default: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    Ok(value.parse()?)
}

fn parse_usize(key: &str, default: usize) -> Result<usize, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

fn parse_state_path(key: &str, default: &str) -> Option<PathBuf> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

fn wants_version_flag() -> bool {
    env::args()
        .skip(1)
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
}

fn binary_version_text() -> String {
    version_text(
        env!("CARGO_PKG_NAME"),
        option_env!("IMGTOOLS_BUILD_GIT_TAG").unwrap_or("untagged"),
        option_env!("IMGTOOLS_BUILD_GIT_COMMIT").unwrap_or("unknown"),
        option_env!("IMGTOOLS_BUILD_GIT_DIRTY").unwrap_or("false"),
    )
}

fn version_text(binary: &str, git_tag: &str, git_commit: &str, git_dirty: &str) -> String {
    if matches!(git_dirty, "true" | "1" | "yes" | "dirty") {
        format!("{binary} {git_tag} (dirty commit: {git_commit})")
    } else {
        format!("{binary} {git_tag}")
    }
}
