use std::{
    fs,
    path::{Path, PathBuf},
};

use abi::{ThumbnailOption, ThumbnailTask};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::logging::Category;

pub(crate) const PERSISTENCE_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreSnapshot {
    #[serde(default = "snapshot_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub options: Vec<ThumbnailOption>,
    #[serde(default)]
    pub tasks: Vec<ThumbnailTask>,
}

fn snapshot_schema_version() -> u32 {
    PERSISTENCE_SCHEMA_VERSION
}

/// Unreadable or foreign-schema snapshots yield an empty store; startup never
/// fails on a bad state file.
pub(crate) fn load_snapshot_from_disk(state_path: Option<&Path>) -> StoreSnapshot {
    let Some(path) = state_path else {
        return StoreSnapshot::default();
    };
    if !path.exists() {
        return StoreSnapshot::default();
    }

    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) => {
            warn!(
                "{} failed to read snapshot path={} err={err}",
                Category::Store,
                path.display()
            );
            return StoreSnapshot::default();
        }
    };
    let snapshot = match serde_json::from_slice::<StoreSnapshot>(&data) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(
                "{} failed to parse snapshot path={} err={err}",
                Category::Store,
                path.display()
            );
            return StoreSnapshot::default();
        }
    };
    if snapshot.schema_version != PERSISTENCE_SCHEMA_VERSION {
        warn!(
            "{} ignoring snapshot path={} unsupported schema_version={}",
            Category::Store,
            path.display(),
            snapshot.schema_version
        );
        return StoreSnapshot::default();
    }
    snapshot
}

pub(crate) fn write_snapshot_to_disk(path: &Path, snapshot: &StoreSnapshot) -> Result<(), String> {
    let bytes = serde_json::to_vec_pretty(snapshot)
        .map_err(|err| format!("failed to serialize store snapshot: {err}"))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "failed to create state directory {}: {err}",
                parent.display()
            )
        })?;
    }

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    fs::write(&temp_path, &bytes).map_err(|err| {
        format!(
            "failed to write temporary snapshot {}: {err}",
            temp_path.display()
        )
    })?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }
    fs::rename(&temp_path, path).map_err(|err| {
        format!(
            "failed to move snapshot {} => {}: {err}",
            temp_path.display(),
            path.display()
        )
    })
}
