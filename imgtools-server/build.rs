use std::{env, process::Command};

/// Build stamps read back by `--version`; an exported variable of the same
/// name wins over the git lookup.
const STAMPS: [(&str, fn() -> String); 3] = [
    ("IMGTOOLS_BUILD_GIT_TAG", git_tag),
    ("IMGTOOLS_BUILD_GIT_COMMIT", git_commit),
    ("IMGTOOLS_BUILD_GIT_DIRTY", git_dirty),
];

fn main() {
    for (key, fallback) in STAMPS {
        emit(key, fallback);
    }
    if let Some(head) = git(&["rev-parse", "--git-path", "HEAD"]) {
        println!("cargo:rerun-if-changed={head}");
    }
}

fn emit(key: &str, fallback: impl FnOnce() -> String) {
    println!("cargo:rerun-if-env-changed={key}");
    let value = env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(fallback);
    println!("cargo:rustc-env={key}={value}");
}

fn git_tag() -> String {
    git(&["describe", "--tags", "--exact-match"]).unwrap_or_else(|| "untagged".to_string())
}

fn git_commit() -> String {
    git(&["rev-parse", "--short=12", "HEAD"]).unwrap_or_else(|| "unknown".to_string())
}

fn git_dirty() -> String {
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
        .is_some_and(|changes| !changes.is_empty());
    dirty.to_string()
}

/// Trimmed stdout of a successful git call.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string())
}
