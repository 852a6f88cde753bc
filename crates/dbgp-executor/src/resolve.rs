//! Executable lookup.

use std::path::{Path, PathBuf};

/// Resolve an executable by name.
///
/// Paths containing a separator are taken as given when they point at a
/// file; bare names are looked up on `PATH`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    which_async(executable).await
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    let found = tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok);
    if let Some(path) = &found {
        tracing::debug!(path = %path.display(), "Resolved executable");
    }
    found
}
