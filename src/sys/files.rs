// src/sys/files.rs

use std::fs;
use std::io::Write;
use std::path::Path;

use regex::{Captures, Regex};
use tempfile::NamedTempFile;
use tokio::fs as tokio_fs;
use tracing::warn;

/// Replaces `path` with `contents` via a sibling temp file and a rename, so a
/// crash mid-write never leaves a half-written config behind. The original
/// file's permissions are carried over.
pub fn write_atomically(path: &Path, contents: &str) -> Result<(), String> {
    let dir = path
        .parent()
        .ok_or_else(|| format!("'{}' has no parent directory", path.display()))?;

    let perms = fs::metadata(path)
        .map_err(|e| format!("Failed to read metadata of '{}': {}", path.display(), e))?
        .permissions();

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| format!("Failed to create temp file in '{}': {}", dir.display(), e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| format!("Failed to write temp file: {}", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| format!("Failed to sync temp file: {}", e))?;
    fs::set_permissions(tmp.path(), perms)
        .map_err(|e| format!("Failed to set permissions: {}", e))?;

    tmp.persist(path)
        .map_err(|e| format!("Failed to perform atomic rename onto '{}': {}", path.display(), e.error))?;
    Ok(())
}

/// Substitutes literal `{TOKEN}` placeholders in a template file in place.
///
/// A missing template is a warning, not an error. Returns whether the file
/// was rewritten.
pub async fn render_tokens(path: &Path, tokens: &[(&str, String)]) -> Result<bool, String> {
    let original = match tokio_fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("**** Configuration file '{}' does not exist", path.display());
            return Ok(false);
        }
        Err(e) => return Err(format!("Failed to read '{}': {}", path.display(), e)),
    };

    // One pass over the template: substituted values are never rescanned.
    let placeholder = Regex::new(r"\{([A-Z0-9_]+)\}").map_err(|e| e.to_string())?;
    let rendered = placeholder.replace_all(&original, |caps: &Captures<'_>| {
        tokens
            .iter()
            .find(|(token, _)| *token == &caps[1])
            .map_or_else(|| caps[0].to_string(), |(_, value)| value.clone())
    });

    if rendered == original {
        return Ok(false);
    }
    write_atomically(path, &rendered)?;
    Ok(true)
}
