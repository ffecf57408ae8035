// src/sys/directive.rs
//
// Idempotent `key=value` patching for the monitoring daemons' config dialect:
// active directives are `Key=value`, documented defaults are placeholders
// commented out as `# Key=` or `; Key=`. No structural parsing happens here;
// every decision is a line-anchored match.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::sys::escape::escape;
use crate::sys::files::write_atomically;

/// Result of a single directive mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    SkippedMissingFile,
    Removed,
    Blanked,
    Updated,
    InsertedAtFirstPlaceholder,
    AppendedAfterPlaceholder,
    /// Multi-value item already present as an identical active line.
    AlreadyPresent,
    /// Neither an active line nor a placeholder exists; the file is untouched.
    NoAnchor,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::SkippedMissingFile => "skipped (missing file)",
            Outcome::Removed => "removed",
            Outcome::Blanked => "undefined",
            Outcome::Updated => "updated",
            Outcome::InsertedAtFirstPlaceholder => "added first occurrence",
            Outcome::AppendedAfterPlaceholder => "added",
            Outcome::AlreadyPresent => "already present",
            Outcome::NoAnchor => "no placeholder",
            Outcome::Failed => "failed",
        }
    }
}

/// A line-level edit chosen by the mutation policy. Values are raw; each
/// editor backend encodes them for its own mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Remove,
    Blank,
    Replace(String),
    InsertBeforeFirstPlaceholder(String),
    AppendAfterPlaceholder(String),
}

/// Line anchors for one key. The key is matched literally.
pub struct DirectiveMatcher {
    key: String,
    active: Regex,
    placeholder: Regex,
}

impl DirectiveMatcher {
    pub fn new(key: &str) -> Result<Self, String> {
        let literal = regex::escape(key);
        let active = Regex::new(&format!("^{literal}=")).map_err(|e| e.to_string())?;
        let placeholder = Regex::new(&format!("^[#;] {literal}=")).map_err(|e| e.to_string())?;
        Ok(Self {
            key: key.to_string(),
            active,
            placeholder,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self, line: &str) -> bool {
        self.active.is_match(line)
    }

    pub fn is_placeholder(&self, line: &str) -> bool {
        self.placeholder.is_match(line)
    }

    fn has_active_line(&self, contents: &str, value: Option<&str>) -> bool {
        contents.lines().any(|line| {
            self.is_active(line)
                && value.is_none_or(|v| line[self.key.len() + 1..] == *v)
        })
    }

    fn placeholder_count(&self, contents: &str) -> usize {
        contents.lines().filter(|line| self.is_placeholder(line)).count()
    }
}

/// Applies `edit` to `contents` line by line, preserving line endings.
pub fn apply_edit(contents: &str, matcher: &DirectiveMatcher, edit: &Edit) -> String {
    let key = matcher.key();
    let mut out = String::with_capacity(contents.len() + 64);
    let mut anchored = false;

    for raw in contents.split_inclusive('\n') {
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let eol = if raw.ends_with('\n') { "\n" } else { "" };

        match edit {
            Edit::Remove if matcher.is_active(line) => {}
            Edit::Blank if matcher.is_active(line) => {
                out.push_str(&format!("{key}={eol}"));
            }
            Edit::Replace(value) if matcher.is_active(line) => {
                out.push_str(&format!("{key}={value}{eol}"));
            }
            Edit::InsertBeforeFirstPlaceholder(value)
                if !anchored && matcher.is_placeholder(line) =>
            {
                anchored = true;
                out.push_str(&format!("{key}={value}\n"));
                out.push_str(raw);
            }
            Edit::AppendAfterPlaceholder(value) if !anchored && matcher.is_placeholder(line) => {
                anchored = true;
                out.push_str(&format!("{line}\n{key}={value}{eol}"));
            }
            _ => out.push_str(raw),
        }
    }
    out
}

// ==============================================================================
// 1. Editor Backends (swappable matching/rewriting strategy)
// ==============================================================================

#[async_trait]
pub trait LineEditor: Send + Sync {
    /// Writes `edit` into `path`. `contents` is the file as the policy saw it.
    async fn apply(
        &self,
        path: &Path,
        contents: &str,
        matcher: &DirectiveMatcher,
        edit: &Edit,
    ) -> Result<(), String>;
}

/// In-process line scanner. Values are written literally, so no escaping is
/// involved.
pub struct NativeEditor;

#[async_trait]
impl LineEditor for NativeEditor {
    async fn apply(
        &self,
        path: &Path,
        contents: &str,
        matcher: &DirectiveMatcher,
        edit: &Edit,
    ) -> Result<(), String> {
        let updated = apply_edit(contents, matcher, edit);
        if updated == contents {
            return Ok(());
        }
        write_atomically(path, &updated)
    }
}

/// GNU `sed -i` backend. Keys and values go through [`escape`] before they are
/// spliced into the expression.
pub struct SedEditor;

impl SedEditor {
    pub fn script(key: &str, edit: &Edit) -> Vec<String> {
        let k = escape(key);
        match edit {
            Edit::Remove => vec![format!("/^{k}=/d")],
            Edit::Blank => vec![format!("/^{k}=/s/=.*/=/")],
            Edit::Replace(value) => vec![format!("/^{k}=/s/=.*/={}/", escape(value))],
            // `0,/re/` limits the command to the first placeholder.
            Edit::InsertBeforeFirstPlaceholder(value) => vec![
                format!("0,/^[#;] {k}=/{{/^[#;] {k}=/i {k}={}", escape(value)),
                "}".to_string(),
            ],
            Edit::AppendAfterPlaceholder(value) => vec![
                format!("0,/^[#;] {k}=/{{/^[#;] {k}=/a {k}={}", escape(value)),
                "}".to_string(),
            ],
        }
    }
}

#[async_trait]
impl LineEditor for SedEditor {
    async fn apply(
        &self,
        path: &Path,
        _contents: &str,
        matcher: &DirectiveMatcher,
        edit: &Edit,
    ) -> Result<(), String> {
        let mut cmd = Command::new("sed");
        cmd.arg("-i");
        for expr in Self::script(matcher.key(), edit) {
            cmd.arg("-e").arg(expr);
        }
        let output = cmd
            .arg(path)
            .output()
            .await
            .map_err(|e| format!("sed spawn failed: {}", e))?;

        if !output.status.success() {
            return Err(format!(
                "sed failed on '{}': {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Ok(())
    }
}

// ==============================================================================
// 2. Mutation Policy
// ==============================================================================

/// TLS material directives (`TLSCAFile`, `TLSCertFile`, ...) take bare file
/// names that live in the secrets directory.
fn is_tls_file_key(key: &str) -> bool {
    key.starts_with("TLS") && key.ends_with("File")
}

pub struct ConfigMutator {
    editor: Box<dyn LineEditor>,
    secrets_dir: PathBuf,
}

impl ConfigMutator {
    pub fn new(editor: Box<dyn LineEditor>, secrets_dir: impl Into<PathBuf>) -> Self {
        Self {
            editor,
            secrets_dir: secrets_dir.into(),
        }
    }

    /// Single-value directive: updates an existing active line in place.
    pub async fn set(&self, path: &Path, key: &str, value: &str) -> Outcome {
        self.set_directive(path, key, value, false).await
    }

    /// Comma-separated directive (`"a.so,b.so"`): one active line per item.
    pub async fn set_multiple(&self, path: &Path, key: &str, csv: &str) -> Vec<Outcome> {
        let csv = csv.strip_suffix('"').unwrap_or(csv);
        let csv = csv.strip_prefix('"').unwrap_or(csv);

        let mut outcomes = Vec::new();
        for item in csv.split(',').filter(|item| !item.is_empty()) {
            outcomes.push(self.set_directive(path, key, item, true).await);
        }
        outcomes
    }

    pub async fn set_directive(&self, path: &Path, key: &str, value: &str, multiple: bool) -> Outcome {
        match self.try_set(path, key, value, multiple).await {
            Ok(outcome) => {
                debug!(
                    "** Updating '{}' parameter \"{}\"... {}",
                    path.display(),
                    key,
                    outcome.as_str()
                );
                outcome
            }
            Err(e) => {
                warn!(
                    "**** Failed to update '{}' parameter \"{}\": {}",
                    path.display(),
                    key,
                    e
                );
                Outcome::Failed
            }
        }
    }

    async fn try_set(&self, path: &Path, key: &str, value: &str, multiple: bool) -> Result<Outcome, String> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("**** Configuration file '{}' does not exist", path.display());
                return Ok(Outcome::SkippedMissingFile);
            }
            Err(e) => return Err(format!("Failed to read: {}", e)),
        };

        let matcher = DirectiveMatcher::new(key)?;
        let (edit, outcome) = self.plan(&contents, &matcher, value, multiple);
        if let Some(edit) = edit {
            self.editor.apply(path, &contents, &matcher, &edit).await?;
        }
        Ok(outcome)
    }

    /// Chooses the edit for `value`, in precedence order: remove, blank,
    /// update, insert before the first of several placeholders, append after
    /// the only placeholder. Keys with no anchor at all are left alone.
    pub fn plan(
        &self,
        contents: &str,
        matcher: &DirectiveMatcher,
        value: &str,
        multiple: bool,
    ) -> (Option<Edit>, Outcome) {
        // A line break inside a value would start a directive of its own.
        let value: String = value.chars().filter(|c| !matches!(c, '\n' | '\r')).collect();
        let value = value.as_str();

        if value.is_empty() {
            return (Some(Edit::Remove), Outcome::Removed);
        }
        if value == "\"\"" {
            return (Some(Edit::Blank), Outcome::Blanked);
        }

        let value = if is_tls_file_key(matcher.key()) {
            format!("{}/{}", self.secrets_dir.display(), value)
        } else {
            value.to_string()
        };

        if multiple && matcher.has_active_line(contents, Some(&value)) {
            return (None, Outcome::AlreadyPresent);
        }
        if !multiple && matcher.has_active_line(contents, None) {
            return (Some(Edit::Replace(value)), Outcome::Updated);
        }

        match matcher.placeholder_count(contents) {
            0 => (None, Outcome::NoAnchor),
            1 => (
                Some(Edit::AppendAfterPlaceholder(value)),
                Outcome::AppendedAfterPlaceholder,
            ),
            _ => (
                Some(Edit::InsertBeforeFirstPlaceholder(value)),
                Outcome::InsertedAtFirstPlaceholder,
            ),
        }
    }
}
