//! Change staging for file-mutating tools.
//!
//! A mutation is first proposed as a [`PendingChange`] carrying the
//! full before/after contents and a unified diff. The caller decides
//! whether to apply it; nothing touches disk until then.

use anyhow::{Context, Result};
use similar::TextDiff;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A staged file change that has not been written to disk yet.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub path: PathBuf,
    /// Contents before the change. `None` for a new file.
    pub old_content: Option<String>,
    pub new_content: String,
    pub description: String,
    pub diff: String,
}

impl PendingChange {
    /// Stage a change. Returns `Ok(None)` when the new content is
    /// byte-identical to the old, so callers can report a no-op
    /// without producing an empty diff.
    pub fn propose(
        path: impl Into<PathBuf>,
        old_content: Option<String>,
        new_content: String,
        description: impl Into<String>,
    ) -> Option<Self> {
        if old_content.as_deref() == Some(new_content.as_str()) {
            return None;
        }

        let path = path.into();
        let diff = unified_diff(&path, old_content.as_deref().unwrap_or(""), &new_content);

        Some(Self {
            path,
            old_content,
            new_content,
            description: description.into(),
            diff,
        })
    }

    /// Write the staged content to disk, creating parent directories
    /// as needed.
    pub fn apply(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }

        std::fs::write(&self.path, &self.new_content)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "applied staged change");
        Ok(())
    }

    pub fn is_new_file(&self) -> bool {
        self.old_content.is_none()
    }
}

/// Produce a unified diff with `---`/`+++` file labels.
pub fn unified_diff(path: &Path, old: &str, new: &str) -> String {
    let display = path.display().to_string();
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", display), &format!("b/{}", display))
        .to_string()
}

/// Replacement failure detail: which requested fragments were absent.
#[derive(Debug, Error)]
#[error("{} of {} search fragments not found", indices.len(), total)]
pub struct FragmentsNotFound {
    pub indices: Vec<usize>,
    pub fragments: Vec<String>,
    pub total: usize,
}

/// Apply ordered search/replace fragments to `content`.
///
/// Each fragment replaces the first occurrence of its search text in
/// the current working copy, in order. Fragments whose search text is
/// absent are skipped and reported. When every fragment misses, that
/// is an error rather than a silent no-op.
pub fn apply_replacements(
    content: &str,
    replacements: &[(String, String)],
) -> Result<(String, Vec<usize>), FragmentsNotFound> {
    let mut working = content.to_string();
    let mut not_found = Vec::new();

    for (index, (search, replace)) in replacements.iter().enumerate() {
        match working.find(search.as_str()) {
            Some(pos) => {
                working.replace_range(pos..pos + search.len(), replace);
            }
            None => not_found.push(index),
        }
    }

    if !replacements.is_empty() && not_found.len() == replacements.len() {
        return Err(FragmentsNotFound {
            fragments: not_found
                .iter()
                .map(|&i| replacements[i].0.clone())
                .collect(),
            indices: not_found,
            total: replacements.len(),
        });
    }

    Ok((working, not_found))
}
