//! Recently used badge identifiers.
//!
//! Stored as a JSON array, most recent first. Load and save failures are
//! logged and degrade to the in-memory list.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Capped, deduplicated, most-recent-first list of badge ids.
#[derive(Debug, Clone)]
pub struct BadgeHistory {
    entries: Vec<String>,
    cap: usize,
    path: Option<PathBuf>,
}

impl BadgeHistory {
    /// In-memory history.
    pub fn in_memory(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap,
            path: None,
        }
    }

    /// History backed by `path`. A missing or unreadable file yields an
    /// empty history.
    pub fn load(path: impl Into<PathBuf>, cap: usize) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(mut entries) => {
                dedup_keep_first(&mut entries);
                entries.truncate(cap);
                debug!(path = %path.display(), count = entries.len(), "Badge history loaded");
                entries
            },
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %e, "Badge history unreadable, starting empty");
                }
                Vec::new()
            },
        };
        Self {
            entries,
            cap,
            path: Some(path),
        }
    }

    /// Build from the badge configuration.
    pub fn from_config(path: Option<&Path>, cap: usize) -> Self {
        match path {
            Some(path) => Self::load(path, cap),
            None => Self::in_memory(cap),
        }
    }

    /// Entries, most recent first.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Record `id` as the most recent entry and persist.
    pub fn record(&mut self, id: &str) {
        self.entries.retain(|e| e != id);
        self.entries.insert(0, id.to_string());
        self.entries.truncate(self.cap);
        self.save();
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_vec_pretty(&self.entries)
            .map_err(std::io::Error::from)
            .and_then(|bytes| std::fs::write(path, bytes));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to persist badge history");
        }
    }
}

fn read_entries(path: &Path) -> std::io::Result<Vec<String>> {
    let raw = std::fs::read(path)?;
    serde_json::from_slice(&raw).map_err(std::io::Error::from)
}

fn dedup_keep_first(entries: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    entries.retain(|e| seen.insert(e.clone()));
}
