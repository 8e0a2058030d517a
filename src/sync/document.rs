//! Document sources
//!
//! A flush writes the whole page, not a patch. The rendering side owns the
//! live document; the scheduler only asks it for the current full text of a
//! page when a save is about to happen. When the remote content is replaced
//! from outside the editing flow, e.g. by a version restore, the owner is
//! handed the new text through `reload`.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{EditorError, Result};

/// Provides the current full document of a page.
pub trait DocumentSource: Send + Sync {
    fn snapshot(&self, page: &str) -> Result<String>;

    /// Replace the live document of `page` with `html`.
    fn reload(&self, page: &str, html: &str) -> Result<()>;
}

/// In-memory documents keyed by page, shared with whatever renders them.
#[derive(Debug, Clone, Default)]
pub struct SharedDocument {
    pages: Arc<Mutex<HashMap<String, String>>>,
}

impl SharedDocument {
    pub fn new() -> Self {
        Self::default()
    }

    fn pages(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.pages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the full document of `page`.
    pub fn set(&self, page: impl Into<String>, html: impl Into<String>) {
        self.pages().insert(page.into(), html.into());
    }

    pub fn get(&self, page: &str) -> Option<String> {
        self.pages().get(page).cloned()
    }

    /// Replace the first occurrence of `from` with `to` in `page`. Returns
    /// false if the page or the text is missing.
    pub fn replace(&self, page: &str, from: &str, to: &str) -> bool {
        let mut pages = self.pages();
        match pages.get_mut(page) {
            Some(html) if html.contains(from) => {
                *html = html.replacen(from, to, 1);
                true
            }
            _ => false,
        }
    }
}

impl DocumentSource for SharedDocument {
    fn snapshot(&self, page: &str) -> Result<String> {
        self.get(page).ok_or_else(|| EditorError::DocumentUnavailable {
            page: page.to_string(),
        })
    }

    fn reload(&self, page: &str, html: &str) -> Result<()> {
        self.set(page, html);
        Ok(())
    }
}

/// Documents read from a local checkout of the site.
#[derive(Debug, Clone)]
pub struct FileDocument {
    root: PathBuf,
}

impl FileDocument {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DocumentSource for FileDocument {
    fn snapshot(&self, page: &str) -> Result<String> {
        let path = self.root.join(page);
        if !path.is_file() {
            return Err(EditorError::DocumentUnavailable {
                page: page.to_string(),
            });
        }
        fs::read_to_string(&path).map_err(|e| EditorError::StorageRead { path, source: e })
    }

    fn reload(&self, page: &str, html: &str) -> Result<()> {
        let path = self.root.join(page);
        fs::write(&path, html).map_err(|e| EditorError::StorageWrite { path, source: e })
    }
}
