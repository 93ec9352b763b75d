//! The include-discovery journal (`includes.cache`).
//!
//! Discovery is traced as an ordered list of (source, include, resolved
//! path) steps. On the next run the journal is replayed entry by entry;
//! as long as every observed step matches the recorded one the cache is
//! valid and the preprocessor can be skipped for unchanged sources. The
//! first mismatch invalidates the rest: the journal is truncated to the
//! verified prefix and fresh entries are appended from there.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::error::BuildError;

pub const JOURNAL_FILE_NAME: &str = "includes.cache";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Source the include was found in; empty for pre-seeded include roots.
    #[serde(rename = "Sourcefile")]
    pub source_file: String,
    /// Missing header name; empty for "no more missing includes".
    #[serde(rename = "Include")]
    pub include: String,
    /// Folder added to the include path; empty for terminal entries and
    /// fully precompiled libraries.
    #[serde(rename = "Includepath")]
    pub include_path: String,
}

#[derive(Debug, Default)]
pub struct Journal {
    valid: bool,
    next: usize,
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Read the journal; anything unreadable or unparsable is an empty,
    /// invalid journal.
    pub fn read(path: &Path) -> Journal {
        let Ok(bytes) = fs::read(path) else {
            return Journal::default();
        };
        match serde_json::from_slice::<Vec<JournalEntry>>(&bytes) {
            Ok(entries) => Journal {
                valid: true,
                next: 0,
                entries,
            },
            Err(_) => Journal::default(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// The entry the cursor points at. Only meaningful while valid.
    pub fn peek(&self) -> Option<&JournalEntry> {
        self.entries.get(self.next)
    }

    /// Require the next entry to be about `source`; a different source (or
    /// a missing entry) invalidates and truncates. Does not advance.
    pub fn expect_file(&mut self, source: &Path) {
        if self.valid {
            let matches = self
                .peek()
                .map(|e| e.source_file == source.to_string_lossy())
                .unwrap_or(false);
            if !matches {
                self.invalidate();
            }
        }
    }

    /// Require the next entry to equal the given step. A match advances the
    /// cursor; a mismatch invalidates and truncates. Once invalid, the step
    /// is appended as the new tail.
    pub fn expect_entry(&mut self, source: Option<&Path>, include: &str, include_path: Option<&Path>) {
        let entry = JournalEntry {
            source_file: source.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
            include: include.to_string(),
            include_path: include_path
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        if self.valid {
            if self.peek() == Some(&entry) {
                self.next += 1;
                return;
            }
            self.invalidate();
        }
        self.entries.push(entry);
    }

    /// Require the journal to be fully consumed; leftovers invalidate.
    pub fn expect_end(&mut self) {
        if self.valid && self.next < self.entries.len() {
            self.invalidate();
        }
    }

    fn invalidate(&mut self) {
        self.valid = false;
        self.entries.truncate(self.next);
    }

    /// Persist: a still-valid journal only gets its timestamps refreshed; an
    /// invalidated one is serialized and swapped in atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        if self.valid {
            if let Ok(file) = fs::OpenOptions::new().append(true).open(path) {
                let _ = file.set_modified(SystemTime::now());
            }
            return Ok(());
        }

        let json = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = path.with_extension("cache.tmp");
        fs::write(&tmp, &json).map_err(|e| BuildError::io(&tmp, e))?;
        fs::rename(&tmp, path)
            .map_err(|e| BuildError::io(path, e))
            .context("replacing include journal")?;
        Ok(())
    }
}
