//! Clang-compatible `compile_commands.json` sink.
//!
//! Entries are recorded for every source the scheduler visits, including
//! up-to-date ones, so IDE tooling always sees the full translation-unit
//! list.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::BuildError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileCommand {
    pub directory: String,
    pub file: String,
    pub arguments: Vec<String>,
}

#[derive(Debug)]
pub struct CompilationDatabase {
    path: PathBuf,
    entries: Mutex<Vec<CompileCommand>>,
}

impl CompilationDatabase {
    pub fn new(path: &Path) -> Self {
        CompilationDatabase {
            path: path.to_path_buf(),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Thread-safe append; called concurrently from compile workers.
    pub fn add(&self, directory: &Path, file: &Path, arguments: Vec<String>) {
        let entry = CompileCommand {
            directory: directory.to_string_lossy().into_owned(),
            file: file.to_string_lossy().into_owned(),
            arguments,
        };
        self.entries.lock().unwrap().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save(&self) -> Result<()> {
        let entries = self.entries.lock().unwrap();
        let json = serde_json::to_string_pretty(&*entries)?;
        fs::write(&self.path, json)
            .map_err(|e| BuildError::io(&self.path, e))
            .context("writing compilation database")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("compile_commands.json");
        let db = CompilationDatabase::new(&path);
        db.add(
            Path::new("/work"),
            Path::new("/work/foo.cpp"),
            vec!["gcc".into(), "-c".into(), "foo.cpp".into()],
        );
        db.save().unwrap();

        let loaded: Vec<CompileCommand> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].file, "/work/foo.cpp");
        assert_eq!(loaded[0].arguments[0], "gcc");
    }
}
