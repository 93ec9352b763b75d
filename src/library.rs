//! Library model: metadata, source layout and install location.
//!
//! A library is either *flat* (sources in its root, optional legacy
//! `utility/` companion) or *src-rooted* (a `src/` tree compiled
//! recursively, selected by `library.properties` declaring a modern
//! layout).

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::props::PropertyMap;

/// Where a library was installed from. Discriminates candidates providing
/// the same header: higher wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LibraryLocation {
    IdeBuiltin = 0,
    ReferencedPlatformBundled = 1,
    PlatformBundled = 2,
    User = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precompiled {
    No,
    /// Archive shipped beside sources; sources still compiled when the
    /// archive is missing for the target mcu.
    Yes,
    /// Fully precompiled: headers and archive only, dependencies frozen.
    Full,
}

#[derive(Debug, Clone)]
pub struct Library {
    pub name: String,
    pub root: PathBuf,
    /// Folder holding the sources: `root` (flat) or `root/src`.
    pub source_dir: PathBuf,
    /// Legacy `utility/` companion, flat layout only.
    pub utility_dir: Option<PathBuf>,
    /// Declared architectures; empty means unspecified (treated as `*`).
    pub architectures: Vec<String>,
    pub location: LibraryLocation,
    pub precompiled: Precompiled,
    /// Extra linker flags declared in `library.properties`.
    pub ldflags: String,
    pub version: Option<semver::Version>,
    /// Whether `source_dir` is compiled recursively.
    pub recursive: bool,
}

impl Library {
    /// Load a library from its root folder. A `library.properties` file
    /// selects the modern layout when a `src/` folder exists; anything else
    /// is a legacy flat library named after its folder.
    pub fn load(root: &Path, location: LibraryLocation) -> Result<Self> {
        let folder_name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let metadata_path = root.join("library.properties");
        let metadata = if metadata_path.is_file() {
            Some(PropertyMap::load(&metadata_path).context("reading library.properties")?)
        } else {
            None
        };

        let src_dir = root.join("src");
        let modern = metadata.is_some() && src_dir.is_dir();
        let (source_dir, utility_dir, recursive) = if modern {
            (src_dir, None, true)
        } else {
            let utility = root.join("utility");
            let utility = utility.is_dir().then_some(utility);
            (root.to_path_buf(), utility, false)
        };

        let name = metadata
            .as_ref()
            .and_then(|m| m.get("name"))
            .map(|n| n.to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or(folder_name);

        let architectures = metadata
            .as_ref()
            .and_then(|m| m.get("architectures"))
            .map(|a| {
                a.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let precompiled = match metadata.as_ref().and_then(|m| m.get("precompiled")) {
            Some("true") => Precompiled::Yes,
            Some("full") => Precompiled::Full,
            _ => Precompiled::No,
        };

        let ldflags = metadata
            .as_ref()
            .and_then(|m| m.get("ldflags"))
            .unwrap_or("")
            .to_string();

        let version = metadata
            .as_ref()
            .and_then(|m| m.get("version"))
            .and_then(|v| semver::Version::parse(v.trim()).ok());

        Ok(Library {
            name,
            root: root.to_path_buf(),
            source_dir,
            utility_dir,
            architectures,
            location,
            precompiled,
            ldflags,
            version,
            recursive,
        })
    }

    /// Whether the declared architectures include `arch`. Unspecified or
    /// `*` matches everything.
    pub fn supports_arch(&self, arch: &str) -> bool {
        self.architectures.is_empty()
            || self
                .architectures
                .iter()
                .any(|a| a == "*" || a.eq_ignore_ascii_case(arch))
    }

    /// Folders scanned for sources, with their recursion flag.
    pub fn source_dirs(&self) -> Vec<(PathBuf, bool)> {
        let mut dirs = vec![(self.source_dir.clone(), self.recursive)];
        if let Some(utility) = &self.utility_dir {
            dirs.push((utility.clone(), false));
        }
        dirs
    }

    /// Header basenames exported from the top of the source folder; this is
    /// what an `#include <...>` can name.
    pub fn header_files(&self) -> Vec<String> {
        let mut headers = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.source_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("h") | Some("hpp") | Some("hh")
                ) {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        headers.push(name.to_string());
                    }
                }
            }
        }
        headers.sort();
        headers
    }

    /// The per-mcu folder holding precompiled archives, when one exists.
    pub fn precompiled_dir(&self, mcu: &str) -> Option<PathBuf> {
        if self.precompiled == Precompiled::No {
            return None;
        }
        let dir = self.source_dir.join(mcu);
        dir.is_dir().then_some(dir)
    }
}

/// Scan a libraries root (one library per subfolder), skipping folders that
/// fail to load. Returns libraries in folder-name order.
pub fn scan_libraries_root(root: &Path, location: LibraryLocation) -> Result<Vec<Library>> {
    let mut libraries = Vec::new();
    if !root.is_dir() {
        return Ok(libraries);
    }
    let mut folders: Vec<PathBuf> = fs::read_dir(root)
        .map_err(|e| BuildError::io(root, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('.'))
                .unwrap_or(false)
        })
        .collect();
    folders.sort();
    for folder in folders {
        libraries.push(Library::load(&folder, location)?);
    }
    Ok(libraries)
}
