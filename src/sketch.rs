//! Sketch layout: a folder named after its primary `.ino` file, optional
//! sibling `.ino`/`.pde` files, a `src/` tree compiled recursively and a
//! `data/` tree the build ignores.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

use crate::error::BuildError;

/// Extensions merged into the main translation unit.
pub const SKETCH_EXTENSIONS: &[&str] = &["ino", "pde"];

/// Extensions of additional sources copied beside the merged sketch.
pub const ADDITIONAL_EXTENSIONS: &[&str] = &["c", "cpp", "cc", "cxx", "h", "hpp", "hh", "S"];

#[derive(Debug, Clone)]
pub struct Sketch {
    pub root: PathBuf,
    pub name: String,
    /// `<root>/<name>.ino`
    pub main_file: PathBuf,
    /// Sibling `.ino`/`.pde` files, lexicographic order.
    pub other_sketch_files: Vec<PathBuf>,
    /// Headers and sources copied verbatim into the build tree,
    /// relative to `root`.
    pub additional_files: Vec<PathBuf>,
}

impl Sketch {
    /// Load and validate a sketch folder.
    pub fn load(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .map_err(|e| BuildError::io(root, e))
            .context("resolving sketch folder")?;
        if !root.is_dir() {
            return Err(BuildError::SketchStructure(format!(
                "{} is not a directory",
                root.display()
            ))
            .into());
        }

        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BuildError::SketchStructure("sketch folder has no name".into()))?
            .to_string();
        check_name(&name)?;

        let main_file = root.join(format!("{}.ino", name));
        if !main_file.is_file() {
            return Err(BuildError::SketchStructure(format!(
                "no sketch file {}.ino found inside {}",
                name,
                root.display()
            ))
            .into());
        }

        let mut other_sketch_files = Vec::new();
        let mut additional_files = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !is_ignored(e))
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let at_top = path.parent() == Some(root.as_path());
            if at_top && SKETCH_EXTENSIONS.contains(&ext) {
                if path != main_file {
                    check_name(&file_stem(path))?;
                    other_sketch_files.push(path.to_path_buf());
                }
            } else if ADDITIONAL_EXTENSIONS.contains(&ext) {
                additional_files.push(path.strip_prefix(&root)?.to_path_buf());
            }
        }
        other_sketch_files.sort();
        additional_files.sort();

        Ok(Sketch {
            root,
            name,
            main_file,
            other_sketch_files,
            additional_files,
        })
    }

    /// The merged translation unit's filename, e.g. `Blink.ino.cpp`.
    pub fn merged_file_name(&self) -> String {
        format!("{}.ino.cpp", self.name)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_ignored(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        // data/ ships to the device filesystem, build/ is our own output
        return name == "data" || name == "build" || is_sccs_or_hidden(&name);
    }
    name.starts_with('.')
}

fn is_sccs_or_hidden(name: &str) -> bool {
    matches!(
        name,
        "CVS" | "RCS" | ".git" | ".github" | ".svn" | ".hg" | ".bzr" | ".vscode" | ".settings"
    ) || name.starts_with('.')
}

/// Sketch and sketch-file names: start with a letter or digit, then up to 62
/// letters, digits, underscores, dots or dashes.
pub fn check_name(name: &str) -> Result<()> {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,62}$").unwrap()
    });
    if re.is_match(name) {
        Ok(())
    } else {
        Err(BuildError::BadSketchName(name.to_string()).into())
    }
}
