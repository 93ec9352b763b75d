//! Up-to-date checks against compiler-emitted `.d` dependency files.
//!
//! The depfile layout the compile recipes produce is one path per line:
//! the object target first (`foo.o:`), the source second, then every header
//! the compiler read, with make-style escaping.

use anyhow::Result;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::error::BuildError;

/// Undo make-style escaping in a depfile path.
pub fn unescape_dep(s: &str) -> String {
    s.replace("\\ ", " ")
        .replace("\\\t", "\t")
        .replace("\\#", "#")
        .replace("$$", "$")
        .replace("\\\\", "\\")
}

fn strip_continuation(s: &str) -> &str {
    s.strip_suffix('\\').unwrap_or(s)
}

fn parse_rows(content: &str) -> Vec<String> {
    content
        .lines()
        .map(strip_continuation)
        .map(str::trim)
        .map(unescape_dep)
        .filter(|row| !row.is_empty())
        .collect()
}

fn mtime(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified().map_err(|e| BuildError::io(path, e))?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BuildError::io(path, e).into()),
    }
}

/// Whether `object` can be reused for `source`: both `.o` and `.d` exist,
/// the object is newer than the source and every recorded dependency, and
/// the depfile actually describes this (object, source) pair.
pub fn obj_file_is_up_to_date(source: &Path, object: &Path, depfile: &Path) -> Result<bool> {
    let source_mtime = match mtime(source)? {
        Some(t) => t,
        None => {
            return Err(BuildError::io(
                source,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source file not found"),
            )
            .into())
        }
    };
    let Some(object_mtime) = mtime(object)? else {
        return Ok(false);
    };
    let Some(depfile_mtime) = mtime(depfile)? else {
        return Ok(false);
    };
    if source_mtime > object_mtime || source_mtime > depfile_mtime {
        return Ok(false);
    }

    let content = match fs::read_to_string(depfile) {
        Ok(c) => c,
        // Unreadable or non-UTF-8 depfile: recompile rather than guess
        Err(_) => return Ok(false),
    };
    let rows = parse_rows(&content);
    if rows.is_empty() {
        return Ok(true);
    }

    let Some(object_in_depfile) = rows[0].strip_suffix(':') else {
        return Ok(false);
    };
    if object_in_depfile != object.to_string_lossy() {
        return Ok(false);
    }

    // The second row names the source; without this check, a source with
    // the same name but a different path would keep a stale object alive.
    if rows.len() < 2 || rows[1] != source.to_string_lossy() {
        return Ok(false);
    }

    for row in &rows[1..] {
        match mtime(Path::new(row)) {
            Ok(Some(dep_mtime)) => {
                if dep_mtime > object_mtime {
                    return Ok(false);
                }
            }
            // A listed dependency vanished or can't be read: stale
            _ => return Ok(false),
        }
    }

    Ok(true)
}
