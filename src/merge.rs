//! Merge sketch files into one translation unit.
//!
//! The primary `.ino` plus its siblings become `<name>.ino.cpp` with `#line`
//! directives, so compiler diagnostics point back at the files the user
//! actually edited.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::sketch::Sketch;

/// Escape a path for use inside a C preprocessor `#line` directive.
pub fn quote_cpp_path(path: &Path) -> String {
    let escaped = path
        .to_string_lossy()
        .replace('\\', "\\\\")
        .replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Produce the merged source text: Arduino prologue, the primary file, then
/// each sibling, all behind `#line 1` directives.
pub fn merge_sketch_sources(sketch: &Sketch) -> Result<String> {
    let mut merged = String::new();
    merged.push_str("#include <Arduino.h>\n");

    merged.push_str(&format!("#line 1 {}\n", quote_cpp_path(&sketch.main_file)));
    merged.push_str(&read(&sketch.main_file)?);

    for file in &sketch.other_sketch_files {
        merged.push_str(&format!("#line 1 {}\n", quote_cpp_path(file)));
        merged.push_str(&read(file)?);
    }

    Ok(merged)
}

/// Write the merged unit into the sketch build folder and copy the sketch's
/// additional files beside it, preserving their relative layout. Returns the
/// merged file path.
pub fn merge_and_copy(sketch: &Sketch, sketch_build_path: &Path) -> Result<PathBuf> {
    fs::create_dir_all(sketch_build_path)
        .map_err(|e| BuildError::io(sketch_build_path, e))
        .context("creating sketch build folder")?;

    let merged = merge_sketch_sources(sketch)?;
    let target = sketch_build_path.join(sketch.merged_file_name());
    write_if_changed(&target, &merged)?;

    for rel in &sketch.additional_files {
        let source = sketch.root.join(rel);
        let dest = sketch_build_path.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        let content = fs::read(&source).map_err(|e| BuildError::io(&source, e))?;
        // Keep object files fresh: only touch the copy when it changed
        let unchanged = fs::read(&dest).map(|old| old == content).unwrap_or(false);
        if !unchanged {
            fs::write(&dest, content).map_err(|e| BuildError::io(&dest, e))?;
        }
    }

    Ok(target)
}

/// Overwrite `path` only when the contents differ, preserving mtimes for the
/// up-to-date checks downstream.
pub fn write_if_changed(path: &Path, content: &str) -> Result<()> {
    let unchanged = fs::read_to_string(path)
        .map(|old| old == content)
        .unwrap_or(false);
    if !unchanged {
        fs::write(path, content).map_err(|e| BuildError::io(path, e))?;
    }
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| BuildError::io(path, e))
        .with_context(|| format!("reading sketch file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_single_file_merge_is_prologue_plus_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Blink");
        fs::create_dir_all(&root).unwrap();
        let body = "void setup(){pinMode(13,1);} void loop(){digitalWrite(13,1);}";
        fs::write(root.join("Blink.ino"), body).unwrap();

        let sketch = Sketch::load(&root).unwrap();
        let merged = merge_sketch_sources(&sketch).unwrap();
        let expected = format!(
            "#include <Arduino.h>\n#line 1 {}\n{}",
            quote_cpp_path(&sketch.main_file),
            body
        );
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_siblings_follow_primary_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Multi");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("Multi.ino"), "// main\n").unwrap();
        fs::write(root.join("b.ino"), "// b\n").unwrap();
        fs::write(root.join("a.ino"), "// a\n").unwrap();

        let sketch = Sketch::load(&root).unwrap();
        let merged = merge_sketch_sources(&sketch).unwrap();
        let main_pos = merged.find("// main").unwrap();
        let a_pos = merged.find("// a").unwrap();
        let b_pos = merged.find("// b").unwrap();
        assert!(main_pos < a_pos && a_pos < b_pos);
        assert_eq!(merged.matches("#line 1 ").count(), 3);
    }

    #[test]
    fn test_quote_cpp_path_escapes() {
        let quoted = quote_cpp_path(Path::new(r#"C:\tmp\My "Sketch""#));
        assert_eq!(quoted, r#""C:\\tmp\\My \"Sketch\"""#);
    }

    #[test]
    fn test_merge_and_copy_writes_additional_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("WithSrc");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("WithSrc.ino"), "void setup(){}\nvoid loop(){}\n").unwrap();
        fs::write(root.join("helpers.h"), "#define X 1\n").unwrap();
        fs::write(root.join("src/impl.cpp"), "int x;\n").unwrap();

        let sketch = Sketch::load(&root).unwrap();
        let build = tmp.path().join("build/sketch");
        let merged = merge_and_copy(&sketch, &build).unwrap();

        assert!(merged.ends_with("WithSrc.ino.cpp"));
        assert!(build.join("helpers.h").is_file());
        assert!(build.join("src/impl.cpp").is_file());
    }
}
