//! Object archiving and the content-addressed core archive cache.

use anyhow::Result;
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::exec::{exec_checked, prepare_command_for_recipe};
use crate::props::PropertyMap;

pub const RECIPE_AR_PATTERN: &str = "recipe.ar.pattern";

/// Cache filename for a built core: FQBN (colons and equals flattened to
/// underscores) plus a digest of the core location and optimization flags,
/// so any change to either addresses a different archive. Long names fall
/// back to a digest-only form.
pub fn cached_core_archive_file_name(
    fqbn: &str,
    optimization_flags: &str,
    core_folder: &Path,
) -> String {
    let fqbn_flat = fqbn.replace(':', "_").replace('=', "_");
    let core_folder = core_folder
        .canonicalize()
        .unwrap_or_else(|_| core_folder.to_path_buf());
    let hash = format!(
        "{:x}",
        md5::compute(format!("{}{}", core_folder.display(), optimization_flags))
    );
    let name = format!("core_{}_{}.a", fqbn_flat, hash);
    if name.len() > 100 {
        format!("core_{:x}.a", md5::compute(format!("{}_{}", fqbn_flat, hash)))
    } else {
        name
    }
}

/// Archive `objects` into `build_path/<archive_name>`, reusing the existing
/// archive when no object is newer than it.
pub fn archive_compiled_files(
    ctx: &BuildContext,
    build_path: &Path,
    archive_name: &str,
    objects: &[PathBuf],
    props: &PropertyMap,
) -> Result<PathBuf> {
    let archive_path = build_path.join(archive_name);

    if ctx.only_update_compilation_database {
        if ctx.verbose {
            println!(
                "{} Skipping archive creation of: {}",
                "⚡".green(),
                archive_path.display()
            );
        }
        return Ok(archive_path);
    }

    if let Ok(archive_meta) = fs::metadata(&archive_path) {
        let archive_mtime = archive_meta.modified().map_err(|e| BuildError::io(&archive_path, e))?;
        let rebuild = objects.iter().any(|object| {
            fs::metadata(object)
                .and_then(|m| m.modified())
                .map(|mtime| mtime > archive_mtime)
                .unwrap_or(true)
        });
        if rebuild {
            fs::remove_file(&archive_path).map_err(|e| BuildError::io(&archive_path, e))?;
        } else {
            if ctx.verbose {
                println!(
                    "{} Using previously compiled file: {}",
                    "⚡".green(),
                    archive_path.display()
                );
            }
            return Ok(archive_path);
        }
    }

    for object in objects {
        let mut props = props.clone();
        props.set("archive_file", archive_name);
        props.set("archive_file_path", &archive_path.to_string_lossy());
        props.set("object_file", &object.to_string_lossy());

        let command = prepare_command_for_recipe(&props, RECIPE_AR_PATTERN, false)?;
        exec_checked(&command, ctx.verbose)?;
    }

    Ok(archive_path)
}

/// Whether anything under the core folder (or its referenced counterpart)
/// is newer than `target_file`. Unreadable state counts as changed.
pub fn core_or_referenced_core_has_changed(
    core_path: &Path,
    referenced_core_path: Option<&Path>,
    target_file: &Path,
) -> bool {
    let Ok(target_mtime) = fs::metadata(target_file).and_then(|m| m.modified()) else {
        return true;
    };

    for entry in WalkDir::new(core_path).into_iter() {
        let Ok(entry) = entry else {
            return true;
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(mtime) if mtime <= target_mtime => {}
            _ => return true,
        }
    }

    if let Some(referenced) = referenced_core_path {
        if !same_folder(core_path, referenced) {
            return core_or_referenced_core_has_changed(referenced, None, target_file);
        }
    }
    false
}

fn same_folder(a: &Path, b: &Path) -> bool {
    let canon_a = a.canonicalize().unwrap_or_else(|_| a.to_path_buf());
    let canon_b = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    canon_a == canon_b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_archive_name_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let a = cached_core_archive_file_name("arduino:avr:uno", "-Os", tmp.path());
        let b = cached_core_archive_file_name("arduino:avr:uno", "-Os", tmp.path());
        assert_eq!(a, b);
        assert!(a.starts_with("core_arduino_avr_uno_"));
        assert!(a.ends_with(".a"));
    }

    #[test]
    fn test_core_archive_name_varies_with_inputs() {
        let tmp = tempfile::tempdir().unwrap();
        let base = cached_core_archive_file_name("arduino:avr:uno", "-Os", tmp.path());
        assert_ne!(
            base,
            cached_core_archive_file_name("arduino:avr:mega", "-Os", tmp.path())
        );
        assert_ne!(
            base,
            cached_core_archive_file_name("arduino:avr:uno", "-O2", tmp.path())
        );
        let other = tempfile::tempdir().unwrap();
        assert_ne!(
            base,
            cached_core_archive_file_name("arduino:avr:uno", "-Os", other.path())
        );
    }

    #[test]
    fn test_menu_heavy_fqbn_falls_back_to_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let fqbn = format!("vendor:arch:board:{}", "menu=option,".repeat(12));
        let name = cached_core_archive_file_name(&fqbn, "-Os", tmp.path());
        assert!(name.len() <= 100);
        assert!(name.starts_with("core_"));
        assert!(name.ends_with(".a"));
    }

    #[test]
    fn test_core_changed_detection() {
        let tmp = tempfile::tempdir().unwrap();
        let core = tmp.path().join("core");
        fs::create_dir_all(&core).unwrap();
        fs::write(core.join("wiring.c"), "int w;\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(15));

        let archive = tmp.path().join("core_cached.a");
        fs::write(&archive, "!<arch>\n").unwrap();
        assert!(!core_or_referenced_core_has_changed(&core, None, &archive));

        std::thread::sleep(std::time::Duration::from_millis(15));
        fs::write(core.join("wiring.c"), "int w2;\n").unwrap();
        assert!(core_or_referenced_core_has_changed(&core, None, &archive));

        assert!(core_or_referenced_core_has_changed(
            &core,
            None,
            &tmp.path().join("missing.a")
        ));
    }
}
