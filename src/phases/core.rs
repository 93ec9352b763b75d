//! Compile the board's core and variant, archive the core and maintain the
//! cross-build core archive cache.

use anyhow::{bail, Context, Result};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::{
    archive_compiled_files, cached_core_archive_file_name, core_or_referenced_core_has_changed,
};
use crate::compile::compile_files;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::flags::{expand_vendor_extra_flags, remove_optimization};

pub fn build_core(ctx: &mut BuildContext) -> Result<()> {
    let core_build_path = ctx.core_build_path();
    fs::create_dir_all(&core_build_path)
        .map_err(|e| BuildError::io(&core_build_path, e))
        .context("creating core build folder")?;

    let core_cache_path = match &ctx.build_cache_path {
        Some(cache) => {
            let dir = cache.join("core");
            fs::create_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;
            Some(dir)
        }
        None => None,
    };

    let mut props = ctx.build_properties.clone();
    if ctx.unoptimize_core {
        props = remove_optimization(&props);
    }
    if ctx.vendor_extra_flags {
        props = expand_vendor_extra_flags(&props, "core");
    }

    let Some(core_folder) = ctx.core_folder() else {
        bail!("build.core.path is not set for board {}", ctx.fqbn);
    };
    let variant_folder = ctx.variant_folder();

    let mut includes = vec![core_folder.clone()];
    if let Some(variant) = &variant_folder {
        includes.push(variant.clone());
    }

    let mut variant_objects = Vec::new();
    if let Some(variant) = &variant_folder {
        if variant.is_dir() {
            variant_objects =
                compile_files(ctx, variant, true, &core_build_path, &props, &includes)?;
        }
    }

    // The cache key covers the whole platform folder so that platform.txt
    // edits rebuild the core too
    let real_core_folder = real_core_folder(&core_folder);
    let referenced_platform = props
        .get("runtime.platform.path")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    let mut cached_archive = None;
    if let Some(core_cache_path) = &core_cache_path {
        let archive_name = cached_core_archive_file_name(
            &ctx.fqbn.to_string(),
            props.get_or_empty("compiler.optimization_flags"),
            &real_core_folder,
        );
        let target = core_cache_path.join(archive_name);
        let can_use = !ctx.only_update_compilation_database
            && !core_or_referenced_core_has_changed(
                &real_core_folder,
                referenced_platform.as_deref(),
                &target,
            );
        if can_use {
            if ctx.verbose {
                println!("{} Using precompiled core: {}", "⚡".green(), target.display());
            }
            ctx.core_archive_path = Some(target);
            ctx.core_object_files = variant_objects;
            return Ok(());
        }
        cached_archive = Some(target);
    }

    let core_objects = compile_files(ctx, &core_folder, true, &core_build_path, &props, &includes)?;
    let archive = archive_compiled_files(ctx, &core_build_path, "core.a", &core_objects, &props)?;

    // Refresh the cache copy; a failure here only costs the next build time
    if let Some(target) = cached_archive {
        if !ctx.only_update_compilation_database {
            match fs::copy(&archive, &target) {
                Ok(_) if ctx.verbose => {
                    println!("{} Archiving built core (caching) in: {}", "✓".green(), target.display());
                }
                Err(err) if ctx.verbose => {
                    println!(
                        "{} Unable to cache built core, please tell {} maintainers to follow the best practices: {}",
                        "!".yellow(),
                        ctx.fqbn.vendor,
                        err
                    );
                }
                _ => {}
            }
        }
    }

    ctx.core_archive_path = Some(archive);
    ctx.core_object_files = variant_objects;
    Ok(())
}

/// The platform folder two levels above `<platform>/cores/<core>`.
fn real_core_folder(core_folder: &Path) -> PathBuf {
    core_folder
        .parent()
        .and_then(|p| p.parent())
        .unwrap_or(core_folder)
        .to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_core_folder_is_platform_root() {
        assert_eq!(
            real_core_folder(Path::new("/hw/avr/cores/arduino")),
            Path::new("/hw/avr")
        );
    }
}
