//! Link the firmware image and run the objcopy recipe chain.

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::context::BuildContext;
use crate::exec::{exec_checked, prepare_command_for_recipe};
use crate::hooks::run_hooks;

pub const RECIPE_COMBINE_PATTERN: &str = "recipe.c.combine.pattern";
pub const OBJCOPY_RECIPE_PREFIX: &str = "recipe.objcopy.";

fn quote(path: &PathBuf) -> String {
    format!("\"{}\"", path.display())
}

/// Expand and run the combine recipe over every collected object file plus
/// the core archive.
pub fn link_firmware(ctx: &BuildContext) -> Result<()> {
    if ctx.only_update_compilation_database {
        return Ok(());
    }
    let Some(archive_path) = &ctx.core_archive_path else {
        bail!("core archive missing; core build did not run");
    };

    // Deterministic link input: sketch, libraries, then variant objects,
    // each list already sorted by path
    let mut object_files: Vec<String> = Vec::new();
    object_files.extend(ctx.sketch_object_files.iter().map(quote));
    object_files.extend(ctx.libraries_object_files.iter().map(quote));
    object_files.extend(ctx.core_object_files.iter().map(quote));

    let mut props = ctx.build_properties.clone();
    props.set("object_files", &object_files.join(" "));
    props.set(
        "archive_file",
        &archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "core.a".to_string()),
    );
    props.set("archive_file_path", &archive_path.to_string_lossy());
    let mut ldflags = props.get_or_empty("compiler.libraries.ldflags").to_string();
    if !ctx.libraries_ldflags.is_empty() {
        if !ldflags.is_empty() {
            ldflags.push(' ');
        }
        ldflags.push_str(&ctx.libraries_ldflags);
    }
    props.set("compiler.libraries.ldflags", &ldflags);

    let command = prepare_command_for_recipe(&props, RECIPE_COMBINE_PATTERN, false)?;
    exec_checked(&command, ctx.verbose)
}

/// Run every `recipe.objcopy.<ext>.pattern` in sorted order to extract the
/// upload images from the linked executable.
pub fn run_objcopy_chain(ctx: &BuildContext) -> Result<()> {
    run_hooks(ctx, OBJCOPY_RECIPE_PREFIX)
}
