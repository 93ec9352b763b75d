//! The build driver: preflight, merge, discovery, prototypes, compile,
//! link, image extraction and size report, with hook recipes at every
//! phase boundary.

use anyhow::{Context, Result};
use colored::*;
use std::fs;

use crate::context::BuildContext;
use crate::discovery::{find_includes, warn_about_arch_incompatible_libraries};
use crate::error::BuildError;
use crate::hooks::{self, run_hooks};
use crate::merge::merge_and_copy;
use crate::phases::{build_core, build_libraries, build_sketch, link_firmware, run_objcopy_chain};
use crate::preproc::IncludeScraper;
use crate::prototypes::add_prototypes;
use crate::resolver::LibraryResolver;
use crate::sizer::check_size;

/// Run the whole pipeline. On error the context keeps everything
/// accumulated so far, so callers can inspect or dump progress.
pub fn run(
    ctx: &mut BuildContext,
    resolver: &LibraryResolver,
    scraper: &dyn IncludeScraper,
) -> Result<()> {
    preflight(ctx)?;
    fs::create_dir_all(&ctx.build_path)
        .map_err(|e| BuildError::io(&ctx.build_path, e))
        .context("creating build folder")?;
    setup_build_properties(ctx);

    run_hooks(ctx, hooks::HOOKS_PREBUILD)?;

    // Merge sketch files into one unit and copy its sources over
    let merged = merge_and_copy(&ctx.sketch, &ctx.sketch_build_path())?;
    ctx.source = fs::read_to_string(&merged).map_err(|e| BuildError::io(&merged, e))?;

    find_includes(ctx, resolver, scraper)?;
    if ctx.verbose {
        print_used_libraries(ctx);
    }
    warn_about_arch_incompatible_libraries(ctx);

    add_prototypes(ctx)?;

    run_hooks(ctx, hooks::HOOKS_SKETCH_PREBUILD)?;
    build_sketch(ctx)?;
    run_hooks(ctx, hooks::HOOKS_SKETCH_POSTBUILD)?;

    run_hooks(ctx, hooks::HOOKS_LIBRARIES_PREBUILD)?;
    build_libraries(ctx)?;
    run_hooks(ctx, hooks::HOOKS_LIBRARIES_POSTBUILD)?;

    run_hooks(ctx, hooks::HOOKS_CORE_PREBUILD)?;
    build_core(ctx)?;
    run_hooks(ctx, hooks::HOOKS_CORE_POSTBUILD)?;

    // A cancelled build stops before linking; partial artifacts stay in
    // place for inspection
    if ctx.is_cancelled() {
        return Err(BuildError::Cancelled.into());
    }

    run_hooks(ctx, hooks::HOOKS_LINKING_PRELINK)?;
    link_firmware(ctx)?;
    run_hooks(ctx, hooks::HOOKS_LINKING_POSTLINK)?;

    run_hooks(ctx, hooks::HOOKS_OBJCOPY_PREOBJCOPY)?;
    run_objcopy_chain(ctx)?;
    run_hooks(ctx, hooks::HOOKS_OBJCOPY_POSTOBJCOPY)?;

    check_size(ctx)?;

    if let Some(db) = &ctx.compilation_database {
        db.save()?;
    }

    run_hooks(ctx, hooks::HOOKS_POSTBUILD)?;
    Ok(())
}

fn preflight(ctx: &BuildContext) -> Result<()> {
    let build = ctx
        .build_path
        .canonicalize()
        .unwrap_or_else(|_| ctx.build_path.clone());
    if build == ctx.sketch.root {
        return Err(BuildError::SketchStructure(
            "sketch folder and build path cannot be the same".to_string(),
        )
        .into());
    }
    Ok(())
}

/// Standard properties every recipe can rely on.
fn setup_build_properties(ctx: &mut BuildContext) {
    let build_path = ctx.build_path.to_string_lossy().into_owned();
    let source_path = ctx.sketch.root.to_string_lossy().into_owned();
    let project_name = format!("{}.ino", ctx.sketch.name);

    ctx.build_properties.set("build.path", &build_path);
    ctx.build_properties.set("build.project_name", &project_name);
    ctx.build_properties.set("build.source.path", &source_path);
    ctx.build_properties.set("sketch_path", &source_path);
    if !ctx.build_properties.contains_key("build.fqbn") {
        ctx.build_properties.set("build.fqbn", &ctx.fqbn.to_string());
    }
}

fn print_used_libraries(ctx: &BuildContext) {
    for library in &ctx.imported_libraries {
        match &library.version {
            Some(version) => println!(
                "{} Using library {} at version {} in folder: {}",
                "📚".blue(),
                library.name,
                version,
                library.root.display()
            ),
            None => println!(
                "{} Using library {} in folder: {} (legacy)",
                "📚".blue(),
                library.name,
                library.root.display()
            ),
        }
    }
}
