//! Compile every imported library, or collect linker flags for the
//! precompiled ones.

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::sync::Arc;

use crate::compile::compile_files;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::flags::{expand_vendor_extra_flags, remove_optimization};
use crate::library::{Library, Precompiled};

pub fn build_libraries(ctx: &mut BuildContext) -> Result<()> {
    let build_root = ctx.libraries_build_path();
    fs::create_dir_all(&build_root)
        .map_err(|e| BuildError::io(&build_root, e))
        .context("creating libraries build folder")?;

    let mut props = ctx.build_properties.clone();
    if ctx.unoptimize_libraries {
        props = remove_optimization(&props);
    }
    if ctx.vendor_extra_flags {
        props = expand_vendor_extra_flags(&props, "libraries");
    }

    let includes = ctx.include_folders.clone();
    let libraries: Vec<Arc<Library>> = ctx.imported_libraries.clone();

    let mut objects = Vec::new();
    let mut ldflags: Vec<String> = Vec::new();

    for library in libraries {
        if ctx.verbose {
            println!(
                "{} Compiling library \"{}\"",
                "📚".blue(),
                library.name
            );
        }

        if library.precompiled != Precompiled::No {
            let mcu = props.get_or_empty("build.mcu").to_string();
            if let Some(dir) = library.precompiled_dir(&mcu) {
                ldflags.push(format!("\"-L{}\"", dir.display()));
                if !library.ldflags.is_empty() {
                    ldflags.push(library.ldflags.clone());
                }
                if ctx.verbose {
                    println!(
                        "{} Using precompiled library in {}",
                        "⚡".green(),
                        dir.display()
                    );
                }
                continue;
            }
            // No archive for this mcu: fall back to building from source
            if ctx.verbose {
                println!(
                    "{} Precompiled library in \"{}\" not found for {}, compiling sources",
                    "!".yellow(),
                    library.name,
                    mcu
                );
            }
        }

        let library_build_path = build_root.join(&library.name);
        fs::create_dir_all(&library_build_path)
            .map_err(|e| BuildError::io(&library_build_path, e))?;

        // The legacy utility folder is visible only while compiling this
        // library's own sources
        let mut library_includes = includes.clone();
        if let Some(utility) = &library.utility_dir {
            library_includes.push(utility.clone());
        }

        for (source_dir, recurse) in library.source_dirs() {
            let build_path = if source_dir == library.source_dir {
                library_build_path.clone()
            } else {
                library_build_path.join("utility")
            };
            objects.extend(compile_files(
                ctx,
                &source_dir,
                recurse,
                &build_path,
                &props,
                &library_includes,
            )?);
        }
    }

    objects.sort();
    ctx.libraries_object_files = objects;
    ctx.libraries_ldflags = ldflags.join(" ");
    Ok(())
}
