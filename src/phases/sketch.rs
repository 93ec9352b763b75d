//! Compile the merged sketch and its `src/` tree.

use anyhow::{Context, Result};
use std::fs;

use crate::compile::compile_files;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::flags::{expand_vendor_extra_flags, remove_optimization};

pub fn build_sketch(ctx: &mut BuildContext) -> Result<()> {
    let sketch_build_path = ctx.sketch_build_path();
    fs::create_dir_all(&sketch_build_path)
        .map_err(|e| BuildError::io(&sketch_build_path, e))
        .context("creating sketch build folder")?;

    let mut props = ctx.build_properties.clone();
    if ctx.unoptimize_sketch {
        props = remove_optimization(&props);
    }
    if ctx.vendor_extra_flags {
        props = expand_vendor_extra_flags(&props, "sketch");
    }

    let includes = ctx.include_folders.clone();
    let mut objects = compile_files(
        ctx,
        &sketch_build_path,
        false,
        &sketch_build_path,
        &props,
        &includes,
    )?;

    // The src/ subtree of a sketch is compiled recursively
    let src_path = sketch_build_path.join("src");
    if src_path.is_dir() {
        objects.extend(compile_files(ctx, &src_path, true, &src_path, &props, &includes)?);
    }

    objects.sort();
    ctx.sketch_object_files = objects;
    Ok(())
}
