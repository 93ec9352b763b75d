//! Parallel compilation with depfile-driven up-to-date checks.
//!
//! Sources are grouped by language recipe and dispatched to a worker pool.
//! Workers share three things: the object list, the error list and the
//! compilation database, the first two behind mutexes. The first failure
//! stops the feeder; jobs already running finish and the first error wins.

use anyhow::{Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use walkdir::WalkDir;

use crate::context::BuildContext;
use crate::depfile::obj_file_is_up_to_date;
use crate::error::BuildError;
use crate::exec::{exec, prepare_command_for_recipe};
use crate::preproc::includes_property;
use crate::props::PropertyMap;

pub const RECIPE_C_PATTERN: &str = "recipe.c.o.pattern";
pub const RECIPE_CPP_PATTERN: &str = "recipe.cpp.o.pattern";
pub const RECIPE_S_PATTERN: &str = "recipe.S.o.pattern";

/// Compile every source under `source_root` into mirrored objects below
/// `build_path`. Returns the object list sorted by path.
pub fn compile_files(
    ctx: &BuildContext,
    source_root: &Path,
    recurse: bool,
    build_path: &Path,
    props: &PropertyMap,
    includes: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let groups: [(&[&str], &str); 3] = [
        (&["S"], RECIPE_S_PATTERN),
        (&["c"], RECIPE_C_PATTERN),
        (&["cpp", "cc", "cxx"], RECIPE_CPP_PATTERN),
    ];

    let mut object_files = Vec::new();
    for (extensions, recipe) in groups {
        let sources = find_sources(source_root, extensions, recurse);
        let objects = compile_files_with_recipe(
            ctx,
            source_root,
            &sources,
            build_path,
            props,
            includes,
            recipe,
        )?;
        object_files.extend(objects);
    }
    object_files.sort();
    Ok(object_files)
}

fn find_sources(source_root: &Path, extensions: &[&str], recurse: bool) -> Vec<PathBuf> {
    if !source_root.is_dir() {
        return Vec::new();
    }
    let max_depth = if recurse { usize::MAX } else { 1 };
    let mut sources: Vec<PathBuf> = WalkDir::new(source_root)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.contains(&e))
                .unwrap_or(false)
        })
        .collect();
    sources.sort();
    sources
}

fn compile_files_with_recipe(
    ctx: &BuildContext,
    source_root: &Path,
    sources: &[PathBuf],
    build_path: &Path,
    props: &PropertyMap,
    includes: &[PathBuf],
    recipe: &str,
) -> Result<Vec<PathBuf>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let progress = if ctx.verbose {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(sources.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar.set_message("Compiling...");
        bar
    };

    let object_files: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
    let errors: Mutex<Vec<anyhow::Error>> = Mutex::new(Vec::new());
    let failed = AtomicBool::new(false);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.effective_jobs())
        .build()
        .context("building compile worker pool")?;

    pool.install(|| {
        sources.par_iter().for_each(|source| {
            // Feeder stop: once something failed (or the build was
            // cancelled) remaining queue entries become no-ops while
            // in-flight jobs drain.
            if failed.load(Ordering::Relaxed) {
                return;
            }
            if ctx.is_cancelled() {
                if !failed.swap(true, Ordering::Relaxed) {
                    errors.lock().unwrap().push(BuildError::Cancelled.into());
                }
                return;
            }

            match compile_file_with_recipe(
                ctx,
                source_root,
                source,
                build_path,
                props,
                includes,
                recipe,
                &progress,
            ) {
                Ok(object) => object_files.lock().unwrap().push(object),
                Err(err) => {
                    failed.store(true, Ordering::Relaxed);
                    errors.lock().unwrap().push(err);
                }
            }
            progress.inc(1);
        });
    });
    progress.finish_and_clear();

    let mut errors = errors.into_inner().unwrap();
    if !errors.is_empty() {
        return Err(errors.remove(0));
    }
    let mut object_files = object_files.into_inner().unwrap();
    object_files.sort();
    Ok(object_files)
}

#[allow(clippy::too_many_arguments)]
fn compile_file_with_recipe(
    ctx: &BuildContext,
    source_root: &Path,
    source: &Path,
    build_path: &Path,
    props: &PropertyMap,
    includes: &[PathBuf],
    recipe: &str,
    progress: &ProgressBar,
) -> Result<PathBuf> {
    let relative = source
        .strip_prefix(source_root)
        .with_context(|| format!("{} is outside {}", source.display(), source_root.display()))?;
    let object_file = append_ext(&build_path.join(relative), "o");

    if let Some(parent) = object_file.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }

    let mut props = props.clone();
    let warning_flags = props
        .get_or_empty(&format!("compiler.warning_flags.{}", ctx.warnings_level.as_str()))
        .to_string();
    props.set("compiler.warning_flags", &warning_flags);
    props.set("includes", &includes_property(includes));
    props.set("source_file", &source.to_string_lossy());
    props.set("object_file", &object_file.to_string_lossy());

    let depfile = append_ext(&build_path.join(relative), "d");
    let up_to_date = obj_file_is_up_to_date(source, &object_file, &depfile)?;

    let command = prepare_command_for_recipe(&props, recipe, false)?;
    if let Some(db) = &ctx.compilation_database {
        let directory = command
            .cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        db.add(&directory, source, command.argv());
    }

    if !up_to_date && !ctx.only_update_compilation_database {
        if ctx.verbose {
            println!("{}", command.command_line());
        } else {
            progress.set_message(format!(
                "Compiling {}",
                source.file_name().unwrap_or_default().to_string_lossy()
            ));
        }
        let output = exec(&command)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            progress.suspend(|| {
                eprintln!(
                    "{} Error compiling {}:\n{}",
                    "x".red(),
                    source.display(),
                    stderr
                )
            });
            return Err(BuildError::CompileFailed {
                file: source.to_path_buf(),
                stderr: stderr.into_owned(),
            }
            .into());
        }
        if !stderr.is_empty() {
            progress.suspend(|| {
                eprintln!(
                    "{} Warning in {}:\n{}",
                    "!".yellow(),
                    source.display(),
                    stderr
                )
            });
        }
        if ctx.verbose && !output.stdout.is_empty() {
            print!("{}", String::from_utf8_lossy(&output.stdout));
        }
    } else if ctx.verbose && up_to_date {
        println!(
            "{} Using previously compiled file: {}",
            "⚡".green(),
            object_file.display()
        );
    }

    Ok(object_file)
}

fn append_ext(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
