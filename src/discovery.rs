//! Include discovery: figure out which libraries the sketch needs.
//!
//! Every `#include` in a source file pulls in the library providing that
//! header, recursively through library sources. A work queue starts with
//! the merged sketch; each file is preprocessed until it stops reporting
//! missing headers, resolving each one to a library and queueing that
//! library's sources in turn. Results are journaled in `includes.cache` so
//! unchanged files skip the preprocessor entirely on the next run.

use anyhow::{bail, Context, Result};
use colored::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::context::BuildContext;
use crate::depfile::obj_file_is_up_to_date;
use crate::error::BuildError;
use crate::journal::{Journal, JOURNAL_FILE_NAME};
use crate::library::{Library, Precompiled};
use crate::preproc::{run_for_discovery, IncludeScraper};
use crate::resolver::LibraryResolver;

/// Extensions that take part in include scanning and compilation.
pub const SOURCE_EXTENSIONS: &[&str] = &["c", "cpp", "cc", "cxx", "S"];

/// Where a source file came from; determines its build output location.
#[derive(Debug, Clone)]
pub enum SourceOrigin {
    Sketch,
    Library(Arc<Library>),
}

impl SourceOrigin {
    fn same_as(&self, other: &SourceOrigin) -> bool {
        match (self, other) {
            (SourceOrigin::Sketch, SourceOrigin::Sketch) => true,
            (SourceOrigin::Library(a), SourceOrigin::Library(b)) => {
                a.name == b.name && a.root == b.root
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub origin: SourceOrigin,
    /// Relative to the origin's source root.
    pub relative: PathBuf,
}

impl SourceFile {
    pub fn new(ctx: &BuildContext, origin: SourceOrigin, path: &Path) -> Result<Self> {
        let relative = if path.is_absolute() {
            let root = match &origin {
                SourceOrigin::Sketch => ctx.sketch_build_path(),
                SourceOrigin::Library(lib) => lib.source_dir.clone(),
            };
            path.strip_prefix(&root)
                .with_context(|| {
                    format!("{} is outside its origin root {}", path.display(), root.display())
                })?
                .to_path_buf()
        } else {
            path.to_path_buf()
        };
        Ok(SourceFile { origin, relative })
    }

    pub fn source_path(&self, ctx: &BuildContext) -> PathBuf {
        match &self.origin {
            SourceOrigin::Sketch => ctx.sketch_build_path().join(&self.relative),
            SourceOrigin::Library(lib) => lib.source_dir.join(&self.relative),
        }
    }

    pub fn object_path(&self, ctx: &BuildContext) -> PathBuf {
        self.build_root(ctx).join(append_ext(&self.relative, "o"))
    }

    pub fn depfile_path(&self, ctx: &BuildContext) -> PathBuf {
        self.build_root(ctx).join(append_ext(&self.relative, "d"))
    }

    fn build_root(&self, ctx: &BuildContext) -> PathBuf {
        match &self.origin {
            SourceOrigin::Sketch => ctx.sketch_build_path(),
            SourceOrigin::Library(lib) => ctx.libraries_build_path().join(&lib.name),
        }
    }

    fn same_as(&self, other: &SourceFile) -> bool {
        self.origin.same_as(&other.origin) && self.relative == other.relative
    }
}

fn append_ext(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// FIFO that drops duplicate pushes, keyed by (origin, relative path).
#[derive(Debug, Default)]
pub struct SourceFileQueue {
    items: std::collections::VecDeque<SourceFile>,
    seen: Vec<SourceFile>,
}

impl SourceFileQueue {
    pub fn push(&mut self, file: SourceFile) {
        if self.seen.iter().any(|f| f.same_as(&file)) {
            return;
        }
        self.seen.push(file.clone());
        self.items.push_back(file);
    }

    pub fn pop(&mut self) -> Option<SourceFile> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Run include discovery, populating `ctx.imported_libraries` and
/// `ctx.include_folders` and maintaining the on-disk journal.
pub fn find_includes(
    ctx: &mut BuildContext,
    resolver: &LibraryResolver,
    scraper: &dyn IncludeScraper,
) -> Result<()> {
    let journal_path = ctx.build_path.join(JOURNAL_FILE_NAME);
    let mut journal = Journal::read(&journal_path);

    let Some(core_folder) = ctx.core_folder() else {
        bail!("build.core.path is not set for board {}", ctx.fqbn);
    };
    append_include_folder(ctx, &mut journal, None, "", &core_folder);
    if let Some(variant_folder) = ctx.variant_folder() {
        append_include_folder(ctx, &mut journal, None, "", &variant_folder);
    }

    let mut queue = SourceFileQueue::default();
    queue.push(SourceFile {
        origin: SourceOrigin::Sketch,
        relative: PathBuf::from(ctx.sketch.merged_file_name()),
    });
    queue_sources_from_folder(ctx, &mut queue, SourceOrigin::Sketch, &ctx.sketch_build_path(), false)?;
    let src_subfolder = ctx.sketch_build_path().join("src");
    if src_subfolder.is_dir() {
        queue_sources_from_folder(ctx, &mut queue, SourceOrigin::Sketch, &src_subfolder, true)?;
    }

    while let Some(source) = queue.pop() {
        if ctx.is_cancelled() {
            return Err(BuildError::Cancelled.into());
        }
        if let Err(err) =
            find_includes_until_done(ctx, &mut journal, &mut queue, resolver, scraper, &source)
        {
            // A stale journal must not survive a failed discovery
            let _ = fs::remove_file(&journal_path);
            return Err(err);
        }
    }

    journal.expect_end();
    journal.write(&journal_path)?;

    fail_if_imported_library_is_wrong(ctx)
}

fn append_include_folder(
    ctx: &mut BuildContext,
    journal: &mut Journal,
    source: Option<&Path>,
    include: &str,
    folder: &Path,
) {
    ctx.include_folders.push(folder.to_path_buf());
    journal.expect_entry(source, include, Some(folder));
}

fn find_includes_until_done(
    ctx: &mut BuildContext,
    journal: &mut Journal,
    queue: &mut SourceFileQueue,
    resolver: &LibraryResolver,
    scraper: &dyn IncludeScraper,
    source: &SourceFile,
) -> Result<()> {
    let source_path = source.source_path(ctx);
    let object_path = source.object_path(ctx);
    let depfile_path = source.depfile_path(ctx);

    let unchanged = obj_file_is_up_to_date(&source_path, &object_path, &depfile_path)?;

    let mut first = true;
    loop {
        journal.expect_file(&source_path);

        // The legacy utility folder is on the include path only while
        // scanning the owning library's own sources.
        let mut includes = ctx.include_folders.clone();
        if let SourceOrigin::Library(lib) = &source.origin {
            if let Some(utility) = &lib.utility_dir {
                includes.push(utility.clone());
            }
        }

        let mut from_cache = false;
        let mut stderr: Vec<u8> = Vec::new();
        let include = if unchanged && journal.is_valid() {
            from_cache = true;
            if first && ctx.verbose {
                println!(
                    "{} Using cached library dependencies for file: {}",
                    "⚡".green(),
                    source_path.display()
                );
            }
            journal.peek().map(|e| e.include.clone()).unwrap_or_default()
        } else {
            let result = run_for_discovery(&ctx.build_properties, &source_path, &includes, scraper)?;
            stderr = result.stderr;
            result.missing_include.unwrap_or_default()
        };

        if include.is_empty() {
            journal.expect_entry(Some(&source_path), "", None);
            return Ok(());
        }

        let Some(resolution) = resolver.resolve(&include) else {
            if from_cache {
                // The cache promised a missing include; get the compiler's
                // own error to show. A clean run here means the cache lied.
                let result =
                    run_for_discovery(&ctx.build_properties, &source_path, &includes, scraper)?;
                if result.success {
                    return Err(BuildError::CacheInconsistency.into());
                }
                stderr = result.stderr;
            }
            let _ = std::io::stderr().write_all(&stderr);
            return Err(BuildError::UnresolvedInclude {
                include,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            }
            .into());
        };

        let library = resolution.library;
        if !resolution.alternatives.is_empty() {
            println!(
                "{} Multiple libraries were found for \"{}\"",
                "!".yellow(),
                include
            );
            println!("   Used: {}", library.root.display());
            for alternative in &resolution.alternatives {
                println!("   Not used: {}", alternative.root.display());
            }
        }

        let already_imported = ctx
            .imported_libraries
            .iter()
            .any(|l| l.name == library.name && l.root == library.root);
        if !already_imported {
            ctx.imported_libraries.push(library.clone());
        }

        if library.precompiled == Precompiled::Full {
            // Fully precompiled: headers only, dependencies frozen into the
            // shipped archive, so nothing to scan.
            if ctx.verbose {
                println!(
                    "{} Skipping dependency detection for precompiled library {}",
                    "⚡".green(),
                    library.name
                );
            }
            ctx.include_folders.push(library.source_dir.clone());
            journal.expect_entry(Some(&source_path), &include, None);
        } else {
            append_include_folder(ctx, journal, Some(&source_path), &include, &library.source_dir);
            for (folder, recurse) in library.source_dirs() {
                queue_sources_from_folder(
                    ctx,
                    queue,
                    SourceOrigin::Library(library.clone()),
                    &folder,
                    recurse,
                )?;
            }
        }
        first = false;
    }
}

fn queue_sources_from_folder(
    ctx: &BuildContext,
    queue: &mut SourceFileQueue,
    origin: SourceOrigin,
    folder: &Path,
    recurse: bool,
) -> Result<()> {
    if !folder.is_dir() {
        return Ok(());
    }
    let max_depth = if recurse { usize::MAX } else { 1 };
    let mut paths: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|e| !is_sccs_or_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| SOURCE_EXTENSIONS.contains(&e))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    for path in paths {
        queue.push(SourceFile::new(ctx, origin.clone(), &path)?);
    }
    Ok(())
}

fn is_sccs_or_hidden(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.')
        || matches!(
            name.as_ref(),
            "CVS" | "RCS" | ".git" | ".svn" | ".hg" | ".bzr" | ".vscode" | ".settings"
        )
}

/// Reject imported libraries with a contradictory layout: a `src/`-rooted
/// library must not also carry a legacy `utility/` folder.
fn fail_if_imported_library_is_wrong(ctx: &BuildContext) -> Result<()> {
    for library in &ctx.imported_libraries {
        if library.recursive && library.root.join("utility").is_dir() {
            bail!(
                "library {} has both 'src' and 'utility' folders; double check the library structure",
                library.name
            );
        }
    }
    Ok(())
}

/// Warn about imported libraries that do not declare the target
/// architecture; they are used anyway.
pub fn warn_about_arch_incompatible_libraries(ctx: &BuildContext) {
    let arch = &ctx.fqbn.architecture;
    for library in &ctx.imported_libraries {
        if !library.supports_arch(arch) {
            println!(
                "{} Library {} claims to run on {} architecture(s) and may be incompatible with your current board which runs on {} architecture(s).",
                "!".yellow(),
                library.name,
                library.architectures.join(", "),
                arch
            );
        }
    }
}
