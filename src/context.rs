//! Shared state threaded through the pipeline stages.
//!
//! The configuration half (paths, board, options) is set up once by the
//! caller; the accumulator half is appended to by the stages in order and
//! stays available for inspection when a stage fails.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::board::Fqbn;
use crate::compiledb::CompilationDatabase;
use crate::library::Library;
use crate::props::PropertyMap;
use crate::sizer::SectionSize;
use crate::sketch::Sketch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningsLevel {
    None,
    Default,
    More,
    All,
}

impl WarningsLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningsLevel::None => "none",
            WarningsLevel::Default => "default",
            WarningsLevel::More => "more",
            WarningsLevel::All => "all",
        }
    }
}

pub struct BuildContext {
    // --- Configuration (read-only after pipeline entry) ---
    pub sketch: Sketch,
    pub fqbn: Fqbn,
    /// Effective board properties, menu-resolved and OS-overlaid.
    pub build_properties: PropertyMap,
    pub build_path: PathBuf,
    /// Root of the cross-build core archive cache, when enabled.
    pub build_cache_path: Option<PathBuf>,
    /// Compile worker count; 0 means one per logical CPU.
    pub jobs: usize,
    pub verbose: bool,
    pub debug_level: u32,
    pub warnings_level: WarningsLevel,
    /// Record compile commands without running anything.
    pub only_update_compilation_database: bool,
    pub compilation_database: Option<CompilationDatabase>,
    /// Drop `-O*`/`-flto` per section, for debugger-friendly builds.
    pub unoptimize_sketch: bool,
    pub unoptimize_core: bool,
    pub unoptimize_libraries: bool,
    /// Append `com.sysprogs.extraflags.<scope>` vendor flags per section.
    pub vendor_extra_flags: bool,
    cancelled: Arc<AtomicBool>,

    // --- Accumulators (appended by stages, never replaced) ---
    pub include_folders: Vec<PathBuf>,
    pub imported_libraries: Vec<Arc<Library>>,
    /// Merged sketch source; rewritten by the prototype stage.
    pub source: String,
    pub prototypes_section: String,
    pub prototypes_line: usize,
    pub sketch_object_files: Vec<PathBuf>,
    pub libraries_object_files: Vec<PathBuf>,
    /// `-L` search dirs and custom flags from precompiled libraries, handed
    /// to the link recipe as `{compiler.libraries.ldflags}`.
    pub libraries_ldflags: String,
    pub core_object_files: Vec<PathBuf>,
    pub core_archive_path: Option<PathBuf>,
    pub executable_sections: Vec<SectionSize>,
}

impl BuildContext {
    pub fn new(sketch: Sketch, fqbn: Fqbn, build_properties: PropertyMap, build_path: &Path) -> Self {
        BuildContext {
            sketch,
            fqbn,
            build_properties,
            build_path: build_path.to_path_buf(),
            build_cache_path: None,
            jobs: 0,
            verbose: false,
            debug_level: 0,
            warnings_level: WarningsLevel::None,
            only_update_compilation_database: false,
            compilation_database: None,
            unoptimize_sketch: false,
            unoptimize_core: false,
            unoptimize_libraries: false,
            vendor_extra_flags: false,
            cancelled: Arc::new(AtomicBool::new(false)),
            include_folders: Vec::new(),
            imported_libraries: Vec::new(),
            source: String::new(),
            prototypes_section: String::new(),
            prototypes_line: 0,
            sketch_object_files: Vec::new(),
            libraries_object_files: Vec::new(),
            libraries_ldflags: String::new(),
            core_object_files: Vec::new(),
            core_archive_path: None,
            executable_sections: Vec::new(),
        }
    }

    pub fn sketch_build_path(&self) -> PathBuf {
        self.build_path.join("sketch")
    }

    pub fn core_build_path(&self) -> PathBuf {
        self.build_path.join("core")
    }

    pub fn libraries_build_path(&self) -> PathBuf {
        self.build_path.join("libraries")
    }

    pub fn preproc_path(&self) -> PathBuf {
        self.build_path.join("preproc")
    }

    pub fn merged_sketch_path(&self) -> PathBuf {
        self.sketch_build_path().join(self.sketch.merged_file_name())
    }

    pub fn core_folder(&self) -> Option<PathBuf> {
        self.build_properties
            .get("build.core.path")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    pub fn variant_folder(&self) -> Option<PathBuf> {
        self.build_properties
            .get("build.variant.path")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// A handle other threads (signal handlers, RPC) can use to stop the
    /// build at the next checkpoint.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Worker count for the compile pool.
    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}
