//! # sketchc - Sketch Build Pipeline
//!
//! sketchc compiles Arduino-style sketches into linked firmware for a
//! selected target board. It is the build core only: CLI parsing, board and
//! library installation, upload and monitoring are collaborators that feed
//! it inputs (selected board, search paths, user flags) and consume its
//! outputs (artifact paths, size report, error stream).
//!
//! ## What the pipeline does
//!
//! - **Merge**: concatenate the sketch's `.ino` files into one translation
//!   unit with `#line` directives
//! - **Discover**: find the libraries the sketch transitively needs by
//!   preprocessing sources and scraping missing-include errors, journaled
//!   in `includes.cache` so unchanged builds skip the preprocessor
//! - **Synthesize**: add missing function prototypes from a ctags symbol
//!   index so legacy sketches compile
//! - **Compile**: parallel per-file compilation with depfile-driven
//!   up-to-date checks
//! - **Link**: archive the core, link everything, extract upload images and
//!   enforce board size maxima
//!
//! ## Quick start
//!
//! ```no_run
//! use sketchc::board::Fqbn;
//! use sketchc::context::BuildContext;
//! use sketchc::library::{scan_libraries_root, LibraryLocation};
//! use sketchc::preproc::GccIncludeScraper;
//! use sketchc::props::PropertyMap;
//! use sketchc::resolver::LibraryResolver;
//! use sketchc::sketch::Sketch;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let sketch = Sketch::load(Path::new("/sketchbook/Blink"))?;
//! let fqbn = Fqbn::parse("arduino:avr:uno")?;
//!
//! let platform = PropertyMap::load_with_local(Path::new("/hw/avr/platform.txt"))?;
//! let boards = PropertyMap::load(Path::new("/hw/avr/boards.txt"))?;
//! let props = sketchc::board::effective_board_properties(&platform, &boards, &fqbn)?;
//!
//! let mut resolver = LibraryResolver::new(&fqbn.architecture);
//! resolver.add_all(scan_libraries_root(
//!     Path::new("/sketchbook/libraries"),
//!     LibraryLocation::User,
//! )?);
//!
//! let mut ctx = BuildContext::new(sketch, fqbn, props, Path::new("/tmp/build"));
//! sketchc::pipeline::run(&mut ctx, &resolver, &GccIncludeScraper)?;
//! # Ok(())
//! # }
//! ```

/// Core and cached core archiving.
pub mod archive;

/// FQBN parsing and effective board properties.
pub mod board;

/// Parallel compile scheduler.
pub mod compile;

/// Clang-compatible compilation database sink.
pub mod compiledb;

/// Shared build context threaded through the stages.
pub mod context;

/// ctags output parsing and prototype generation.
pub mod ctags;

/// Depfile parsing and up-to-date checks.
pub mod depfile;

/// Include discovery engine and source-file queue.
pub mod discovery;

/// Typed error kinds.
pub mod error;

/// Recipe expansion into runnable commands.
pub mod exec;

/// Optimization and vendor flag rewrites.
pub mod flags;

/// Phase-boundary hook recipes.
pub mod hooks;

/// The persisted include-discovery journal.
pub mod journal;

/// Library model and metadata.
pub mod library;

/// Sketch source merging.
pub mod merge;

/// Sketch, libraries, core, link and objcopy phases.
pub mod phases;

/// The build driver.
pub mod pipeline;

/// Preprocessor runner and missing-include scrapers.
pub mod preproc;

/// Ordered property maps with `{key}` expansion.
pub mod props;

/// Prototype synthesis over the merged sketch.
pub mod prototypes;

/// Include-to-library resolution.
pub mod resolver;

/// Firmware size report and limits.
pub mod sizer;

/// Sketch folder layout and validation.
pub mod sketch;

pub use context::BuildContext;
pub use error::BuildError;
