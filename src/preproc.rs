//! Preprocessor invocations and missing-include scraping.
//!
//! Include discovery runs the platform's `recipe.preproc.macros` recipe and
//! reads the missing header name out of the compiler's stderr. The scraping
//! regex is the most toolchain-sensitive piece of the pipeline, so it lives
//! behind a trait: new toolchain families plug in their own patterns
//! without touching the discovery engine.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::BuildError;
use crate::exec::{exec, prepare_command_for_recipe, PreparedCommand};
use crate::props::PropertyMap;

pub const PREPROC_RECIPE: &str = "recipe.preproc.macros";

/// Extracts the missing-header token from preprocessor stderr.
pub trait IncludeScraper {
    /// The first missing header named in `stderr`, or `None` when the
    /// output carries no recognizable missing-include error.
    fn missing_include(&self, stderr: &str) -> Option<String>;
}

/// Scraper for the GCC family, which also understands Clang's quoted form.
#[derive(Debug, Default)]
pub struct GccIncludeScraper;

impl IncludeScraper for GccIncludeScraper {
    fn missing_include(&self, stderr: &str) -> Option<String> {
        static RE: OnceLock<regex::Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            // gcc:   foo.cpp:1:10: fatal error: Bridge.h: No such file or directory
            // clang: foo.cpp:1:10: fatal error: 'Bridge.h' file not found
            regex::Regex::new(
                r#"(?m)^[^:\n]*:\d+:\d+:\s*(?:fatal\s+)?error:\s*'?([^:'"\n]+?)['"]?:?\s+(?:No such file or directory|file not found)"#,
            )
            .unwrap()
        });
        re.captures(stderr)
            .map(|caps| caps[1].trim().to_string())
            .filter(|name| !name.is_empty())
    }
}

/// Result of one discovery-mode preprocessor run.
#[derive(Debug)]
pub struct PreprocResult {
    /// Exit status 0.
    pub success: bool,
    /// `None` when the source preprocessed cleanly (or the failure named no
    /// missing header, which later stages will report properly).
    pub missing_include: Option<String>,
    pub stderr: Vec<u8>,
}

fn null_device() -> &'static Path {
    if cfg!(windows) {
        Path::new("nul")
    } else {
        Path::new("/dev/null")
    }
}

/// Quote and `-I`-wrap include folders for the `{includes}` placeholder.
pub fn includes_property(includes: &[PathBuf]) -> String {
    includes
        .iter()
        .map(|dir| format!("\"-I{}\"", dir.display()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn prepare_preproc(
    props: &PropertyMap,
    source: &Path,
    target: &Path,
    includes: &[PathBuf],
) -> Result<PreparedCommand> {
    let mut props = props.clone();
    props.set("source_file", &source.to_string_lossy());
    props.set("preprocessed_file_path", &target.to_string_lossy());
    props.set("includes", &includes_property(includes));

    let mut command = prepare_command_for_recipe(&props, PREPROC_RECIPE, false)?;
    // Discovery must not write dep files next to the null device; the
    // recipe inherits -MMD from the compile pattern, so strip it here.
    command.args.retain(|arg| arg != "-MMD");
    Ok(command)
}

/// Run the preprocessor against the null device to find the next missing
/// include of `source`.
pub fn run_for_discovery(
    props: &PropertyMap,
    source: &Path,
    includes: &[PathBuf],
    scraper: &dyn IncludeScraper,
) -> Result<PreprocResult> {
    let command = prepare_preproc(props, source, null_device(), includes)?;
    let output = exec(&command)?;

    if output.status.success() {
        return Ok(PreprocResult {
            success: true,
            missing_include: None,
            stderr: output.stderr,
        });
    }
    if output.stderr.is_empty() {
        return Err(BuildError::Preprocessor {
            file: source.to_path_buf(),
            message: format!("exited with {} and no output", output.status),
        }
        .into());
    }

    let stderr_text = String::from_utf8_lossy(&output.stderr).into_owned();
    Ok(PreprocResult {
        success: false,
        missing_include: scraper.missing_include(&stderr_text),
        stderr: output.stderr,
    })
}

/// Run the preprocessor writing expanded source to `target` (prototype
/// synthesis). Stderr is relayed on failure.
pub fn run_to_file(
    props: &PropertyMap,
    source: &Path,
    target: &Path,
    includes: &[PathBuf],
    verbose: bool,
) -> Result<()> {
    let command = prepare_preproc(props, source, target, includes)?;
    if verbose {
        println!("{}", command.command_line());
    }
    let output = exec(&command)?;
    if !output.status.success() {
        eprint!("{}", String::from_utf8_lossy(&output.stderr));
        return Err(BuildError::Preprocessor {
            file: source.to_path_buf(),
            message: format!("exited with {}", output.status),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrapes_gcc_form() {
        let stderr = "/tmp/Blink.ino.cpp:1:10: fatal error: Bridge.h: No such file or directory\n \
                      #include <Bridge.h>\n          ^~~~~~~~~~\ncompilation terminated.\n";
        let scraper = GccIncludeScraper;
        assert_eq!(scraper.missing_include(stderr), Some("Bridge.h".to_string()));
    }

    #[test]
    fn test_scrapes_clang_form() {
        let stderr = "Blink.ino.cpp:1:10: fatal error: 'Servo.h' file not found\n";
        let scraper = GccIncludeScraper;
        assert_eq!(scraper.missing_include(stderr), Some("Servo.h".to_string()));
    }

    #[test]
    fn test_scrapes_plain_error_without_fatal() {
        let stderr = "lib.c:10:5: error: missing.h: No such file or directory\n";
        let scraper = GccIncludeScraper;
        assert_eq!(scraper.missing_include(stderr), Some("missing.h".to_string()));
    }

    #[test]
    fn test_picks_first_of_multiline_output() {
        let stderr = "In file included from /tmp/a.cpp:3:\n\
                      /lib/Net/src/Net.h:2:10: fatal error: Deep.h: No such file or directory\n";
        let scraper = GccIncludeScraper;
        assert_eq!(scraper.missing_include(stderr), Some("Deep.h".to_string()));
    }

    #[test]
    fn test_unrelated_errors_yield_none() {
        let scraper = GccIncludeScraper;
        assert_eq!(scraper.missing_include("a.cpp:3:1: error: expected ';'\n"), None);
        assert_eq!(scraper.missing_include(""), None);
    }

    #[test]
    fn test_includes_property_is_quoted() {
        let includes = vec![PathBuf::from("/hw/core"), PathBuf::from("/my libs/Servo")];
        assert_eq!(
            includes_property(&includes),
            "\"-I/hw/core\" \"-I/my libs/Servo\""
        );
    }

    #[test]
    fn test_mmd_is_stripped_from_discovery_argv() {
        let props = PropertyMap::parse(
            "recipe.preproc.macros=gcc -E -MMD {includes} \"{source_file}\" -o \"{preprocessed_file_path}\"\n",
        );
        let command = prepare_preproc(
            &props,
            Path::new("/tmp/a.cpp"),
            null_device(),
            &[PathBuf::from("/core")],
        )
        .unwrap();
        assert!(!command.args.contains(&"-MMD".to_string()));
        assert!(command.args.contains(&"-I/core".to_string()));
    }
}
