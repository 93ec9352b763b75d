//! Prototype synthesis: make legacy sketches compile without forward
//! declarations.
//!
//! The merged sketch is preprocessed, cut down to the regions belonging to
//! the sketch's own files, fed to the tags tool, and every free function
//! lacking a declaration gets one spliced in near the top of the merged
//! unit, wrapped in `#line` directives so diagnostics keep pointing at the
//! user's code.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::context::BuildContext;
use crate::ctags::{
    fix_linkage_and_scopes, generate_prototypes, parse_ctags_output, parse_line_marker, Prototype,
};
use crate::error::BuildError;
use crate::exec::{exec_capture_stdout, prepare_command_for_recipe};
use crate::merge::{quote_cpp_path, write_if_changed};
use crate::preproc::run_to_file;
use crate::props::PropertyMap;
use crate::sketch::Sketch;

pub const CTAGS_TARGET_FILE: &str = "ctags_target_for_gcc_minus_e.cpp";

/// Run the full synthesis over the merged sketch and rewrite it in place.
pub fn add_prototypes(ctx: &mut BuildContext) -> Result<()> {
    let preproc_dir = ctx.preproc_path();
    fs::create_dir_all(&preproc_dir)
        .map_err(|e| BuildError::io(&preproc_dir, e))
        .context("creating preproc folder")?;
    let target = preproc_dir.join(CTAGS_TARGET_FILE);

    let merged_path = ctx.merged_sketch_path();
    run_to_file(
        &ctx.build_properties,
        &merged_path,
        &target,
        &ctx.include_folders,
        ctx.verbose,
    )?;

    let expanded = fs::read_to_string(&target).map_err(|e| BuildError::io(&target, e))?;
    let filtered = filter_sketch_source(&ctx.sketch, &expanded);
    fs::write(&target, &filtered).map_err(|e| BuildError::io(&target, e))?;

    let output = run_ctags(&ctx.build_properties, &target, ctx.verbose)?;
    let mut tags = parse_ctags_output(&output);
    fix_linkage_and_scopes(&mut tags, &filtered);
    let (prototypes, _first_function_line) = generate_prototypes(&tags);

    let (section, line, spliced) = splice_prototypes(&ctx.source, &prototypes);
    ctx.prototypes_section = section;
    ctx.prototypes_line = line;
    ctx.source = spliced;

    write_if_changed(&merged_path, &ctx.source)?;
    Ok(())
}

fn run_ctags(build_properties: &PropertyMap, target: &Path, verbose: bool) -> Result<String> {
    let mut props = build_properties.clone();
    props.merge(&build_properties.subtree("tools").subtree("ctags"));
    props.set("source_file", &target.to_string_lossy());

    if props.get_or_empty("pattern").is_empty() {
        return Err(BuildError::MissingRecipe {
            recipe: "tools.ctags.pattern".to_string(),
        }
        .into());
    }
    let command = prepare_command_for_recipe(&props, "pattern", false)?;
    let stdout = exec_capture_stdout(&command, verbose).context("running ctags")?;
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

/// Keep only the regions of the preprocessed output that come from the
/// sketch's own files, so library and core declarations are not scanned.
pub fn filter_sketch_source(sketch: &Sketch, source: &str) -> String {
    let mut names: HashSet<String> = HashSet::new();
    names.insert(sketch.main_file.to_string_lossy().into_owned());
    for file in &sketch.other_sketch_files {
        names.insert(file.to_string_lossy().into_owned());
    }

    let mut filtered = String::new();
    let mut in_sketch = false;
    for line in source.lines() {
        match parse_line_marker(line) {
            Some((_, Some(file))) => {
                in_sketch = names.contains(&file);
                if in_sketch {
                    filtered.push_str(line);
                    filtered.push('\n');
                }
            }
            _ => {
                if in_sketch {
                    filtered.push_str(line);
                    filtered.push('\n');
                }
            }
        }
    }
    filtered
}

/// Strip comments from one physical line, updating block-comment state.
/// Returns what is left.
fn strip_comments(raw: &str, in_block: &mut bool) -> String {
    let mut out = String::new();
    let mut s = raw;
    loop {
        if *in_block {
            match s.find("*/") {
                Some(pos) => {
                    s = &s[pos + 2..];
                    *in_block = false;
                }
                None => break,
            }
        } else if let Some(pos) = s.find("/*") {
            let before_line_comment = s.find("//").map(|p| p < pos).unwrap_or(false);
            if before_line_comment {
                out.push_str(&s[..s.find("//").unwrap()]);
                break;
            }
            out.push_str(&s[..pos]);
            s = &s[pos + 2..];
            *in_block = true;
        } else if let Some(pos) = s.find("//") {
            out.push_str(&s[..pos]);
            break;
        } else {
            out.push_str(s);
            break;
        }
    }
    out
}

/// Find where prototypes go: the first non-blank, non-comment,
/// non-preprocessor line of the merged unit. Returns the physical index
/// plus the original (file, line) that position maps to.
fn find_insertion_point(merged: &str) -> Option<(usize, String, usize)> {
    let mut file = String::new();
    let mut line_no: usize = 1;
    let mut in_block = false;

    for (idx, raw) in merged.lines().enumerate() {
        if !in_block {
            if let Some((number, marker_file)) = parse_line_marker(raw) {
                line_no = number;
                if let Some(marker_file) = marker_file {
                    file = marker_file;
                }
                continue;
            }
        }
        let here = (idx, file.clone(), line_no);
        line_no += 1;

        let code = strip_comments(raw, &mut in_block);
        let code = code.trim();
        if code.is_empty() || code.starts_with('#') {
            continue;
        }
        return Some(here);
    }
    None
}

/// Compose the prototype section and splice it into the merged source.
/// Returns (section, original insertion line, new source). A sketch that
/// needs no prototypes comes back untouched.
pub fn splice_prototypes(merged: &str, prototypes: &[Prototype]) -> (String, usize, String) {
    if prototypes.is_empty() {
        return (String::new(), 0, merged.to_string());
    }
    let Some((physical_idx, file, line)) = find_insertion_point(merged) else {
        return (String::new(), 0, merged.to_string());
    };

    let mut section = String::new();
    for prototype in prototypes {
        section.push_str(&format!(
            "#line {} {}\n",
            prototype.line,
            quote_cpp_path(Path::new(&prototype.file))
        ));
        if prototype.modifiers.is_empty() {
            section.push_str(&format!("{}\n", prototype.text));
        } else {
            section.push_str(&format!("{} {}\n", prototype.modifiers, prototype.text));
        }
    }
    section.push_str(&format!(
        "#line {} {}\n",
        line,
        quote_cpp_path(Path::new(&file))
    ));

    let mut out = String::new();
    for (idx, raw) in merged.lines().enumerate() {
        if idx == physical_idx {
            out.push_str(&section);
        }
        out.push_str(raw);
        out.push('\n');
    }
    // The merged source always ends with a newline from the writer; lines()
    // reconstruction above preserves that.
    (section, line, out)
}
