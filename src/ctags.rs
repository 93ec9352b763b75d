//! Parse exuberant-ctags output into prototype candidates.
//!
//! The tags tool runs over the preprocessed-and-filtered sketch with
//! `--line-directives`, so every record carries the original file and line
//! of its definition. Free functions without an existing prototype become
//! synthesized declarations; everything else (members, records inside
//! bodies, already-declared functions) is filtered out here.

use std::collections::HashSet;

/// One record of the tags output.
#[derive(Debug, Clone, Default)]
pub struct CTag {
    pub name: String,
    pub file: String,
    pub kind: String,
    pub line: usize,
    pub signature: String,
    pub returntype: String,
    pub class: String,
    pub strukt: String,
    pub namespace: String,
    /// `file:` scope marker (static / translation-unit local).
    pub file_scope: bool,
    /// Set when the record sits inside an `extern "C" { ... }` block.
    pub extern_c: bool,
    /// Set when the record sits inside another definition's body.
    pub in_body: bool,
}

/// A synthesized declaration ready for splicing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prototype {
    pub file: String,
    pub line: usize,
    /// Linkage prefix, e.g. `extern "C"`; empty for plain C++ linkage.
    pub modifiers: String,
    /// The declaration itself, e.g. `void loop();`.
    pub text: String,
}

/// Parse a GNU cpp line marker (`# 33 "/path/f.ino" 2`) or a `#line`
/// directive. Returns the line number the *next* line corresponds to and
/// the file, when present.
pub(crate) fn parse_line_marker(line: &str) -> Option<(usize, Option<String>)> {
    let rest = line.strip_prefix('#')?;
    let rest = rest.strip_prefix("line").unwrap_or(rest);
    let rest = rest.trim_start();
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let number: usize = rest[..digits_end].parse().ok()?;
    let rest = rest[digits_end..].trim_start();
    if let Some(rest) = rest.strip_prefix('"') {
        let close = rest.find('"')?;
        let file = rest[..close].replace("\\\\", "\\").replace("\\\"", "\"");
        Some((number, Some(file)))
    } else if rest.is_empty() {
        Some((number, None))
    } else {
        None
    }
}

pub fn parse_ctags_output(output: &str) -> Vec<CTag> {
    output
        .lines()
        .filter(|line| !line.starts_with("!_") && !line.trim().is_empty())
        .filter_map(parse_tag_line)
        .collect()
}

fn parse_tag_line(line: &str) -> Option<CTag> {
    let mut parts = line.split('\t');
    let name = parts.next()?.to_string();
    let file = parts.next()?.to_string();

    let mut tag = CTag {
        name,
        file,
        line: 0,
        ..Default::default()
    };

    for part in parts {
        if part == "file:" {
            tag.file_scope = true;
            continue;
        }
        // The excmd pattern field (`/^...$/;"`) carries no key
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        match key {
            "kind" => tag.kind = value.to_string(),
            "line" => tag.line = value.parse().unwrap_or(0),
            "signature" => tag.signature = value.to_string(),
            "returntype" => tag.returntype = value.to_string(),
            "class" => tag.class = value.to_string(),
            "struct" => tag.strukt = value.to_string(),
            "namespace" => tag.namespace = value.to_string(),
            _ => {}
        }
    }
    Some(tag)
}

#[derive(Debug)]
struct Region {
    file: String,
    start: usize,
    end: usize,
    extern_c: bool,
}

/// Scan the filtered source for brace-delimited regions, in original
/// (file, line) coordinates as established by the line markers. Regions
/// opened by `extern "C"` are linkage blocks; every other block is a body
/// (function, class or namespace) whose inner records must not get
/// prototypes.
fn scan_regions(filtered_source: &str) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut stack: Vec<(String, usize, bool)> = Vec::new();
    let mut current_file = String::new();
    let mut current_line: usize = 0;
    let mut pending_extern = false;

    for raw_line in filtered_source.lines() {
        if let Some((number, file)) = parse_line_marker(raw_line) {
            current_line = number;
            if let Some(file) = file {
                current_file = file;
            }
            continue;
        }

        if raw_line.contains("extern \"C\"") {
            pending_extern = true;
        }
        for c in raw_line.chars() {
            match c {
                '{' => {
                    stack.push((current_file.clone(), current_line, pending_extern));
                    pending_extern = false;
                }
                '}' => {
                    if let Some((file, start, extern_c)) = stack.pop() {
                        regions.push(Region {
                            file,
                            start,
                            end: current_line,
                            extern_c,
                        });
                    }
                }
                _ => {}
            }
        }
        current_line += 1;
    }

    // Unterminated blocks swallow everything to the end of their file
    for (file, start, extern_c) in stack {
        regions.push(Region {
            file,
            start,
            end: usize::MAX,
            extern_c,
        });
    }
    regions
}

/// Annotate tags with `extern "C"` linkage and in-body placement by
/// checking their position against the block structure of the filtered
/// source.
pub fn fix_linkage_and_scopes(tags: &mut [CTag], filtered_source: &str) {
    let regions = scan_regions(filtered_source);
    for tag in tags.iter_mut() {
        for region in &regions {
            if region.file != tag.file {
                continue;
            }
            if region.extern_c {
                if tag.line >= region.start && tag.line <= region.end {
                    tag.extern_c = true;
                }
            } else if tag.line > region.start && tag.line <= region.end {
                tag.in_body = true;
            }
        }
    }
}

/// Build the prototype list: free functions with a parsable signature that
/// are not members, not nested inside a body and not already declared.
/// Also returns the line of the first function, which callers may use as a
/// fallback insertion point.
pub fn generate_prototypes(tags: &[CTag]) -> (Vec<Prototype>, Option<usize>) {
    // Signatures already declared by the sketch itself
    let declared: HashSet<(String, String)> = tags
        .iter()
        .filter(|t| t.kind == "prototype")
        .map(|t| (t.name.clone(), t.signature.clone()))
        .collect();

    let mut prototypes = Vec::new();
    let mut emitted: HashSet<String> = HashSet::new();
    let mut first_function_line = None;

    for tag in tags {
        if tag.kind != "function" {
            continue;
        }
        if first_function_line.is_none() {
            first_function_line = Some(tag.line);
        }
        if tag.in_body {
            continue;
        }
        // Members get declared by their class, not by us
        if !tag.class.is_empty() || !tag.strukt.is_empty() || !tag.namespace.is_empty() {
            continue;
        }
        if tag.name.contains("::") {
            continue;
        }
        if tag.signature.is_empty() {
            continue;
        }
        if declared.contains(&(tag.name.clone(), tag.signature.clone())) {
            continue;
        }
        // A default argument may only appear once; the definition already
        // carries it, so no separate declaration can be emitted.
        if tag.signature.contains('=') {
            continue;
        }

        let returntype = if tag.returntype.is_empty() {
            "void".to_string()
        } else {
            tag.returntype.clone()
        };
        let text = format!("{} {}{};", returntype, tag.name, tag.signature);
        if !emitted.insert(text.clone()) {
            continue;
        }

        prototypes.push(Prototype {
            file: tag.file.clone(),
            line: tag.line,
            modifiers: if tag.extern_c {
                "extern \"C\"".to_string()
            } else {
                String::new()
            },
            text,
        });
    }

    (prototypes, first_function_line)
}
