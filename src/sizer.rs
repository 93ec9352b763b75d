//! Firmware size report and board maxima enforcement.

use anyhow::{Context, Result};
use colored::*;
use regex::RegexBuilder;

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::exec::{exec_capture_stdout, prepare_command_for_recipe};

pub const RECIPE_SIZE_PATTERN: &str = "recipe.size.pattern";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSize {
    pub name: String,
    pub size: u64,
    pub max_size: Option<u64>,
}

/// Sum the first capture group over every match of `pattern` (applied
/// per-line) in the size tool's output.
pub fn compute_section_size(pattern: &str, output: &str) -> Result<u64> {
    let re = RegexBuilder::new(pattern)
        .multi_line(true)
        .build()
        .with_context(|| format!("invalid size regex: {}", pattern))?;
    let mut total: u64 = 0;
    for caps in re.captures_iter(output) {
        let value = caps
            .get(1)
            .map(|m| m.as_str())
            .unwrap_or("0")
            .trim()
            .parse::<u64>()
            .unwrap_or(0);
        total += value;
    }
    Ok(total)
}

fn max_from_props(ctx: &BuildContext, key: &str) -> Option<u64> {
    ctx.build_properties.get(key).and_then(|v| v.parse().ok())
}

/// Run the platform's size recipe, report program storage and dynamic
/// memory usage, and fail when a board maximum is exceeded. The report is
/// emitted even for an oversized build.
pub fn check_size(ctx: &mut BuildContext) -> Result<()> {
    if ctx.only_update_compilation_database {
        return Ok(());
    }
    let size_regex = ctx.build_properties.get_or_empty("recipe.size.regex").to_string();
    if size_regex.is_empty() {
        // Platforms without size support simply skip the report
        return Ok(());
    }

    let command = prepare_command_for_recipe(&ctx.build_properties, RECIPE_SIZE_PATTERN, false)?;
    let stdout = exec_capture_stdout(&command, ctx.verbose).context("running size tool")?;
    let output = String::from_utf8_lossy(&stdout);

    let text_size = compute_section_size(&size_regex, &output)?;
    let max_text = max_from_props(ctx, "upload.maximum_size");

    let data_regex = ctx.build_properties.get_or_empty("recipe.size.regex.data").to_string();
    let data_size = if data_regex.is_empty() {
        None
    } else {
        Some(compute_section_size(&data_regex, &output)?)
    };
    let max_data = max_from_props(ctx, "upload.maximum_data_size");

    match max_text {
        Some(max) => println!(
            "Sketch uses {} bytes ({}%) of program storage space. Maximum is {} bytes.",
            text_size,
            text_size * 100 / max.max(1),
            max
        ),
        None => println!("Sketch uses {} bytes of program storage space.", text_size),
    }
    if let Some(data_size) = data_size {
        match max_data {
            Some(max) => println!(
                "Global variables use {} bytes ({}%) of dynamic memory, leaving {} bytes for local variables. Maximum is {} bytes.",
                data_size,
                data_size * 100 / max.max(1),
                max.saturating_sub(data_size),
                max
            ),
            None => println!("Global variables use {} bytes of dynamic memory.", data_size),
        }
    }

    ctx.executable_sections.push(SectionSize {
        name: "text".to_string(),
        size: text_size,
        max_size: max_text,
    });
    if let Some(data_size) = data_size {
        ctx.executable_sections.push(SectionSize {
            name: "data".to_string(),
            size: data_size,
            max_size: max_data,
        });
    }

    if let Some(max) = max_text {
        if text_size > max {
            eprintln!("{} Sketch too big", "x".red());
            return Err(BuildError::SizeExceeded {
                section: "text".to_string(),
                size: text_size,
                max_size: max,
            }
            .into());
        }
    }
    if let (Some(data_size), Some(max)) = (data_size, max_data) {
        if data_size > max {
            eprintln!("{} Not enough memory", "x".red());
            return Err(BuildError::SizeExceeded {
                section: "data".to_string(),
                size: data_size,
                max_size: max,
            }
            .into());
        }
    }
    Ok(())
}
