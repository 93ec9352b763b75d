//! Turn recipe templates into runnable commands.
//!
//! Recipes expand to full command lines which are split into argv with
//! shell-style quoting. Very long command lines are shortened by making
//! file arguments relative to `build.path` and running the child there;
//! the parent process working directory is never touched.

use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::BuildError;
use crate::props::PropertyMap;

/// Windows caps CreateProcess command lines at 32k; stay under it
/// everywhere for predictable behavior.
pub const COMMAND_LINE_LIMIT: usize = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the child, set by the long-command-line
    /// fallback.
    pub cwd: Option<PathBuf>,
}

impl PreparedCommand {
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Full argv, program first, as recorded in the compilation database.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        argv.extend(self.args.iter().cloned());
        argv
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

/// Split a command line into argv honoring `"..."` and `'...'` quoting.
pub fn split_quoted(command_line: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_part = false;
    let mut quote: Option<char> = None;

    for c in command_line.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                    in_part = true;
                } else if c.is_whitespace() {
                    if in_part {
                        parts.push(std::mem::take(&mut current));
                        in_part = false;
                    }
                } else {
                    current.push(c);
                    in_part = true;
                }
            }
        }
    }
    if quote.is_some() {
        bail!("unbalanced quote in command line: {}", command_line);
    }
    if in_part {
        parts.push(current);
    }
    Ok(parts)
}

/// Expand a recipe into a runnable command. `remove_unset` wipes `{...}`
/// tokens that survived expansion (hooks use this; compile recipes keep
/// them visible so misconfigured platforms fail loudly).
pub fn prepare_command_for_recipe(
    props: &PropertyMap,
    recipe: &str,
    remove_unset: bool,
) -> Result<PreparedCommand> {
    let command_line = if remove_unset {
        let pattern = props.get_or_empty(recipe);
        if pattern.is_empty() {
            return Err(BuildError::MissingRecipe {
                recipe: recipe.to_string(),
            }
            .into());
        }
        props.expand_removing_unresolved(pattern)
    } else {
        props.expand_recipe(recipe)?
    };

    let mut parts = split_quoted(&command_line)?;
    if parts.is_empty() {
        return Err(BuildError::MissingRecipe {
            recipe: recipe.to_string(),
        }
        .into());
    }
    let program = parts.remove(0);
    let mut command = PreparedCommand {
        program,
        args: parts,
        cwd: None,
    };

    if command_line.len() > COMMAND_LINE_LIMIT {
        if let Some(build_path) = props.get("build.path") {
            relativize_against(&mut command, Path::new(build_path));
        }
    }

    Ok(command)
}

/// Rewrite argv entries that are existing file paths into paths relative to
/// `base`, and run the child from `base`.
fn relativize_against(command: &mut PreparedCommand, base: &Path) {
    for arg in &mut command.args {
        let path = Path::new(arg.as_str());
        if !path.exists() {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(base) {
            let rel = rel.to_string_lossy();
            if !rel.is_empty() && rel.len() < arg.len() {
                *arg = rel.into_owned();
            }
        }
    }
    command.cwd = Some(base.to_path_buf());
}

/// Run the command capturing both streams. A spawn failure is an `Io`
/// error naming the program.
pub fn exec(command: &PreparedCommand) -> Result<Output> {
    command
        .to_command()
        .stdin(Stdio::null())
        .output()
        .map_err(|e| BuildError::io(PathBuf::from(&command.program), e).into())
}

/// Run, relaying stderr and (in verbose mode) the command line and stdout.
/// A non-zero exit is an error carrying the child's stderr.
pub fn exec_checked(command: &PreparedCommand, verbose: bool) -> Result<()> {
    if verbose {
        println!("{}", command.command_line());
    }
    let output = exec(command)?;
    if verbose && !output.stdout.is_empty() {
        print!("{}", String::from_utf8_lossy(&output.stdout));
    }
    if !output.stderr.is_empty() {
        eprint!("{}", String::from_utf8_lossy(&output.stderr));
    }
    if !output.status.success() {
        return Err(anyhow!(
            "command '{}' exited with status {}",
            command.program,
            output.status
        ));
    }
    Ok(())
}

/// Run and return stdout; stderr is ignored, non-zero exit is an error.
pub fn exec_capture_stdout(command: &PreparedCommand, verbose: bool) -> Result<Vec<u8>> {
    if verbose {
        println!("{}", command.command_line());
    }
    let output = exec(command)?;
    if !output.status.success() {
        bail!(
            "command '{}' exited with status {}: {}",
            command.program,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(output.stdout)
}
