//! Numbered hook recipes at phase boundaries.
//!
//! Platforms attach commands to well-known points of the build
//! (`recipe.hooks.<phase>.<NN>.pattern`). Recipes run in numeric order,
//! accepting both zero-padded (`01`, `02`, `10`) and bare (`1`, `2`, `10`)
//! numbering.

use anyhow::{Context, Result};
use std::cmp::Ordering;

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::exec::{exec_checked, prepare_command_for_recipe};

pub const HOOKS_PREBUILD: &str = "recipe.hooks.prebuild";
pub const HOOKS_POSTBUILD: &str = "recipe.hooks.postbuild";
pub const HOOKS_SKETCH_PREBUILD: &str = "recipe.hooks.sketch.prebuild";
pub const HOOKS_SKETCH_POSTBUILD: &str = "recipe.hooks.sketch.postbuild";
pub const HOOKS_CORE_PREBUILD: &str = "recipe.hooks.core.prebuild";
pub const HOOKS_CORE_POSTBUILD: &str = "recipe.hooks.core.postbuild";
pub const HOOKS_LIBRARIES_PREBUILD: &str = "recipe.hooks.libraries.prebuild";
pub const HOOKS_LIBRARIES_POSTBUILD: &str = "recipe.hooks.libraries.postbuild";
pub const HOOKS_LINKING_PRELINK: &str = "recipe.hooks.linking.prelink";
pub const HOOKS_LINKING_POSTLINK: &str = "recipe.hooks.linking.postlink";
pub const HOOKS_OBJCOPY_PREOBJCOPY: &str = "recipe.hooks.objcopy.preobjcopy";
pub const HOOKS_OBJCOPY_POSTOBJCOPY: &str = "recipe.hooks.objcopy.postobjcopy";
pub const HOOKS_SAVEHEX_PRESAVEHEX: &str = "recipe.hooks.savehex.presavehex";
pub const HOOKS_SAVEHEX_POSTSAVEHEX: &str = "recipe.hooks.savehex.postsavehex";

/// Compare strings segment-wise, with digit runs compared as numbers, so
/// `x.2.y < x.10.y` regardless of padding.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ia = a.chars().peekable();
    let mut ib = b.chars().peekable();
    loop {
        match (ia.peek().copied(), ib.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let mut na: u64 = 0;
                    while let Some(c) = ia.peek().copied().filter(|c| c.is_ascii_digit()) {
                        na = na * 10 + c.to_digit(10).unwrap() as u64;
                        ia.next();
                    }
                    let mut nb: u64 = 0;
                    while let Some(c) = ib.peek().copied().filter(|c| c.is_ascii_digit()) {
                        nb = nb * 10 + c.to_digit(10).unwrap() as u64;
                        ib.next();
                    }
                    match na.cmp(&nb) {
                        Ordering::Equal => {}
                        other => return other,
                    }
                } else {
                    match ca.cmp(&cb) {
                        Ordering::Equal => {
                            ia.next();
                            ib.next();
                        }
                        other => return other,
                    }
                }
            }
        }
    }
}

/// Hook recipe keys under `prefix`, in execution order.
pub fn find_hook_recipes(ctx: &BuildContext, prefix: &str) -> Vec<String> {
    let mut recipes: Vec<String> = ctx
        .build_properties
        .keys_with_prefix_suffix(prefix, ".pattern")
        .into_iter()
        .filter(|key| !ctx.build_properties.get_or_empty(key).is_empty())
        .collect();
    recipes.sort_by(|a, b| natural_cmp(a, b));
    recipes
}

/// Run every hook recipe under `prefix` sequentially; any failure fails
/// the build.
pub fn run_hooks(ctx: &BuildContext, prefix: &str) -> Result<()> {
    for recipe in find_hook_recipes(ctx, prefix) {
        if ctx.is_cancelled() {
            return Err(BuildError::Cancelled.into());
        }
        if ctx.debug_level >= 10 {
            println!("Running recipe: {}", recipe);
        }
        let command = prepare_command_for_recipe(&ctx.build_properties, &recipe, true)?;
        if ctx.only_update_compilation_database {
            if ctx.verbose {
                println!("Skipping: {}", command.command_line());
            }
            continue;
        }
        exec_checked(&command, ctx.verbose).with_context(|| format!("running hook {}", recipe))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Fqbn;
    use crate::props::PropertyMap;
    use crate::sketch::Sketch;
    use std::fs;
    use std::path::Path;

    fn make_context(tmp: &Path, props: PropertyMap) -> BuildContext {
        let root = tmp.join("Blink");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("Blink.ino"), "void setup(){}\nvoid loop(){}\n").unwrap();
        let sketch = Sketch::load(&root).unwrap();
        let fqbn = Fqbn::parse("arduino:avr:uno").unwrap();
        BuildContext::new(sketch, fqbn, props, &tmp.join("build"))
    }

    #[test]
    fn test_natural_cmp_orders_numbers() {
        assert_eq!(natural_cmp("a.2.p", "a.10.p"), Ordering::Less);
        assert_eq!(natural_cmp("a.02.p", "a.10.p"), Ordering::Less);
        assert_eq!(natural_cmp("a.10.p", "a.10.p"), Ordering::Equal);
        assert_eq!(natural_cmp("a.b", "a.a"), Ordering::Greater);
    }

    #[test]
    fn test_hook_recipes_in_numeric_order_unpadded() {
        let props = PropertyMap::parse(
            "recipe.hooks.sketch.prebuild.10.pattern=echo j\n\
             recipe.hooks.sketch.prebuild.1.pattern=echo a\n\
             recipe.hooks.sketch.prebuild.2.pattern=echo b\n\
             recipe.hooks.linking.prelink.1.pattern=echo other\n\
             recipe.hooks.sketch.prebuild.3.pattern=\n",
        );
        let tmp = tempfile::tempdir().unwrap();
        let ctx = make_context(tmp.path(), props);
        let recipes = find_hook_recipes(&ctx, HOOKS_SKETCH_PREBUILD);
        assert_eq!(
            recipes,
            vec![
                "recipe.hooks.sketch.prebuild.1.pattern",
                "recipe.hooks.sketch.prebuild.2.pattern",
                "recipe.hooks.sketch.prebuild.10.pattern",
            ]
        );
    }

    #[test]
    fn test_hook_recipes_in_numeric_order_padded() {
        let props = PropertyMap::parse(
            "recipe.hooks.sketch.prebuild.11.pattern=k\n\
             recipe.hooks.sketch.prebuild.01.pattern=a\n\
             recipe.hooks.sketch.prebuild.02.pattern=b\n\
             recipe.hooks.sketch.prebuild.10.pattern=j\n",
        );
        let tmp = tempfile::tempdir().unwrap();
        let ctx = make_context(tmp.path(), props);
        let recipes = find_hook_recipes(&ctx, HOOKS_SKETCH_PREBUILD);
        let order: Vec<&str> = recipes
            .iter()
            .map(|k| ctx.build_properties.get(k).unwrap())
            .collect();
        assert_eq!(order, vec!["a", "b", "j", "k"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_hooks_execute_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("hooks.log");
        let props = PropertyMap::parse(&format!(
            "recipe.hooks.sketch.prebuild.10.pattern=/bin/sh -c \"echo j >> {log}\"\n\
             recipe.hooks.sketch.prebuild.1.pattern=/bin/sh -c \"echo a >> {log}\"\n\
             recipe.hooks.sketch.prebuild.2.pattern=/bin/sh -c \"echo b >> {log}\"\n",
            log = log.display()
        ));
        let ctx = make_context(tmp.path(), props);
        run_hooks(&ctx, HOOKS_SKETCH_PREBUILD).unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "a\nb\nj\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_hook_fails_the_build() {
        let tmp = tempfile::tempdir().unwrap();
        let props = PropertyMap::parse(
            "recipe.hooks.prebuild.1.pattern=/bin/sh -c \"exit 3\"\n",
        );
        let ctx = make_context(tmp.path(), props);
        assert!(run_hooks(&ctx, HOOKS_PREBUILD).is_err());
    }
}
