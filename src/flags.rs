//! Per-section flag rewrites applied to cloned property maps.

use crate::props::PropertyMap;

/// Downgrade every optimization level to `-O0` and drop `-flto`, keeping
/// the rest of the flag string intact. Used for debugger-friendly builds.
pub fn replace_optimization_flags(flags: &str) -> String {
    flags
        .split(' ')
        .map(|flag| match flag {
            "-O1" | "-O2" | "-O3" | "-Os" | "-Og" => "-O0",
            "-flto" => "",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Clone the map with optimization removed from the compiler flag
/// properties.
pub fn remove_optimization(props: &PropertyMap) -> PropertyMap {
    let mut result = props.clone();
    for key in ["compiler.c.flags", "compiler.cpp.flags", "build.flags.optimize"] {
        result.set(key, &replace_optimization_flags(result.get_or_empty(key)));
    }
    result
}

/// Clone the map with the vendor extension flags for `scope` (one of
/// `sketch`, `core`, `libraries`) appended to the C and C++ flags.
pub fn expand_vendor_extra_flags(props: &PropertyMap, scope: &str) -> PropertyMap {
    let mut result = props.clone();
    let extra = result
        .get(&format!("com.sysprogs.extraflags.{}", scope))
        .unwrap_or_else(|| result.get_or_empty("com.sysprogs.extraflags"))
        .to_string();
    if extra.is_empty() {
        return result;
    }
    for key in ["compiler.c.flags", "compiler.cpp.flags"] {
        let flags = result.get_or_empty(key);
        let combined = if flags.is_empty() {
            extra.clone()
        } else {
            format!("{} {}", flags, extra)
        };
        result.set(key, &combined);
    }
    result
}
