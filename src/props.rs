//! Ordered `key=value` property maps with `{name}` template expansion.
//!
//! Platform definitions (`platform.txt`, `boards.txt`, ...) are plain text
//! files, one dotted key per line, whose values may reference other keys
//! with `{name}` placeholders. Insertion order is significant: recipe hooks
//! are discovered by scanning keys in file order.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::BuildError;

/// How many substitution passes to run before giving up on a template.
/// Real platform files nest two or three levels; anything deeper is a cycle.
const MAX_EXPANSION_PASSES: usize = 10;

#[derive(Debug, Default, Clone)]
pub struct PropertyMap {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the property-file format: `key=value` lines, `#` comments.
    /// Values keep everything after the first `=`, including further `=`.
    pub fn parse(content: &str) -> Self {
        let mut map = Self::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.set(key.trim(), value.trim());
            }
        }
        map
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| BuildError::io(path, e))
            .with_context(|| format!("loading properties from {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    /// Load `path` and, if present, its `.local.txt` sibling overlay
    /// (e.g. `platform.txt` + `platform.local.txt`).
    pub fn load_with_local(path: &Path) -> Result<Self> {
        let mut map = Self::load(path)?;
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            let local = path.with_file_name(format!("{}.local.txt", stem));
            if local.is_file() {
                map.merge(&Self::load(&local)?);
            }
        }
        Ok(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&i| self.entries[i].1.as_str())
    }

    /// Like `get` but treats a missing key as the empty string, which is how
    /// platform files use optional properties.
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Set a key. Re-setting an existing key updates the value in place and
    /// keeps the original position.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(&i) = self.index.get(key) {
            self.entries[i].1 = value.to_string();
        } else {
            self.index.insert(key.to_string(), self.entries.len());
            self.entries.push((key.to_string(), value.to_string()));
        }
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(i) = self.index.remove(key) {
            self.entries.remove(i);
            for idx in self.index.values_mut() {
                if *idx > i {
                    *idx -= 1;
                }
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrite/insert every entry of `other`, preserving first-insertion
    /// order for keys already present.
    pub fn merge(&mut self, other: &PropertyMap) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    /// New map with the keys sharing `prefix.`, prefix stripped.
    pub fn subtree(&self, prefix: &str) -> PropertyMap {
        let dotted = format!("{}.", prefix);
        let mut sub = PropertyMap::new();
        for (k, v) in self.iter() {
            if let Some(rest) = k.strip_prefix(&dotted) {
                sub.set(rest, v);
            }
        }
        sub
    }

    /// Full key names starting with `prefix` and ending with `suffix`, in
    /// insertion order.
    pub fn keys_with_prefix_suffix(&self, prefix: &str, suffix: &str) -> Vec<String> {
        self.keys()
            .filter(|k| k.starts_with(prefix) && k.ends_with(suffix))
            .map(|k| k.to_string())
            .collect()
    }

    /// Overwrite each key `X` with `X.<host-os>` where the suffixed variant
    /// exists. Run once, right after load.
    pub fn apply_os_overlay(&mut self) {
        self.apply_os_overlay_for(host_os_suffix());
    }

    fn apply_os_overlay_for(&mut self, os: &str) {
        let suffix = format!(".{}", os);
        let overrides: Vec<(String, String)> = self
            .iter()
            .filter_map(|(k, v)| {
                k.strip_suffix(&suffix)
                    .map(|base| (base.to_string(), v.to_string()))
            })
            .collect();
        for (base, value) in overrides {
            self.set(&base, &value);
        }
    }

    /// Substitute `{key}` references until nothing changes. Undefined
    /// references are left intact; cycles give up after a bounded number of
    /// passes and return the partially-expanded string.
    pub fn expand(&self, template: &str) -> String {
        let mut current = template.to_string();
        for _ in 0..MAX_EXPANSION_PASSES {
            let next = self.expand_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn expand_once(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find(|c| c == '{' || c == '}') {
                Some(close) if after.as_bytes()[close] == b'}' => {
                    let name = &after[..close];
                    match self.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                _ => {
                    // Unterminated or nested opener: emit the brace verbatim
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// `expand`, then wipe any `{...}` token that stayed unresolved.
    pub fn expand_removing_unresolved(&self, template: &str) -> String {
        let expanded = self.expand(template);
        remove_unresolved(&expanded)
    }

    /// Fetch and expand a `recipe.*` property, failing with a typed error
    /// when the recipe is absent or empty.
    pub fn expand_recipe(&self, recipe: &str) -> Result<String> {
        let pattern = self.get_or_empty(recipe);
        if pattern.is_empty() {
            return Err(BuildError::MissingRecipe {
                recipe: recipe.to_string(),
            }
            .into());
        }
        Ok(self.expand(pattern))
    }
}

fn remove_unresolved(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find(|c| c == '{' || c == '}') {
            Some(close) if after.as_bytes()[close] == b'}' => {
                out.push_str(&rest[..open]);
                rest = &after[close + 1..];
            }
            _ => {
                out.push_str(&rest[..open + 1]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn host_os_suffix() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macosx"
    } else {
        "linux"
    }
}
