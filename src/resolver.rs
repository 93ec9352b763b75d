//! Resolve a missing `#include` to the library providing it.
//!
//! Several installed libraries can export the same header; the resolver
//! ranks them so the same sketch picks the same library on every run.

use std::collections::HashMap;
use std::sync::Arc;

use crate::library::Library;

/// Outcome of a successful resolution. `alternatives` lists the losing
/// candidates so the caller can warn about the ambiguity.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub library: Arc<Library>,
    pub alternatives: Vec<Arc<Library>>,
    /// The winner does not declare the target architecture.
    pub arch_incompatible: bool,
}

pub struct LibraryResolver {
    target_arch: String,
    libraries: Vec<Arc<Library>>,
    /// Header basename (with and without extension) -> candidate indices.
    by_header: HashMap<String, Vec<usize>>,
}

impl LibraryResolver {
    pub fn new(target_arch: &str) -> Self {
        LibraryResolver {
            target_arch: target_arch.to_string(),
            libraries: Vec::new(),
            by_header: HashMap::new(),
        }
    }

    /// Register a library. Roots should be added in priority order; a
    /// library with the same name and root as an existing one is skipped.
    pub fn add(&mut self, library: Library) {
        if self
            .libraries
            .iter()
            .any(|l| l.name == library.name && l.root == library.root)
        {
            return;
        }
        let index = self.libraries.len();
        let library = Arc::new(library);
        for header in library.header_files() {
            self.by_header
                .entry(header.to_lowercase())
                .or_default()
                .push(index);
            if let Some(base) = header.rsplit_once('.').map(|(b, _)| b) {
                self.by_header
                    .entry(base.to_lowercase())
                    .or_default()
                    .push(index);
            }
        }
        self.libraries.push(library);
    }

    pub fn add_all(&mut self, libraries: Vec<Library>) {
        for library in libraries {
            self.add(library);
        }
    }

    pub fn libraries(&self) -> &[Arc<Library>] {
        &self.libraries
    }

    /// Resolve an include name (`Bridge.h` or `Bridge`) to the best
    /// candidate, or `None` when no installed library exports it.
    pub fn resolve(&self, include: &str) -> Option<Resolution> {
        let key = include.to_lowercase();
        let mut candidates: Vec<usize> = self.by_header.get(&key).cloned().unwrap_or_default();
        if candidates.is_empty() {
            return None;
        }
        candidates.dedup();

        let base = include
            .rsplit_once('.')
            .map(|(b, _)| b)
            .unwrap_or(include);

        let best = *candidates
            .iter()
            .max_by(|&&a, &&b| {
                let ka = self.rank_key(&self.libraries[a], base);
                let kb = self.rank_key(&self.libraries[b], base);
                ka.cmp(&kb)
            })
            .unwrap();

        let library = self.libraries[best].clone();
        let arch_incompatible = !library.supports_arch(&self.target_arch);
        let alternatives = candidates
            .iter()
            .filter(|&&i| i != best)
            .map(|&i| self.libraries[i].clone())
            .collect();

        Some(Resolution {
            library,
            alternatives,
            arch_incompatible,
        })
    }

    /// Ranking key, compared lexicographically (larger wins):
    /// exact name match, install location, architecture fit, version, and a
    /// deterministic name tiebreak (shorter, then lexicographically least).
    fn rank_key(&self, library: &Library, include_base: &str) -> RankKey {
        let name_matches = library.name.eq_ignore_ascii_case(include_base);
        let arch_matches = library.supports_arch(&self.target_arch);
        let version = library
            .version
            .clone()
            .unwrap_or_else(|| semver::Version::new(0, 0, 0));
        RankKey {
            name_matches,
            location: library.location as u8,
            arch_matches,
            version,
            name_shortness: std::cmp::Reverse(library.name.len()),
            name_least: std::cmp::Reverse(library.name.clone()),
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    name_matches: bool,
    location: u8,
    arch_matches: bool,
    version: semver::Version,
    name_shortness: std::cmp::Reverse<usize>,
    name_least: std::cmp::Reverse<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{LibraryLocation, Precompiled};
    use std::path::PathBuf;

    fn lib(name: &str, location: LibraryLocation, archs: &[&str], version: Option<&str>) -> Library {
        Library {
            name: name.to_string(),
            root: PathBuf::from(format!("/libs/{}", name)),
            source_dir: PathBuf::from(format!("/libs/{}/src", name)),
            utility_dir: None,
            architectures: archs.iter().map(|s| s.to_string()).collect(),
            location,
            precompiled: Precompiled::No,
            ldflags: String::new(),
            version: version.and_then(|v| semver::Version::parse(v).ok()),
            recursive: true,
        }
    }

    fn resolver_with(header: &str, libs: Vec<Library>) -> LibraryResolver {
        let mut resolver = LibraryResolver::new("avr");
        for library in libs {
            // Bypass the filesystem header scan for unit tests
            let index = resolver.libraries.len();
            let library = Arc::new(library);
            resolver
                .by_header
                .entry(header.to_lowercase())
                .or_default()
                .push(index);
            if let Some(base) = header.rsplit_once('.').map(|(b, _)| b) {
                resolver
                    .by_header
                    .entry(base.to_lowercase())
                    .or_default()
                    .push(index);
            }
            resolver.libraries.push(library);
        }
        resolver
    }

    #[test]
    fn test_exact_name_beats_everything() {
        let resolver = resolver_with(
            "Net.h",
            vec![
                lib("Network", LibraryLocation::User, &["avr"], Some("9.0.0")),
                lib("Net", LibraryLocation::IdeBuiltin, &["avr"], Some("0.1.0")),
            ],
        );
        let resolution = resolver.resolve("Net.h").unwrap();
        assert_eq!(resolution.library.name, "Net");
        assert_eq!(resolution.alternatives.len(), 1);
        assert_eq!(resolution.alternatives[0].name, "Network");
    }

    #[test]
    fn test_location_priority() {
        let resolver = resolver_with(
            "Wire.h",
            vec![
                lib("WireBundled", LibraryLocation::PlatformBundled, &["avr"], None),
                lib("WireUser", LibraryLocation::User, &["avr"], None),
                lib("WireBuiltin", LibraryLocation::IdeBuiltin, &["avr"], None),
            ],
        );
        assert_eq!(resolver.resolve("Wire.h").unwrap().library.name, "WireUser");
    }

    #[test]
    fn test_arch_match_ranks_above_mismatch() {
        let resolver = resolver_with(
            "Radio.h",
            vec![
                lib("RadioSam", LibraryLocation::User, &["sam"], None),
                lib("RadioAvr", LibraryLocation::User, &["avr"], None),
            ],
        );
        let resolution = resolver.resolve("Radio.h").unwrap();
        assert_eq!(resolution.library.name, "RadioAvr");
        assert!(!resolution.arch_incompatible);
    }

    #[test]
    fn test_incompatible_candidate_still_resolves_with_flag() {
        let resolver = resolver_with(
            "Radio.h",
            vec![lib("RadioSam", LibraryLocation::User, &["sam"], None)],
        );
        let resolution = resolver.resolve("Radio.h").unwrap();
        assert_eq!(resolution.library.name, "RadioSam");
        assert!(resolution.arch_incompatible);
    }

    #[test]
    fn test_version_then_name_tiebreak() {
        let resolver = resolver_with(
            "Gfx.h",
            vec![
                lib("GfxOld", LibraryLocation::User, &["*"], Some("1.0.0")),
                lib("GfxNew", LibraryLocation::User, &["*"], Some("2.0.0")),
            ],
        );
        assert_eq!(resolver.resolve("Gfx.h").unwrap().library.name, "GfxNew");

        let resolver = resolver_with(
            "Gfx.h",
            vec![
                lib("GfxLonger", LibraryLocation::User, &["*"], Some("1.0.0")),
                lib("Gfx2", LibraryLocation::User, &["*"], Some("1.0.0")),
            ],
        );
        assert_eq!(resolver.resolve("Gfx.h").unwrap().library.name, "Gfx2");
    }

    #[test]
    fn test_resolves_without_extension() {
        let resolver = resolver_with(
            "SD.h",
            vec![lib("SD", LibraryLocation::IdeBuiltin, &["avr"], None)],
        );
        assert!(resolver.resolve("SD").is_some());
        assert!(resolver.resolve("sd.h").is_some());
        assert!(resolver.resolve("NoSuch.h").is_none());
    }
}
