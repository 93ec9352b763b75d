//! Fully-qualified board names and effective board properties.
//!
//! An FQBN addresses one board of one platform plus its menu selections:
//! `arduino:avr:mega:cpu=atmega1280`. The menu rewrite promotes
//! `<board>.menu.<menu>.<option>.<key>` properties over the board defaults.

use anyhow::{bail, Result};
use std::fmt;
use std::path::Path;

use crate::props::PropertyMap;

/// The property files a platform folder ships.
#[derive(Debug, Default)]
pub struct PlatformFiles {
    pub platform: PropertyMap,
    pub boards: PropertyMap,
    /// Programmer definitions, used by the upload collaborators; empty when
    /// the platform ships none.
    pub programmers: PropertyMap,
}

/// Load `platform.txt` (with its `platform.local.txt` overlay),
/// `boards.txt` and the optional `programmers.txt` from a platform folder.
pub fn load_platform_dir(dir: &Path) -> Result<PlatformFiles> {
    let platform = PropertyMap::load_with_local(&dir.join("platform.txt"))?;
    let boards = PropertyMap::load_with_local(&dir.join("boards.txt"))?;
    let programmers_path = dir.join("programmers.txt");
    let programmers = if programmers_path.is_file() {
        PropertyMap::load(&programmers_path)?
    } else {
        PropertyMap::new()
    };
    Ok(PlatformFiles {
        platform,
        boards,
        programmers,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fqbn {
    pub vendor: String,
    pub architecture: String,
    pub board_id: String,
    /// Menu selections in the order they appeared on the command line.
    pub menu_options: Vec<(String, String)>,
}

impl Fqbn {
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 3 || parts.len() > 4 {
            bail!("invalid FQBN '{}': expected vendor:architecture:board[:menus]", s);
        }
        if parts[..3].iter().any(|p| p.is_empty()) {
            bail!("invalid FQBN '{}': empty segment", s);
        }

        let mut menu_options = Vec::new();
        if parts.len() == 4 {
            for pair in parts[3].split(',') {
                let Some((menu, option)) = pair.split_once('=') else {
                    bail!("invalid FQBN '{}': menu selection '{}' is not menu=option", s, pair);
                };
                if menu.is_empty() || option.is_empty() {
                    bail!("invalid FQBN '{}': menu selection '{}' is not menu=option", s, pair);
                }
                if menu_options.iter().any(|(m, _)| m == menu) {
                    bail!("invalid FQBN '{}': duplicate menu id '{}'", s, menu);
                }
                menu_options.push((menu.to_string(), option.to_string()));
            }
        }

        Ok(Fqbn {
            vendor: parts[0].to_string(),
            architecture: parts[1].to_string(),
            board_id: parts[2].to_string(),
            menu_options,
        })
    }
}

impl fmt::Display for Fqbn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.vendor, self.architecture, self.board_id)?;
        for (i, (menu, option)) in self.menu_options.iter().enumerate() {
            let sep = if i == 0 { ':' } else { ',' };
            write!(f, "{}{}={}", sep, menu, option)?;
        }
        Ok(())
    }
}

/// Build the effective property map for a board: platform properties, the
/// board's own subtree from `boards.txt`, then menu-selected overrides, with
/// the host OS overlay applied last.
pub fn effective_board_properties(
    platform: &PropertyMap,
    boards: &PropertyMap,
    fqbn: &Fqbn,
) -> Result<PropertyMap> {
    let board = boards.subtree(&fqbn.board_id);
    if board.is_empty() {
        bail!("unknown board id '{}' in {}", fqbn.board_id, fqbn);
    }

    let mut props = platform.clone();
    for (key, value) in board.iter() {
        // Menu definitions are consumed below, not copied verbatim
        if !key.starts_with("menu.") {
            props.set(key, value);
        }
    }

    for (menu, option) in &fqbn.menu_options {
        let selected = board.subtree(&format!("menu.{}.{}", menu, option));
        if selected.is_empty() && board.get(&format!("menu.{}.{}", menu, option)).is_none() {
            bail!(
                "invalid option '{}' for menu '{}' of board {}",
                option,
                menu,
                fqbn.board_id
            );
        }
        props.merge(&selected);
    }

    props.set("build.fqbn", &fqbn.to_string());
    props.set("build.arch", &fqbn.architecture.to_uppercase());
    props.apply_os_overlay();
    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_fqbn() {
        let fqbn = Fqbn::parse("arduino:avr:uno").unwrap();
        assert_eq!(fqbn.vendor, "arduino");
        assert_eq!(fqbn.architecture, "avr");
        assert_eq!(fqbn.board_id, "uno");
        assert!(fqbn.menu_options.is_empty());
    }

    #[test]
    fn test_parse_menu_options_keep_order() {
        let fqbn = Fqbn::parse("arduino:avr:mega:cpu=atmega1280,mem=big").unwrap();
        assert_eq!(
            fqbn.menu_options,
            vec![
                ("cpu".to_string(), "atmega1280".to_string()),
                ("mem".to_string(), "big".to_string())
            ]
        );
        assert_eq!(fqbn.to_string(), "arduino:avr:mega:cpu=atmega1280,mem=big");
    }

    #[test]
    fn test_duplicate_menu_id_rejected() {
        assert!(Fqbn::parse("arduino:avr:mega:cpu=a,cpu=b").is_err());
    }

    #[test]
    fn test_bad_shapes_rejected() {
        assert!(Fqbn::parse("arduino:avr").is_err());
        assert!(Fqbn::parse("arduino::uno").is_err());
        assert!(Fqbn::parse("a:b:c:d:e").is_err());
        assert!(Fqbn::parse("arduino:avr:uno:cpu").is_err());
    }

    #[test]
    fn test_menu_promotion() {
        let platform = PropertyMap::parse("compiler.path=/opt/avr/bin\n");
        let boards = PropertyMap::parse(
            "mega.name=Arduino Mega\n\
             mega.build.mcu=atmega2560\n\
             mega.menu.cpu.atmega2560.build.mcu=atmega2560\n\
             mega.menu.cpu.atmega1280.build.mcu=atmega1280\n\
             mega.menu.cpu.atmega1280.upload.maximum_size=126976\n",
        );
        let fqbn = Fqbn::parse("arduino:avr:mega:cpu=atmega1280").unwrap();
        let props = effective_board_properties(&platform, &boards, &fqbn).unwrap();
        assert_eq!(props.get("build.mcu"), Some("atmega1280"));
        assert_eq!(props.get("upload.maximum_size"), Some("126976"));
        assert_eq!(props.get("compiler.path"), Some("/opt/avr/bin"));
        // Raw menu definitions are not leaked into the effective set
        assert!(props.get("menu.cpu.atmega2560.build.mcu").is_none());
    }

    #[test]
    fn test_load_platform_dir_with_local_overlay() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("platform.txt"), "name=AVR\ncompiler.path=/opt\n").unwrap();
        std::fs::write(tmp.path().join("platform.local.txt"), "compiler.path=/custom\n").unwrap();
        std::fs::write(tmp.path().join("boards.txt"), "uno.name=Uno\n").unwrap();

        let files = load_platform_dir(tmp.path()).unwrap();
        assert_eq!(files.platform.get("compiler.path"), Some("/custom"));
        assert_eq!(files.boards.get("uno.name"), Some("Uno"));
        assert!(files.programmers.is_empty());
    }

    #[test]
    fn test_unknown_board_rejected() {
        let boards = PropertyMap::parse("uno.name=Uno\n");
        let fqbn = Fqbn::parse("arduino:avr:nano").unwrap();
        assert!(effective_board_properties(&PropertyMap::new(), &boards, &fqbn).is_err());
    }
}
