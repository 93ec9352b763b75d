//! End-to-end pipeline tests against shell-script stand-ins for the
//! platform toolchain (preprocessor, ctags, compiler, archiver, linker,
//! objcopy and size). Verifies the full stage sequence, hook ordering and
//! the produced artifacts without needing a cross toolchain installed.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sketchc::board::Fqbn;
use sketchc::context::BuildContext;
use sketchc::library::{scan_libraries_root, LibraryLocation};
use sketchc::preproc::GccIncludeScraper;
use sketchc::props::PropertyMap;
use sketchc::resolver::LibraryResolver;
use sketchc::sketch::Sketch;
use sketchc::BuildError;

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

struct Toolchain {
    props: PropertyMap,
}

/// Build a property map describing a miniature platform whose tools are
/// shell scripts under `dir`.
fn fake_toolchain(dir: &Path, core: &Path) -> Toolchain {
    // Preprocessor: errors on the first unresolvable #include, otherwise
    // copies the source to the requested output (line markers included).
    let cpp = dir.join("cpp.sh");
    write_script(
        &cpp,
        r#"#!/bin/sh
src=""
out=""
incdirs=""
prev=""
for a in "$@"; do
  case "$a" in
    -I*) incdirs="$incdirs ${a#-I}" ;;
    *.cpp|*.c|*.cxx|*.cc|*.S) src="$a" ;;
  esac
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
headers=$(sed -n 's/^#include [<"]\([^">]*\)[">].*/\1/p' "$src")
for h in $headers; do
  found=0
  for d in $incdirs $(dirname "$src"); do
    if [ -f "$d/$h" ]; then found=1; fi
  done
  if [ "$found" = "0" ]; then
    echo "$src:1:10: fatal error: $h: No such file or directory" >&2
    exit 1
  fi
done
if [ -n "$out" ]; then cp "$src" "$out"; fi
exit 0
"#,
    );

    // ctags: reads the file of the first line marker and emits records for
    // setup/loop plus an undeclared helper function.
    let ctags = dir.join("ctags.sh");
    write_script(
        &ctags,
        r#"#!/bin/sh
file=$(sed -n 's/^#line [0-9][0-9]* "\(.*\)"/\1/p' "$1" | head -1)
printf 'setup\t%s\t/^void setup() {$/;"\tkind:function\tline:1\tsignature:()\treturntype:void\n' "$file"
printf 'loop\t%s\t/^void loop() {$/;"\tkind:function\tline:2\tsignature:()\treturntype:void\n' "$file"
printf 'helper\t%s\t/^int helper(int x) {$/;"\tkind:function\tline:3\tsignature:(int x)\treturntype:int\n' "$file"
"#,
    );

    // Compiler: records the object and a well-formed depfile.
    let cc = dir.join("cc.sh");
    write_script(
        &cc,
        r#"#!/bin/sh
src="$1"
obj="$2"
echo object > "$obj"
printf '%s:\n %s\n' "$obj" "$src" > "${obj%.o}.d"
"#,
    );

    // Archiver: appends member names to the archive file.
    let ar = dir.join("ar.sh");
    write_script(
        &ar,
        r#"#!/bin/sh
echo "$2" >> "$1"
"#,
    );

    // Linker: concatenates its arguments into the "elf".
    let ld = dir.join("ld.sh");
    write_script(
        &ld,
        r#"#!/bin/sh
out="$1"
shift
echo "$@" > "$out"
"#,
    );

    let mut props = PropertyMap::new();
    props.set("build.core.path", &core.to_string_lossy());
    props.set("build.mcu", "atmega328p");
    props.set("compiler.optimization_flags", "-Os");
    props.set(
        "recipe.preproc.macros",
        &format!(
            "{} -E {{includes}} \"{{source_file}}\" -o \"{{preprocessed_file_path}}\"",
            cpp.display()
        ),
    );
    props.set("tools.ctags.pattern", &format!("{} \"{{source_file}}\"", ctags.display()));
    for recipe in ["recipe.c.o.pattern", "recipe.cpp.o.pattern", "recipe.S.o.pattern"] {
        props.set(
            recipe,
            &format!("{} \"{{source_file}}\" \"{{object_file}}\" {{includes}}", cc.display()),
        );
    }
    props.set(
        "recipe.ar.pattern",
        &format!("{} \"{{archive_file_path}}\" \"{{object_file}}\"", ar.display()),
    );
    props.set(
        "recipe.c.combine.pattern",
        &format!(
            "{} \"{{build.path}}/{{build.project_name}}.elf\" {{object_files}} \"{{archive_file_path}}\" {{compiler.libraries.ldflags}}",
            ld.display()
        ),
    );
    props.set(
        "recipe.objcopy.hex.pattern",
        "/bin/sh -c \"echo :00000001FF > {build.path}/{build.project_name}.hex\"",
    );
    props.set("recipe.size.pattern", "/bin/sh -c \"echo text 924 && echo data 9\"");
    props.set("recipe.size.regex", "^text ([0-9]+)");
    props.set("recipe.size.regex.data", "^data ([0-9]+)");
    props.set("upload.maximum_size", "32256");
    props.set("upload.maximum_data_size", "2048");

    Toolchain { props }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    ctx: BuildContext,
    resolver: LibraryResolver,
}

fn setup(sketch_body: &str, with_bridge: bool) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();

    let sketch_root = tmp.path().join("Blink");
    fs::create_dir_all(&sketch_root).unwrap();
    fs::write(sketch_root.join("Blink.ino"), sketch_body).unwrap();
    let sketch = Sketch::load(&sketch_root).unwrap();

    let core = tmp.path().join("hw/avr/cores/arduino");
    fs::create_dir_all(&core).unwrap();
    fs::write(core.join("Arduino.h"), "#pragma once\n").unwrap();
    fs::write(core.join("wiring.c"), "int wiring;\n").unwrap();
    fs::write(core.join("main.cpp"), "#include <Arduino.h>\nint main(){}\n").unwrap();

    let libs_root = tmp.path().join("libraries");
    if with_bridge {
        let bridge = libs_root.join("Bridge/src");
        fs::create_dir_all(&bridge).unwrap();
        fs::write(bridge.join("Bridge.h"), "#pragma once\n").unwrap();
        fs::write(bridge.join("Bridge.cpp"), "#include <Bridge.h>\nint b;\n").unwrap();
        fs::write(
            libs_root.join("Bridge/library.properties"),
            "name=Bridge\nversion=1.7.0\narchitectures=avr\n",
        )
        .unwrap();
    }
    let mut resolver = LibraryResolver::new("avr");
    resolver.add_all(scan_libraries_root(&libs_root, LibraryLocation::IdeBuiltin).unwrap());

    let toolchain = fake_toolchain(tmp.path(), &core);
    let fqbn = Fqbn::parse("arduino:avr:uno").unwrap();
    let ctx = BuildContext::new(sketch, fqbn, toolchain.props, &tmp.path().join("build"));

    Fixture {
        _tmp: tmp,
        ctx,
        resolver,
    }
}

#[test]
fn test_blink_builds_end_to_end() {
    let mut fixture = setup(
        "void setup(){pinMode(13,1);}\nvoid loop(){digitalWrite(13,1);}\nint helper(int x){return x;}\n",
        false,
    );
    sketchc::pipeline::run(&mut fixture.ctx, &fixture.resolver, &GccIncludeScraper).unwrap();
    let ctx = &fixture.ctx;

    // No libraries imported
    assert!(ctx.imported_libraries.is_empty());

    // Merged output carries the prologue and the synthesized prototypes
    let merged = fs::read_to_string(ctx.merged_sketch_path()).unwrap();
    assert!(merged.starts_with("#include <Arduino.h>\n#line 1 \""));
    assert!(merged.contains("void setup();"));
    assert!(merged.contains("int helper(int x);"));

    // Objects for the sketch and the core, the core archive, the linked
    // image and a non-empty hex
    assert!(ctx
        .sketch_build_path()
        .join("Blink.ino.cpp.o")
        .is_file());
    assert!(ctx.core_build_path().join("wiring.c.o").is_file());
    assert!(ctx.core_build_path().join("core.a").is_file());
    assert!(ctx.build_path.join("Blink.ino.elf").is_file());
    let hex = fs::read_to_string(ctx.build_path.join("Blink.ino.hex")).unwrap();
    assert!(!hex.trim().is_empty());

    // Size report parsed from the fake size tool
    assert_eq!(ctx.executable_sections.len(), 2);
    assert_eq!(ctx.executable_sections[0].size, 924);
    assert_eq!(ctx.executable_sections[1].size, 9);
}

#[test]
fn test_bridge_sketch_links_library_objects() {
    let mut fixture = setup(
        "#include <Bridge.h>\nvoid setup(){}\nvoid loop(){}\n",
        true,
    );
    sketchc::pipeline::run(&mut fixture.ctx, &fixture.resolver, &GccIncludeScraper).unwrap();
    let ctx = &fixture.ctx;

    assert_eq!(ctx.imported_libraries.len(), 1);
    assert!(ctx
        .libraries_build_path()
        .join("Bridge/Bridge.cpp.o")
        .is_file());

    // The linker saw the library object
    let elf = fs::read_to_string(ctx.build_path.join("Blink.ino.elf")).unwrap();
    assert!(elf.contains("Bridge.cpp.o"));
    assert!(elf.contains("core.a"));
}

#[test]
fn test_hooks_run_in_numeric_order_across_phases() {
    let mut fixture = setup("void setup(){}\nvoid loop(){}\n", false);
    let log = fixture.ctx.build_path.parent().unwrap().join("hooks.log");
    for (key, value) in [
        ("recipe.hooks.sketch.prebuild.10.pattern", "j"),
        ("recipe.hooks.sketch.prebuild.1.pattern", "a"),
        ("recipe.hooks.sketch.prebuild.2.pattern", "b"),
        ("recipe.hooks.linking.prelink.1.pattern", "prelink"),
        ("recipe.hooks.postbuild.1.pattern", "post"),
    ] {
        fixture.ctx.build_properties.set(
            key,
            &format!("/bin/sh -c \"echo {} >> {}\"", value, log.display()),
        );
    }

    sketchc::pipeline::run(&mut fixture.ctx, &fixture.resolver, &GccIncludeScraper).unwrap();
    assert_eq!(
        fs::read_to_string(&log).unwrap(),
        "a\nb\nj\nprelink\npost\n"
    );
}

#[test]
fn test_size_overflow_fails_but_reports() {
    let mut fixture = setup("void setup(){}\nvoid loop(){}\n", false);
    fixture.ctx.build_properties.set("upload.maximum_size", "100");

    let err = sketchc::pipeline::run(&mut fixture.ctx, &fixture.resolver, &GccIncludeScraper)
        .unwrap_err();
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::SizeExceeded { section, size, max_size }) => {
            assert_eq!(section, "text");
            assert_eq!(*size, 924);
            assert_eq!(*max_size, 100);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // The image was still produced and the report recorded
    assert!(fixture.ctx.build_path.join("Blink.ino.hex").is_file());
    assert!(!fixture.ctx.executable_sections.is_empty());
}

#[test]
fn test_compilation_database_only_mode_runs_no_commands() {
    let mut fixture = setup("void setup(){}\nvoid loop(){}\n", false);
    let db_path: PathBuf = fixture.ctx.build_path.join("compile_commands.json");
    fs::create_dir_all(&fixture.ctx.build_path).unwrap();
    fixture.ctx.only_update_compilation_database = true;
    fixture.ctx.compilation_database =
        Some(sketchc::compiledb::CompilationDatabase::new(&db_path));

    sketchc::pipeline::run(&mut fixture.ctx, &fixture.resolver, &GccIncludeScraper).unwrap();

    assert!(db_path.is_file());
    let entries: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&db_path).unwrap()).unwrap();
    assert!(entries.as_array().map(|a| !a.is_empty()).unwrap_or(false));
    // Nothing was compiled or linked
    assert!(!fixture.ctx.sketch_build_path().join("Blink.ino.cpp.o").exists());
    assert!(!fixture.ctx.build_path.join("Blink.ino.elf").exists());
}
