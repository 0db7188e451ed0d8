//! End-to-end build tests.
//!
//! Each test materializes a small C/C++ project in a throwaway directory
//! and drives the mason binary against the real compiler. Tests skip
//! when no compiler is installed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, SystemTime};

fn test_projects_root() -> PathBuf {
    std::env::temp_dir().join("mason_build_flow")
}

fn mason() -> &'static str {
    env!("CARGO_BIN_EXE_mason")
}

/// Skip guard: these tests need a real C/C++ toolchain.
fn have_compiler() -> bool {
    let ok = |c: &str| {
        Command::new("which")
            .arg(c)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    };
    ok("cc") && ok("c++") && ok("ar")
}

fn create_hello_project(name: &str) -> PathBuf {
    let dir = test_projects_root().join(name);
    if dir.exists() {
        fs::remove_dir_all(&dir).ok();
    }
    fs::create_dir_all(dir.join("src")).expect("failed to create test directory");

    fs::write(
        dir.join("src/planet.h"),
        r#"#ifndef PLANET_H
#define PLANET_H
const char *planet(int i);
#endif
"#,
    )
    .unwrap();

    fs::write(
        dir.join("src/planet.c"),
        r#"#include <stdio.h>
#include <stdlib.h>

#include "planet.h"

const char *planet(int i) {
    static const char *names[] = {
        "Mercury", "Venus", "Earth", "Mars",
        "Jupiter", "Saturn", "Uranus", "Neptune"
    };
    if (i < 0 || i > 7) {
        fprintf(stderr, "bad index: %d\n", i);
        exit(1);
    }
    return names[i];
}
"#,
    )
    .unwrap();

    fs::write(
        dir.join("src/greeting.h"),
        r#"#ifndef GREETING_H
#define GREETING_H
#define GREETING "Hello"
#endif
"#,
    )
    .unwrap();

    fs::write(
        dir.join("src/main.C"),
        r#"#include <cstdlib>
#include <iostream>

#include "greeting.h"

extern "C" {
#include "planet.h"
}

int main(int argc, char **argv) {
    if (argc < 2) {
        std::cerr << "need planet index" << std::endl;
        return 1;
    }
    std::cout << GREETING << " " << planet(std::atoi(argv[1])) << std::endl;
    return 0;
}
"#,
    )
    .unwrap();

    fs::write(
        dir.join("mason.toml"),
        r#"[project]
name = "hello"
default-targets = ["hello"]

[options]
cpp = ["-Isrc"]

[[bundle]]
include = ["src"]

[[bundle.library]]
name = "Planet"
files = ["planet"]
linker = "cc"

[[bundle.executable]]
name = "hello"
files = ["main"]
libs = ["Planet"]
linker = "cxx"
"#,
    )
    .unwrap();

    dir
}

fn run_build(dir: &Path, extra: &[&str]) -> Output {
    let mut cmd = Command::new(mason());
    cmd.arg("build").current_dir(dir).args(extra);
    cmd.output().expect("failed to execute mason build")
}

fn mtime(path: &Path) -> SystemTime {
    fs::metadata(path)
        .unwrap_or_else(|_| panic!("missing {}", path.display()))
        .modified()
        .unwrap()
}

/// Rewrite `path` with an mtime strictly newer than every path in
/// `than`.
fn touch_newer(path: &Path, than: &[&PathBuf]) {
    let base = than.iter().map(|&p| mtime(p)).max().unwrap();
    loop {
        let content = fs::read(path).unwrap();
        fs::write(path, content).unwrap();
        if mtime(path) > base {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn hello_world_builds_and_runs() {
    if !have_compiler() {
        eprintln!("Skipping test: no C/C++ toolchain found");
        return;
    }
    let dir = create_hello_project("hello_world");

    let output = run_build(&dir, &[]);
    assert!(
        output.status.success(),
        "build failed:\n{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    let build = dir.join("build");
    assert!(build.join("planet_debug.o").exists());
    assert!(build.join("main_debug.o").exists());
    assert!(build.join("libPlanet_dyn_debug.so").exists());
    assert!(build.join("hello_debug").exists());

    let run = Command::new(build.join("hello_debug"))
        .arg("3")
        .env("LD_LIBRARY_PATH", &build)
        .output()
        .expect("failed to run hello");
    assert!(run.status.success());
    assert_eq!(String::from_utf8_lossy(&run.stdout).trim(), "Hello Mars");

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn second_build_is_a_no_op() {
    if !have_compiler() {
        eprintln!("Skipping test: no C/C++ toolchain found");
        return;
    }
    let dir = create_hello_project("incremental_noop");

    assert!(run_build(&dir, &[]).status.success());
    let build = dir.join("build");
    let before = [
        mtime(&build.join("planet_debug.o")),
        mtime(&build.join("main_debug.o")),
        mtime(&build.join("libPlanet_dyn_debug.so")),
        mtime(&build.join("hello_debug")),
    ];

    let output = run_build(&dir, &[]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Up to date"),
        "expected an up-to-date no-op, got:\n{stdout}"
    );

    let after = [
        mtime(&build.join("planet_debug.o")),
        mtime(&build.join("main_debug.o")),
        mtime(&build.join("libPlanet_dyn_debug.so")),
        mtime(&build.join("hello_debug")),
    ];
    assert_eq!(before, after, "a no-op rebuild must not touch artifacts");

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn header_change_rebuilds_only_consumers() {
    if !have_compiler() {
        eprintln!("Skipping test: no C/C++ toolchain found");
        return;
    }
    let dir = create_hello_project("header_change");

    assert!(run_build(&dir, &[]).status.success());
    let build = dir.join("build");
    let planet_o = build.join("planet_debug.o");
    let main_o = build.join("main_debug.o");
    let lib = build.join("libPlanet_dyn_debug.so");
    let exe = build.join("hello_debug");
    let lib_before = mtime(&lib);
    let planet_before = mtime(&planet_o);
    let main_before = mtime(&main_o);
    let exe_before = mtime(&exe);

    // greeting.h is included only by main.C.
    touch_newer(&dir.join("src/greeting.h"), &[&planet_o, &main_o, &lib, &exe]);

    assert!(run_build(&dir, &[]).status.success());
    assert!(mtime(&main_o) > main_before, "main.o must rebuild");
    assert!(mtime(&exe) > exe_before, "hello must relink");
    assert_eq!(mtime(&planet_o), planet_before, "planet.o must not rebuild");
    assert_eq!(mtime(&lib), lib_before, "libPlanet must not rebuild");

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn global_option_change_invalidates_everything() {
    if !have_compiler() {
        eprintln!("Skipping test: no C/C++ toolchain found");
        return;
    }
    let dir = create_hello_project("option_change");
    let flavor = &["--build-type", "optimized"];

    assert!(run_build(&dir, flavor).status.success());
    let build = dir.join("build");
    let artifacts = [
        build.join("planet_opt.o"),
        build.join("main_opt.o"),
        build.join("libPlanet_dyn_opt.so"),
        build.join("hello_opt"),
    ];
    let before: Vec<SystemTime> = artifacts.iter().map(|p| mtime(p)).collect();

    // Flip the global C compile set from default to -O2.
    let toml = fs::read_to_string(dir.join("mason.toml")).unwrap();
    let toml = toml.replace("cpp = [\"-Isrc\"]", "cpp = [\"-Isrc\"]\ncc = [\"-O2\"]");
    fs::write(dir.join("mason.toml"), toml).unwrap();

    let output = run_build(&dir, flavor);
    assert!(output.status.success());
    for (path, old) in artifacts.iter().zip(&before) {
        assert!(
            mtime(path) > *old,
            "{} must rebuild after a global option change",
            path.display()
        );
    }

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn conflicting_options_abort_before_any_command() {
    if !have_compiler() {
        eprintln!("Skipping test: no C/C++ toolchain found");
        return;
    }
    let dir = create_hello_project("conflict");
    let toml = fs::read_to_string(dir.join("mason.toml")).unwrap();
    let toml = toml.replace(
        "cpp = [\"-Isrc\"]",
        "cpp = [\"-Isrc\", \"-DFOO=1\", \"-UFOO\"]",
    );
    fs::write(dir.join("mason.toml"), toml).unwrap();

    let output = run_build(&dir, &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("conflicts"),
        "expected a conflict report, got:\n{stderr}"
    );
    // Configuration errors abort before any subprocess runs.
    assert!(!dir.join("build").join("planet_debug.o").exists());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn build_error_fails_fast() {
    if !have_compiler() {
        eprintln!("Skipping test: no C/C++ toolchain found");
        return;
    }
    let dir = create_hello_project("fail_fast");
    fs::write(dir.join("src/planet.c"), "this is not C\n").unwrap();

    let output = run_build(&dir, &["-j", "2"]);
    assert!(!output.status.success());
    let all = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(
        all.contains("planet"),
        "the failing target should be named:\n{all}"
    );
    // Consumers of the failed object never link.
    assert!(!dir.join("build").join("libPlanet_dyn_debug.so").exists());
    assert!(!dir.join("build").join("hello_debug").exists());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn flavors_coexist_in_one_output_root() {
    if !have_compiler() {
        eprintln!("Skipping test: no C/C++ toolchain found");
        return;
    }
    let dir = create_hello_project("flavors");

    assert!(run_build(&dir, &[]).status.success());
    assert!(run_build(&dir, &["--link-type", "static"]).status.success());
    let build = dir.join("build");
    assert!(build.join("libPlanet_dyn_debug.so").exists());
    assert!(build.join("libPlanet_static_debug.a").exists());
    assert!(build.join("mason_dyn_debug.cache.json").exists());
    assert!(build.join("mason_static_debug.cache.json").exists());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn generated_source_feeds_an_object() {
    if !have_compiler() {
        eprintln!("Skipping test: no C/C++ toolchain found");
        return;
    }
    let dir = test_projects_root().join("generated");
    if dir.exists() {
        fs::remove_dir_all(&dir).ok();
    }
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::create_dir_all(dir.join("gen")).unwrap();

    // The "interpreter" is sh; the script copies its input to the output.
    fs::write(dir.join("gen/emit.sh"), "cp \"$1\" \"$2\"\n").unwrap();
    fs::write(dir.join("gen/answer.c.in"), "int answer(void) { return 42; }\n").unwrap();
    fs::write(
        dir.join("src/main.c"),
        "int answer(void);\nint main(void) { return answer() == 42 ? 0 : 1; }\n",
    )
    .unwrap();
    fs::write(
        dir.join("mason.toml"),
        r#"[project]
name = "gen"
default-targets = ["app"]

[[bundle]]
include = ["src"]

[[bundle.generated]]
output = "answer.c"
script = "gen/emit.sh"
interpreter = "sh"
inputs = ["gen/answer.c.in"]

[[bundle.executable]]
name = "app"
files = ["main", "answer.c"]
linker = "cc"
"#,
    )
    .unwrap();

    let output = run_build(&dir, &[]);
    assert!(
        output.status.success(),
        "build failed:\n{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let app = dir.join("build").join("app_debug");
    assert!(app.exists());
    let run = Command::new(&app).output().unwrap();
    assert!(run.status.success());

    // Touching the generator input regenerates and relinks.
    let before = mtime(&app);
    touch_newer(&dir.join("gen/answer.c.in"), &[&app]);
    assert!(run_build(&dir, &[]).status.success());
    assert!(mtime(&app) > before, "app must relink after regeneration");

    fs::remove_dir_all(&dir).ok();
}
