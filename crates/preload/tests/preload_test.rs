//! Runs this test binary again with the library preloaded, and checks the
//! records its allocations leave on standard error.

#![cfg(target_os = "linux")]

use std::{
    env::{
        self,
        consts::{DLL_PREFIX, DLL_SUFFIX},
    },
    hint::black_box,
    path::PathBuf,
    process::Command,
};

/// Set in the child process only.
const CHILD_ENV: &str = "DEBMALLOC_PRELOAD_CHILD";

fn preload_library() -> PathBuf {
    let exe = env::current_exe().unwrap();
    let deps = exe.parent().unwrap();
    let name = format!("{}debmalloc_preload{}", DLL_PREFIX, DLL_SUFFIX);

    [deps, deps.parent().unwrap()]
        .iter()
        .map(|dir| dir.join(&name))
        .find(|path| path.exists())
        .unwrap_or_else(|| panic!("{} is not built next to {}", name, exe.display()))
}

/// Runs [`allocates_in_child`] under `LD_PRELOAD` and returns its stderr.
fn run_child(priority: Option<&str>) -> String {
    let mut command = Command::new(env::current_exe().unwrap());

    command
        .args(["--exact", "allocates_in_child", "--nocapture", "--test-threads=1"])
        .env("LD_PRELOAD", preload_library())
        .env(CHILD_ENV, "1");

    match priority {
        Some(priority) => command.env("DEBMALLOC_PRIORITY", priority),
        None => command.env_remove("DEBMALLOC_PRIORITY"),
    };

    let output = command.output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    assert!(output.status.success(), "child failed: {}", stderr);

    stderr
}

#[test]
fn allocates_in_child() {
    if env::var_os(CHILD_ENV).is_none() {
        return;
    }

    let mut grown: Vec<u8> = black_box(Vec::with_capacity(100));
    grown.reserve_exact(5000);

    let single: Vec<u8> = black_box(Vec::with_capacity(12345));
    let zeroed = black_box(vec![0u8; 23456]);

    drop(single);
    drop(zeroed);
    drop(grown);
}

fn records<'a>(stderr: &'a str, needle: &str) -> Vec<&'a str> {
    stderr.lines().filter(|line| line.contains(needle)).collect()
}

#[test]
fn exported_routines_emit_record_pairs() {
    let stderr = run_child(Some("6"));

    let malloc = records(&stderr, "malloc():6:malloc(12345)");
    assert_eq!(malloc.len(), 2, "{}", stderr);
    assert!(malloc[0].starts_with("crates/preload/src/lib.rs:"));
    assert!(malloc[0].ends_with(":malloc():6:malloc(12345)"));
    assert!(malloc[1].contains(":malloc():6:malloc(12345) = 0x"));

    let calloc = records(&stderr, "calloc():6:calloc(23456, 1)");
    assert_eq!(calloc.len(), 2, "{}", stderr);
    assert!(calloc[1].contains("calloc(23456, 1) = 0x"));

    assert!(records(&stderr, ":realloc():6:realloc(0x")
        .iter()
        .any(|line| line.contains(", 5000) = 0x")));

    let frees = records(&stderr, ":free():6:free(");
    assert!(frees.iter().any(|line| line.ends_with(") = void")));
}

#[test]
fn priority_comes_from_the_environment() {
    let stderr = run_child(None);
    assert_eq!(records(&stderr, ":malloc():5:malloc(12345)").len(), 2);

    let stderr = run_child(Some("loud"));
    assert_eq!(records(&stderr, ":malloc():5:malloc(12345)").len(), 2);

    let stderr = run_child(Some("0"));
    assert_eq!(records(&stderr, ":malloc():0:malloc(12345)").len(), 2);
}
