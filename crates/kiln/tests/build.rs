//! End-to-end builds against a fake compiler driver

#![cfg(unix)]

mod harness;
use harness::{TestEnv, create_module_chain, install_fake_clang};

fn project_with_fake_clang() -> TestEnv {
    let mut env = TestEnv::new();
    create_module_chain(&env);
    install_fake_clang(&mut env);
    env
}

#[test_log::test]
fn builds_then_reuses_artifacts() {
    let env = project_with_fake_clang();

    let first = env.kiln(&["build"]);
    assert!(first.success, "first build failed:\n{}\n{}", first.stdout, first.stderr);
    assert!(first.contains("3 compiled, 0 up to date"), "{}", first.stdout);
    assert!(env.file_exists("kiln.out/clang/debug/app"));
    assert!(env.file_exists("kiln.out/clang/debug/obj/core.ixx.o"));
    assert!(env.file_exists("kiln.out/clang/debug/modules/core.pcm"));
    assert!(env.file_exists("kiln.out/clang/debug/modules/util.pcm"));
    assert!(env.file_exists(".kiln/runs/latest"));

    let second = env.kiln(&["build"]);
    assert!(second.success, "{}", second.stderr);
    assert!(second.contains("0 compiled, 3 up to date"), "{}", second.stdout);

    let explain = env.kiln(&["explain"]);
    assert!(explain.success, "{}", explain.stderr);
    assert!(explain.contains("SUCCESS"), "{}", explain.stdout);
    assert!(explain.contains("src/main.cpp"), "{}", explain.stdout);
    assert!(explain.contains("linked"), "{}", explain.stdout);
}

#[test_log::test]
fn touching_a_dependency_rebuilds_its_importers() {
    let env = project_with_fake_clang();

    let first = env.kiln(&["build"]);
    assert!(first.success, "{}", first.stderr);

    std::thread::sleep(std::time::Duration::from_millis(20));
    env.touch("src/main.cpp");
    let only_main = env.kiln(&["build"]);
    assert!(only_main.success, "{}", only_main.stderr);
    assert!(only_main.contains("1 compiled, 2 up to date"), "{}", only_main.stdout);

    std::thread::sleep(std::time::Duration::from_millis(20));
    env.touch("src/core.ixx");
    let all = env.kiln(&["build"]);
    assert!(all.success, "{}", all.stderr);
    assert!(all.contains("3 compiled, 0 up to date"), "{}", all.stdout);
}

#[test_log::test]
fn configurations_get_their_own_output_directory() {
    let env = project_with_fake_clang();

    let release = env.kiln(&["build", "--config", "release,analyze"]);
    assert!(release.success, "{}", release.stderr);
    assert!(env.file_exists("kiln.out/clang/release/app"));
    assert!(!env.file_exists("kiln.out/clang/debug"));

    let unknown = env.kiln(&["build", "--config", "fast"]);
    assert!(!unknown.success);
    assert!(unknown.contains("unknown configuration 'fast'"), "{}", unknown.stderr);
}

#[test_log::test]
fn compile_failure_is_reported_and_recorded() {
    let env = project_with_fake_clang();
    env.write_file("src/bad.cpp", "// BROKEN\nint helper() { return 1; }\n");

    let result = env.kiln(&["build", "--jobs", "2"]);
    assert!(!result.success, "a broken file must fail the build");
    assert!(result.contains("broken on purpose"), "{}", result.stderr);
    assert!(result.contains("bad.cpp"), "{}", result.stderr);
    assert!(!env.file_exists("kiln.out/clang/debug/app"));
    assert!(!env.file_exists("kiln.out/clang/debug/obj/util.ixx.o"));
    assert!(!env.file_exists("kiln.out/clang/debug/obj/main.cpp.o"));

    let explain = env.kiln(&["explain", "--failed"]);
    assert!(explain.success, "{}", explain.stderr);
    assert!(explain.contains("FAILED"), "{}", explain.stdout);
    assert!(explain.contains("src/bad.cpp"), "{}", explain.stdout);
    assert!(explain.contains("cancelled"), "{}", explain.stdout);
    assert!(explain.contains("src/util.ixx"), "{}", explain.stdout);
}

#[test_log::test]
fn levels_include_the_shipped_std_module() {
    let mut env = TestEnv::new();
    env.write_file("src/main.cpp", "import std;\nint main() {}\n");
    env.write_file("share/libc++/v1/std.cppm", "export module std;\n");
    install_fake_clang(&mut env);

    let result = env.kiln(&["levels"]);

    assert!(result.success, "{}", result.stderr);
    assert!(result.contains("std.cppm"), "{}", result.stdout);
    assert!(result.position("std.cppm") < result.position("main.cpp"));
    assert!(!result.contains("which no source exports"), "{}", result.stdout);
}

#[test_log::test]
fn listed_compilers_include_the_fake() {
    let env = project_with_fake_clang();

    let result = env.kiln(&["compilers"]);
    assert!(result.success, "{}", result.stderr);
    assert!(result.contains("99.0"), "{}", result.stdout);
    assert!(result.contains("fake-bin/clang++"), "{}", result.stdout);
}
