//! Exit-code and output contract of the `octopus` binary.

use std::path::Path;
use std::process::{Command, Output};

const FOUR_BIT_ACCEPT: &str = r#"[{
    "name": "start",
    "statements": [{"kind": "extract", "register": "hdr.h", "width": 4}],
    "transition": "accept"
}]"#;

const THREE_BIT_ACCEPT: &str = r#"[{
    "name": "start",
    "statements": [{"kind": "extract", "register": "hdr.h", "width": 3}],
    "transition": "accept"
}]"#;

const LOOKAHEAD: &str = r#"[{
    "name": "start",
    "statements": [{"kind": "lookahead", "register": "hdr.h", "width": 4}],
    "transition": "accept"
}]"#;

fn write_fixture(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

fn octopus(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_octopus"))
        .args(args)
        .output()
        .expect("octopus binary runs")
}

#[test]
fn equivalent_inputs_exit_zero() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_fixture(dir.path(), "a.json", FOUR_BIT_ACCEPT);
    let b = write_fixture(dir.path(), "b.json", FOUR_BIT_ACCEPT);

    let output = octopus(&["-j", "-s", r#"["z3"]"#, &a, &b]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("The two parsers are equivalent."));
    assert!(stdout.contains("--- Bisimulation Certificate ---"));
}

#[test]
fn mismatch_exits_zero_without_flag_and_one_with_it() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_fixture(dir.path(), "a.json", FOUR_BIT_ACCEPT);
    let b = write_fixture(dir.path(), "b.json", THREE_BIT_ACCEPT);

    let relaxed = octopus(&["-j", "-s", r#"["z3"]"#, &a, &b]);
    assert_eq!(relaxed.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&relaxed.stdout)
        .contains("The two parsers are NOT equivalent."));

    let strict = octopus(&["-j", "-f", "-s", r#"["z3"]"#, &a, &b]);
    assert_eq!(strict.status.code(), Some(1));
}

#[test]
fn unsupported_construct_exits_four() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_fixture(dir.path(), "a.json", LOOKAHEAD);
    let b = write_fixture(dir.path(), "b.json", FOUR_BIT_ACCEPT);

    let output = octopus(&["-j", "-s", r#"["z3"]"#, &a, &b]);
    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stderr).contains("lookahead"));
}

#[test]
fn missing_input_exits_two() {
    let output = octopus(&["-j", "/nonexistent/a.json", "/nonexistent/b.json"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn usage_error_exits_two() {
    let output = octopus(&["only-one-file.json"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn bad_solver_spec_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_fixture(dir.path(), "a.json", FOUR_BIT_ACCEPT);

    let output = octopus(&["-j", "-s", "not-json", &a, &a]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn output_file_carries_the_json_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_fixture(dir.path(), "a.json", FOUR_BIT_ACCEPT);
    let out = dir.path().join("cert.json");

    let output = octopus(&[
        "-j",
        "-s",
        r#"["z3"]"#,
        "-o",
        out.to_str().unwrap(),
        &a,
        &a,
    ]);
    assert_eq!(output.status.code(), Some(0));

    let written = std::fs::read_to_string(&out).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(parsed["verdict"], "equivalent");
    assert!(parsed["classes"].is_array());
    assert!(parsed["meta"]["left_sha256"].is_string());
}

#[test]
fn stat_prints_timing_and_memory() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_fixture(dir.path(), "a.json", FOUR_BIT_ACCEPT);

    let output = octopus(&["-j", "-S", "-s", r#"["z3"]"#, &a, &a]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Wall time:"));
    assert!(stdout.contains("Peak memory:"));
}

#[test]
fn naive_and_leapless_agree_with_the_default() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_fixture(dir.path(), "a.json", FOUR_BIT_ACCEPT);
    let b = write_fixture(dir.path(), "b.json", THREE_BIT_ACCEPT);

    for extra in [&[][..], &["-n"][..], &["-L"][..]] {
        let mut args = vec!["-j", "-f", "-s", r#"["z3"]"#];
        args.extend_from_slice(extra);
        args.push(&a);
        args.push(&b);
        let output = octopus(&args);
        assert_eq!(output.status.code(), Some(1), "args: {args:?}");
    }
}
