//! Certificate roundtrip: an emitted outcome must be confirmed against the
//! inputs that produced it, and a tampered one refuted.

use std::path::Path;
use std::process::{Command, Output};

use octopus_engine::bisim::{bisimulate, BisimOptions};
use octopus_engine::certificate::CertificateMeta;
use octopus_engine::queries::EngineCtx;
use octopus_ir::load_parser_from_str;
use octopus_smt::portfolio::{Portfolio, SolverKind, SolverOptions, SolverSpec};
use octopus_smt::terms::Terms;

const PARSER: &str = r#"[{
    "name": "start",
    "statements": [{"kind": "extract", "register": "hdr.h", "width": 4}],
    "transition": "accept"
}]"#;

fn emit_outcome(left_src: &str, right_src: &str) -> String {
    let left = load_parser_from_str(left_src).unwrap();
    let right = load_parser_from_str(right_src).unwrap();
    let terms = Terms::new();
    let portfolio = Portfolio::open(
        &[SolverSpec {
            kind: SolverKind::Z3,
            options: SolverOptions::default(),
        }],
        &terms,
    )
    .unwrap();
    let mut ctx = EngineCtx::new(terms, portfolio);
    let meta = CertificateMeta {
        engine_version: "test".into(),
        method: "symbolic".into(),
        solvers: vec!["z3".into()],
        left_sha256: String::new(),
        right_sha256: String::new(),
    };
    bisimulate(&left, &right, &mut ctx, &BisimOptions::default(), meta)
        .unwrap()
        .to_json()
}

fn certcheck(cert: &Path, left: &Path, right: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_octopus-certcheck"))
        .arg(cert)
        .arg(left)
        .arg(right)
        .args(["-s", r#"["z3"]"#])
        .output()
        .expect("octopus-certcheck binary runs")
}

#[test]
fn emitted_certificate_is_confirmed() {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("a.json");
    let right = dir.path().join("b.json");
    let cert = dir.path().join("cert.json");
    std::fs::write(&left, PARSER).unwrap();
    std::fs::write(&right, PARSER).unwrap();
    std::fs::write(&cert, emit_outcome(PARSER, PARSER)).unwrap();

    let output = certcheck(&cert, &left, &right);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Certificate confirmed."));
}

#[test]
fn tampered_certificate_is_refuted() {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("a.json");
    let right = dir.path().join("b.json");
    let cert = dir.path().join("cert.json");
    std::fs::write(&left, PARSER).unwrap();
    std::fs::write(&right, PARSER).unwrap();

    // Claim a class the fresh run cannot reproduce.
    let tampered = emit_outcome(PARSER, PARSER).replace("\"start\"", "\"phantom\"");
    std::fs::write(&cert, tampered).unwrap();

    let output = certcheck(&cert, &left, &right);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("REFUTED"));
}

#[test]
fn verdict_mismatch_is_refuted() {
    let narrow: &str = r#"[{
        "name": "start",
        "statements": [{"kind": "extract", "register": "hdr.h", "width": 3}],
        "transition": "accept"
    }]"#;

    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("a.json");
    let right = dir.path().join("b.json");
    let cert = dir.path().join("cert.json");
    // Certificate says equivalent, but the inputs on disk differ.
    std::fs::write(&left, PARSER).unwrap();
    std::fs::write(&right, narrow).unwrap();
    std::fs::write(&cert, emit_outcome(PARSER, PARSER)).unwrap();

    let output = certcheck(&cert, &left, &right);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn unreadable_certificate_is_an_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("a.json");
    std::fs::write(&left, PARSER).unwrap();

    let output = certcheck(&dir.path().join("missing.json"), &left, &left);
    assert_eq!(output.status.code(), Some(2));
}
