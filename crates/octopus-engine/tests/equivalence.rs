//! End-to-end equivalence scenarios, run against the in-process Z3 backend.

use octopus_engine::bisim::{bisimulate, BisimOptions};
use octopus_engine::certificate::{CertificateMeta, EquivalenceOutcome};
use octopus_engine::queries::EngineCtx;
use octopus_ir::interp::{bits_from_str, replay};
use octopus_ir::load_parser_from_str;
use octopus_ir::parser::Parser;
use octopus_smt::portfolio::{Portfolio, SolverKind, SolverOptions, SolverSpec};
use octopus_smt::terms::Terms;

fn engine_ctx() -> EngineCtx {
    let terms = Terms::new();
    let specs = vec![SolverSpec {
        kind: SolverKind::Z3,
        options: SolverOptions::default(),
    }];
    let portfolio = Portfolio::open(&specs, &terms).expect("z3 must be available in-process");
    EngineCtx::new(terms, portfolio)
}

fn test_meta() -> CertificateMeta {
    CertificateMeta {
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        method: "symbolic".to_string(),
        solvers: vec!["z3".to_string()],
        left_sha256: String::new(),
        right_sha256: String::new(),
    }
}

fn decide(left: &Parser, right: &Parser, options: &BisimOptions) -> EquivalenceOutcome {
    let mut ctx = engine_ctx();
    bisimulate(left, right, &mut ctx, options, test_meta()).expect("engine must not fail")
}

fn decide_all_modes(left_src: &str, right_src: &str) -> Vec<EquivalenceOutcome> {
    let left = load_parser_from_str(left_src).unwrap();
    let right = load_parser_from_str(right_src).unwrap();
    let leaps = BisimOptions {
        leaps: true,
        fallback_naive_on_unknown: false,
    };
    let naive = BisimOptions {
        leaps: false,
        fallback_naive_on_unknown: false,
    };
    vec![
        decide(&left, &right, &leaps),
        decide(&left, &right, &naive),
    ]
}

/// Replays a counterexample's witness through both parsers and requires the
/// outcomes to differ.
fn assert_witness_valid(left_src: &str, right_src: &str, outcome: &EquivalenceOutcome) {
    let EquivalenceOutcome::NotEquivalent(cex) = outcome else {
        panic!("expected a counterexample");
    };
    let left = load_parser_from_str(left_src).unwrap();
    let right = load_parser_from_str(right_src).unwrap();
    let witness = bits_from_str(&cex.witness_bits);
    assert_ne!(
        replay(&left, &witness),
        replay(&right, &witness),
        "witness {} must diverge",
        cex.witness_bits
    );
}

const FOUR_BIT_ACCEPT: &str = r#"[{
    "name": "start",
    "statements": [{"kind": "extract", "register": "hdr.h", "width": 4}],
    "transition": "accept"
}]"#;

#[test]
fn self_check_is_equivalent_with_singleton_certificate() {
    let outcomes = decide_all_modes(FOUR_BIT_ACCEPT, FOUR_BIT_ACCEPT);
    for outcome in &outcomes {
        let EquivalenceOutcome::Equivalent(cert) = outcome else {
            panic!("self-check must be equivalent");
        };
        assert!(!cert.classes.is_empty());
        // At most |states|^2 classes; here one state on each side.
        assert_eq!(cert.classes[0].state_left, "start");
        assert_eq!(cert.classes[0].state_right, "start");
    }
    // With leaps the certificate is exactly the start/start class.
    let EquivalenceOutcome::Equivalent(cert) = &outcomes[0] else {
        unreachable!()
    };
    assert_eq!(cert.classes.len(), 1);
}

#[test]
fn width_change_is_detected() {
    let three_bit: &str = r#"[{
        "name": "start",
        "statements": [{"kind": "extract", "register": "hdr.h", "width": 3}],
        "transition": "accept"
    }]"#;
    for outcome in decide_all_modes(FOUR_BIT_ACCEPT, three_bit) {
        let EquivalenceOutcome::NotEquivalent(cex) = &outcome else {
            panic!("width change must be detected");
        };
        // The narrower parser commits after three bits while the wider one
        // is still reading.
        assert_eq!(cex.offset, 3);
        assert_witness_valid(FOUR_BIT_ACCEPT, three_bit, &outcome);
    }
}

const SELECT_ONE_FIRST: &str = r#"[
  {"name": "start",
   "statements": [{"kind": "extract", "register": "hdr.t", "width": 1}],
   "transition": {
      "scrutinees": [{"kind": "reg", "name": "hdr.t"}],
      "cases": [
        {"patterns": [{"value": 1, "width": 1}], "target": "a"},
        {"patterns": [{"value": 0, "width": 1}], "target": "b"}],
      "default": "reject"}},
  {"name": "a",
   "statements": [{"kind": "extract", "register": "hdr.a", "width": 2}],
   "transition": "accept"},
  {"name": "b",
   "statements": [{"kind": "extract", "register": "hdr.b", "width": 2}],
   "transition": "accept"}
]"#;

const SELECT_ZERO_FIRST: &str = r#"[
  {"name": "start",
   "statements": [{"kind": "extract", "register": "hdr.t", "width": 1}],
   "transition": {
      "scrutinees": [{"kind": "reg", "name": "hdr.t"}],
      "cases": [
        {"patterns": [{"value": 0, "width": 1}], "target": "b"},
        {"patterns": [{"value": 1, "width": 1}], "target": "a"}],
      "default": "reject"}},
  {"name": "a",
   "statements": [{"kind": "extract", "register": "hdr.a", "width": 2}],
   "transition": "accept"},
  {"name": "b",
   "statements": [{"kind": "extract", "register": "hdr.b", "width": 2}],
   "transition": "accept"}
]"#;

#[test]
fn reordering_disjoint_select_arms_is_equivalent() {
    for outcome in decide_all_modes(SELECT_ONE_FIRST, SELECT_ZERO_FIRST) {
        assert!(
            outcome.are_equivalent(),
            "disjoint arms commute: {outcome}"
        );
    }
}

#[test]
fn first_match_flip_is_detected() {
    let wildcard_first: &str = r#"[{
        "name": "start",
        "statements": [{"kind": "extract", "register": "hdr.t", "width": 1}],
        "transition": {
            "scrutinees": [{"kind": "reg", "name": "hdr.t"}],
            "cases": [
              {"patterns": [{"wildcard": true}], "target": "accept"},
              {"patterns": [{"value": 1, "width": 1}], "target": "reject"}],
            "default": "reject"}
    }]"#;
    let exact_first: &str = r#"[{
        "name": "start",
        "statements": [{"kind": "extract", "register": "hdr.t", "width": 1}],
        "transition": {
            "scrutinees": [{"kind": "reg", "name": "hdr.t"}],
            "cases": [
              {"patterns": [{"value": 1, "width": 1}], "target": "reject"},
              {"patterns": [{"wildcard": true}], "target": "accept"}],
            "default": "reject"}
    }]"#;
    for outcome in decide_all_modes(wildcard_first, exact_first) {
        let EquivalenceOutcome::NotEquivalent(cex) = &outcome else {
            panic!("first-match flip must be detected");
        };
        // Divergence needs the scrutinee bit set.
        assert_eq!(cex.witness_bits, "1");
        assert_witness_valid(wildcard_first, exact_first, &outcome);
    }
}

const MPLS_LOOP: &str = r#"[{
    "name": "start",
    "statements": [{"kind": "extract", "register": "hdr.label", "width": 8}],
    "transition": {
        "scrutinees": [{"kind": "slice",
                        "base": {"kind": "reg", "name": "hdr.label"},
                        "hi": 7, "lo": 7}],
        "cases": [{"patterns": [{"value": 1, "width": 1}], "target": "accept"}],
        "default": "start"
    }
}]"#;

const MPLS_UNROLLED: &str = r#"[
  {"name": "start",
   "statements": [{"kind": "extract", "register": "hdr.label", "width": 8}],
   "transition": {
      "scrutinees": [{"kind": "slice",
                      "base": {"kind": "reg", "name": "hdr.label"},
                      "hi": 7, "lo": 7}],
      "cases": [{"patterns": [{"value": 1, "width": 1}], "target": "accept"}],
      "default": "again"}},
  {"name": "again",
   "statements": [{"kind": "extract", "register": "hdr.label", "width": 8}],
   "transition": {
      "scrutinees": [{"kind": "slice",
                      "base": {"kind": "reg", "name": "hdr.label"},
                      "hi": 7, "lo": 7}],
      "cases": [{"patterns": [{"value": 1, "width": 1}], "target": "accept"}],
      "default": "again"}}
]"#;

#[test]
fn self_loop_and_unrolled_loop_are_equivalent() {
    for outcome in decide_all_modes(MPLS_LOOP, MPLS_UNROLLED) {
        assert!(outcome.are_equivalent(), "loop forms agree: {outcome}");
    }
}

#[test]
fn reflexivity_on_a_looping_parser() {
    let outcomes = decide_all_modes(MPLS_LOOP, MPLS_LOOP);
    for outcome in &outcomes {
        let EquivalenceOutcome::Equivalent(cert) = outcome else {
            panic!("every parser is equivalent to itself");
        };
        assert!(!cert.classes.is_empty());
    }
    // With leaps every pair rests at a select boundary, so the certificate
    // is bounded by |states|^2; here that is a single class.
    let EquivalenceOutcome::Equivalent(cert) = &outcomes[0] else {
        unreachable!()
    };
    assert_eq!(cert.classes.len(), 1);
}

const TWO_HALVES: &str = r#"[
  {"name": "start",
   "statements": [{"kind": "extract", "register": "hdr.a", "width": 32}],
   "transition": "upper"},
  {"name": "upper",
   "statements": [{"kind": "extract", "register": "hdr.b", "width": 32}],
   "transition": "accept"}
]"#;

const ONE_WIDE: &str = r#"[
  {"name": "start",
   "statements": [
      {"kind": "extract", "register": "scratch", "width": 64},
      {"kind": "assign", "register": "hdr.a", "width": 32,
       "value": {"kind": "slice", "base": {"kind": "reg", "name": "scratch"},
                 "hi": 63, "lo": 32}},
      {"kind": "assign", "register": "hdr.b", "width": 32,
       "value": {"kind": "slice", "base": {"kind": "reg", "name": "scratch"},
                 "hi": 31, "lo": 0}}],
   "transition": "accept"}
]"#;

#[test]
fn leap_length_mismatch_is_equivalent() {
    let left = load_parser_from_str(TWO_HALVES).unwrap();
    let right = load_parser_from_str(ONE_WIDE).unwrap();
    let outcome = decide(&left, &right, &BisimOptions::default());
    assert!(outcome.are_equivalent(), "field mapping agrees: {outcome}");
}

#[test]
fn leap_and_naive_agree_on_disabled_leaps() {
    // `--disable_leaps` is the naive stride policy under the symbolic
    // engine; all verdicts must coincide.
    let pairs = [
        (FOUR_BIT_ACCEPT, FOUR_BIT_ACCEPT, true),
        (SELECT_ONE_FIRST, SELECT_ZERO_FIRST, true),
        (MPLS_LOOP, MPLS_UNROLLED, true),
    ];
    for (left_src, right_src, expected) in pairs {
        for outcome in decide_all_modes(left_src, right_src) {
            assert_eq!(outcome.are_equivalent(), expected);
        }
    }
}

#[test]
fn symmetry_of_the_verdict() {
    let wide = load_parser_from_str(FOUR_BIT_ACCEPT).unwrap();
    let narrow = load_parser_from_str(
        r#"[{
            "name": "start",
            "statements": [{"kind": "extract", "register": "hdr.h", "width": 3}],
            "transition": "accept"
        }]"#,
    )
    .unwrap();
    let options = BisimOptions::default();
    let forward = decide(&wide, &narrow, &options);
    let backward = decide(&narrow, &wide, &options);
    assert_eq!(forward.are_equivalent(), backward.are_equivalent());
    assert!(!forward.are_equivalent());
}

#[test]
fn divergent_observable_snapshots_are_detected() {
    // Same verdict, same consumption, but the parsers store different
    // slices of the packet in the same observable field.
    let stores_upper: &str = r#"[{
        "name": "start",
        "statements": [
            {"kind": "extract", "register": "scratch", "width": 8},
            {"kind": "assign", "register": "hdr.h", "width": 4,
             "value": {"kind": "slice", "base": {"kind": "reg", "name": "scratch"},
                       "hi": 7, "lo": 4}}],
        "transition": "accept"
    }]"#;
    let stores_lower: &str = r#"[{
        "name": "start",
        "statements": [
            {"kind": "extract", "register": "scratch", "width": 8},
            {"kind": "assign", "register": "hdr.h", "width": 4,
             "value": {"kind": "slice", "base": {"kind": "reg", "name": "scratch"},
                       "hi": 3, "lo": 0}}],
        "transition": "accept"
    }]"#;
    for outcome in decide_all_modes(stores_upper, stores_lower) {
        assert!(!outcome.are_equivalent());
        assert_witness_valid(stores_upper, stores_lower, &outcome);
    }
}

#[test]
fn fallback_option_does_not_change_verdicts() {
    let left = load_parser_from_str(MPLS_LOOP).unwrap();
    let right = load_parser_from_str(MPLS_UNROLLED).unwrap();
    let with_fallback = BisimOptions {
        leaps: true,
        fallback_naive_on_unknown: true,
    };
    assert!(decide(&left, &right, &with_fallback).are_equivalent());
}
