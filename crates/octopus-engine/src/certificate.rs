//! Certificates and counterexamples: the engine's publishable outcomes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use octopus_ir::interp::{Bits, Outcome};
use octopus_smt::backends::smtlib_printer::formula_to_smtlib;
use octopus_smt::formula::Formula;
use octopus_smt::terms::Terms;

/// Ties an outcome to the exact inputs and configuration that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateMeta {
    pub engine_version: String,
    pub method: String,
    pub solvers: Vec<String>,
    pub left_sha256: String,
    pub right_sha256: String,
}

/// One observable equivalence class of the discovered bisimulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertClass {
    pub state_left: String,
    pub state_right: String,
    /// Bits consumed inside each side's current state when the class was
    /// recorded; part of the class identity in naive (single-bit) runs.
    pub consumed_left: u32,
    pub consumed_right: u32,
    /// Registers asserted pairwise equal between the two sides.
    pub register_equalities: Vec<String>,
    /// The accumulated joint path condition, rendered as SMT-LIB.
    pub path_condition: String,
}

/// The bisimulation relation, adequate for external re-verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub verdict: String,
    pub meta: CertificateMeta,
    pub classes: Vec<CertClass>,
}

/// What one side did on the witness packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideReport {
    pub state: String,
    /// `accept`, `reject`, or `running` when the side had not committed.
    pub verdict: String,
    pub observable: IndexMap<String, String>,
}

impl SideReport {
    pub fn from_outcome(state: String, outcome: &Outcome) -> Self {
        let (verdict, observable) = match outcome {
            Outcome::Accept(store) => ("accept", render_store(store)),
            Outcome::Reject(store) => ("reject", render_store(store)),
            Outcome::Pending => ("running", IndexMap::new()),
        };
        Self {
            state,
            verdict: verdict.to_string(),
            observable,
        }
    }
}

fn render_store(store: &IndexMap<String, Bits>) -> IndexMap<String, String> {
    store
        .iter()
        .map(|(name, bits)| (name.clone(), bits.to_string()))
        .collect()
}

/// A concrete diverging input prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counterexample {
    pub verdict: String,
    pub meta: CertificateMeta,
    /// The witness packet, first-consumed bit first.
    pub witness_bits: String,
    /// Length of the witness in bits (the joint offset at divergence).
    pub offset: usize,
    pub left: SideReport,
    pub right: SideReport,
}

/// The engine's verdict on a parser pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EquivalenceOutcome {
    Equivalent(Certificate),
    NotEquivalent(Counterexample),
}

impl EquivalenceOutcome {
    pub fn are_equivalent(&self) -> bool {
        matches!(self, EquivalenceOutcome::Equivalent(_))
    }

    /// Stable machine-readable verdict tag.
    pub fn verdict_class(&self) -> &'static str {
        match self {
            EquivalenceOutcome::Equivalent(_) => "equivalent",
            EquivalenceOutcome::NotEquivalent(_) => "not_equivalent",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("outcome serialisation cannot fail")
    }
}

/// Render a class's joint path condition for the certificate.
pub fn render_path_condition(terms: &Terms, pc: &Formula) -> String {
    let arena = terms.read();
    formula_to_smtlib(&arena, pc)
}

impl fmt::Display for EquivalenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquivalenceOutcome::Equivalent(certificate) => {
                writeln!(f, "The two parsers are equivalent.")?;
                writeln!(f, "--- Bisimulation Certificate ---")?;
                for class in &certificate.classes {
                    write!(
                        f,
                        "({}+{}, {}+{})",
                        class.state_left,
                        class.consumed_left,
                        class.state_right,
                        class.consumed_right
                    )?;
                    if class.register_equalities.is_empty() {
                        writeln!(f, " (no register equalities)")?;
                    } else {
                        writeln!(f, " {}", class.register_equalities.join(" = "))?;
                    }
                    writeln!(f, "  under {}", class.path_condition)?;
                }
                Ok(())
            }
            EquivalenceOutcome::NotEquivalent(counterexample) => {
                writeln!(f, "The two parsers are NOT equivalent.")?;
                writeln!(f, "--- Counterexample ---")?;
                writeln!(
                    f,
                    "witness packet ({} bits): {}",
                    counterexample.offset, counterexample.witness_bits
                )?;
                for (label, side) in [
                    ("left", &counterexample.left),
                    ("right", &counterexample.right),
                ] {
                    writeln!(
                        f,
                        "{label}: {} in '{}'",
                        side.verdict, side.state
                    )?;
                    for (register, value) in &side.observable {
                        writeln!(f, "  {register} = {value}")?;
                    }
                }
                Ok(())
            }
        }
    }
}
