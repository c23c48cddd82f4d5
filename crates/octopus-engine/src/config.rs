//! Symbolic configurations.

use indexmap::IndexMap;

use octopus_ir::parser::{Parser, START_STATE};
use octopus_smt::formula::Formula;
use octopus_smt::terms::TermId;

/// Control position of one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ctrl {
    InState(String),
    Accept,
    Reject,
}

impl std::fmt::Display for Ctrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ctrl::InState(name) => write!(f, "{name}"),
            Ctrl::Accept => write!(f, "accept"),
            Ctrl::Reject => write!(f, "reject"),
        }
    }
}

/// Terminal verdict of a configuration, if committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Accept => write!(f, "accept"),
            Verdict::Reject => write!(f, "reject"),
        }
    }
}

/// One side of the bisimulation: control state, input progress, register
/// file and accumulated path condition. Configurations are never mutated
/// after creation; the step relation produces fresh successors.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub ctrl: Ctrl,
    /// Buffer offset at which the current state was entered.
    pub entry_offset: usize,
    /// Bits consumed so far across the whole run.
    pub offset: usize,
    pub regs: IndexMap<String, TermId>,
    pub pc: Formula,
}

impl Cfg {
    pub fn initial() -> Self {
        Self {
            ctrl: Ctrl::InState(START_STATE.to_string()),
            entry_offset: 0,
            offset: 0,
            regs: IndexMap::new(),
            pc: Formula::True,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self.ctrl {
            Ctrl::Accept => Some(Verdict::Accept),
            Ctrl::Reject => Some(Verdict::Reject),
            Ctrl::InState(_) => None,
        }
    }

    /// Bits consumed inside the current state.
    pub fn consumed_in_state(&self) -> u32 {
        (self.offset - self.entry_offset) as u32
    }

    /// Bits left until this side's next select.
    pub fn remaining(&self, parser: &Parser) -> u32 {
        match &self.ctrl {
            Ctrl::InState(name) => parser.state(name).extract_width - self.consumed_in_state(),
            _ => 0,
        }
    }

    /// The observable part of the register file, in write order.
    pub fn observable(&self) -> impl Iterator<Item = (&str, TermId)> {
        self.regs
            .iter()
            .filter(|(name, _)| Parser::is_observable(name))
            .map(|(name, term)| (name.as_str(), *term))
    }
}

/// A pair configuration. Both sides always share the same offset: the
/// engine advances them by a common stride, so "exactly one side has
/// committed" is precisely the prefix divergence of the equivalence
/// definition.
#[derive(Debug, Clone)]
pub struct Pair {
    pub left: Cfg,
    pub right: Cfg,
}

impl Pair {
    pub fn joint_pc(&self) -> Formula {
        Formula::and2(self.left.pc.clone(), self.right.pc.clone())
    }

    pub fn offset(&self) -> usize {
        debug_assert_eq!(self.left.offset, self.right.offset);
        self.left.offset
    }

    pub fn describe(&self) -> String {
        format!(
            "({}, {}) at offset {}",
            self.left.ctrl,
            self.right.ctrl,
            self.offset()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_config_is_at_start() {
        let cfg = Cfg::initial();
        assert_eq!(cfg.ctrl, Ctrl::InState("start".to_string()));
        assert_eq!(cfg.offset, 0);
        assert!(cfg.verdict().is_none());
        assert!(cfg.pc.is_true());
    }

    #[test]
    fn verdicts() {
        let mut cfg = Cfg::initial();
        cfg.ctrl = Ctrl::Accept;
        assert_eq!(cfg.verdict(), Some(Verdict::Accept));
        cfg.ctrl = Ctrl::Reject;
        assert_eq!(cfg.verdict(), Some(Verdict::Reject));
    }
}
