//! Covered-subset validation.
//!
//! A partially loadable IR that still typechecks but falls outside the
//! covered subset is a correctness hazard, so validation runs as a closed
//! predicate over the whole parser before any bisimulation: unknown
//! transition targets, arity or width mismatches in selects, reads of
//! possibly-unwritten register slices, and cycles that consume no input are
//! all rejected here.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::parser::{Parser, Pattern, State, Statement, Target, START_STATE};
use crate::LoadError;

pub fn validate(parser: &Parser) -> Result<(), LoadError> {
    if !parser.states.contains_key(START_STATE) {
        return Err(LoadError::Semantic(format!(
            "parser has no '{START_STATE}' state"
        )));
    }
    check_targets(parser)?;
    check_shapes(parser)?;
    check_must_write(parser)?;
    check_zero_bit_cycles(parser)?;
    Ok(())
}

fn targets_of(state: &State) -> impl Iterator<Item = &Target> {
    state.successor_targets()
}

fn check_targets(parser: &Parser) -> Result<(), LoadError> {
    for state in parser.states.values() {
        for target in targets_of(state) {
            if let Target::State(name) = target {
                if !parser.states.contains_key(name) {
                    return Err(LoadError::Semantic(format!(
                        "state '{}' transitions to unknown state '{name}'",
                        state.name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Widths: assignment values must fit their destination slice, select arms
/// must have one pattern per scrutinee, and exact patterns must width-match
/// their scrutinee.
fn check_shapes(parser: &Parser) -> Result<(), LoadError> {
    for state in parser.states.values() {
        for stmt in &state.statements {
            if let Statement::Assign {
                register,
                hi,
                lo,
                value,
            } = stmt
            {
                let value_width = value.width(&parser.registers)?;
                let slice_width = hi - lo + 1;
                if value_width != slice_width {
                    return Err(LoadError::Semantic(format!(
                        "assign to '{register}'[{hi}:{lo}] in '{}': value has width \
                         {value_width}, slice has width {slice_width}",
                        state.name
                    )));
                }
            }
        }

        let mut scrutinee_widths = Vec::with_capacity(state.select.scrutinees.len());
        for scrutinee in &state.select.scrutinees {
            scrutinee_widths.push(scrutinee.width(&parser.registers)?);
        }
        for (index, arm) in state.select.arms.iter().enumerate() {
            if arm.patterns.len() != scrutinee_widths.len() {
                return Err(LoadError::Semantic(format!(
                    "select arm {index} of '{}' has {} patterns for {} scrutinees",
                    state.name,
                    arm.patterns.len(),
                    scrutinee_widths.len()
                )));
            }
            for (pattern, &width) in arm.patterns.iter().zip(&scrutinee_widths) {
                if let Pattern::Exact {
                    width: pattern_width,
                    ..
                } = pattern
                {
                    if *pattern_width != width {
                        return Err(LoadError::Semantic(format!(
                            "select arm {index} of '{}': pattern width {pattern_width} \
                             does not match scrutinee width {width}",
                            state.name
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Forward must-write analysis: a register read is legal only if the
/// register is written on every path reaching the read. Joins intersect;
/// unreachable states keep the full set and never fail (dead code).
fn check_must_write(parser: &Parser) -> Result<(), LoadError> {
    let all: HashSet<&str> = parser.registers.keys().map(String::as_str).collect();
    let mut written_at_entry: HashMap<&str, HashSet<&str>> = parser
        .states
        .keys()
        .map(|name| (name.as_str(), all.clone()))
        .collect();
    written_at_entry.insert(START_STATE, HashSet::new());

    let mut worklist: VecDeque<&str> = VecDeque::from([START_STATE]);
    while let Some(name) = worklist.pop_front() {
        let state = &parser.states[name];
        let mut written = written_at_entry[name].clone();
        for stmt in &state.statements {
            match stmt {
                Statement::Extract { register, .. } => {
                    written.insert(register.as_str());
                }
                Statement::Assign {
                    register, hi, lo, ..
                } => {
                    // A partial write only defines the slice, so it counts as
                    // a definition only when the register is already defined.
                    let full = *lo == 0 && *hi == parser.register_width(register) - 1;
                    if full {
                        written.insert(register.as_str());
                    }
                }
            }
        }
        for target in targets_of(state) {
            if let Target::State(successor) = target {
                let entry = written_at_entry
                    .get_mut(successor.as_str())
                    .expect("targets validated");
                let narrowed: HashSet<&str> =
                    entry.intersection(&written).copied().collect();
                if narrowed.len() != entry.len() {
                    *entry = narrowed;
                    worklist.push_back(parser.states[successor.as_str()].name.as_str());
                }
            }
        }
    }

    // Second pass: with entry sets fixed, check every read (and every
    // partial write) in statement order.
    for state in parser.states.values() {
        let mut written = written_at_entry[state.name.as_str()].clone();
        let check_reads = |expr: &crate::parser::Expr,
                               written: &HashSet<&str>|
         -> Result<(), LoadError> {
            let mut reads = Vec::new();
            expr.reads(&mut reads);
            for register in reads {
                if !written.contains(register) {
                    return Err(LoadError::Semantic(format!(
                        "'{}' reads register '{register}' before it is written on \
                         every path",
                        state.name
                    )));
                }
            }
            Ok(())
        };

        for stmt in &state.statements {
            match stmt {
                Statement::Extract { register, .. } => {
                    written.insert(register.as_str());
                }
                Statement::Assign {
                    register,
                    hi,
                    lo,
                    value,
                } => {
                    check_reads(value, &written)?;
                    let full = *lo == 0 && *hi == parser.register_width(register) - 1;
                    if !full && !written.contains(register.as_str()) {
                        return Err(LoadError::Semantic(format!(
                            "'{}' partially writes register '{register}' before it is \
                             fully written",
                            state.name
                        )));
                    }
                    written.insert(register.as_str());
                }
            }
        }
        for scrutinee in &state.select.scrutinees {
            check_reads(scrutinee, &written)?;
        }
    }
    Ok(())
}

/// A cycle through states that extract nothing would let the machine loop
/// without consuming input, which is outside the bounded-head subset.
fn check_zero_bit_cycles(parser: &Parser) -> Result<(), LoadError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    let mut marks: HashMap<&str, Mark> = parser
        .states
        .values()
        .filter(|s| s.extract_width == 0)
        .map(|s| (s.name.as_str(), Mark::White))
        .collect();

    fn visit<'a>(
        parser: &'a Parser,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), LoadError> {
        marks.insert(name, Mark::Grey);
        for target in targets_of(&parser.states[name]) {
            if let Target::State(successor) = target {
                match marks.get(successor.as_str()) {
                    Some(Mark::Grey) => {
                        return Err(LoadError::Unsupported(format!(
                            "cycle through '{successor}' consumes no input bits"
                        )))
                    }
                    Some(Mark::White) => {
                        let successor = parser.states[successor.as_str()].name.as_str();
                        visit(parser, successor, marks)?;
                    }
                    _ => {}
                }
            }
        }
        marks.insert(name, Mark::Black);
        Ok(())
    }

    let zero_states: Vec<&str> = marks.keys().copied().collect();
    for name in zero_states {
        if marks[name] == Mark::White {
            let name = parser.states[name].name.as_str();
            visit(parser, name, &mut marks)?;
        }
    }
    Ok(())
}
