//! IR JSON loading and canonicalisation.
//!
//! The adapter consumes the compiler's IR JSON: a top-level array of state
//! objects (a `{"states": [...]}` wrapper is tolerated). Unknown keys are
//! ignored; missing required keys are schema errors; recognised constructs
//! outside the covered subset are reported by name as unsupported. A
//! `select` without a `default` arm is canonicalised to `default: reject`,
//! and a state without a terminal transition is an implicit reject.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::parser::{Arm, Expr, ExprOp, Parser, Pattern, Select, State, Statement, Target};
use crate::{validate, LoadError};

/// Load and validate a parser from an IR JSON file.
pub fn load_parser(path: &str) -> Result<Parser, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_string(),
        source,
    })?;
    load_parser_from_str(&text)
}

/// Load and validate a parser from IR JSON text.
pub fn load_parser_from_str(text: &str) -> Result<Parser, LoadError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| LoadError::Schema(e.to_string()))?;

    let states_value = match &value {
        Value::Array(_) => value.clone(),
        Value::Object(map) => map
            .get("states")
            .cloned()
            .ok_or_else(|| LoadError::Schema("top-level object has no 'states' key".into()))?,
        other => {
            return Err(LoadError::Schema(format!(
                "expected an array of states, got {}",
                json_kind(other)
            )))
        }
    };

    let raw_states: Vec<RawState> = serde_json::from_value(states_value)
        .map_err(|e| LoadError::Schema(e.to_string()))?;
    if raw_states.is_empty() {
        return Err(LoadError::Schema("parser has no states".into()));
    }

    let mut registers: IndexMap<String, u32> = IndexMap::new();
    let mut states: IndexMap<String, State> = IndexMap::new();
    for raw in raw_states {
        let state = lower_state(raw, &mut registers)?;
        debug!(state = %state.name, bits = state.extract_width, "loaded state");
        if states.contains_key(&state.name) {
            return Err(LoadError::Schema(format!("duplicate state '{}'", state.name)));
        }
        states.insert(state.name.clone(), state);
    }

    let parser = Parser { states, registers };
    validate::validate(&parser)?;
    Ok(parser)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Deserialize)]
struct RawState {
    name: String,
    #[serde(default)]
    statements: Vec<RawStatement>,
    #[serde(default)]
    transition: Option<RawTransition>,
}

#[derive(Deserialize)]
struct RawStatement {
    kind: String,
    register: Option<String>,
    width: Option<u32>,
    hi: Option<u32>,
    lo: Option<u32>,
    value: Option<RawExpr>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTransition {
    Direct(String),
    Select(RawSelect),
}

#[derive(Deserialize)]
struct RawSelect {
    kind: Option<String>,
    #[serde(default)]
    scrutinees: Vec<RawExpr>,
    #[serde(default)]
    cases: Vec<RawCase>,
    #[serde(rename = "default")]
    default_target: Option<String>,
}

#[derive(Deserialize)]
struct RawCase {
    #[serde(default)]
    patterns: Vec<RawPattern>,
    target: Option<String>,
}

#[derive(Deserialize)]
struct RawPattern {
    value: Option<Value>,
    width: Option<u32>,
    #[serde(default)]
    wildcard: bool,
}

#[derive(Deserialize)]
struct RawExpr {
    kind: String,
    name: Option<String>,
    base: Option<Box<RawExpr>>,
    left: Option<Box<RawExpr>>,
    right: Option<Box<RawExpr>>,
    hi: Option<u32>,
    lo: Option<u32>,
    value: Option<Value>,
    width: Option<u32>,
}

fn lower_state(
    raw: RawState,
    registers: &mut IndexMap<String, u32>,
) -> Result<State, LoadError> {
    let name = raw.name;
    let mut statements = Vec::with_capacity(raw.statements.len());
    let mut extract_width = 0u32;

    for raw_stmt in raw.statements {
        let stmt = lower_statement(&name, raw_stmt, registers)?;
        if let Statement::Extract { width, .. } = &stmt {
            extract_width += width;
        }
        statements.push(stmt);
    }

    let select = match raw.transition {
        None => Select::direct(Target::Reject),
        Some(RawTransition::Direct(target)) => Select::direct(parse_target(&target)),
        Some(RawTransition::Select(raw_select)) => lower_select(&name, raw_select)?,
    };

    Ok(State {
        name,
        statements,
        select,
        extract_width,
    })
}

fn lower_statement(
    state: &str,
    raw: RawStatement,
    registers: &mut IndexMap<String, u32>,
) -> Result<Statement, LoadError> {
    match raw.kind.as_str() {
        "extract" => {
            let register = raw.register.ok_or_else(|| {
                LoadError::Schema(format!("extract in '{state}' missing 'register'"))
            })?;
            let width = raw.width.ok_or_else(|| {
                // A width-less extract is the source language's
                // variable-width form, which is outside the subset.
                LoadError::Unsupported(format!(
                    "variable-width extract of '{register}' in '{state}'"
                ))
            })?;
            if width == 0 {
                return Err(LoadError::Semantic(format!(
                    "extract of '{register}' in '{state}' has width 0"
                )));
            }
            declare_register(registers, &register, width)?;
            Ok(Statement::Extract { register, width })
        }
        "assign" => {
            let register = raw.register.ok_or_else(|| {
                LoadError::Schema(format!("assign in '{state}' missing 'register'"))
            })?;
            let value = raw.value.ok_or_else(|| {
                LoadError::Schema(format!("assign in '{state}' missing 'value'"))
            })?;
            let value = lower_expr(value)?;

            let declared = registers.get(&register).copied();
            let width = match (declared, raw.width) {
                (Some(w), _) => w,
                (None, Some(w)) if w > 0 => {
                    declare_register(registers, &register, w)?;
                    w
                }
                (None, _) => {
                    return Err(LoadError::Semantic(format!(
                        "assign to unknown register '{register}' in '{state}' needs a 'width'"
                    )))
                }
            };
            let hi = raw.hi.unwrap_or(width - 1);
            let lo = raw.lo.unwrap_or(0);
            if lo > hi || hi >= width {
                return Err(LoadError::Semantic(format!(
                    "assign slice [{hi}:{lo}] out of range for '{register}' (width {width})"
                )));
            }
            Ok(Statement::Assign {
                register,
                hi,
                lo,
                value,
            })
        }
        other => Err(LoadError::Unsupported(format!(
            "statement kind '{other}' in '{state}'"
        ))),
    }
}

fn declare_register(
    registers: &mut IndexMap<String, u32>,
    name: &str,
    width: u32,
) -> Result<(), LoadError> {
    match registers.get(name) {
        Some(&existing) if existing != width => Err(LoadError::Semantic(format!(
            "register '{name}' used with widths {existing} and {width}"
        ))),
        Some(_) => Ok(()),
        None => {
            registers.insert(name.to_string(), width);
            Ok(())
        }
    }
}

fn lower_select(state: &str, raw: RawSelect) -> Result<Select, LoadError> {
    if let Some(kind) = &raw.kind {
        if kind != "select" {
            return Err(LoadError::Unsupported(format!(
                "transition kind '{kind}' in '{state}'"
            )));
        }
    }
    let scrutinees: Result<Vec<Expr>, LoadError> =
        raw.scrutinees.into_iter().map(lower_expr).collect();
    let scrutinees = scrutinees?;

    let mut arms = Vec::with_capacity(raw.cases.len());
    for case in raw.cases {
        let target = case.target.ok_or_else(|| {
            LoadError::Schema(format!("select case in '{state}' missing 'target'"))
        })?;
        let patterns: Result<Vec<Pattern>, LoadError> = case
            .patterns
            .into_iter()
            .map(|p| lower_pattern(state, p))
            .collect();
        arms.push(Arm {
            patterns: patterns?,
            target: parse_target(&target),
        });
    }

    let default = match raw.default_target {
        Some(target) => parse_target(&target),
        None => Target::Reject,
    };

    Ok(Select {
        scrutinees,
        arms,
        default,
    })
}

fn lower_pattern(state: &str, raw: RawPattern) -> Result<Pattern, LoadError> {
    if raw.wildcard {
        return Ok(Pattern::Wildcard);
    }
    let (Some(value), Some(width)) = (raw.value, raw.width) else {
        return Err(LoadError::Schema(format!(
            "pattern in '{state}' needs 'value' and 'width' (or 'wildcard')"
        )));
    };
    Ok(Pattern::Exact {
        value: parse_const(&value, width)?,
        width,
    })
}

fn parse_target(name: &str) -> Target {
    match name {
        "accept" => Target::Accept,
        "reject" => Target::Reject,
        state => Target::State(state.to_string()),
    }
}

fn lower_expr(raw: RawExpr) -> Result<Expr, LoadError> {
    let kind = raw.kind.as_str();
    match kind {
        "reg" => {
            let name = raw
                .name
                .ok_or_else(|| LoadError::Schema("reg expression missing 'name'".into()))?;
            Ok(Expr::Reg(name))
        }
        "slice" => {
            let base = raw
                .base
                .ok_or_else(|| LoadError::Schema("slice expression missing 'base'".into()))?;
            let (Some(hi), Some(lo)) = (raw.hi, raw.lo) else {
                return Err(LoadError::Schema("slice expression missing 'hi'/'lo'".into()));
            };
            Ok(Expr::Slice {
                base: Box::new(lower_expr(*base)?),
                hi,
                lo,
            })
        }
        "concat" => {
            let (left, right) = both_sides(kind, raw.left, raw.right)?;
            Ok(Expr::Concat {
                left: Box::new(left),
                right: Box::new(right),
            })
        }
        "const" => {
            let width = raw
                .width
                .ok_or_else(|| LoadError::Schema("const expression missing 'width'".into()))?;
            let value = raw
                .value
                .ok_or_else(|| LoadError::Schema("const expression missing 'value'".into()))?;
            Ok(Expr::Const {
                value: parse_const(&value, width)?,
                width,
            })
        }
        "not" => {
            let base = raw
                .base
                .ok_or_else(|| LoadError::Schema("not expression missing 'base'".into()))?;
            Ok(Expr::Not(Box::new(lower_expr(*base)?)))
        }
        "and" | "or" | "xor" | "shl" | "shr" => {
            let op = match kind {
                "and" => ExprOp::And,
                "or" => ExprOp::Or,
                "xor" => ExprOp::Xor,
                "shl" => ExprOp::Shl,
                _ => ExprOp::Shr,
            };
            let (left, right) = both_sides(kind, raw.left, raw.right)?;
            Ok(Expr::Bin {
                op,
                left: Box::new(left),
                right: Box::new(right),
            })
        }
        other => Err(LoadError::Unsupported(format!("expression kind '{other}'"))),
    }
}

fn both_sides(
    kind: &str,
    left: Option<Box<RawExpr>>,
    right: Option<Box<RawExpr>>,
) -> Result<(Expr, Expr), LoadError> {
    let left = left
        .ok_or_else(|| LoadError::Schema(format!("{kind} expression missing 'left'")))?;
    let right = right
        .ok_or_else(|| LoadError::Schema(format!("{kind} expression missing 'right'")))?;
    Ok((lower_expr(*left)?, lower_expr(*right)?))
}

/// Constants appear as JSON numbers or as strings in decimal, `0x…`, or
/// `0b…` form (the string forms cover values beyond 64 bits). Values wider
/// than 128 bits are outside the covered subset.
fn parse_const(value: &Value, width: u32) -> Result<u128, LoadError> {
    if width > 128 {
        return Err(LoadError::Unsupported(format!(
            "constant of width {width} (limit 128)"
        )));
    }
    let parsed: u128 = match value {
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| LoadError::Schema(format!("invalid constant {n}")))?,
        Value::String(s) => {
            let digits = s.trim();
            let result = if let Some(hex) = digits.strip_prefix("0x") {
                u128::from_str_radix(hex, 16)
            } else if let Some(bin) = digits.strip_prefix("0b") {
                u128::from_str_radix(bin, 2)
            } else {
                digits.parse()
            };
            result.map_err(|_| LoadError::Schema(format!("invalid constant '{s}'")))?
        }
        other => {
            return Err(LoadError::Schema(format!(
                "constant must be a number or string, got {}",
                json_kind(other)
            )))
        }
    };
    if width < 128 && parsed >> width != 0 {
        return Err(LoadError::Semantic(format!(
            "constant {parsed} does not fit in {width} bits"
        )));
    }
    Ok(parsed)
}
