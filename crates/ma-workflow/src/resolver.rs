//! Variable Resolver (spec §4.9 step 2, invariant 7).
//!
//! An exact `${var}` match preserves the variable's JSON type; `${var}`
//! appearing inline inside a larger string is stringified in place;
//! unresolved templates are left as literal text. Resolved expressions
//! support `.toUpperCase()`/`.toLowerCase()` transforms and `a || b ||
//! 'literal'` fallback chains, reusing the same truthiness rule as the
//! condition evaluator (`ma_core::expr::truthy`) to decide when a term in
//! the chain is "present".
//!
//! This is a small dedicated parser rather than a reuse of
//! `ma_core::expr`: the fallback chain here additionally admits `[]`/`{}`
//! literal forms that the condition grammar does not define, and keeping
//! the two separate avoids widening the already-tested condition grammar
//! for a resolver-only need.

use std::sync::OnceLock;

use ma_core::context::VariableStore;
use regex::Regex;
use serde_json::{Map, Value};

fn inline_placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex"))
}

/// Resolve every `${...}` occurrence in `value`, recursing into arrays and
/// objects. Non-string scalars are returned unchanged.
pub fn resolve_value(value: &Value, vars: &VariableStore) -> Value {
    match value {
        Value::String(s) => resolve_string(s, vars),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, vars)).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, vars));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn resolve_string(s: &str, vars: &VariableStore) -> Value {
    if let Some(inner) = exact_placeholder(s) {
        return resolve_expression(inner, vars);
    }
    if !inline_placeholder_re().is_match(s) {
        return Value::String(s.to_string());
    }
    let resolved = inline_placeholder_re().replace_all(s, |caps: &regex::Captures| {
        stringify(&resolve_expression(&caps[1], vars))
    });
    Value::String(resolved.into_owned())
}

fn exact_placeholder(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.starts_with("${") && trimmed.ends_with('}') && trimmed.matches("${").count() == 1 {
        Some(&trimmed[2..trimmed.len() - 1])
    } else {
        None
    }
}

fn resolve_expression(expr: &str, vars: &VariableStore) -> Value {
    for term in split_top_level_or(expr) {
        let value = eval_term(term.trim(), vars);
        if ma_core::expr::truthy(&value) {
            return value;
        }
    }
    Value::Null
}

fn split_top_level_or(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote: Option<char> = None;
    let mut start = 0;
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                in_quote = Some(c);
                i += 1;
            }
            '|' if bytes.get(i + 1) == Some(&b'|') => {
                parts.push(&expr[start..i]);
                i += 2;
                start = i;
            }
            _ => i += 1,
        }
    }
    parts.push(&expr[start..]);
    parts
}

const TRANSFORMS: &[(&str, &str)] = &[(".toUpperCase()", "upper"), (".toLowerCase()", "lower")];

fn eval_term(term: &str, vars: &VariableStore) -> Value {
    let mut base = term;
    let mut transforms = Vec::new();
    loop {
        let mut matched = false;
        for (suffix, name) in TRANSFORMS {
            if let Some(stripped) = base.strip_suffix(suffix) {
                transforms.push(*name);
                base = stripped;
                matched = true;
                break;
            }
        }
        if !matched {
            break;
        }
    }
    transforms.reverse();

    let mut value = eval_base(base.trim(), vars);
    for name in transforms {
        value = apply_transform(value, name);
    }
    value
}

/// A term is either a literal (`'str'`, `[]`, `{}`, a number, a boolean, or
/// `null`/`undefined`) or a dotted-path variable reference; literals are
/// tried first since none of their forms can collide with a bare path.
fn eval_base(base: &str, vars: &VariableStore) -> Value {
    if (base.starts_with('\'') && base.ends_with('\'') && base.len() >= 2)
        || (base.starts_with('"') && base.ends_with('"') && base.len() >= 2)
    {
        return Value::String(base[1..base.len() - 1].to_string());
    }
    match base {
        "[]" => return Value::Array(Vec::new()),
        "{}" => return Value::Object(Map::new()),
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "undefined" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = base.parse::<f64>() {
        return Value::from(n);
    }
    vars.resolve_path(base).unwrap_or(Value::Null)
}

fn apply_transform(value: Value, name: &str) -> Value {
    let s = stringify(&value);
    match name {
        "upper" => Value::String(s.to_uppercase()),
        "lower" => Value::String(s.to_lowercase()),
        _ => value,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
