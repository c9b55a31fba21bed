//! Translation between canonical values and each language's literal syntax.
//!
//! Every test input and output crosses component boundaries as a
//! [`CanonicalValue`]. Encoding into a language literal can fail for shapes the
//! language has no literal for; decoding program output never fails.

use std::fmt::Write as _;

use serde_json::{Map, Number, Value};

use crate::error::CaseError;

pub type CanonicalValue = Value;

const MAX_DEPTH: usize = 64;

/// Literal syntax family used to render arguments into a harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiteralDialect {
    JavaScript,
    Python,
    Cpp,
    Rust,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Null,
    Bool,
    Number,
    String,
    List,
    Map,
}

impl Shape {
    pub fn of(value: &CanonicalValue) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::List,
            Value::Object(_) => Self::Map,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::List => "list",
            Self::Map => "map",
        }
    }
}

/// Renders `value` as an expression in the target dialect.
pub fn encode_as_literal(
    value: &CanonicalValue,
    dialect: LiteralDialect,
) -> Result<String, CaseError> {
    let mut out = String::new();
    write_literal(&mut out, value, dialect, 0)?;
    Ok(out)
}

/// Compact JSON, the form every harness prints its result in.
pub fn encode_as_canonical_json(value: &CanonicalValue) -> String {
    value.to_string()
}

/// Best-effort parse of program output. Strict JSON first, then a tolerant
/// reading of bracketed lists, quoted strings, keywords and bare numbers.
/// Anything else comes back as the trimmed text.
pub fn decode_from_text(text: &str) -> CanonicalValue {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }
    parse_loose(trimmed, 0).unwrap_or_else(|| Value::String(trimmed.to_string()))
}

/// Exact comparison: numbers by value, lists element-wise in order, maps by
/// key set regardless of key order.
pub fn values_equal(actual: &CanonicalValue, expected: &CanonicalValue) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => actual == expected,
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn write_literal(
    out: &mut String,
    value: &CanonicalValue,
    dialect: LiteralDialect,
    depth: usize,
) -> Result<(), CaseError> {
    if depth > MAX_DEPTH {
        return Err(CaseError::UnsupportedValueShape(format!(
            "nesting deeper than {MAX_DEPTH} levels"
        )));
    }

    match value {
        Value::Null => out.push_str(match dialect {
            LiteralDialect::JavaScript => "null",
            LiteralDialect::Python => "None",
            LiteralDialect::Rust => "None",
            LiteralDialect::Cpp if depth == 0 => "nullptr",
            LiteralDialect::Cpp => {
                return Err(CaseError::UnsupportedValueShape(
                    "null inside a collection has no C++ literal".to_string(),
                ));
            }
        }),
        Value::Bool(b) => out.push_str(match (dialect, b) {
            (LiteralDialect::Python, true) => "True",
            (LiteralDialect::Python, false) => "False",
            (_, true) => "true",
            (_, false) => "false",
        }),
        Value::Number(n) => write_number(out, n, dialect),
        Value::String(s) => match dialect {
            LiteralDialect::JavaScript | LiteralDialect::Python => {
                out.push_str(&Value::String(s.clone()).to_string())
            }
            LiteralDialect::Cpp => push_cpp_string(out, s),
            LiteralDialect::Rust => {
                out.push_str("String::from(");
                push_rust_string(out, s);
                out.push(')');
            }
        },
        Value::Array(items) => {
            if matches!(dialect, LiteralDialect::Cpp | LiteralDialect::Rust) {
                ensure_homogeneous(items.iter(), "list")?;
            }
            let (open, close) = match dialect {
                LiteralDialect::JavaScript | LiteralDialect::Python => ("[", "]"),
                LiteralDialect::Cpp => ("{", "}"),
                LiteralDialect::Rust => ("vec![", "]"),
            };
            out.push_str(open);
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_literal(out, item, dialect, depth + 1)?;
            }
            out.push_str(close);
        }
        Value::Object(map) => write_map(out, map, dialect, depth)?,
    }
    Ok(())
}

fn write_map(
    out: &mut String,
    map: &Map<String, Value>,
    dialect: LiteralDialect,
    depth: usize,
) -> Result<(), CaseError> {
    match dialect {
        LiteralDialect::JavaScript | LiteralDialect::Python => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push_str(": ");
                write_literal(out, item, dialect, depth + 1)?;
            }
            out.push('}');
        }
        LiteralDialect::Cpp => {
            ensure_homogeneous(map.values(), "map")?;
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('{');
                push_cpp_string(out, key);
                out.push_str(", ");
                write_literal(out, item, dialect, depth + 1)?;
                out.push('}');
            }
            out.push('}');
        }
        LiteralDialect::Rust => {
            ensure_homogeneous(map.values(), "map")?;
            if map.is_empty() {
                out.push_str("std::collections::HashMap::new()");
                return Ok(());
            }
            out.push_str("std::collections::HashMap::from([");
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str("(String::from(");
                push_rust_string(out, key);
                out.push_str("), ");
                write_literal(out, item, dialect, depth + 1)?;
                out.push(')');
            }
            out.push_str("])");
        }
    }
    Ok(())
}

fn ensure_homogeneous<'a>(
    mut items: impl Iterator<Item = &'a Value>,
    container: &str,
) -> Result<(), CaseError> {
    let Some(first) = items.next().map(Shape::of) else {
        return Ok(());
    };
    match items.map(Shape::of).find(|shape| *shape != first) {
        Some(other) => Err(CaseError::UnsupportedValueShape(format!(
            "{container} mixes {} and {} elements",
            first.name(),
            other.name()
        ))),
        None => Ok(()),
    }
}

fn write_number(out: &mut String, n: &Number, dialect: LiteralDialect) {
    let repr = n.to_string();
    if n.is_f64() {
        out.push_str(&repr);
        if !repr.contains(['.', 'e', 'E']) {
            out.push_str(".0");
        }
        return;
    }
    out.push_str(&repr);
    match dialect {
        LiteralDialect::Cpp => match n.as_i64() {
            Some(v) if i32::try_from(v).is_ok() => {}
            Some(_) => out.push_str("LL"),
            None => out.push_str("ULL"),
        },
        // A typed literal cast to the parameter's numeric type, so integers
        // also bind to float parameters and sit beside floats in a collection.
        LiteralDialect::Rust if n.is_i64() => out.push_str("i64 as _"),
        LiteralDialect::Rust => out.push_str("u64 as _"),
        LiteralDialect::JavaScript | LiteralDialect::Python => {}
    }
}

fn push_cpp_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '?' => out.push_str("\\?"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn push_rust_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn parse_loose(text: &str, depth: usize) -> Option<Value> {
    let s = text.trim();
    if s.is_empty() || depth > MAX_DEPTH {
        return None;
    }

    match s {
        "true" | "True" => return Some(Value::Bool(true)),
        "false" | "False" => return Some(Value::Bool(false)),
        "null" | "None" | "nil" | "undefined" => return Some(Value::Null),
        _ => {}
    }

    if let Some(number) = parse_number(s) {
        return Some(number);
    }
    if let Some(inner) = strip_quotes(s) {
        return Some(Value::String(unescape(inner)));
    }

    let list_body = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .or_else(|| s.strip_prefix('(').and_then(|rest| rest.strip_suffix(')')));
    if let Some(inner) = list_body {
        let items = split_top_level(inner, ',')?
            .into_iter()
            .map(|item| parse_loose(item, depth + 1).unwrap_or_else(|| Value::String(item.trim().to_string())))
            .collect();
        return Some(Value::Array(items));
    }

    if let Some(inner) = s.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
        let mut map = Map::new();
        for entry in split_top_level(inner, ',')? {
            let colon = find_top_level(entry, ':')?;
            let raw_key = entry[..colon].trim();
            let raw_value = &entry[colon + 1..];
            let key = strip_quotes(raw_key).map(unescape).unwrap_or_else(|| raw_key.to_string());
            let value = parse_loose(raw_value, depth + 1)
                .unwrap_or_else(|| Value::String(raw_value.trim().to_string()));
            map.insert(key, value);
        }
        return Some(Value::Object(map));
    }

    None
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(v) = s.parse::<i64>() {
        return Some(Value::Number(v.into()));
    }
    if let Ok(v) = s.parse::<u64>() {
        return Some(Value::Number(v.into()));
    }
    let looks_numeric = s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !looks_numeric {
        return None;
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Body of a single quoted string, or `None` when `s` is not exactly one.
fn strip_quotes(s: &str) -> Option<&str> {
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    if s.len() < 2 || !s.ends_with(quote) {
        return None;
    }
    let inner = &s[1..s.len() - 1];
    let mut escaped = false;
    for c in inner.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == quote => return None,
            _ => {}
        }
    }
    (!escaped).then_some(inner)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Splits on `sep` outside brackets and quotes. `None` when unbalanced or
/// when an item is empty.
fn split_top_level(s: &str, sep: char) -> Option<Vec<&str>> {
    if s.trim().is_empty() {
        return Some(Vec::new());
    }
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth = depth.checked_sub(1)?,
            c if c == sep && depth == 0 => {
                items.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return None;
    }
    items.push(&s[start..]);
    if items.iter().any(|item| item.trim().is_empty()) {
        return None;
    }
    Some(items)
}

fn find_top_level(s: &str, target: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth = depth.saturating_sub(1),
            c if c == target && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}
