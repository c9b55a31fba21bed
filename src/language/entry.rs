use regex::Regex;

use crate::error::CaseError;

/// Function name the judge calls when nothing is declared.
pub const CONVENTIONAL_ENTRY_POINT: &str = "solution";

/// Names the detection pattern may capture that are never entry points.
const RESERVED: &[&str] = &[
    "main", "if", "for", "while", "switch", "return", "catch", "sizeof", "else", "do",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    Declared,
    Conventional,
    Detected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub source: EntrySource,
}

/// `name`, `Type::name` or `object.name`.
fn is_identifier(name: &str) -> bool {
    let segment = |part: &str| {
        let mut chars = part.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };
    name.split("::")
        .flat_map(|part| part.split('.'))
        .all(segment)
}

/// Names of the function declarations `pattern` finds in `code`, in source
/// order.
pub fn detect_functions<'a>(pattern: &Regex, code: &'a str) -> Vec<&'a str> {
    pattern
        .captures_iter(code)
        .filter_map(|caps| caps.iter().skip(1).flatten().next())
        .map(|m| m.as_str())
        .collect()
}

/// Picks the function to call: the declared name, then a function named
/// `solution`, then the first non-reserved function the pattern detects.
pub fn resolve_entry_point(
    pattern: &Regex,
    code: &str,
    declared: Option<&str>,
) -> Result<EntryPoint, CaseError> {
    if let Some(name) = declared.map(str::trim) {
        if !is_identifier(name) {
            return Err(CaseError::NoEntryPoint(format!(
                "declared entry point `{name}` is not a valid identifier"
            )));
        }
        return Ok(EntryPoint {
            name: name.to_string(),
            source: EntrySource::Declared,
        });
    }

    let detected = detect_functions(pattern, code);
    if detected.contains(&CONVENTIONAL_ENTRY_POINT) {
        return Ok(EntryPoint {
            name: CONVENTIONAL_ENTRY_POINT.to_string(),
            source: EntrySource::Conventional,
        });
    }

    match detected.into_iter().find(|name| !RESERVED.contains(name)) {
        Some(name) => {
            tracing::warn!(
                entry_point = name,
                "entry point guessed from source; declare it on the problem instead"
            );
            Ok(EntryPoint {
                name: name.to_string(),
                source: EntrySource::Detected,
            })
        }
        None => Err(CaseError::NoEntryPoint(
            "no callable function found in source".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::*;
    use crate::language::LANGUAGES;

    fn pattern(id: &str) -> Regex {
        let spec = LANGUAGES.iter().find(|l| l.id == id).unwrap();
        Regex::new(spec.entry_pattern).unwrap()
    }

    #[test]
    fn declared_name_wins_over_detection() {
        let code = "function solution(a) { return a; }\nfunction other(b) { return b; }";
        let entry = resolve_entry_point(&pattern("javascript"), code, Some("other")).unwrap();
        assert_eq!(entry.name, "other");
        assert_eq!(entry.source, EntrySource::Declared);
    }

    #[test]
    fn declared_name_must_be_identifier() {
        let err = resolve_entry_point(&pattern("python"), "", Some("os.system('x')")).unwrap_err();
        assert!(matches!(err, CaseError::NoEntryPoint(_)));
        assert!(
            resolve_entry_point(&pattern("rust"), "", Some("Solution::two_sum")).is_ok()
        );
    }

    #[test]
    fn conventional_name_beats_first_function() {
        let code = "def helper(x):\n    return x\n\ndef solution(arr):\n    return helper(arr)\n";
        let entry = resolve_entry_point(&pattern("python"), code, None).unwrap();
        assert_eq!(entry.name, "solution");
        assert_eq!(entry.source, EntrySource::Conventional);
    }

    #[test]
    fn detects_javascript_declaration_forms() {
        let js = pattern("javascript");
        assert_eq!(
            detect_functions(&js, "const add = (a, b) => a + b;\nlet f = async function () {}\nvar g = x => x;"),
            ["add", "f", "g"]
        );
        assert_eq!(detect_functions(&js, "async function go(n) {}"), ["go"]);
        assert!(detect_functions(&js, "const limit = 10;").is_empty());
    }

    #[test]
    fn detects_python_top_level_only() {
        let code = "class A:\n    def method(self):\n        pass\n\ndef top(x):\n    return x\n";
        assert_eq!(detect_functions(&pattern("python"), code), ["top"]);
    }

    #[test]
    fn cpp_fallback_skips_main_and_keywords() {
        let code = "#include <vector>\nint main() {\n  return 0;\n}\nvector<int> twoSum(vector<int>& nums, int target) {\n  return {};\n}\n";
        let entry = resolve_entry_point(&pattern("cpp"), code, None).unwrap();
        assert_eq!(entry.name, "twoSum");
        assert_eq!(entry.source, EntrySource::Detected);
    }

    #[test]
    fn rust_detects_pub_fn() {
        let code = "pub fn max_profit(prices: Vec<i32>) -> i32 {\n    0\n}\nfn main() {}\n";
        let entry = resolve_entry_point(&pattern("rust"), code, None).unwrap();
        assert_eq!(entry.name, "max_profit");
    }

    #[test]
    fn nothing_callable_is_an_error() {
        let err = resolve_entry_point(&pattern("rust"), "fn main() {}", None).unwrap_err();
        assert!(matches!(err, CaseError::NoEntryPoint(_)));
    }
}
