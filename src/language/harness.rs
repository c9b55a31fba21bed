use handlebars::Handlebars;
use serde_json::json;

use super::LanguageSpec;
use crate::error::{CaseError, JudgeError};

// Templates are rendered with escaping off. `code`, `entry` and `args` are
// spliced verbatim, so template text itself must never contain a double
// opening brace outside those three placeholders.

pub const JAVASCRIPT: &str = r#"{{{code}}}

;Promise.resolve()
  .then(() => {{{entry}}}({{{args}}}))
  .then((judgeResult) => {
    const judgeText = JSON.stringify(judgeResult === undefined ? null : judgeResult);
    process.stdout.write("\n" + judgeText + "\n");
  });
"#;

pub const PYTHON: &str = r#"{{{code}}}


if __name__ == "__main__":
    import json as _judge_json
    import sys as _judge_sys

    _judge_result = {{{entry}}}({{{args}}})
    _judge_sys.stdout.write("\n" + _judge_json.dumps(_judge_result) + "\n")
"#;

pub const CPP: &str = r#"#include <bits/stdc++.h>
using namespace std;

{{{code}}}

namespace judge_harness {
void emit(std::ostream& out, const std::string& value);
void emit(std::ostream& out, const char* value);
void emit(std::ostream& out, char value);
void emit(std::ostream& out, bool value);
void emit(std::ostream& out, std::nullptr_t);
void emit(std::ostream& out, double value);
void emit(std::ostream& out, float value);
void emit(std::ostream& out, long double value);
template <typename T>
typename std::enable_if<std::is_integral<T>::value>::type emit(std::ostream& out, T value);
template <typename T> void emit(std::ostream& out, const std::vector<T>& values);
template <typename T, std::size_t N> void emit(std::ostream& out, const std::array<T, N>& values);
template <typename T> void emit(std::ostream& out, const std::set<T>& values);
template <typename A, typename B> void emit(std::ostream& out, const std::pair<A, B>& value);
template <typename K, typename V> void emit(std::ostream& out, const std::map<K, V>& values);
template <typename K, typename V> void emit(std::ostream& out, const std::unordered_map<K, V>& values);
template <typename T> void emit(std::ostream& out, const std::optional<T>& value);

inline std::string key_string(const std::string& key) { return key; }
template <typename K> std::string key_string(const K& key) {
    std::ostringstream text;
    text << key;
    return text.str();
}

void emit(std::ostream& out, const std::string& value) {
    out << '"';
    for (unsigned char c : value) {
        switch (c) {
            case '"': out << "\\\""; break;
            case '\\': out << "\\\\"; break;
            case '\n': out << "\\n"; break;
            case '\r': out << "\\r"; break;
            case '\t': out << "\\t"; break;
            default:
                if (c < 0x20) {
                    char buf[8];
                    std::snprintf(buf, sizeof(buf), "\\u%04x", c);
                    out << buf;
                } else {
                    out << static_cast<char>(c);
                }
        }
    }
    out << '"';
}

void emit(std::ostream& out, const char* value) { emit(out, std::string(value)); }
void emit(std::ostream& out, char value) { emit(out, std::string(1, value)); }
void emit(std::ostream& out, bool value) { out << (value ? "true" : "false"); }
void emit(std::ostream& out, std::nullptr_t) { out << "null"; }

void emit(std::ostream& out, double value) {
    if (!std::isfinite(value)) {
        out << "null";
        return;
    }
    char buf[64];
    for (int precision = 1; precision <= 17; ++precision) {
        std::snprintf(buf, sizeof(buf), "%.*g", precision, value);
        if (std::strtod(buf, nullptr) == value) break;
    }
    out << buf;
}

void emit(std::ostream& out, float value) { emit(out, static_cast<double>(value)); }
void emit(std::ostream& out, long double value) { emit(out, static_cast<double>(value)); }

template <typename T>
typename std::enable_if<std::is_integral<T>::value>::type emit(std::ostream& out, T value) {
    if constexpr (std::is_signed<T>::value) {
        out << static_cast<long long>(value);
    } else {
        out << static_cast<unsigned long long>(value);
    }
}

template <typename Range> void emit_list(std::ostream& out, const Range& values) {
    out << '[';
    bool first = true;
    for (const auto& item : values) {
        if (!first) out << ',';
        first = false;
        emit(out, item);
    }
    out << ']';
}

template <typename Map> void emit_object(std::ostream& out, const Map& values) {
    out << '{';
    bool first = true;
    for (const auto& entry : values) {
        if (!first) out << ',';
        first = false;
        emit(out, key_string(entry.first));
        out << ':';
        emit(out, entry.second);
    }
    out << '}';
}

template <typename T> void emit(std::ostream& out, const std::vector<T>& values) { emit_list(out, values); }
template <typename T, std::size_t N> void emit(std::ostream& out, const std::array<T, N>& values) { emit_list(out, values); }
template <typename T> void emit(std::ostream& out, const std::set<T>& values) { emit_list(out, values); }

template <typename A, typename B> void emit(std::ostream& out, const std::pair<A, B>& value) {
    out << '[';
    emit(out, value.first);
    out << ',';
    emit(out, value.second);
    out << ']';
}

template <typename K, typename V> void emit(std::ostream& out, const std::map<K, V>& values) { emit_object(out, values); }
template <typename K, typename V> void emit(std::ostream& out, const std::unordered_map<K, V>& values) { emit_object(out, values); }

template <typename T> void emit(std::ostream& out, const std::optional<T>& value) {
    if (value) {
        emit(out, *value);
    } else {
        out << "null";
    }
}

template <typename F> struct signature;
template <typename R, typename... Args> struct signature<R (*)(Args...)> {
    using arguments = std::tuple<typename std::decay<Args>::type...>;
};
template <typename C, typename R, typename... Args> struct signature<R (C::*)(Args...)> {
    using arguments = std::tuple<typename std::decay<Args>::type...>;
};
template <typename C, typename R, typename... Args> struct signature<R (C::*)(Args...) const> {
    using arguments = std::tuple<typename std::decay<Args>::type...>;
};

// Arguments live in a tuple so that parameters taken by reference bind to lvalues.
template <typename R, typename... Args, typename Tuple>
R invoke(R (*fn)(Args...), Tuple& args) {
    return std::apply(fn, args);
}

template <typename C, typename R, typename... Args, typename Tuple>
R invoke(R (C::*fn)(Args...), Tuple& args) {
    C self{};
    return std::apply([&](auto&... values) -> R { return (self.*fn)(values...); }, args);
}

template <typename C, typename R, typename... Args, typename Tuple>
R invoke(R (C::*fn)(Args...) const, Tuple& args) {
    const C self{};
    return std::apply([&](auto&... values) -> R { return (self.*fn)(values...); }, args);
}
}  // namespace judge_harness

int main() {
    using judge_entry = decltype(&{{{entry}}});
    judge_harness::signature<judge_entry>::arguments judge_args{ {{{args}}} };
    std::ostringstream judge_out;
    judge_harness::emit(judge_out, judge_harness::invoke(&{{{entry}}}, judge_args));
    std::cout << "\n" << judge_out.str() << "\n";
    return 0;
}
"#;

pub const RUST: &str = r#"#![allow(dead_code, unused_imports, unused_variables, unused_mut, non_snake_case)]

{{{code}}}

mod judge_harness {
    use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
    use std::fmt::Display;

    pub trait Emit {
        fn emit(&self, out: &mut String);
    }

    fn push_str_json(out: &mut String, value: &str) {
        out.push('"');
        for c in value.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        }
        out.push('"');
    }

    fn push_list<'a, T: Emit + 'a>(out: &mut String, items: impl Iterator<Item = &'a T>) {
        out.push('[');
        for (i, item) in items.enumerate() {
            if i > 0 {
                out.push(',');
            }
            item.emit(out);
        }
        out.push(']');
    }

    fn push_object<'a, K: Display + 'a, V: Emit + 'a>(
        out: &mut String,
        entries: impl Iterator<Item = (&'a K, &'a V)>,
    ) {
        out.push('{');
        for (i, (key, value)) in entries.enumerate() {
            if i > 0 {
                out.push(',');
            }
            push_str_json(out, &key.to_string());
            out.push(':');
            value.emit(out);
        }
        out.push('}');
    }

    macro_rules! emit_integers {
        ($($t:ty),*) => {
            $(impl Emit for $t {
                fn emit(&self, out: &mut String) {
                    out.push_str(&self.to_string());
                }
            })*
        };
    }
    emit_integers!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

    macro_rules! emit_floats {
        ($($t:ty),*) => {
            $(impl Emit for $t {
                fn emit(&self, out: &mut String) {
                    if self.is_finite() {
                        out.push_str(&self.to_string());
                    } else {
                        out.push_str("null");
                    }
                }
            })*
        };
    }
    emit_floats!(f32, f64);

    impl Emit for bool {
        fn emit(&self, out: &mut String) {
            out.push_str(if *self { "true" } else { "false" });
        }
    }

    impl Emit for char {
        fn emit(&self, out: &mut String) {
            push_str_json(out, &self.to_string());
        }
    }

    impl Emit for str {
        fn emit(&self, out: &mut String) {
            push_str_json(out, self);
        }
    }

    impl Emit for String {
        fn emit(&self, out: &mut String) {
            push_str_json(out, self);
        }
    }

    impl Emit for () {
        fn emit(&self, out: &mut String) {
            out.push_str("null");
        }
    }

    impl<T: Emit + ?Sized> Emit for &T {
        fn emit(&self, out: &mut String) {
            (**self).emit(out);
        }
    }

    impl<T: Emit + ?Sized> Emit for Box<T> {
        fn emit(&self, out: &mut String) {
            (**self).emit(out);
        }
    }

    impl<T: Emit> Emit for Option<T> {
        fn emit(&self, out: &mut String) {
            match self {
                Some(value) => value.emit(out),
                None => out.push_str("null"),
            }
        }
    }

    impl<T: Emit> Emit for [T] {
        fn emit(&self, out: &mut String) {
            push_list(out, self.iter());
        }
    }

    impl<T: Emit, const N: usize> Emit for [T; N] {
        fn emit(&self, out: &mut String) {
            push_list(out, self.iter());
        }
    }

    impl<T: Emit> Emit for Vec<T> {
        fn emit(&self, out: &mut String) {
            push_list(out, self.iter());
        }
    }

    impl<T: Emit> Emit for VecDeque<T> {
        fn emit(&self, out: &mut String) {
            push_list(out, self.iter());
        }
    }

    impl<T: Emit> Emit for BTreeSet<T> {
        fn emit(&self, out: &mut String) {
            push_list(out, self.iter());
        }
    }

    impl<T: Emit, S> Emit for HashSet<T, S> {
        fn emit(&self, out: &mut String) {
            push_list(out, self.iter());
        }
    }

    impl<K: Display, V: Emit> Emit for BTreeMap<K, V> {
        fn emit(&self, out: &mut String) {
            push_object(out, self.iter());
        }
    }

    impl<K: Display, V: Emit, S> Emit for HashMap<K, V, S> {
        fn emit(&self, out: &mut String) {
            push_object(out, self.iter());
        }
    }

    impl<A: Emit, B: Emit> Emit for (A, B) {
        fn emit(&self, out: &mut String) {
            out.push('[');
            self.0.emit(out);
            out.push(',');
            self.1.emit(out);
            out.push(']');
        }
    }

    impl<A: Emit, B: Emit, C: Emit> Emit for (A, B, C) {
        fn emit(&self, out: &mut String) {
            out.push('[');
            self.0.emit(out);
            out.push(',');
            self.1.emit(out);
            out.push(',');
            self.2.emit(out);
            out.push(']');
        }
    }
}

fn main() {
    let judge_result = {{{entry}}}({{{args}}});
    let mut judge_out = String::new();
    judge_harness::Emit::emit(&judge_result, &mut judge_out);
    println!();
    println!("{}", judge_out);
}
"#;

/// Renders per-language harness templates. Strict mode turns a missing
/// placeholder value into a render error.
pub struct HarnessRenderer {
    registry: Handlebars<'static>,
}

impl HarnessRenderer {
    pub fn new(languages: &[LanguageSpec]) -> Result<Self, JudgeError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        for spec in languages {
            registry
                .register_template_string(spec.id, spec.harness)
                .map_err(|source| JudgeError::Template {
                    language: spec.id,
                    source: Box::new(source),
                })?;
        }
        Ok(Self { registry })
    }

    pub fn render(
        &self,
        language_id: &str,
        code: &str,
        entry: &str,
        args: &str,
    ) -> Result<String, CaseError> {
        let data = json!({ "code": code, "entry": entry, "args": args });
        Ok(self.registry.render(language_id, &data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::LANGUAGES;

    #[test]
    fn templates_only_open_braces_at_placeholders() {
        for spec in LANGUAGES {
            let stripped = spec
                .harness
                .replace("{{{code}}}", "")
                .replace("{{{entry}}}", "")
                .replace("{{{args}}}", "");
            assert!(!stripped.contains("{{"), "{} template", spec.id);
        }
    }

    #[test]
    fn splices_code_without_escaping() {
        let renderer = HarnessRenderer::new(LANGUAGES).unwrap();
        let code = "def solution(s):\n    return s + \"<&>\" + '{{x}}'\n";
        let program = renderer
            .render("python", code, "solution", r#""a{{b}}""#)
            .unwrap();

        assert!(program.starts_with(code));
        assert!(program.contains(r#"_judge_result = solution("a{{b}}")"#));
    }

    #[test]
    fn unknown_template_is_internal_error() {
        let renderer = HarnessRenderer::new(LANGUAGES).unwrap();
        let err = renderer.render("cobol", "", "f", "").unwrap_err();
        assert!(matches!(err, CaseError::Internal(_)));
    }
}
