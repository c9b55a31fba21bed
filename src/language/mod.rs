mod entry;
mod harness;

use std::collections::BTreeMap;

use regex::Regex;

use crate::{
    codec::{CanonicalValue, LiteralDialect, encode_as_literal},
    error::{CaseError, JudgeError},
    models::{Submission, TestInput},
};

pub use entry::{EntryPoint, EntrySource, resolve_entry_point};
use harness::HarnessRenderer;

/// Bumped whenever a row of [`LANGUAGES`] changes behaviour.
pub const LANGUAGE_TABLE_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub id: &'static str,
    pub aliases: &'static [&'static str],
    pub file_extension: &'static str,
    pub source_name: &'static str,
    /// Compile or syntax-check step. Runs in the workspace before `run_command`.
    pub build_command: Option<&'static [&'static str]>,
    /// The build step only checks the user's code, so one successful check
    /// covers every test case.
    pub syntax_check_only: bool,
    pub run_command: &'static [&'static str],
    /// Top-level function declarations; the first capture group that matched
    /// is the name.
    pub entry_pattern: &'static str,
    /// Matches a top-level `main` in user code, for harnesses that define
    /// their own.
    pub main_pattern: Option<&'static str>,
    pub dialect: LiteralDialect,
    pub harness: &'static str,
    /// V8 reserves far more address space than it uses, so node runs without
    /// an address-space limit.
    pub limit_address_space: bool,
}

pub static LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        id: "javascript",
        aliases: &["js", "node"],
        file_extension: "js",
        source_name: "solution.js",
        build_command: Some(&["node", "--check", "solution.js"]),
        syntax_check_only: true,
        run_command: &["node", "solution.js"],
        entry_pattern: r"(?m)^[ \t]*(?:export\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*\(|^[ \t]*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?(?:function\b|\(|[A-Za-z_$][\w$]*\s*=>)",
        main_pattern: None,
        dialect: LiteralDialect::JavaScript,
        harness: harness::JAVASCRIPT,
        limit_address_space: false,
    },
    LanguageSpec {
        id: "python",
        aliases: &["py", "python3"],
        file_extension: "py",
        source_name: "solution.py",
        build_command: Some(&["python3", "-I", "-m", "py_compile", "solution.py"]),
        syntax_check_only: true,
        run_command: &["python3", "-I", "solution.py"],
        entry_pattern: r"(?m)^(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(",
        main_pattern: None,
        dialect: LiteralDialect::Python,
        harness: harness::PYTHON,
        limit_address_space: true,
    },
    LanguageSpec {
        id: "cpp",
        aliases: &["c++", "cxx"],
        file_extension: "cpp",
        source_name: "solution.cpp",
        build_command: Some(&["g++", "-std=c++17", "-O2", "-o", "solution", "solution.cpp"]),
        syntax_check_only: false,
        run_command: &["./solution"],
        entry_pattern: r"(?m)^[ \t]*[A-Za-z_][\w:<>,\*& \t]*[\s\*&]([A-Za-z_]\w*)\s*\([^;{}]*\)\s*(?:const\s*)?\{",
        main_pattern: Some(r"(?m)^(?:int|signed|auto)\s+main\s*\("),
        dialect: LiteralDialect::Cpp,
        harness: harness::CPP,
        limit_address_space: true,
    },
    LanguageSpec {
        id: "rust",
        aliases: &["rs"],
        file_extension: "rs",
        source_name: "solution.rs",
        build_command: Some(&["rustc", "--edition", "2021", "-O", "-o", "solution", "solution.rs"]),
        syntax_check_only: false,
        run_command: &["./solution"],
        entry_pattern: r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)",
        main_pattern: Some(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?fn\s+main\s*\("),
        dialect: LiteralDialect::Rust,
        harness: harness::RUST,
        limit_address_space: true,
    },
];

/// A language row with its entry pattern compiled.
#[derive(Debug)]
pub struct CompiledLanguage {
    pub spec: &'static LanguageSpec,
    entry_pattern: Regex,
    main_pattern: Option<Regex>,
}

impl CompiledLanguage {
    pub fn needs_build(&self) -> bool {
        self.spec.build_command.is_some()
    }

    pub fn resolve_entry_point(
        &self,
        user_code: &str,
        declared: Option<&str>,
    ) -> Result<EntryPoint, CaseError> {
        resolve_entry_point(&self.entry_pattern, user_code, declared)
    }

    pub fn defines_main(&self, user_code: &str) -> bool {
        self.main_pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(user_code))
    }
}

/// How a test input is bound to the entry point's parameters.
#[derive(Debug, Clone, Default)]
pub struct ArgumentBinding {
    pub entry_point: Option<String>,
    pub order: Option<Vec<String>>,
}

impl ArgumentBinding {
    pub fn from_submission(submission: &Submission) -> Self {
        Self {
            entry_point: submission.entry_point.clone(),
            order: submission.argument_order.clone(),
        }
    }
}

/// A runnable program: file name to contents, written into a workspace.
#[derive(Debug, Clone)]
pub struct SourceArtifact {
    pub files: BTreeMap<String, String>,
    pub entry_point: EntryPoint,
}

pub struct LanguageRegistry {
    languages: Vec<CompiledLanguage>,
    harness: HarnessRenderer,
}

impl LanguageRegistry {
    pub fn new() -> Result<Self, JudgeError> {
        let mut languages = Vec::with_capacity(LANGUAGES.len());
        for spec in LANGUAGES {
            let compile = |pattern: &str| {
                Regex::new(pattern).map_err(|source| JudgeError::Pattern {
                    language: spec.id,
                    source,
                })
            };
            languages.push(CompiledLanguage {
                spec,
                entry_pattern: compile(spec.entry_pattern)?,
                main_pattern: spec.main_pattern.map(compile).transpose()?,
            });
        }
        let harness = HarnessRenderer::new(LANGUAGES)?;
        Ok(Self { languages, harness })
    }

    pub fn get(&self, language_id: &str) -> Option<&CompiledLanguage> {
        let wanted = language_id.trim().to_ascii_lowercase();
        self.languages
            .iter()
            .find(|lang| lang.spec.id == wanted || lang.spec.aliases.contains(&wanted.as_str()))
    }

    pub fn supported(&self) -> Vec<&'static str> {
        self.languages.iter().map(|lang| lang.spec.id).collect()
    }

    /// Wraps `user_code` in the language harness so that running it calls the
    /// entry point with `input` and prints the result as a single JSON line.
    pub fn materialize(
        &self,
        language_id: &str,
        user_code: &str,
        input: &TestInput,
        binding: &ArgumentBinding,
    ) -> Result<SourceArtifact, CaseError> {
        let language = self
            .get(language_id)
            .ok_or_else(|| CaseError::Internal(format!("unsupported language: {language_id}")))?;
        if language.defines_main(user_code) {
            return Err(CaseError::Compile(format!(
                "{} solutions must not define `main`; the judge generates it and calls the entry point",
                language.spec.id
            )));
        }
        let entry_point =
            language.resolve_entry_point(user_code, binding.entry_point.as_deref())?;

        let args = bind_arguments(input, binding.order.as_deref())?
            .into_iter()
            .map(|value| encode_as_literal(value, language.spec.dialect))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let program = self
            .harness
            .render(language.spec.id, user_code, &entry_point.name, &args)?;

        Ok(SourceArtifact {
            files: BTreeMap::from([(language.spec.source_name.to_string(), program)]),
            entry_point,
        })
    }
}

/// Orders the input values positionally: by the declared order when there is
/// one, otherwise by the input's own field order.
pub fn bind_arguments<'a>(
    input: &'a TestInput,
    order: Option<&[String]>,
) -> Result<Vec<&'a CanonicalValue>, CaseError> {
    let Some(order) = order else {
        return Ok(input.values().collect());
    };
    if order.len() != input.len() {
        return Err(CaseError::UnsupportedValueShape(format!(
            "argument order names {} fields but the input has {}",
            order.len(),
            input.len()
        )));
    }
    order
        .iter()
        .map(|name| {
            input.get(name).ok_or_else(|| {
                CaseError::UnsupportedValueShape(format!("input has no field `{name}`"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn input(value: serde_json::Value) -> TestInput {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn looks_up_by_id_and_alias() {
        let registry = LanguageRegistry::new().unwrap();
        assert_eq!(registry.get("js").unwrap().spec.id, "javascript");
        assert_eq!(registry.get("Python3").unwrap().spec.id, "python");
        assert_eq!(registry.get("c++").unwrap().spec.id, "cpp");
        assert!(registry.get("cobol").is_none());
        assert_eq!(registry.supported(), ["javascript", "python", "cpp", "rust"]);
    }

    #[test]
    fn binds_single_and_declared_order() {
        let single = input(json!({"arr": [1, 2]}));
        assert_eq!(bind_arguments(&single, None).unwrap(), [&json!([1, 2])]);

        let multi = input(json!({"target": 9, "nums": [2, 7]}));
        assert_eq!(
            bind_arguments(&multi, None).unwrap(),
            [&json!(9), &json!([2, 7])]
        );
        let order = vec!["nums".to_string(), "target".to_string()];
        assert_eq!(
            bind_arguments(&multi, Some(&order)).unwrap(),
            [&json!([2, 7]), &json!(9)]
        );
    }

    #[test]
    fn rejects_order_that_does_not_match_fields() {
        let multi = input(json!({"a": 1, "b": 2}));
        let short = vec!["a".to_string()];
        let wrong = vec!["a".to_string(), "c".to_string()];
        assert!(matches!(
            bind_arguments(&multi, Some(&short)),
            Err(CaseError::UnsupportedValueShape(_))
        ));
        assert!(matches!(
            bind_arguments(&multi, Some(&wrong)),
            Err(CaseError::UnsupportedValueShape(_))
        ));
    }

    #[test]
    fn materializes_javascript_harness() {
        let registry = LanguageRegistry::new().unwrap();
        let code = "function solution(arr){return arr.reduce((s,n)=>s+n,0);}";
        let artifact = registry
            .materialize(
                "js",
                code,
                &input(json!({"arr": [1, 2, 3, 4, 5]})),
                &ArgumentBinding::default(),
            )
            .unwrap();

        let program = &artifact.files["solution.js"];
        assert!(program.starts_with(code));
        assert!(program.contains("solution([1, 2, 3, 4, 5])"));
        assert!(program.contains("JSON.stringify"));
        assert_eq!(artifact.entry_point.source, EntrySource::Conventional);
    }

    #[test]
    fn materializes_python_with_declared_entry_point() {
        let registry = LanguageRegistry::new().unwrap();
        let code = "def helper(x):\n    return x\n\ndef two_sum(nums, target):\n    return [0, 1]\n";
        let binding = ArgumentBinding {
            entry_point: Some("two_sum".into()),
            order: Some(vec!["nums".into(), "target".into()]),
        };
        let artifact = registry
            .materialize(
                "python",
                code,
                &input(json!({"target": 9, "nums": [2, 7]})),
                &binding,
            )
            .unwrap();

        let program = &artifact.files["solution.py"];
        assert!(program.contains("two_sum([2, 7], 9)"));
        assert!(program.contains("json.dumps"));
        assert_eq!(artifact.entry_point.source, EntrySource::Declared);
    }

    #[test]
    fn materializes_cpp_with_braced_arguments() {
        let registry = LanguageRegistry::new().unwrap();
        let code = "int solution(vector<int>& nums, string label) {\n    return nums.size();\n}\n";
        let artifact = registry
            .materialize(
                "cpp",
                code,
                &input(json!({"nums": [3, 4], "label": "x"})),
                &ArgumentBinding::default(),
            )
            .unwrap();

        let program = &artifact.files["solution.cpp"];
        assert!(program.contains("#include <bits/stdc++.h>"));
        assert!(program.contains(r#"judge_args{ {3, 4}, "x" }"#));
        assert!(program.contains("invoke(&solution, judge_args)"));
    }

    #[test]
    fn unsupported_shape_fails_materialize() {
        let registry = LanguageRegistry::new().unwrap();
        let err = registry
            .materialize(
                "rust",
                "fn solution(v: Vec<i32>) -> i32 { 0 }",
                &input(json!({"v": [1, "two"]})),
                &ArgumentBinding::default(),
            )
            .unwrap_err();
        assert!(matches!(err, CaseError::UnsupportedValueShape(_)));
    }

    #[test]
    fn user_defined_main_is_rejected_before_building() {
        let registry = LanguageRegistry::new().unwrap();
        let code = "fn solution(n: i64) -> i64 { n }\n\nfn main() {\n    println!(\"{}\", solution(1));\n}\n";
        let err = registry
            .materialize("rust", code, &input(json!({"n": 1})), &ArgumentBinding::default())
            .unwrap_err();
        match err {
            CaseError::Compile(message) => assert!(message.contains("must not define `main`")),
            other => panic!("unexpected error: {other:?}"),
        }

        let cpp = "int solution(int n) { return n; }\nint main() { return 0; }\n";
        assert!(registry.get("cpp").unwrap().defines_main(cpp));
        // helpers named like main are fine
        let helper = "fn main_loop() {}\nfn solution(n: i64) -> i64 { n }\n";
        assert!(!registry.get("rust").unwrap().defines_main(helper));
        assert!(!registry.get("python").unwrap().defines_main("def main():\n    pass\n"));
    }

    #[test]
    fn missing_entry_point_fails_materialize() {
        let registry = LanguageRegistry::new().unwrap();
        let err = registry
            .materialize(
                "python",
                "x = 1\n",
                &input(json!({"a": 1})),
                &ArgumentBinding::default(),
            )
            .unwrap_err();
        assert!(matches!(err, CaseError::NoEntryPoint(_)));
    }
}
