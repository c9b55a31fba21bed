use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{codec::CanonicalValue, error::ErrorKind};

/// Named arguments of one test case, in the problem's declared field order.
pub type TestInput = serde_json::Map<String, CanonicalValue>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: TestInput,
    pub expected_output: CanonicalValue,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub language_id: String,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
    /// Entry point declared by the problem schema. Takes precedence over any
    /// detection in the source.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Declared positional order of the input fields.
    #[serde(default)]
    pub argument_order: Option<Vec<String>>,
    #[serde(default)]
    pub limits: Option<ExecutionLimits>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub timeout_ms: u64,
    pub build_timeout_ms: u64,
    pub memory_mb: u64,
    pub max_output_bytes: usize,
    pub max_file_size_bytes: u64,
}

impl ExecutionLimits {
    pub fn normalized(mut self) -> Self {
        self.timeout_ms = self.timeout_ms.clamp(50, 120_000);
        self.build_timeout_ms = self.build_timeout_ms.clamp(1_000, 300_000);
        self.memory_mb = self.memory_mb.clamp(32, 8192);
        self.max_output_bytes = self.max_output_bytes.clamp(1024, 16 * 1024 * 1024);
        self.max_file_size_bytes = self.max_file_size_bytes.clamp(1024, 256 * 1024 * 1024);
        self
    }

    /// CPU seconds granted to a run: the wall budget rounded up, plus one.
    pub fn cpu_time_secs(&self) -> u64 {
        self.timeout_ms.div_ceil(1000) + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub index: usize,
    pub input: Option<TestInput>,
    pub expected_output: Option<CanonicalValue>,
    pub actual_output: Option<CanonicalValue>,
    pub passed: bool,
    pub wall_time_ms: u64,
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl TestCaseResult {
    /// A not-yet-passed result carrying the case's input and expected output.
    pub fn for_case(index: usize, case: &TestCase) -> Self {
        Self {
            index,
            input: Some(case.input.clone()),
            expected_output: Some(case.expected_output.clone()),
            actual_output: None,
            passed: false,
            wall_time_ms: 0,
            error_kind: None,
            message: None,
            hidden: case.hidden,
        }
    }

    pub fn failed(index: usize, case: &TestCase, kind: ErrorKind, message: Option<String>) -> Self {
        Self {
            error_kind: Some(kind),
            message,
            ..Self::for_case(index, case)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub total_cases: usize,
    pub passed_cases: usize,
    pub score: u32,
    pub aggregate_wall_time_ms: u64,
    pub is_correct: bool,
    /// Set when the submission failed as a whole (compile error, cancellation,
    /// judge fault).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Verdict {
    pub fn from_results(results: &[TestCaseResult], error: Option<String>) -> Self {
        let total_cases = results.len();
        let passed_cases = results.iter().filter(|r| r.passed).count();
        let (score, aggregate_wall_time_ms) = if total_cases == 0 {
            (0, 0)
        } else {
            let score = (100.0 * passed_cases as f64 / total_cases as f64).round() as u32;
            let wall: u64 = results.iter().map(|r| r.wall_time_ms).sum();
            (score, wall / total_cases as u64)
        };

        Self {
            total_cases,
            passed_cases,
            score,
            aggregate_wall_time_ms,
            is_correct: total_cases > 0 && passed_cases == total_cases,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "case", rename_all = "snake_case")]
pub enum JudgeStage {
    Received,
    Building,
    Running(usize),
    Aggregating,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub stage: JudgeStage,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeReport {
    pub submission_id: Uuid,
    pub language_id: String,
    pub verdict: Verdict,
    pub results: Vec<TestCaseResult>,
    #[serde(default)]
    pub events: Vec<JudgeEvent>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JudgeReport {
    /// Copy of the report with the data of hidden cases removed.
    pub fn public_view(&self) -> Self {
        let mut view = self.clone();
        for result in view.results.iter_mut().filter(|r| r.hidden) {
            result.input = None;
            result.expected_output = None;
            result.actual_output = None;
            result.message = None;
        }
        view
    }

    pub fn stages(&self) -> Vec<JudgeStage> {
        self.events.iter().map(|e| e.stage).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn result(passed: bool, wall_time_ms: u64) -> TestCaseResult {
        TestCaseResult {
            index: 0,
            input: None,
            expected_output: None,
            actual_output: None,
            passed,
            wall_time_ms,
            error_kind: None,
            message: None,
            hidden: false,
        }
    }

    #[test]
    fn normalizes_limits_to_safe_bounds() {
        let normalized = ExecutionLimits {
            timeout_ms: 1,
            build_timeout_ms: 999_999_999,
            memory_mb: 1,
            max_output_bytes: 99_000_000,
            max_file_size_bytes: 1,
        }
        .normalized();

        assert_eq!(normalized.timeout_ms, 50);
        assert_eq!(normalized.build_timeout_ms, 300_000);
        assert_eq!(normalized.memory_mb, 32);
        assert_eq!(normalized.max_output_bytes, 16 * 1024 * 1024);
        assert_eq!(normalized.max_file_size_bytes, 1024);
        assert_eq!(normalized.cpu_time_secs(), 2);
    }

    #[test]
    fn verdict_rounds_score_and_averages_wall_time() {
        let results = vec![result(true, 10), result(true, 20), result(false, 33)];
        let verdict = Verdict::from_results(&results, None);

        assert_eq!(verdict.total_cases, 3);
        assert_eq!(verdict.passed_cases, 2);
        assert_eq!(verdict.score, 67);
        assert_eq!(verdict.aggregate_wall_time_ms, 21);
        assert!(!verdict.is_correct);
    }

    #[test]
    fn empty_verdict_is_not_correct() {
        let verdict = Verdict::from_results(&[], Some("no test cases".into()));
        assert_eq!(verdict.score, 0);
        assert!(!verdict.is_correct);
    }

    #[test]
    fn submission_input_keeps_declared_field_order() {
        let raw = r#"{
            "language_id": "python",
            "source_code": "def solution(b, a): return a",
            "test_cases": [{"input": {"zeta": 1, "alpha": 2}, "expected_output": 2}]
        }"#;
        let submission: Submission = serde_json::from_str(raw).unwrap();
        let keys: Vec<&String> = submission.test_cases[0].input.keys().collect();

        assert_eq!(keys, ["zeta", "alpha"]);
        assert!(!submission.test_cases[0].hidden);
        assert!(submission.entry_point.is_none());
    }

    #[test]
    fn public_view_strips_hidden_cases() {
        let case = TestCase {
            input: json!({"n": 3}).as_object().cloned().unwrap(),
            expected_output: json!(6),
            hidden: true,
        };
        let mut hidden = TestCaseResult::failed(0, &case, ErrorKind::Timeout, Some("slow".into()));
        hidden.actual_output = Some(json!(5));
        let report = JudgeReport {
            submission_id: Uuid::new_v4(),
            language_id: "python".into(),
            verdict: Verdict::from_results(std::slice::from_ref(&hidden), None),
            results: vec![hidden],
            events: Vec::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let view = report.public_view();
        assert!(view.results[0].input.is_none());
        assert!(view.results[0].expected_output.is_none());
        assert!(view.results[0].actual_output.is_none());
        assert_eq!(view.results[0].error_kind, Some(ErrorKind::Timeout));
        assert!(report.results[0].input.is_some());
    }
}
