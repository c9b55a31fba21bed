use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{
    codec::{Shape, decode_from_text, values_equal},
    error::CaseError,
    language::{ArgumentBinding, CompiledLanguage, LanguageRegistry},
    models::{ExecutionLimits, TestCase, TestCaseResult},
    sandbox::{ExecutionOutcome, RunStep, SandboxBackend, Workspace},
    scheduler::{CancelSignal, Scheduler},
};

const DIAGNOSTIC_EXCERPT_CHARS: usize = 2000;

/// Everything needed to run one test case of a submission.
#[derive(Clone, Copy)]
pub struct CaseJob<'a> {
    pub index: usize,
    pub case: &'a TestCase,
    pub language: &'a CompiledLanguage,
    pub source_code: &'a str,
    pub binding: &'a ArgumentBinding,
    pub limits: &'a ExecutionLimits,
}

/// A materialized program whose build step, if any, has succeeded.
#[derive(Debug)]
pub struct BuiltCase {
    workspace: Workspace,
    build_time: Duration,
}

impl BuiltCase {
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn build_time(&self) -> Duration {
        self.build_time
    }
}

pub struct TestCaseExecutor {
    languages: Arc<LanguageRegistry>,
    backend: Arc<dyn SandboxBackend>,
    scheduler: Scheduler,
    workspace_root: PathBuf,
}

impl TestCaseExecutor {
    pub fn new(
        languages: Arc<LanguageRegistry>,
        backend: Arc<dyn SandboxBackend>,
        scheduler: Scheduler,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            languages,
            backend,
            scheduler,
            workspace_root,
        }
    }

    /// Writes the case's program into a fresh workspace and runs the build
    /// step unless `skip_build` is set.
    pub async fn build(
        &self,
        job: &CaseJob<'_>,
        cancel: &CancelSignal,
        skip_build: bool,
    ) -> Result<BuiltCase, CaseError> {
        if cancel.is_cancelled() {
            return Err(CaseError::Cancelled);
        }
        let artifact = self.languages.materialize(
            job.language.spec.id,
            job.source_code,
            &job.case.input,
            job.binding,
        )?;
        let workspace = Workspace::create(&self.workspace_root)
            .map_err(|err| CaseError::Internal(format!("failed to create workspace: {err}")))?;
        workspace
            .write_files(&artifact.files)
            .await
            .map_err(|err| CaseError::Internal(format!("failed to write program: {err}")))?;

        let mut build_time = Duration::ZERO;
        if let Some(command) = job.language.spec.build_command.filter(|_| !skip_build) {
            let step = RunStep::build(command, job.limits);
            let outcome = self
                .scheduler
                .execute(self.backend.as_ref(), &workspace, step, cancel.clone())
                .await;
            build_time = outcome.wall_time;
            classify_build(&outcome, job.limits)?;
            tracing::debug!(
                case = job.index,
                language = job.language.spec.id,
                workspace = %workspace.id(),
                elapsed_ms = build_time.as_millis() as u64,
                "build succeeded"
            );
        }

        Ok(BuiltCase {
            workspace,
            build_time,
        })
    }

    /// Runs a built case and compares its output with the expected value.
    pub async fn run(
        &self,
        job: &CaseJob<'_>,
        built: BuiltCase,
        cancel: &CancelSignal,
    ) -> TestCaseResult {
        let spec = job.language.spec;
        let step = RunStep::run(spec.run_command, job.limits, spec.limit_address_space);
        let outcome = self
            .scheduler
            .execute(self.backend.as_ref(), &built.workspace, step, cancel.clone())
            .await;

        let workspace_id = built.workspace.id();
        if let Err(err) = built.workspace.close() {
            tracing::warn!(workspace = %workspace_id, error = %err, "failed to remove workspace");
        }

        let wall_time_ms = outcome.wall_time.as_millis() as u64;
        let mut result = match classify_run(&outcome, job.limits) {
            Ok(()) => compare_output(job, &outcome.stdout),
            Err(err) => failed_result(job, err),
        };
        result.wall_time_ms = wall_time_ms;
        tracing::debug!(
            case = job.index,
            language = spec.id,
            workspace = %workspace_id,
            elapsed_ms = wall_time_ms,
            passed = result.passed,
            error_kind = ?result.error_kind,
            "test case finished"
        );
        result
    }

    /// Builds (unless skipped) and runs one case. Never fails: every problem
    /// ends up in the returned result.
    pub async fn execute(
        &self,
        job: &CaseJob<'_>,
        cancel: &CancelSignal,
        skip_build: bool,
    ) -> TestCaseResult {
        match self.build(job, cancel, skip_build).await {
            Ok(built) => self.run(job, built, cancel).await,
            Err(err) => failed_result(job, err),
        }
    }
}

pub fn failed_result(job: &CaseJob<'_>, err: CaseError) -> TestCaseResult {
    TestCaseResult::failed(job.index, job.case, err.kind(), Some(err.to_string()))
}

fn classify_build(outcome: &ExecutionOutcome, limits: &ExecutionLimits) -> Result<(), CaseError> {
    if outcome.cancelled {
        return Err(CaseError::Cancelled);
    }
    if let Some(message) = &outcome.spawn_error {
        return Err(CaseError::Spawn(message.clone()));
    }
    if outcome.timed_out {
        return Err(CaseError::Compile(format!(
            "build timed out after {}ms",
            limits.build_timeout_ms
        )));
    }
    if outcome.exit_code != Some(0) {
        let mut diagnostics = outcome.stderr.trim().to_string();
        if diagnostics.is_empty() {
            diagnostics = outcome.stdout.trim().to_string();
        }
        if diagnostics.is_empty() {
            diagnostics = outcome.diagnostics();
        }
        return Err(CaseError::Compile(excerpt(&diagnostics)));
    }
    Ok(())
}

fn classify_run(outcome: &ExecutionOutcome, limits: &ExecutionLimits) -> Result<(), CaseError> {
    if outcome.cancelled {
        return Err(CaseError::Cancelled);
    }
    if outcome.timed_out {
        return Err(CaseError::Timeout(limits.timeout_ms));
    }
    if let Some(message) = &outcome.spawn_error {
        return Err(CaseError::Spawn(message.clone()));
    }
    if let Some(limit) = outcome.resource_exceeded() {
        return Err(CaseError::ResourceExceeded(limit.to_string()));
    }
    if outcome.output_truncated {
        return Err(CaseError::OutputTooLarge(limits.max_output_bytes));
    }
    if outcome.exit_code != Some(0) {
        return Err(CaseError::Runtime(excerpt(&outcome.diagnostics())));
    }
    Ok(())
}

/// The harness prints the result on the last line; anything before it is the
/// program's own output.
fn compare_output(job: &CaseJob<'_>, stdout: &str) -> TestCaseResult {
    let expected = &job.case.expected_output;
    let Some(line) = stdout.lines().map(str::trim).rfind(|line| !line.is_empty()) else {
        return failed_result(
            job,
            CaseError::OutputShapeMismatch("program printed no result".to_string()),
        );
    };

    let actual = decode_from_text(line);
    let (actual_shape, expected_shape) = (Shape::of(&actual), Shape::of(expected));
    let mut result = TestCaseResult::for_case(job.index, job.case);
    if actual_shape != expected_shape {
        let err = CaseError::OutputShapeMismatch(format!(
            "expected {} but got {}",
            expected_shape.name(),
            actual_shape.name()
        ));
        result.error_kind = Some(err.kind());
        result.message = Some(err.to_string());
    } else {
        result.passed = values_equal(&actual, expected);
    }
    result.actual_output = Some(actual);
    result
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(DIAGNOSTIC_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    fn case(expected: serde_json::Value) -> TestCase {
        TestCase {
            input: json!({"arr": [1, 2, 3]}).as_object().cloned().unwrap(),
            expected_output: expected,
            hidden: false,
        }
    }

    fn limits() -> ExecutionLimits {
        ExecutionLimits {
            timeout_ms: 1000,
            build_timeout_ms: 5000,
            memory_mb: 256,
            max_output_bytes: 1024,
            max_file_size_bytes: 4096,
        }
    }

    fn with_job<T>(case: &TestCase, f: impl FnOnce(&CaseJob<'_>) -> T) -> T {
        let registry = LanguageRegistry::new().unwrap();
        let limits = limits();
        let binding = ArgumentBinding::default();
        let job = CaseJob {
            index: 2,
            case,
            language: registry.get("python").unwrap(),
            source_code: "def solution(arr):\n    return sum(arr)\n",
            binding: &binding,
            limits: &limits,
        };
        f(&job)
    }

    #[test]
    fn decodes_the_last_printed_line() {
        let case = case(json!(6));
        let result = with_job(&case, |job| compare_output(job, "debug: 1\n[1, 2]\n\n6\n\n"));
        assert!(result.passed);
        assert_eq!(result.index, 2);
        assert_eq!(result.actual_output, Some(json!(6)));
        assert_eq!(result.error_kind, None);
    }

    #[test]
    fn wrong_answer_keeps_actual_output() {
        let case = case(json!(99));
        let result = with_job(&case, |job| compare_output(job, "\n15\n"));
        assert!(!result.passed);
        assert_eq!(result.actual_output, Some(json!(15)));
        assert_eq!(result.error_kind, None);
    }

    #[test]
    fn different_shape_is_a_mismatch() {
        let case = case(json!([1, 2]));
        let result = with_job(&case, |job| compare_output(job, "\nnot a list\n"));
        assert!(!result.passed);
        assert_eq!(result.error_kind, Some(ErrorKind::OutputShapeMismatch));
        assert_eq!(result.actual_output, Some(json!("not a list")));

        let silent = with_job(&case, |job| compare_output(job, "  \n"));
        assert_eq!(silent.error_kind, Some(ErrorKind::OutputShapeMismatch));
        assert!(silent.actual_output.is_none());
    }

    #[test]
    fn run_classification_prefers_cancellation_and_timeout() {
        let limits = limits();
        let both = ExecutionOutcome {
            timed_out: true,
            cancelled: true,
            ..ExecutionOutcome::default()
        };
        assert!(matches!(classify_run(&both, &limits), Err(CaseError::Cancelled)));

        let timed_out = ExecutionOutcome {
            timed_out: true,
            output_truncated: true,
            ..ExecutionOutcome::default()
        };
        assert!(matches!(
            classify_run(&timed_out, &limits),
            Err(CaseError::Timeout(1000))
        ));

        let flooded = ExecutionOutcome {
            output_truncated: true,
            signal: Some(9),
            ..ExecutionOutcome::default()
        };
        assert!(matches!(
            classify_run(&flooded, &limits),
            Err(CaseError::OutputTooLarge(1024))
        ));

        let crashed = ExecutionOutcome {
            exit_code: Some(1),
            stderr: "ZeroDivisionError: division by zero\n".into(),
            ..ExecutionOutcome::default()
        };
        match classify_run(&crashed, &limits) {
            Err(CaseError::Runtime(message)) => assert!(message.contains("ZeroDivisionError")),
            other => panic!("unexpected classification: {other:?}"),
        }

        let clean = ExecutionOutcome {
            exit_code: Some(0),
            ..ExecutionOutcome::default()
        };
        assert!(classify_run(&clean, &limits).is_ok());
    }

    #[test]
    fn noisy_stderr_does_not_fail_the_case() {
        let limits = limits();
        let noisy = ExecutionOutcome {
            exit_code: Some(0),
            stdout: "\n7\n".into(),
            stderr: "debug ".repeat(200),
            stderr_truncated: true,
            ..ExecutionOutcome::default()
        };
        assert!(noisy.succeeded());
        assert!(classify_run(&noisy, &limits).is_ok());

        let case = case(json!(7));
        let result = with_job(&case, |job| compare_output(job, &noisy.stdout));
        assert!(result.passed);
    }

    #[test]
    fn build_failures_are_compile_errors() {
        let limits = limits();
        let syntax = ExecutionOutcome {
            exit_code: Some(1),
            stderr: "solution.js:1\nSyntaxError: Unexpected token\n".into(),
            ..ExecutionOutcome::default()
        };
        match classify_build(&syntax, &limits) {
            Err(CaseError::Compile(message)) => assert!(message.contains("SyntaxError")),
            other => panic!("unexpected classification: {other:?}"),
        }

        let slow = ExecutionOutcome {
            timed_out: true,
            ..ExecutionOutcome::default()
        };
        assert!(matches!(classify_build(&slow, &limits), Err(CaseError::Compile(_))));

        let missing = ExecutionOutcome::spawn_failed("g++: cannot find binary path");
        assert!(matches!(classify_build(&missing, &limits), Err(CaseError::Spawn(_))));
    }

    #[test]
    fn excerpt_cuts_on_char_boundary() {
        let long = "é".repeat(DIAGNOSTIC_EXCERPT_CHARS + 10);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), DIAGNOSTIC_EXCERPT_CHARS + 3);
        assert_eq!(excerpt("short"), "short");
    }
}
