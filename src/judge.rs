use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures_util::{StreamExt, stream};
use uuid::Uuid;

use crate::{
    config::JudgeConfig,
    error::{CaseError, ErrorKind, JudgeError},
    executor::{BuiltCase, CaseJob, TestCaseExecutor, failed_result},
    language::{ArgumentBinding, LANGUAGE_TABLE_VERSION, LanguageRegistry},
    metrics::MetricsRegistry,
    models::{
        ExecutionLimits, JudgeEvent, JudgeReport, JudgeStage, Submission, TestCaseResult, Verdict,
    },
    sandbox::{ProcessSandbox, SandboxBackend},
    scheduler::{CancelSignal, Scheduler},
};

pub const CANCELLED_MESSAGE: &str = "submission cancelled";

/// Evaluates submissions. Cheap to clone; clones share the process slots,
/// the in-flight registry and the metrics.
#[derive(Clone)]
pub struct Judge {
    inner: Arc<JudgeInner>,
}

struct JudgeInner {
    config: JudgeConfig,
    languages: Arc<LanguageRegistry>,
    executor: TestCaseExecutor,
    scheduler: Scheduler,
    metrics: Arc<MetricsRegistry>,
}

/// Per-case results plus the submission-wide failure, if any.
struct Judged {
    results: Vec<TestCaseResult>,
    error: Option<String>,
    failure: Option<ErrorKind>,
}

/// State of a case after the first build.
enum Prepared {
    Built(BuiltCase),
    Failed(CaseError),
    Skipped,
}

impl Judge {
    pub fn from_config(config: JudgeConfig) -> Result<Self, JudgeError> {
        let backend: Arc<dyn SandboxBackend> = Arc::new(ProcessSandbox::new(&config));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(
        config: JudgeConfig,
        backend: Arc<dyn SandboxBackend>,
    ) -> Result<Self, JudgeError> {
        std::fs::create_dir_all(&config.workspace_root)?;
        let languages = Arc::new(LanguageRegistry::new()?);
        let scheduler = Scheduler::new(config.max_concurrent_processes);
        tracing::info!(
            backend = backend.name(),
            languages = ?languages.supported(),
            language_table_version = LANGUAGE_TABLE_VERSION,
            max_concurrent_processes = config.max_concurrent_processes,
            per_submission_parallelism = config.per_submission_parallelism,
            workspace_root = %config.workspace_root.display(),
            "judge ready"
        );
        let executor = TestCaseExecutor::new(
            languages.clone(),
            backend,
            scheduler.clone(),
            config.workspace_root.clone(),
        );

        Ok(Self {
            inner: Arc::new(JudgeInner {
                config,
                languages,
                executor,
                scheduler,
                metrics: Arc::new(MetricsRegistry::new()),
            }),
        })
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.inner.metrics.clone()
    }

    pub fn supported_languages(&self) -> Vec<&'static str> {
        self.inner.languages.supported()
    }

    /// Requests cancellation of an in-flight submission. Returns false when
    /// no submission with that id is being judged.
    pub fn cancel(&self, submission_id: Uuid) -> bool {
        let found = self.inner.scheduler.cancel(submission_id);
        tracing::info!(submission_id = %submission_id, found, "cancellation requested");
        found
    }

    pub fn cancel_all(&self) -> usize {
        let cancelled = self.inner.scheduler.cancel_all();
        tracing::info!(cancelled, "cancelling all submissions");
        cancelled
    }

    /// Judges every test case and aggregates the verdict. Always returns a
    /// complete report; failures are recorded in it.
    pub async fn evaluate(&self, submission: Submission) -> JudgeReport {
        let started_at = Utc::now();
        let admission = self.inner.scheduler.admit(submission.id);
        let cancel = admission.signal();
        let _in_flight = InFlight::enter(&self.inner.metrics);
        let trail = EventTrail::new(submission.id);
        trail.record(
            JudgeStage::Received,
            format!(
                "{} test cases in {}",
                submission.test_cases.len(),
                submission.language_id
            ),
        );

        let judged = self.judge_cases(&submission, &cancel, &trail).await;

        trail.record(JudgeStage::Aggregating, "aggregating results");
        for result in &judged.results {
            self.inner.metrics.case_finished(result);
        }
        let verdict = Verdict::from_results(&judged.results, judged.error);
        self.inner
            .metrics
            .submission_finished(&verdict, judged.failure);
        trail.record(
            JudgeStage::Done,
            format!(
                "{}/{} passed, score {}",
                verdict.passed_cases, verdict.total_cases, verdict.score
            ),
        );

        JudgeReport {
            submission_id: submission.id,
            language_id: submission.language_id,
            verdict,
            results: judged.results,
            events: trail.into_events(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn judge_cases(
        &self,
        submission: &Submission,
        cancel: &CancelSignal,
        trail: &EventTrail,
    ) -> Judged {
        let cases = &submission.test_cases;
        if cases.is_empty() {
            return Judged {
                results: Vec::new(),
                error: Some("submission has no test cases".to_string()),
                failure: None,
            };
        }

        let Some(language) = self.inner.languages.get(&submission.language_id) else {
            let message = JudgeError::UnsupportedLanguage(submission.language_id.clone()).to_string();
            tracing::warn!(submission_id = %submission.id, language = %submission.language_id, "{message}");
            return fail_all(submission, ErrorKind::InternalError, message);
        };

        let limits = submission
            .limits
            .clone()
            .map(ExecutionLimits::normalized)
            .unwrap_or_else(|| self.inner.config.default_limits.clone());
        let binding = ArgumentBinding::from_submission(submission);
        let job = |index: usize| CaseJob {
            index,
            case: &cases[index],
            language,
            source_code: &submission.source_code,
            binding: &binding,
            limits: &limits,
        };
        let executor = &self.inner.executor;

        // The first case whose program can be written is built first. Cases
        // before it keep their own error.
        let mut prepared: Vec<Prepared> = cases.iter().map(|_| Prepared::Skipped).collect();
        if language.needs_build() {
            trail.record(JudgeStage::Building, "building first buildable case");
            for (index, slot) in prepared.iter_mut().enumerate() {
                match executor.build(&job(index), cancel, false).await {
                    Ok(built) => {
                        *slot = Prepared::Built(built);
                        break;
                    }
                    Err(err @ CaseError::Compile(_)) => {
                        tracing::info!(submission_id = %submission.id, case = index, "compile error, skipping all cases");
                        return fail_all(submission, ErrorKind::CompileError, err.to_string());
                    }
                    Err(CaseError::Cancelled) => {
                        return fail_all(submission, ErrorKind::Cancelled, CANCELLED_MESSAGE.to_string());
                    }
                    Err(err) => {
                        tracing::debug!(submission_id = %submission.id, case = index, error = %err, "case cannot be built, trying the next");
                        *slot = Prepared::Failed(err);
                    }
                }
            }
        }
        let skip_build = language.spec.syntax_check_only
            && prepared.iter().any(|slot| matches!(slot, Prepared::Built(_)));

        let parallelism = self.inner.config.per_submission_parallelism.max(1);
        let results: Vec<TestCaseResult> = stream::iter(0..cases.len())
            .map(|index| {
                let prepared = std::mem::replace(&mut prepared[index], Prepared::Skipped);
                let job = job(index);
                async move {
                    if cancel.is_cancelled() {
                        return failed_result(&job, CaseError::Cancelled);
                    }
                    trail.record(JudgeStage::Running(index), format!("running case {index}"));
                    match prepared {
                        Prepared::Built(built) => executor.run(&job, built, cancel).await,
                        Prepared::Failed(err) => failed_result(&job, err),
                        Prepared::Skipped => executor.execute(&job, cancel, skip_build).await,
                    }
                }
            })
            .buffered(parallelism)
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Judged {
                results,
                error: Some(CANCELLED_MESSAGE.to_string()),
                failure: Some(ErrorKind::Cancelled),
            };
        }
        let fault = results
            .iter()
            .find(|r| r.error_kind.is_some_and(ErrorKind::is_submission_wide))
            .map(|r| (r.error_kind, r.message.clone()));
        match fault {
            Some((failure, message)) => Judged {
                results,
                error: message,
                failure,
            },
            None => Judged {
                results,
                error: None,
                failure: None,
            },
        }
    }
}

fn fail_all(submission: &Submission, kind: ErrorKind, message: String) -> Judged {
    let results = submission
        .test_cases
        .iter()
        .enumerate()
        .map(|(index, case)| TestCaseResult::failed(index, case, kind, Some(message.clone())))
        .collect();
    Judged {
        results,
        error: Some(message),
        failure: Some(kind),
    }
}

struct EventTrail {
    submission_id: Uuid,
    events: Mutex<Vec<JudgeEvent>>,
}

impl EventTrail {
    fn new(submission_id: Uuid) -> Self {
        Self {
            submission_id,
            events: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, stage: JudgeStage, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(submission_id = %self.submission_id, stage = ?stage, "{message}");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(JudgeEvent {
                at: Utc::now(),
                stage,
                message,
            });
    }

    fn into_events(self) -> Vec<JudgeEvent> {
        self.events
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the in-flight gauge up for as long as an evaluation is alive,
/// including when its future is dropped early.
struct InFlight<'a>(&'a MetricsRegistry);

impl<'a> InFlight<'a> {
    fn enter(metrics: &'a MetricsRegistry) -> Self {
        metrics.submission_started();
        Self(metrics)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.submission_left();
    }
}
