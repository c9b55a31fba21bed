use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    error::ErrorKind,
    models::{TestCaseResult, Verdict},
};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    submissions_total: AtomicU64,
    submissions_correct_total: AtomicU64,
    compile_errors_total: AtomicU64,
    cancelled_total: AtomicU64,
    cases_total: AtomicU64,
    cases_passed_total: AtomicU64,
    case_timeouts_total: AtomicU64,
    submissions_in_flight: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submission_started(&self) {
        self.submissions_total.fetch_add(1, Ordering::Relaxed);
        self.submissions_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn case_finished(&self, result: &TestCaseResult) {
        self.cases_total.fetch_add(1, Ordering::Relaxed);
        if result.passed {
            self.cases_passed_total.fetch_add(1, Ordering::Relaxed);
        }
        if result.error_kind == Some(ErrorKind::Timeout) {
            self.case_timeouts_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn submission_finished(&self, verdict: &Verdict, failure: Option<ErrorKind>) {
        if verdict.is_correct {
            self.submissions_correct_total.fetch_add(1, Ordering::Relaxed);
        }
        match failure {
            Some(ErrorKind::CompileError) => {
                self.compile_errors_total.fetch_add(1, Ordering::Relaxed);
            }
            Some(ErrorKind::Cancelled) => {
                self.cancelled_total.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.submissions_in_flight.load(Ordering::Relaxed)
    }

    pub fn render_prometheus(&self) -> String {
        format!(
            concat!(
                "# TYPE judge_submissions_total counter\n",
                "judge_submissions_total {}\n",
                "# TYPE judge_submissions_correct_total counter\n",
                "judge_submissions_correct_total {}\n",
                "# TYPE judge_compile_errors_total counter\n",
                "judge_compile_errors_total {}\n",
                "# TYPE judge_cancelled_total counter\n",
                "judge_cancelled_total {}\n",
                "# TYPE judge_cases_total counter\n",
                "judge_cases_total {}\n",
                "# TYPE judge_cases_passed_total counter\n",
                "judge_cases_passed_total {}\n",
                "# TYPE judge_case_timeouts_total counter\n",
                "judge_case_timeouts_total {}\n",
                "# TYPE judge_submissions_in_flight gauge\n",
                "judge_submissions_in_flight {}\n"
            ),
            self.submissions_total.load(Ordering::Relaxed),
            self.submissions_correct_total.load(Ordering::Relaxed),
            self.compile_errors_total.load(Ordering::Relaxed),
            self.cancelled_total.load(Ordering::Relaxed),
            self.cases_total.load(Ordering::Relaxed),
            self.cases_passed_total.load(Ordering::Relaxed),
            self.case_timeouts_total.load(Ordering::Relaxed),
            self.submissions_in_flight.load(Ordering::Relaxed),
        )
    }

    /// Pairs with `submission_started`; never drops the gauge below zero.
    pub fn submission_left(&self) {
        let mut current = self.submissions_in_flight.load(Ordering::Relaxed);
        while current > 0 {
            match self.submissions_in_flight.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;
    use crate::{error::ErrorKind, models::Verdict};

    #[test]
    fn in_flight_does_not_underflow() {
        let metrics = MetricsRegistry::new();
        metrics.submission_left();
        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("judge_submissions_in_flight 0"));
    }

    #[test]
    fn counts_compile_errors_once_per_submission() {
        let metrics = MetricsRegistry::new();
        metrics.submission_started();
        assert_eq!(metrics.in_flight(), 1);
        metrics.submission_finished(
            &Verdict::from_results(&[], None),
            Some(ErrorKind::CompileError),
        );
        metrics.submission_left();

        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("judge_submissions_total 1"));
        assert!(rendered.contains("judge_compile_errors_total 1"));
        assert!(rendered.contains("judge_submissions_in_flight 0"));
    }
}
