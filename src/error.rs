use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures that stop the judge from being built or from starting a
/// submission at all.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("invalid harness template for {language}: {source}")]
    Template {
        language: &'static str,
        #[source]
        source: Box<handlebars::TemplateError>,
    },
    #[error("invalid entry point pattern for {language}: {source}")]
    Pattern {
        language: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serializable failure classification attached to a `TestCaseResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CompileError,
    NoEntryPointFound,
    UnsupportedValueShape,
    SpawnFailure,
    Timeout,
    OutputTooLarge,
    OutputShapeMismatch,
    RuntimeError,
    ResourceExceeded,
    Cancelled,
    InternalError,
}

impl ErrorKind {
    /// Whether this kind fails the whole submission rather than a single case.
    pub fn is_submission_wide(self) -> bool {
        matches!(self, Self::CompileError | Self::InternalError)
    }
}

/// A failure local to one test case. Never escapes the test case executor:
/// it is folded into the case's result.
#[derive(Debug, Clone, Error)]
pub enum CaseError {
    #[error("compilation failed: {0}")]
    Compile(String),
    #[error("no entry point found: {0}")]
    NoEntryPoint(String),
    #[error("value has no literal form: {0}")]
    UnsupportedValueShape(String),
    #[error("failed to spawn: {0}")]
    Spawn(String),
    #[error("timed out after {0}ms")]
    Timeout(u64),
    #[error("output exceeded {0} bytes")]
    OutputTooLarge(usize),
    #[error("output shape mismatch: {0}")]
    OutputShapeMismatch(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),
    #[error("cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl CaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Compile(_) => ErrorKind::CompileError,
            Self::NoEntryPoint(_) => ErrorKind::NoEntryPointFound,
            Self::UnsupportedValueShape(_) => ErrorKind::UnsupportedValueShape,
            Self::Spawn(_) => ErrorKind::SpawnFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::OutputTooLarge(_) => ErrorKind::OutputTooLarge,
            Self::OutputShapeMismatch(_) => ErrorKind::OutputShapeMismatch,
            Self::Runtime(_) => ErrorKind::RuntimeError,
            Self::ResourceExceeded(_) => ErrorKind::ResourceExceeded,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }
}

impl From<handlebars::RenderError> for CaseError {
    fn from(value: handlebars::RenderError) -> Self {
        Self::Internal(format!("harness render failed: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::{CaseError, ErrorKind};

    #[test]
    fn case_errors_map_to_their_kind() {
        assert_eq!(CaseError::Timeout(1000).kind(), ErrorKind::Timeout);
        assert_eq!(CaseError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            CaseError::Compile("x".into()).kind(),
            ErrorKind::CompileError
        );
        assert!(ErrorKind::CompileError.is_submission_wide());
        assert!(!ErrorKind::Timeout.is_submission_wide());
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let raw = serde_json::to_string(&ErrorKind::OutputShapeMismatch).unwrap();
        assert_eq!(raw, "\"output_shape_mismatch\"");
    }
}
