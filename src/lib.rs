//! Sandboxed multi-language code judge.
//!
//! A [`Judge`] takes a [`Submission`] (language, source, ordered test cases),
//! runs every case in its own throwaway workspace under kernel resource
//! limits, and returns a [`JudgeReport`] with per-case results and an
//! aggregate [`Verdict`]. Failures never escape as errors: they are recorded
//! in the report.

pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod judge;
pub mod language;
pub mod metrics;
pub mod models;
pub mod sandbox;
pub mod scheduler;

pub use codec::CanonicalValue;
pub use config::{JudgeConfig, LogFormat};
pub use error::{CaseError, ErrorKind, JudgeError};
pub use judge::Judge;
pub use models::{
    ExecutionLimits, JudgeEvent, JudgeReport, JudgeStage, Submission, TestCase, TestCaseResult,
    Verdict,
};
