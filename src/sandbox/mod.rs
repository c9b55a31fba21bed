mod process;
mod workspace;

use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;

use crate::{models::ExecutionLimits, scheduler::CancelSignal};

pub use process::ProcessSandbox;
pub use workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Build,
    Run,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Run => "run",
        }
    }
}

/// Kernel limits applied to the child before exec. `None` leaves the
/// inherited limit in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLimits {
    pub cpu_secs: Option<u64>,
    pub address_space_bytes: Option<u64>,
    pub file_size_bytes: Option<u64>,
}

/// One command to run inside a workspace.
#[derive(Debug, Clone)]
pub struct RunStep {
    pub kind: StepKind,
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub limits: ProcessLimits,
}

impl RunStep {
    /// Build steps only get a wall-clock bound; compilers need more memory
    /// and CPU than user programs are granted.
    pub fn build(command: &[&str], limits: &ExecutionLimits) -> Self {
        Self::from_command(
            StepKind::Build,
            command,
            Duration::from_millis(limits.build_timeout_ms),
            limits.max_output_bytes,
            ProcessLimits::default(),
        )
    }

    pub fn run(command: &[&str], limits: &ExecutionLimits, limit_address_space: bool) -> Self {
        let process_limits = ProcessLimits {
            cpu_secs: Some(limits.cpu_time_secs()),
            address_space_bytes: limit_address_space.then(|| limits.memory_mb * 1024 * 1024),
            file_size_bytes: Some(limits.max_file_size_bytes),
        };
        Self::from_command(
            StepKind::Run,
            command,
            Duration::from_millis(limits.timeout_ms),
            limits.max_output_bytes,
            process_limits,
        )
    }

    fn from_command(
        kind: StepKind,
        command: &[&str],
        timeout: Duration,
        max_output_bytes: usize,
        limits: ProcessLimits,
    ) -> Self {
        let (program, args) = command.split_first().map_or(("", &[][..]), |(p, a)| (*p, a));
        Self {
            kind,
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            timeout,
            max_output_bytes,
            limits,
        }
    }
}

/// What happened to one step. Backends never fail: every problem is a field
/// here for the executor to classify.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub wall_time: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
    pub output_truncated: bool,
    /// Stderr went past the cap; the excess was discarded and the step kept running.
    pub stderr_truncated: bool,
    pub spawn_error: Option<String>,
}

impl ExecutionOutcome {
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self {
            spawn_error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
            && !self.timed_out
            && !self.cancelled
            && !self.output_truncated
            && self.spawn_error.is_none()
    }

    /// The kernel limit that killed the process, if any.
    pub fn resource_exceeded(&self) -> Option<&'static str> {
        match self.signal? {
            s if s == Signal::SIGXCPU as i32 => Some("cpu time limit"),
            s if s == Signal::SIGXFSZ as i32 => Some("file size limit"),
            _ => None,
        }
    }

    /// Stderr if the program wrote any, otherwise how it exited.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exited with status {code}"),
            (None, Some(signal)) => match Signal::try_from(signal) {
                Ok(signal) => format!("killed by {signal}"),
                Err(_) => format!("killed by signal {signal}"),
            },
            (None, None) => "terminated abnormally".to_string(),
        }
    }
}

#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        workspace: &Workspace,
        step: RunStep,
        cancel: CancelSignal,
    ) -> ExecutionOutcome;
}
