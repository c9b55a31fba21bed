use std::{
    io,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use nix::{
    errno::Errno,
    sys::{
        resource::{Resource, setrlimit},
        signal::{Signal, killpg},
        wait::{Id, WaitPidFlag, waitid},
    },
    unistd::Pid,
};
use tokio::{io::AsyncReadExt, process::Command, task::JoinHandle};

use crate::{
    config::JudgeConfig,
    sandbox::{ExecutionOutcome, ProcessLimits, RunStep, SandboxBackend, Workspace},
    scheduler::CancelSignal,
};

/// Runs steps as local child processes: one process group per step, a
/// cleared environment, and rlimits set between fork and exec.
pub struct ProcessSandbox {
    search_path: String,
    passthrough: Vec<(String, String)>,
    kill_grace: Duration,
}

impl ProcessSandbox {
    pub fn new(config: &JudgeConfig) -> Self {
        let passthrough = config
            .env_passthrough
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
            .collect();
        Self {
            search_path: config.sandbox_path.clone(),
            passthrough,
            kill_grace: Duration::from_millis(config.kill_grace_ms),
        }
    }

    fn resolve_program(&self, workspace: &Workspace, program: &str) -> Result<PathBuf, String> {
        if let Some(local) = program.strip_prefix("./") {
            let path = workspace.path().join(local);
            return if path.is_file() {
                Ok(path)
            } else {
                Err(format!("{program}: not found in workspace"))
            };
        }
        if program.contains('/') {
            return Ok(PathBuf::from(program));
        }
        which::which_in(program, Some(&self.search_path), workspace.path())
            .map_err(|err| format!("{program}: {err}"))
    }

    fn command(&self, workspace: &Workspace, program: PathBuf, step: &RunStep) -> Command {
        let mut command = Command::new(program);
        command
            .args(&step.args)
            .current_dir(workspace.path())
            .env_clear()
            .env("PATH", &self.search_path)
            .env("HOME", workspace.path())
            .env("TMPDIR", workspace.path())
            .env("LANG", "C.UTF-8")
            .envs(self.passthrough.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let limits = step.limits;
        // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
        unsafe {
            command.pre_exec(move || apply_limits(&limits));
        }
        command
    }
}

#[async_trait]
impl SandboxBackend for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        step: RunStep,
        mut cancel: CancelSignal,
    ) -> ExecutionOutcome {
        if cancel.is_cancelled() {
            return ExecutionOutcome::cancelled();
        }
        let program = match self.resolve_program(workspace, &step.program) {
            Ok(program) => program,
            Err(message) => return ExecutionOutcome::spawn_failed(message),
        };

        let started = Instant::now();
        let mut child = match self.command(workspace, program, &step).spawn() {
            Ok(child) => child,
            Err(err) => {
                return ExecutionOutcome::spawn_failed(format!("{}: {err}", step.program));
            }
        };
        let Some(leader) = child.id().map(|pid| Pid::from_raw(pid as i32)) else {
            return ExecutionOutcome::spawn_failed(format!("{}: exited before it was tracked", step.program));
        };
        let group = ProcessGroup(leader);
        let guard = GroupGuard(group);
        tracing::debug!(
            workspace = %workspace.id(),
            step = step.kind.as_str(),
            program = %step.program,
            pid = child.id(),
            "spawned sandboxed process"
        );

        let limit = step.max_output_bytes;
        let mut stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(read_limited(pipe, limit, Overflow::Kill(group))));
        let mut stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(read_limited(pipe, limit, Overflow::Drain)));

        // The leader stays a zombie until `child.wait()` below, so its pgid
        // cannot be recycled before the group is killed.
        let mut exited = tokio::task::spawn_blocking(move || wait_for_exit(leader));
        let mut timed_out = false;
        let mut cancelled = false;
        let mut wait_error = None;
        tokio::select! {
            waited = tokio::time::timeout(step.timeout, &mut exited) => match waited {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(errno))) => wait_error = Some(format!("wait failed: {errno}")),
                Ok(Err(err)) => wait_error = Some(format!("wait failed: {err}")),
                Err(_) => timed_out = true,
            },
            _ = cancel.cancelled() => cancelled = true,
        }

        // Background children must not outlive the step, even after a clean exit.
        group.kill();
        let status = match child.wait().await {
            Ok(status) => Some(status),
            Err(err) => {
                wait_error.get_or_insert_with(|| format!("wait failed: {err}"));
                None
            }
        };
        let wall_time = started.elapsed();

        let (stdout, stdout_truncated) = join_reader(&mut stdout_task, self.kill_grace).await;
        let (stderr, stderr_truncated) = join_reader(&mut stderr_task, self.kill_grace).await;
        drop(guard);

        let outcome = ExecutionOutcome {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.and_then(|s| s.code()),
            signal: status.and_then(|s| s.signal()),
            wall_time,
            timed_out,
            cancelled,
            output_truncated: stdout_truncated,
            stderr_truncated,
            spawn_error: wait_error,
        };
        tracing::debug!(
            workspace = %workspace.id(),
            step = step.kind.as_str(),
            elapsed_ms = wall_time.as_millis() as u64,
            exit_code = outcome.exit_code,
            signal = outcome.signal,
            timed_out,
            cancelled,
            "sandboxed process finished"
        );
        outcome
    }
}

#[derive(Debug, Clone, Copy)]
struct ProcessGroup(Pid);

impl ProcessGroup {
    fn kill(self) {
        match killpg(self.0, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => tracing::warn!(pgid = self.0.as_raw(), error = %err, "failed to kill process group"),
        }
    }
}

/// Kills the group if the step future is dropped before it finishes.
struct GroupGuard(ProcessGroup);

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.0.kill();
    }
}

/// Blocks until `pid` exits without reaping it.
fn wait_for_exit(pid: Pid) -> nix::Result<()> {
    loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Err(Errno::EINTR) => continue,
            other => return other.map(drop),
        }
    }
}

fn apply_limits(limits: &ProcessLimits) -> io::Result<()> {
    if let Some(secs) = limits.cpu_secs {
        // SIGXCPU at the soft limit, SIGKILL one second later.
        setrlimit(Resource::RLIMIT_CPU, secs, secs + 1)?;
    }
    if let Some(bytes) = limits.address_space_bytes {
        setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
    }
    if let Some(bytes) = limits.file_size_bytes {
        setrlimit(Resource::RLIMIT_FSIZE, bytes, bytes)?;
    }
    Ok(())
}

async fn join_reader(
    task: &mut Option<JoinHandle<(Vec<u8>, bool)>>,
    grace: Duration,
) -> (Vec<u8>, bool) {
    let Some(handle) = task.as_mut() else {
        return (Vec::new(), false);
    };
    match tokio::time::timeout(grace, &mut *handle).await {
        Ok(Ok(read)) => read,
        Ok(Err(_)) => (Vec::new(), false),
        Err(_) => {
            // A process that left the group still holds the pipe open.
            handle.abort();
            (Vec::new(), false)
        }
    }
}

/// What a reader does once a stream passes the output cap.
#[derive(Debug, Clone, Copy)]
enum Overflow {
    /// End the step: the result stream is unusable past the cap.
    Kill(ProcessGroup),
    /// Keep draining so the writer never blocks, discarding the excess.
    Drain,
}

/// Reads up to `limit` bytes and reports whether the stream went past it.
async fn read_limited<R>(mut reader: R, limit: usize, overflow: Overflow) -> (Vec<u8>, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(limit.min(8192));
    let mut chunk = [0u8; 4096];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return (out, truncated),
            Ok(n) => {
                let remaining = limit - out.len();
                if n <= remaining {
                    out.extend_from_slice(&chunk[..n]);
                    continue;
                }
                out.extend_from_slice(&chunk[..remaining]);
                truncated = true;
                if let Overflow::Kill(group) = overflow {
                    group.kill();
                    return (out, true);
                }
            }
        }
    }
}
