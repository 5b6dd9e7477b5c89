//! Runs generated programs in a fresh interpreter process per call.
//!
//! Every run gets its own scratch directory, a cleared environment, a wall-clock
//! limit and (on unix) an address-space ceiling. Faults of any kind come back as
//! an [`ExecutionResult`]; nothing is propagated to the caller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::{ProgramExecutor, SandboxPolicy, OUTPUT_DIR_ENV};
use crate::domain::{ExecutionResult, FaultKind};

/// How long captured pipes may keep draining after the interpreter is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

pub struct SubprocessSandbox {
    policy: SandboxPolicy,
}

impl SubprocessSandbox {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self { policy }
    }

    async fn execute(
        &self,
        declarations: &str,
        body: &str,
        started: Instant,
    ) -> Result<ExecutionResult> {
        let workdir = tempfile::Builder::new()
            .prefix("vpp-sandbox-")
            .tempdir()
            .context("creating sandbox directory")?;
        let script = workdir.path().join(&self.policy.file_name);
        tokio::fs::write(&script, format!("{declarations}\n{body}"))
            .await
            .context("writing program file")?;

        let mut command = Command::new(&self.policy.interpreter);
        command
            .args(&self.policy.interpreter_args)
            .arg(&script)
            .current_dir(workdir.path())
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.policy.env_passthrough {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        if let Some(dir) = &self.policy.output_dir {
            command.env(OUTPUT_DIR_ENV, dir);
        }
        #[cfg(unix)]
        confine(&mut command, &self.policy);

        let mut child = command
            .spawn()
            .with_context(|| format!("starting interpreter `{}`", self.policy.interpreter))?;
        let group = ProcessGroup::of(&child);

        let limit = self.policy.max_output_bytes;
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(capture(pipe, Arc::clone(&stdout_buf), limit)));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(capture(pipe, Arc::clone(&stderr_buf), limit)));

        let budget = Duration::from_millis(self.policy.max_duration_ms);
        let status = match timeout(budget, child.wait()).await {
            Ok(status) => Some(status.context("waiting for interpreter")?),
            Err(_) => None,
        };
        // Leftover background processes must not outlive the run.
        group.kill();
        if status.is_none() {
            let _ = child.kill().await;
        }

        finish(stdout_task).await;
        finish(stderr_task).await;
        let stdout = String::from_utf8_lossy(&stdout_buf.lock()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_buf.lock()).into_owned();
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            duration_ms,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "program finished"
        );

        Ok(match status {
            None => ExecutionResult::faulted(
                FaultKind::Timeout,
                format!("execution exceeded {} ms and was killed", self.policy.max_duration_ms),
                stdout,
                duration_ms,
            ),
            Some(status) if status.success() => ExecutionResult::success(stdout, duration_ms),
            Some(status) => classify_failure(status, &stderr, stdout, duration_ms),
        })
    }
}

#[async_trait]
impl ProgramExecutor for SubprocessSandbox {
    async fn run(&self, declarations: &str, body: &str) -> ExecutionResult {
        let started = Instant::now();
        match self.execute(declarations, body, started).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "sandbox could not run program");
                ExecutionResult::faulted(
                    FaultKind::Spawn,
                    format!("{e:#}"),
                    String::new(),
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }
}

/// Keeps the first `limit` bytes and drains the rest so the writer never blocks.
async fn capture<R: AsyncRead + Unpin>(mut pipe: R, buf: Arc<Mutex<Vec<u8>>>, limit: usize) {
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut guard = buf.lock();
                let room = limit.saturating_sub(guard.len());
                guard.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
}

async fn finish(task: Option<JoinHandle<()>>) {
    let Some(task) = task else { return };
    let abort = task.abort_handle();
    if timeout(DRAIN_GRACE, task).await.is_err() {
        // a grandchild still holds the pipe open
        abort.abort();
    }
}

/// Kills the interpreter's process group when dropped, so background processes
/// it started die with it even if the run is cancelled midway.
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn kill(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // SAFETY: plain syscall on the process group created for this child.
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn classify_failure(
    status: ExitStatus,
    stderr: &str,
    stdout: String,
    duration_ms: u64,
) -> ExecutionResult {
    let last_line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string);

    if let Some(code) = status.code() {
        let message = last_line.unwrap_or_else(|| format!("program exited with status {code}"));
        return ExecutionResult::faulted(FaultKind::Runtime, message, stdout, duration_ms);
    }

    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal: Option<i32> = None;

    let message = match (signal, last_line) {
        (Some(sig), Some(line)) => format!("terminated by signal {sig}: {line}"),
        (Some(sig), None) => format!("terminated by signal {sig}"),
        (None, Some(line)) => line,
        (None, None) => "terminated abnormally".to_string(),
    };
    ExecutionResult::faulted(FaultKind::Signal, message, stdout, duration_ms)
}

#[cfg(unix)]
fn confine(command: &mut Command, policy: &SandboxPolicy) {
    command.process_group(0);
    let memory = policy.max_memory_bytes;
    let cpu_seconds = policy.max_duration_ms / 1000 + 1;
    // SAFETY: the closure runs between fork and exec and only calls setrlimit,
    // which is async-signal-safe.
    unsafe {
        command.pre_exec(move || {
            let cpu = libc::rlimit {
                rlim_cur: cpu_seconds as libc::rlim_t,
                rlim_max: cpu_seconds as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if let Some(bytes) = memory {
                let mem = libc::rlimit {
                    rlim_cur: bytes as libc::rlim_t,
                    rlim_max: bytes as libc::rlim_t,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &mem) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell_policy(max_duration_ms: u64) -> SandboxPolicy {
        SandboxPolicy {
            interpreter: "sh".into(),
            interpreter_args: Vec::new(),
            file_name: "program.sh".into(),
            max_duration_ms,
            max_memory_bytes: None,
            max_output_bytes: 1024,
            env_passthrough: vec!["PATH".into()],
            output_dir: None,
        }
    }

    #[tokio::test]
    async fn captures_stdout_of_declarations_and_body() {
        let sandbox = SubprocessSandbox::new(shell_policy(5_000));
        let result = sandbox.run("X=5", "echo \"value=$X\"").await;
        assert!(result.is_success(), "{:?}", result.fault);
        assert_eq!(result.stdout, "value=5\n");
    }

    #[tokio::test]
    async fn runtime_fault_keeps_partial_output() {
        let sandbox = SubprocessSandbox::new(shell_policy(5_000));
        let result = sandbox
            .run("", "echo partial\necho 'ValueError: bad bound' >&2\nexit 3")
            .await;
        let fault = result.fault.clone().expect("fault");
        assert_eq!(fault.kind, FaultKind::Runtime);
        assert_eq!(fault.message, "ValueError: bad bound");
        assert_eq!(result.stdout, "partial\n");
    }

    #[tokio::test]
    async fn silent_failure_reports_exit_status() {
        let sandbox = SubprocessSandbox::new(shell_policy(5_000));
        let result = sandbox.run("", "exit 7").await;
        assert_eq!(result.error_text(), "program exited with status 7");
    }

    #[tokio::test]
    async fn runs_do_not_share_state() {
        let sandbox = SubprocessSandbox::new(shell_policy(5_000));
        let first = sandbox.run("", "touch leftover\nls").await;
        assert!(first.stdout.contains("leftover"));
        let second = sandbox.run("", "ls").await;
        assert!(!second.stdout.contains("leftover"));
        assert!(second.stdout.contains("program.sh"));
    }

    #[tokio::test]
    async fn host_environment_is_not_inherited() {
        std::env::set_var("VPP_SANDBOX_PROBE_SECRET", "hunter2");
        let sandbox = SubprocessSandbox::new(shell_policy(5_000));
        let result = sandbox.run("", "echo \"${VPP_SANDBOX_PROBE_SECRET:-unset}\"").await;
        assert_eq!(result.stdout, "unset\n");
    }

    #[tokio::test]
    async fn timeout_kills_program_and_keeps_partial_output() {
        let sandbox = SubprocessSandbox::new(shell_policy(300));
        let result = sandbox.run("", "echo started\nsleep 10\necho never").await;
        let fault = result.fault.clone().expect("fault");
        assert_eq!(fault.kind, FaultKind::Timeout);
        assert_eq!(result.stdout, "started\n");
        assert!(result.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn output_is_capped() {
        let sandbox = SubprocessSandbox::new(shell_policy(5_000));
        let body = "i=0\nwhile [ $i -lt 500 ]; do echo 0123456789; i=$((i+1)); done";
        let result = sandbox.run("", body).await;
        assert!(result.is_success());
        assert_eq!(result.stdout.len(), 1024);
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_spawn_fault() {
        let mut policy = shell_policy(1_000);
        policy.interpreter = "definitely-not-an-interpreter".into();
        let result = SubprocessSandbox::new(policy).run("", "").await;
        assert_eq!(result.fault.map(|f| f.kind), Some(FaultKind::Spawn));
    }

    #[tokio::test]
    async fn output_dir_is_exposed_to_program() {
        let out = tempfile::tempdir().unwrap();
        let mut policy = shell_policy(5_000);
        policy.output_dir = Some(out.path().to_path_buf());
        let result = SubprocessSandbox::new(policy)
            .run("", "echo saved > \"$SANDBOX_OUTPUT_DIR/result.txt\"")
            .await;
        assert!(result.is_success());
        assert!(out.path().join("result.txt").exists());
    }

    #[tokio::test]
    async fn resource_limits_reach_the_program() {
        let mut policy = shell_policy(4_000);
        policy.max_memory_bytes = Some(256 * 1024 * 1024);
        let result = SubprocessSandbox::new(policy)
            .run("", "ulimit -t\nulimit -v")
            .await;
        assert!(result.is_success(), "{:?}", result.fault);
        assert_eq!(result.stdout, "5\n262144\n");
    }

    #[tokio::test]
    async fn memory_ceiling_faults_and_keeps_partial_output() {
        let mut policy = shell_policy(20_000);
        policy.max_memory_bytes = Some(128 * 1024 * 1024);
        let result = SubprocessSandbox::new(policy)
            .run(
                "",
                "echo before\nbig=$(head -c 1000000000 /dev/zero | tr '\\0' x)\necho after",
            )
            .await;
        let fault = result.fault.clone().expect("fault");
        assert!(matches!(fault.kind, FaultKind::Runtime | FaultKind::Signal), "{fault:?}");
        assert_eq!(result.stdout, "before\n");
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        // zombies count as gone
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                let state = stat.rsplit_once(") ")?.1.chars().next()?;
                Some(state != 'Z' && state != 'X')
            })
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn cancelled_run_takes_background_processes_with_it() {
        let out = tempfile::tempdir().unwrap();
        let mut policy = shell_policy(60_000);
        policy.output_dir = Some(out.path().to_path_buf());
        let sandbox = SubprocessSandbox::new(policy);
        let body = "sleep 300 &\necho $! > \"$SANDBOX_OUTPUT_DIR/pid\"\nwait";

        let cancelled = timeout(Duration::from_millis(500), sandbox.run("", body)).await;
        assert!(cancelled.is_err());

        let pid: u32 = std::fs::read_to_string(out.path().join("pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = true;
        for _ in 0..40 {
            alive = is_running(pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "background process {pid} survived cancellation");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn finished_run_leaves_no_background_processes() {
        let out = tempfile::tempdir().unwrap();
        let mut policy = shell_policy(5_000);
        policy.output_dir = Some(out.path().to_path_buf());
        let body = "sleep 300 >/dev/null 2>&1 &\necho $! > \"$SANDBOX_OUTPUT_DIR/pid\"";
        let result = SubprocessSandbox::new(policy).run("", body).await;
        assert!(result.is_success(), "{:?}", result.fault);

        let pid: u32 = std::fs::read_to_string(out.path().join("pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!is_running(pid));
    }
}
