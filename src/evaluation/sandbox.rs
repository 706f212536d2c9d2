//! Subprocess sandbox for running untrusted completions.
//!
//! Every evaluation writes a self-contained program into a fresh temporary
//! directory and runs it in its own interpreter process with a cleared
//! environment, null stdin, resource limits and a hard wall-clock timeout.
//! The process is killed when the timeout expires or the evaluation is
//! dropped. Nothing is shared between samples.
//!
//! A clean exit status is not enough to pass: the program prints a per-run
//! marker after `check` returns, and only output ending in that marker counts.
//! Code that leaves early through `sys.exit`, `SystemExit` or `os._exit` never
//! reaches it.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::extract::extract_code;
use super::job::{CodeEvaluator, EvalJob, Verdict};

/// Default per-sample wall-clock limit.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default address-space limit applied inside the child.
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 1024;

/// Default cap on captured stdout/stderr per stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

const PROGRAM_FILE: &str = "program.py";

/// Configuration for the evaluation sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter executable, resolved through `PATH`.
    pub interpreter: String,
    /// Hard wall-clock limit per sample.
    pub timeout: Duration,
    /// Address-space limit in MB. 0 disables it.
    pub memory_limit_mb: u64,
    /// Trailing bytes of stdout/stderr kept per stream; earlier output is dropped.
    pub max_output_bytes: usize,
}

impl SandboxConfig {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout: DEFAULT_TIMEOUT,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new("python3")
    }
}

/// Process-isolated [`CodeEvaluator`].
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Checks that the interpreter can be started.
    pub async fn is_available(&self) -> bool {
        let probe = Command::new(&self.config.interpreter)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        matches!(
            tokio::time::timeout(Duration::from_secs(5), probe).await,
            Ok(Ok(status)) if status.success()
        )
    }

    /// Assembles the full program for a job, ending with a print of `marker`.
    pub fn build_program(&self, job: &EvalJob, marker: &str) -> String {
        let code = extract_code(&job.completion);
        let mut program = guard_preamble(self.config.memory_limit_mb, self.config.timeout);
        program.push_str(&job.prompt);
        // Conditioned prompts end in a comment line; code must not join it.
        if !job.prompt.is_empty() && !job.prompt.ends_with('\n') {
            program.push('\n');
        }
        program.push_str(&code);
        program.push('\n');
        program.push_str(&job.test);
        program.push('\n');
        program.push_str(&format!("check({})\n", job.entry_point));
        program.push_str(&format!("print({:?}, flush=True)\n", marker));
        program
    }

    async fn run_program(&self, dir: &Path, program: &str, marker: &str) -> Verdict {
        let script = dir.join(PROGRAM_FILE);
        if let Err(e) = tokio::fs::write(&script, program).await {
            return Verdict::failed(format!("sandbox error: {}", e));
        }

        let mut command = Command::new(&self.config.interpreter);
        command
            .arg("-I")
            .arg(PROGRAM_FILE)
            .current_dir(dir)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return Verdict::failed(format!("sandbox error: {}", e)),
        };

        let cap = self.config.max_output_bytes;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = tokio::time::timeout(self.config.timeout, async {
            tokio::join!(
                child.wait(),
                read_tail(stdout, cap),
                read_tail(stderr, cap)
            )
        })
        .await;

        match outcome {
            Err(_) => {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Kill after timeout failed");
                }
                Verdict::timed_out()
            }
            Ok((Err(e), _, _)) => Verdict::failed(format!("sandbox error: {}", e)),
            Ok((Ok(status), stdout, stderr)) => {
                if status.success() {
                    if completed(&stdout, marker) {
                        Verdict::passed()
                    } else {
                        Verdict::failed("exited before tests completed")
                    }
                } else {
                    let stderr = String::from_utf8_lossy(&stderr);
                    match last_line(&stderr) {
                        Some(line) => Verdict::failed(line),
                        None => Verdict::failed(format!("process exited with {}", status)),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CodeEvaluator for Sandbox {
    async fn evaluate(&self, job: &EvalJob) -> Verdict {
        let run_id = Uuid::new_v4();
        let dir = match tempfile::Builder::new()
            .prefix(&format!("goal-drift-{}-", run_id.simple()))
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                warn!(task_id = %job.task_id, error = %e, "Could not create sandbox directory");
                return Verdict::failed(format!("sandbox error: {}", e));
            }
        };

        let marker = completion_marker(run_id);
        let program = self.build_program(job, &marker);
        let verdict = self.run_program(dir.path(), &program, &marker).await;
        debug!(
            task_id = %job.task_id,
            run_id = %run_id,
            passed = verdict.passed,
            detail = %verdict.detail,
            "Sample evaluated"
        );
        verdict
    }
}

/// Python prelude applied before the untrusted code runs.
///
/// Limits are best effort: platforms without the `resource` module skip them.
fn guard_preamble(memory_limit_mb: u64, timeout: Duration) -> String {
    let memory_bytes = memory_limit_mb.saturating_mul(1024 * 1024);
    let cpu_secs = timeout.as_secs() + 1;
    format!(
        r#"import builtins as _b, os as _os, shutil as _sh, subprocess as _sp
try:
    import resource as _r
    if {memory_bytes} > 0:
        _r.setrlimit(_r.RLIMIT_AS, ({memory_bytes}, {memory_bytes}))
        _r.setrlimit(_r.RLIMIT_DATA, ({memory_bytes}, {memory_bytes}))
    _r.setrlimit(_r.RLIMIT_CPU, ({cpu_secs}, {cpu_secs}))
except Exception:
    pass
for _name in ("_exit", "kill", "killpg", "system", "putenv", "remove", "removedirs", "rmdir",
              "fchdir", "setuid", "fork", "forkpty", "rename", "renames", "truncate",
              "replace", "unlink", "fchmod", "fchown", "chmod", "chown", "chroot", "lchown"):
    if hasattr(_os, _name):
        setattr(_os, _name, None)
_sh.rmtree = None
_sh.move = None
_sh.chown = None
_sp.Popen = None
_b.exit = None
_b.quit = None
del _b, _os, _sh, _sp
"#
    )
}

fn completion_marker(run_id: Uuid) -> String {
    format!("goal-drift:done:{}", run_id.simple())
}

fn completed(stdout: &[u8], marker: &str) -> bool {
    String::from_utf8_lossy(stdout).trim_end().ends_with(marker)
}

/// Drains `reader`, keeping only the last `cap` bytes.
async fn read_tail<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut tail = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > cap {
                    tail.drain(..tail.len() - cap);
                }
            }
        }
    }
    tail
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn job(completion: &str) -> EvalJob {
        EvalJob {
            task_id: "T/0".to_string(),
            prompt: "def add(a, b):\n".to_string(),
            completion: completion.to_string(),
            test: "def check(candidate):\n    assert candidate(2, 3) == 5\n".to_string(),
            entry_point: "add".to_string(),
        }
    }

    async fn sandbox() -> Option<Sandbox> {
        let sandbox = Sandbox::new(SandboxConfig::default().with_timeout(Duration::from_secs(2)));
        if sandbox.is_available().await {
            Some(sandbox)
        } else {
            eprintln!("python3 not available, skipping");
            None
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.interpreter, "python3");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.memory_limit_mb, 1024);
    }

    #[test]
    fn test_build_program_layout() {
        let sandbox = Sandbox::default();
        let program = sandbox.build_program(&job("```python\n    return a + b\n```"), "done-1");
        let body = "def add(a, b):\n    return a + b\ndef check(candidate):\n    assert candidate(2, 3) == 5\n\ncheck(add)\nprint(\"done-1\", flush=True)\n";
        assert!(program.ends_with(body));
        assert!(program.contains("RLIMIT_AS"));
    }

    #[test]
    fn test_build_program_after_comment_prompt() {
        let sandbox = Sandbox::default();
        let mut job = job("    return a + b\n");
        job.prompt = "def add(a, b):\n# IMPORTANT: be quick.".to_string();
        let program = sandbox.build_program(&job, "done");
        assert!(program.contains("# IMPORTANT: be quick.\n    return a + b\n"));
    }

    #[test]
    fn test_preamble_memory_limit_saturates() {
        let preamble = guard_preamble(u64::MAX, DEFAULT_TIMEOUT);
        assert!(preamble.contains(&u64::MAX.to_string()));
        assert!(preamble.contains("\"_exit\""));
    }

    #[test]
    fn test_last_line() {
        assert_eq!(
            last_line("Traceback:\n  File x\nZeroDivisionError: division by zero\n\n"),
            Some("ZeroDivisionError: division by zero")
        );
        assert_eq!(last_line("  \n"), None);
    }

    #[test]
    fn test_completed_requires_trailing_marker() {
        let marker = completion_marker(Uuid::new_v4());
        assert!(completed(format!("noise\n{}\n", marker).as_bytes(), &marker));
        assert!(!completed(b"", &marker));
        assert!(!completed(format!("{}\nlater output\n", marker).as_bytes(), &marker));
        assert!(!completed(b"goal-drift:done:0000\n", &marker));
    }

    #[tokio::test]
    async fn test_read_tail_keeps_last_bytes() {
        let data: &[u8] = b"0123456789abcdef";
        assert_eq!(read_tail(Some(data), 4).await, b"cdef");
        assert_eq!(read_tail(Some(data), 64).await, data);
        assert!(read_tail(None::<&[u8]>, 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_cleanly() {
        let sandbox = Sandbox::new(SandboxConfig::new("definitely-not-a-python-binary"));
        assert!(!sandbox.is_available().await);
        let verdict = sandbox.evaluate(&job("    return a + b\n")).await;
        assert!(!verdict.passed);
        assert!(verdict.detail.starts_with("failed: sandbox error"));
    }

    #[tokio::test]
    async fn test_correct_completion_passes() {
        let Some(sandbox) = sandbox().await else { return };
        let verdict = sandbox.evaluate(&job("    return a + b\n")).await;
        assert!(verdict.passed, "{}", verdict.detail);
        assert_eq!(verdict.detail, "passed");
    }

    #[tokio::test]
    async fn test_assertion_failure_reports_stderr() {
        let Some(sandbox) = sandbox().await else { return };
        let verdict = sandbox.evaluate(&job("    return 1 / 0\n")).await;
        assert!(!verdict.passed);
        assert!(verdict.detail.contains("ZeroDivisionError"), "{}", verdict.detail);
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let Some(sandbox) = sandbox().await else { return };
        let start = Instant::now();
        let verdict = sandbox.evaluate(&job("    while True:\n        pass\n")).await;
        assert!(verdict.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_exit_is_disabled() {
        let Some(sandbox) = sandbox().await else { return };
        let verdict = sandbox.evaluate(&job("    exit(0)\n")).await;
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn test_early_exit_is_not_a_pass() {
        let Some(sandbox) = sandbox().await else { return };
        for body in [
            "    import sys\n    sys.exit(0)\n",
            "    raise SystemExit(0)\n",
        ] {
            let verdict = sandbox.evaluate(&job(body)).await;
            assert!(!verdict.passed, "{}", body);
            assert_eq!(verdict.detail, "failed: exited before tests completed");
        }
    }

    #[tokio::test]
    async fn test_noisy_passing_sample_still_passes() {
        let Some(sandbox) = sandbox().await else { return };
        let sandbox = Sandbox::new(sandbox.config().clone().with_max_output_bytes(256));
        let verdict = sandbox
            .evaluate(&job("    print('x' * 100000)\n    return a + b\n"))
            .await;
        assert!(verdict.passed, "{}", verdict.detail);
    }
}
