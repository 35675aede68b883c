//! Script executor
//!
//! Runs user-supplied script bodies as subprocesses. Each call is
//! independent: the body is written to a temp file under the executor's
//! scratch directory, launched under the platform interpreter, and
//! supervised until exit, timeout, or cancellation. stdout and stderr are
//! line-buffered and delivered to the caller in strict per-stream order;
//! ordering between the two streams is not guaranteed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;

/// Which stream a captured line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Callback invoked once per complete output line.
pub type LineCallback = Arc<dyn Fn(StreamKind, &str) + Send + Sync>;

/// Options for a single execution.
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory; the executor's own cwd is inherited when unset.
    pub work_dir: Option<PathBuf>,
    /// Extra environment, layered over (and overriding) the baseline env.
    pub env: HashMap<String, String>,
    /// Wall-clock bound; zero means no timeout.
    pub timeout: Duration,
    /// Per-line delivery of captured output.
    pub on_line: Option<LineCallback>,
}

/// Outcome of a completed execution. A non-zero exit code is a normal
/// completion here; mapping it to a step failure is the caller's concern.
#[derive(Debug)]
pub struct ExecuteResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Script kinds accepted by the syntax validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Bash,
    Python,
    PowerShell,
}

/// Errors from launching or supervising a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The interpreter process could not be started at all. Distinct from a
    /// script that started and exited non-zero.
    #[error("failed to start script: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("script timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("script cancelled")]
    Cancelled,

    #[error("i/o failure while supervising script: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawns and supervises script subprocesses.
///
/// May be called from any task; calls are fully independent and take no
/// shared lock.
#[derive(Clone)]
pub struct ScriptExecutor {
    temp_dir: PathBuf,
}

impl ScriptExecutor {
    pub fn new(config: &Config) -> Self {
        Self { temp_dir: config.script_temp_dir() }
    }

    /// Executes `script` and waits for it to finish.
    ///
    /// The body is materialized to a temp file (removed on return regardless
    /// of outcome) and launched under `bash` on POSIX or `powershell` on
    /// Windows. On cancellation or timeout the child is killed and the
    /// corresponding error returned; lines already captured have been
    /// delivered through `on_line`.
    pub async fn execute(
        &self,
        token: &CancellationToken,
        script: &str,
        opts: ExecuteOptions,
    ) -> Result<ExecuteResult, ScriptError> {
        let script_file = self.create_temp_script(script).await?;

        let result = self.execute_file(token, &script_file, opts).await;

        // Best effort: the scratch dir is also swept by the cleanup job.
        let _ = tokio::fs::remove_file(&script_file).await;

        result
    }

    async fn execute_file(
        &self,
        token: &CancellationToken,
        script_file: &PathBuf,
        opts: ExecuteOptions,
    ) -> Result<ExecuteResult, ScriptError> {
        let started = Instant::now();

        let mut cmd = interpreter_command(script_file);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &opts.work_dir {
            cmd.current_dir(dir);
        }

        // Baseline env is inherited; per-call pairs are layered on top and
        // override on key collision. Values pass through verbatim.
        cmd.envs(&opts.env);

        let mut child = cmd.spawn().map_err(ScriptError::Spawn)?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let stdout_task = spawn_line_reader(stdout, StreamKind::Stdout, opts.on_line.clone());
        let stderr_task = spawn_line_reader(stderr, StreamKind::Stderr, opts.on_line.clone());

        let outcome = if opts.timeout.is_zero() {
            tokio::select! {
                status = child.wait() => Outcome::Exited(status?),
                _ = token.cancelled() => Outcome::Cancelled,
            }
        } else {
            tokio::select! {
                status = child.wait() => Outcome::Exited(status?),
                _ = tokio::time::sleep(opts.timeout) => Outcome::TimedOut,
                _ = token.cancelled() => Outcome::Cancelled,
            }
        };

        let status = match outcome {
            Outcome::Exited(status) => Some(status),
            Outcome::TimedOut | Outcome::Cancelled => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        // Readers run to EOF once the child is gone, preserving per-stream
        // line order up to the point of termination.
        let stdout_buf = stdout_task.await.unwrap_or_default();
        let stderr_buf = stderr_task.await.unwrap_or_default();

        let duration = started.elapsed();

        match outcome {
            Outcome::Exited(_) => {
                let status = status.expect("exit status present");
                Ok(ExecuteResult {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: stdout_buf,
                    stderr: stderr_buf,
                    duration,
                })
            }
            Outcome::TimedOut => Err(ScriptError::Timeout { elapsed: duration }),
            Outcome::Cancelled => Err(ScriptError::Cancelled),
        }
    }

    /// Runs the interpreter in syntax-check mode and returns the first
    /// reported error, or `None` when the body parses cleanly.
    pub async fn validate(
        &self,
        script: &str,
        kind: ScriptKind,
    ) -> Result<Option<String>, ScriptError> {
        let script_file = self.create_temp_script(script).await?;

        let mut cmd = match kind {
            ScriptKind::Bash => {
                let mut c = Command::new("bash");
                c.arg("-n").arg(&script_file);
                c
            }
            ScriptKind::Python => {
                let mut c = Command::new("python");
                c.arg("-m").arg("py_compile").arg(&script_file);
                c
            }
            ScriptKind::PowerShell => {
                let mut c = Command::new("powershell");
                c.arg("-NoProfile").arg("-Command").arg(format!(
                    "[void][scriptblock]::Create((Get-Content -Raw '{}'))",
                    script_file.display()
                ));
                c
            }
        };

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(ScriptError::Spawn);

        let _ = tokio::fs::remove_file(&script_file).await;

        let output = output?;
        if output.status.success() {
            return Ok(None);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let first = stderr
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("syntax check failed")
            .to_string();

        Ok(Some(first))
    }

    async fn create_temp_script(&self, script: &str) -> Result<PathBuf, ScriptError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let path = self.temp_dir.join(format!("script_{}{}", Uuid::new_v4(), script_extension()));
        tokio::fs::write(&path, script).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(path)
    }
}

#[derive(Clone, Copy)]
enum Outcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

fn script_extension() -> &'static str {
    if cfg!(windows) { ".ps1" } else { ".sh" }
}

fn interpreter_command(script_file: &PathBuf) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("powershell");
        cmd.arg("-ExecutionPolicy").arg("Bypass").arg("-File").arg(script_file);
        cmd
    } else {
        let mut cmd = Command::new("bash");
        cmd.arg(script_file);
        cmd
    }
}

fn spawn_line_reader<R>(
    reader: R,
    stream: StreamKind,
    on_line: Option<LineCallback>,
) -> tokio::task::JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut captured = String::new();

        while let Ok(Some(line)) = lines.next_line().await {
            captured.push_str(&line);
            captured.push('\n');
            if let Some(cb) = &on_line {
                cb(stream, &line);
            }
        }

        captured
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn executor() -> (ScriptExecutor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_data_path(dir.path());
        (ScriptExecutor::new(&config), dir)
    }

    fn opts_with_timeout(secs: u64) -> ExecuteOptions {
        ExecuteOptions { timeout: Duration::from_secs(secs), ..Default::default() }
    }

    #[tokio::test]
    async fn test_zero_exit() {
        let (exec, _dir) = executor();
        let token = CancellationToken::new();

        let result =
            exec.execute(&token, "echo hello; exit 0", opts_with_timeout(30)).await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_normal_completion() {
        let (exec, _dir) = executor();
        let token = CancellationToken::new();

        let result = exec.execute(&token, "exit 7", opts_with_timeout(30)).await.unwrap();

        assert_eq!(result.exit_code, 7);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let (exec, _dir) = executor();
        let token = CancellationToken::new();

        let opts = ExecuteOptions { timeout: Duration::from_millis(300), ..Default::default() };
        let started = Instant::now();
        let err = exec.execute(&token, "sleep 30", opts).await.unwrap_err();

        assert!(matches!(err, ScriptError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let (exec, _dir) = executor();
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });

        let err = exec.execute(&token, "sleep 30", opts_with_timeout(60)).await.unwrap_err();
        assert!(matches!(err, ScriptError::Cancelled));
    }

    #[tokio::test]
    async fn test_env_injection_overrides_baseline() {
        let (exec, _dir) = executor();
        let token = CancellationToken::new();

        std::env::set_var("FLOWFORGE_TEST_BASELINE", "baseline");
        let mut env = HashMap::new();
        env.insert("FLOWFORGE_TEST_BASELINE".to_string(), "override".to_string());
        env.insert("FLOWFORGE_TEST_EXTRA".to_string(), "extra".to_string());

        let opts = ExecuteOptions { env, timeout: Duration::from_secs(30), ..Default::default() };
        let result = exec
            .execute(&token, "echo $FLOWFORGE_TEST_BASELINE $FLOWFORGE_TEST_EXTRA", opts)
            .await
            .unwrap();

        assert!(result.stdout.contains("override extra"));
    }

    #[tokio::test]
    async fn test_work_dir() {
        let (exec, _dir) = executor();
        let token = CancellationToken::new();
        let work = tempfile::tempdir().unwrap();

        let opts = ExecuteOptions {
            work_dir: Some(work.path().to_path_buf()),
            timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let result = exec.execute(&token, "pwd", opts).await.unwrap();

        let reported = result.stdout.trim();
        let expected = work.path().canonicalize().unwrap();
        assert_eq!(
            PathBuf::from(reported).canonicalize().unwrap(),
            expected,
            "script should run inside the requested working directory"
        );
    }

    #[tokio::test]
    async fn test_line_callback_preserves_stream_order() {
        let (exec, _dir) = executor();
        let token = CancellationToken::new();

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let on_line: LineCallback = Arc::new(move |stream, line| {
            if stream == StreamKind::Stdout {
                sink.lock().unwrap().push(line.to_string());
            }
        });

        let opts = ExecuteOptions {
            on_line: Some(on_line),
            timeout: Duration::from_secs(30),
            ..Default::default()
        };
        exec.execute(&token, "echo one; echo two; echo three", opts).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_stderr_captured_separately() {
        let (exec, _dir) = executor();
        let token = CancellationToken::new();

        let result = exec
            .execute(&token, "echo out; echo err 1>&2", opts_with_timeout(30))
            .await
            .unwrap();

        assert!(result.stdout.contains("out"));
        assert!(!result.stdout.contains("err"));
        assert!(result.stderr.contains("err"));
    }

    #[tokio::test]
    async fn test_temp_script_removed_after_run() {
        let (exec, dir) = executor();
        let token = CancellationToken::new();

        exec.execute(&token, "exit 0", opts_with_timeout(30)).await.unwrap();

        let temp_dir = Config::default().with_data_path(dir.path()).script_temp_dir();
        let leftovers: Vec<_> = std::fs::read_dir(&temp_dir).unwrap().collect();
        assert!(leftovers.is_empty(), "temp script should be removed on return");
    }

    #[tokio::test]
    async fn test_validate_bash() {
        let (exec, _dir) = executor();

        assert!(exec.validate("echo ok", ScriptKind::Bash).await.unwrap().is_none());

        let err = exec.validate("if [ -z foo ; then", ScriptKind::Bash).await.unwrap();
        assert!(err.is_some());
    }
}
