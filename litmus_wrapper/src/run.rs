//! Subprocess invocation with timeouts, cancellation, and group kill.

use lithunt_core::cancel::{CancelToken, Cancelled};
use lithunt_io::read_background;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setsid, Pid};
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use wait_timeout::ChildExt;

/// How a service binary is invoked: command name plus fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunInfo {
    pub cmd: String,
    pub args: Vec<String>,
}

impl RunInfo {
    pub fn new(cmd: impl Into<String>) -> Self {
        RunInfo {
            cmd: cmd.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Applies a user override: a non-empty command replaces ours, and
    /// override arguments are appended after ours.
    pub fn override_with(&mut self, new: &RunInfo) {
        if !new.cmd.is_empty() {
            self.cmd = new.cmd.clone();
        }
        self.args.extend(new.args.iter().cloned());
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: io::Error,
    },
    #[error("'{cmd}' exited with code {code}: {stderr}")]
    Exit {
        cmd: String,
        code: i32,
        stderr: String,
    },
    #[error("'{cmd}' killed by a signal")]
    Signalled { cmd: String },
    #[error("'{cmd}' timed out after {timeout:?}")]
    Timeout { cmd: String, timeout: Duration },
    #[error("operation cancelled")]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RunError {
    /// The child's exit code, if this error wraps one. The director
    /// propagates it as the process exit status.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunError::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Captured result of one subprocess run.
#[derive(Debug)]
pub struct ExecOutput {
    /// Exit code; `None` when the child died to a signal.
    pub code: Option<i32>,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

/// Things that can run external service binaries.
pub trait Runner: Send + Sync {
    /// Runs to completion, classifying nothing: non-zero exits and timeouts
    /// come back inside the output.
    fn run(&self, cancel: &CancelToken, ri: &RunInfo) -> Result<ExecOutput, RunError>;

    /// Runs and demands success, converting bad outcomes into errors.
    fn run_ok(&self, cancel: &CancelToken, ri: &RunInfo) -> Result<ExecOutput, RunError> {
        let out = self.run(cancel, ri)?;
        if out.timed_out {
            return Err(RunError::Timeout {
                cmd: ri.cmd.clone(),
                timeout: out.duration,
            });
        }
        match out.code {
            Some(0) => Ok(out),
            Some(code) => Err(RunError::Exit {
                cmd: ri.cmd.clone(),
                code,
                stderr: stderr_snippet(&out.stderr),
            }),
            None => Err(RunError::Signalled { cmd: ri.cmd.clone() }),
        }
    }
}

fn stderr_snippet(stderr: &[u8]) -> String {
    let s = String::from_utf8_lossy(stderr);
    let s = s.trim();
    match s.char_indices().nth(4096) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Subprocess runner with a per-job timeout and a termination grace period.
///
/// Children lead their own session so that expiry can signal the whole
/// process group: SIGTERM first, SIGKILL once the grace runs out.
#[derive(Debug, Clone)]
pub struct CmdRunner {
    pub timeout: Option<Duration>,
    pub grace: Duration,
}

/// How long expired subprocesses get between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Poll interval while waiting on a child; bounds cancellation latency.
const WAIT_SLICE: Duration = Duration::from_millis(100);

impl Default for CmdRunner {
    fn default() -> Self {
        CmdRunner {
            timeout: None,
            grace: DEFAULT_GRACE,
        }
    }
}

impl CmdRunner {
    pub fn new(timeout: Option<Duration>, grace: Duration) -> Self {
        CmdRunner { timeout, grace }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        CmdRunner {
            timeout: Some(timeout),
            ..CmdRunner::default()
        }
    }

    fn terminate(&self, child: &mut Child) {
        let pid = Pid::from_raw(child.id() as i32);
        let _ = killpg(pid, Signal::SIGTERM);
        match child.wait_timeout(self.grace) {
            Ok(Some(_)) => {}
            _ => {
                let _ = killpg(pid, Signal::SIGKILL);
                let _ = child.wait();
            }
        }
    }
}

impl Runner for CmdRunner {
    fn run(&self, cancel: &CancelToken, ri: &RunInfo) -> Result<ExecOutput, RunError> {
        cancel.check()?;

        let mut cmd = Command::new(&ri.cmd);
        cmd.args(&ri.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        unsafe {
            cmd.pre_exec(|| {
                let _ = setsid();
                Ok(())
            });
        }
        log::debug!("running: {} {:?}", ri.cmd, ri.args);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| RunError::Spawn {
            cmd: ri.cmd.clone(),
            source: e,
        })?;
        let stdout = read_background(child.stdout.take().unwrap());
        let stderr = read_background(child.stderr.take().unwrap());

        let mut waited = Duration::ZERO;
        let status = loop {
            if cancel.is_cancelled() {
                self.terminate(&mut child);
                return Err(RunError::Cancelled(Cancelled));
            }
            let step = match self.timeout {
                Some(t) if waited >= t => break None,
                Some(t) => WAIT_SLICE.min(t - waited),
                None => WAIT_SLICE,
            };
            if let Some(st) = child.wait_timeout(step)? {
                break Some(st);
            }
            waited += step;
        };

        let (code, timed_out) = match status {
            Some(st) => (st.code(), false),
            None => {
                self.terminate(&mut child);
                (None, true)
            }
        };

        Ok(ExecOutput {
            code,
            timed_out,
            stdout: stdout.wait_finish(),
            stderr: stderr.wait_finish(),
            duration: start.elapsed(),
        })
    }
}
