//! Blocking external tool invocation with a bounded timeout.
//!
//! A nonzero exit is data, not an error: callers get a [`ToolOutput`] with
//! the exit status and both captured streams and decide what it means.
//! Only spawn/IO failures surface as `io::Error`.

use std::{
    io::{self, Read, Write},
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

/// Default bound for one tool invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured result of one finished (or killed) process.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub program: String,
    pub args: Vec<String>,
    /// Exit code; `None` when killed by a signal or by the timeout
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl ToolOutput {
    /// Exited on its own with status 0.
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Printable command line for diagnostics.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Short description of how the process ended.
    pub fn outcome(&self) -> String {
        if self.timed_out {
            "timed out".to_string()
        } else {
            match self.status {
                Some(code) => format!("exited with status {code}"),
                None => "was terminated by a signal".to_string(),
            }
        }
    }
}

/// Runs programs in a fixed working directory with a timeout.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    cwd: PathBuf,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl ToolRunner {
    pub fn new(cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            cwd: cwd.into(),
            timeout,
            env: Vec::new(),
        }
    }

    /// Add an environment variable for every invocation.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run `program args...` with no stdin.
    pub fn run(&self, program: &str, args: &[&str]) -> io::Result<ToolOutput> {
        self.run_with_stdin(program, args, None)
    }

    /// Run `program args...`, feeding `stdin` if given.
    pub fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> io::Result<ToolOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.cwd)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        debug!(program, ?args, cwd = %self.cwd.display(), "spawning tool");
        let mut child = cmd.spawn()?;

        // Feed stdin from a thread so a chatty child cannot deadlock us
        let writer = match (stdin, child.stdin.take()) {
            (Some(bytes), Some(mut pipe)) => {
                let bytes = bytes.to_vec();
                Some(thread::spawn(move || -> io::Result<()> {
                    pipe.write_all(&bytes)?;
                    Ok(())
                }))
            }
            _ => None,
        };

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let (status, timed_out) = wait_bounded(&mut child, self.timeout)?;
        if timed_out {
            warn!(program, timeout_secs = self.timeout.as_secs(), "tool timed out, killed");
        }

        if let Some(writer) = writer {
            // A child that exits early closes the pipe; that is not our failure
            match writer.join() {
                Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                _ => {}
            }
        }

        Ok(ToolOutput {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            status,
            stdout: join_drain(stdout)?,
            stderr: join_drain(stderr)?,
            timed_out,
        })
    }
}

type DrainHandle = Option<thread::JoinHandle<io::Result<Vec<u8>>>>;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> DrainHandle {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn join_drain(handle: DrainHandle) -> io::Result<Vec<u8>> {
    match handle {
        Some(h) => h
            .join()
            .map_err(|_| io::Error::other("output reader thread panicked"))?,
        None => Ok(Vec::new()),
    }
}

/// Poll until exit or deadline; kills the child on timeout.
fn wait_bounded(child: &mut Child, timeout: Duration) -> io::Result<(Option<i32>, bool)> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status.code(), false));
        }
        if Instant::now() >= deadline {
            child.kill().ok();
            child.wait()?;
            return Ok((None, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}
